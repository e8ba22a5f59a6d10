use crate::stored_object;

/// The raw and derived blob kinds the processor reads and writes (spec.md §3, "Asset").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    RawHtml,
    CleanedText,
    RawSubtitle,
    OcrJson,
    RawImage,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::RawHtml => "raw_html",
            AssetType::CleanedText => "cleaned_text",
            AssetType::RawSubtitle => "raw_subtitle",
            AssetType::OcrJson => "ocr_json",
            AssetType::RawImage => "raw_image",
        }
    }
}

stored_object!(Asset, "assets", {
    r2_key: String,
    asset_type: AssetType,
    byte_size: u64,
    digest: String
});
