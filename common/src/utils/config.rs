use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Which object-store backend to construct.
///
/// `R2` is the only backend used outside tests; `Local`/`Memory` exist
/// purely so `StorageManager` can be exercised without network access
/// (mirrors the teacher's `StorageKind`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    R2,
    Local,
    Memory,
}

/// Process-wide configuration, loaded once at startup and passed explicitly
/// (spec.md §9: no ambient process-wide state besides the one dispatcher).
///
/// Field groups mirror spec.md §6 exactly: catalogue (`SURREALDB_*`, the
/// store substituting for the spec's schema-opaque Postgres/Supabase
/// contract), blob (`R2_*`), model (`VLLM_*`), and dispatch tuning.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageKind,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    // Catalogue store.
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,

    // Blob store (R2, S3-compatible).
    pub r2_endpoint: String,
    pub r2_access_key_id: String,
    pub r2_secret_access_key: String,
    #[serde(default = "default_r2_bucket")]
    pub r2_bucket: String,
    #[serde(default)]
    pub r2_custom_domain: Option<String>,
    #[serde(default = "default_r2_max_retries")]
    pub r2_max_retries: u32,
    #[serde(default = "default_r2_retry_delay")]
    pub r2_retry_delay: u64,

    // Model endpoint (OpenAI-compatible vLLM deployment).
    pub vllm_base_url: String,
    pub vllm_api_key: String,
    pub vllm_model: String,
    #[serde(default = "default_model_timeout_seconds")]
    pub model_timeout_seconds: u64,
    #[serde(default = "default_model_max_retries")]
    pub model_max_retries: u32,

    // Dispatch tuning.
    #[serde(default = "default_poll_seconds")]
    pub poll_seconds: u64,
    #[serde(default = "default_max_retries_per_job")]
    pub max_retries_per_job: u32,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    #[serde(default = "default_max_jobs_per_restart")]
    pub max_jobs_per_restart: u64,
    #[serde(default = "default_job_timeout_minutes")]
    pub job_timeout_minutes: i64,
    #[serde(default = "default_model_version")]
    pub model_version: String,
}

fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_r2_bucket() -> String {
    "segments".to_string()
}
fn default_r2_max_retries() -> u32 {
    3
}
fn default_r2_retry_delay() -> u64 {
    1
}
fn default_model_timeout_seconds() -> u64 {
    360
}
fn default_model_max_retries() -> u32 {
    3
}
fn default_poll_seconds() -> u64 {
    3
}
fn default_max_retries_per_job() -> u32 {
    2
}
fn default_num_workers() -> usize {
    1
}
fn default_max_jobs_per_restart() -> u64 {
    500
}
fn default_job_timeout_minutes() -> i64 {
    30
}
fn default_model_version() -> String {
    "nlp_pack_v1".to_string()
}

/// Load configuration from an optional `config.toml` overridden by environment variables.
///
/// Matches the teacher's `get_config()` shape: a file source (for local development) layered
/// under an `Environment` source (authoritative in deployment).
pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(any(test, feature = "test-utils"))]
impl AppConfig {
    /// Configuration for in-process tests; no network calls are ever made against these values.
    pub fn test_default() -> Self {
        Self {
            storage: StorageKind::Memory,
            data_dir: "/tmp/unused".into(),
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: "test".into(),
            surrealdb_database: "test".into(),
            r2_endpoint: "http://localhost:0".into(),
            r2_access_key_id: "test".into(),
            r2_secret_access_key: "test".into(),
            r2_bucket: default_r2_bucket(),
            r2_custom_domain: None,
            r2_max_retries: default_r2_max_retries(),
            r2_retry_delay: default_r2_retry_delay(),
            vllm_base_url: "http://localhost:0/v1".into(),
            vllm_api_key: "test".into(),
            vllm_model: "test-model".into(),
            model_timeout_seconds: default_model_timeout_seconds(),
            model_max_retries: default_model_max_retries(),
            poll_seconds: default_poll_seconds(),
            max_retries_per_job: default_max_retries_per_job(),
            num_workers: default_num_workers(),
            max_jobs_per_restart: default_max_jobs_per_restart(),
            job_timeout_minutes: default_job_timeout_minutes(),
            model_version: default_model_version(),
        }
    }
}
