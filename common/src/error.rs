use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Error taxonomy shared by every component of the worker.
///
/// Variants map onto the error kinds in spec.md §7: `Config` and
/// `NotFound` are fatal/input-missing, `Database`/`Storage`/`OpenAI` are
/// transient-I/O carriers (retried by callers before they ever reach this
/// type), `Validation`/`LLMParsing` are model-output errors, and
/// `InternalError` is the catch-all for anything else at the job boundary.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Model endpoint error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Blob storage error: {0}")]
    Storage(#[from] object_store::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Model output error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Stringified class-plus-message form stored in `pipeline_jobs.error` (spec.md §4.D).
    pub fn as_stored_error(&self) -> String {
        format!("{}: {self}", self.kind())
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Database(_) => "DatabaseError",
            Self::OpenAI(_) => "ModelError",
            Self::Storage(_) => "StorageError",
            Self::NotFound(_) => "NotFoundError",
            Self::Validation(_) => "ValidationError",
            Self::LLMParsing(_) => "ModelOutputError",
            Self::Join(_) => "JoinError",
            Self::Io(_) => "IoError",
            Self::Config(_) => "ConfigError",
            Self::Anyhow(_) => "InternalError",
            Self::Processing(_) => "ProcessingError",
            Self::InternalError(_) => "InternalError",
        }
    }
}
