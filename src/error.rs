use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No book context set")]
    NoBookContext,

    #[error("Page {index} out of range (book has {total} pages)")]
    PageOutOfRange { index: usize, total: usize },

    #[error("Loader error: {0}")]
    Loader(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Upscale error: {0}")]
    Upscale(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Pipeline disposed")]
    Disposed,

    #[error("Not initialized")]
    NotInitialized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Clone for PipelineError {
    fn clone(&self) -> Self {
        match self {
            PipelineError::Io(e) => PipelineError::Internal(e.to_string()),
            PipelineError::Configuration(s) => PipelineError::Configuration(s.clone()),
            PipelineError::InvalidInput(s) => PipelineError::InvalidInput(s.clone()),
            PipelineError::NoBookContext => PipelineError::NoBookContext,
            PipelineError::PageOutOfRange { index, total } => {
                PipelineError::PageOutOfRange { index: *index, total: *total }
            }
            PipelineError::Loader(s) => PipelineError::Loader(s.clone()),
            PipelineError::Scheduler(s) => PipelineError::Scheduler(s.clone()),
            PipelineError::Upscale(s) => PipelineError::Upscale(s.clone()),
            PipelineError::Cache(s) => PipelineError::Cache(s.clone()),
            PipelineError::Cancelled => PipelineError::Cancelled,
            PipelineError::Disposed => PipelineError::Disposed,
            PipelineError::NotInitialized => PipelineError::NotInitialized,
            PipelineError::Internal(s) => PipelineError::Internal(s.clone()),
        }
    }
}

impl PipelineError {
    /// Whether this error represents cooperative cancellation rather than a
    /// genuine failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
