pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid selection: {message}")]
    Validation { message: String },

    #[error("processing service error ({endpoint}): {message}")]
    Service { endpoint: String, message: String },

    #[error("malformed response ({endpoint}): {message}")]
    MalformedResponse { endpoint: String, message: String },

    #[error("processing stalled for {filename}: {polls_failed} consecutive poll failures")]
    ProcessingStalled { filename: String, polls_failed: u32 },

    #[error("invalid task transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
