#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Event validation failed: {0}")]
    Validation(String),

    #[error("Unable to parse timestamp: {0}")]
    InvalidTimestamp(String),
}
