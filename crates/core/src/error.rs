#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Unknown {kind} value: {value}")]
    UnknownValue { kind: &'static str, value: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
