use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalyticsError {
    #[error("Arithmetic overflow while computing {0}")]
    Overflow(String),

    #[error("Invalid analytics configuration: {0}")]
    InvalidConfig(String),
}
