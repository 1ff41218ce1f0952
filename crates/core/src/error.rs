use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("invalid duplicate group: {0}")]
    InvalidGroup(String),

    #[error("unknown field {field:?} for entity {entity}")]
    UnknownField { entity: &'static str, field: String },
}
