use crate::keys::DataId;

pub type CubeResult<T> = Result<T, CubeError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CubeError {
    #[error("argument required: {0}")]
    ArgumentRequired(String),

    #[error("invalid argument {name}: {reason}")]
    ArgumentInvalid { name: String, reason: String },

    #[error("invalid operation: {0}")]
    OperationInvalid(String),

    #[error("unknown dimension: {0}")]
    UnknownDimension(String),

    #[error("data node {0} has been disposed")]
    DataDisposed(DataId),
}

impl CubeError {
    pub(crate) fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        CubeError::ArgumentInvalid {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
