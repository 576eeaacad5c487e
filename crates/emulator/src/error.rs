use models::ImageNameError;
use runtime::ContainerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("Invalid emulator configuration: {0}")]
    Configuration(#[from] ImageNameError),

    #[error("The emulator container is not running")]
    NotRunning,

    #[error("Failed to copy {path} out of the emulator container: {reason}")]
    Transfer { path: String, reason: String },

    #[error("Invalid PKCS12 key store: {0}")]
    Format(String),

    #[error("Failed to build TLS client: {0}")]
    Tls(String),

    #[error(transparent)]
    Container(ContainerError),
}

impl From<ContainerError> for EmulatorError {
    fn from(e: ContainerError) -> Self {
        match e {
            ContainerError::NotRunning => EmulatorError::NotRunning,
            ContainerError::CopyFailed { path, reason } => EmulatorError::Transfer { path, reason },
            other => EmulatorError::Container(other),
        }
    }
}
