use async_trait::async_trait;
use futures::stream::BoxStream;
use models::{ContainerRequest, ExposedPort};
use std::time::Duration;
use thiserror::Error;

/// Which output a log frame was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    StdOut,
    StdErr,
}

/// Raw, followed log output of a container. Frames from both outputs arrive
/// interleaved, each tagged with its source.
pub type LogStream<'a> = BoxStream<'a, Result<(LogSource, Vec<u8>), ContainerError>>;

/// The container engine operations a managed container is built from.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn image_exists(&self, image: &str) -> Result<bool, ContainerError>;

    async fn pull_image(&self, image: &str) -> Result<(), ContainerError>;

    /// Creates (but does not start) a container and returns its id.
    async fn create_container(&self, request: &ContainerRequest) -> Result<String, ContainerError>;

    async fn start_container(&self, id: &str) -> Result<(), ContainerError>;

    async fn is_running(&self, id: &str) -> Result<bool, ContainerError>;

    /// Host-side port published for a container port.
    async fn mapped_port(&self, id: &str, port: ExposedPort) -> Result<u16, ContainerError>;

    /// Address under which published ports are reachable.
    fn host(&self) -> String;

    fn logs(&self, id: &str) -> LogStream<'_>;

    /// Reads one regular file out of the container filesystem.
    async fn copy_file_from(&self, id: &str, path: &str) -> Result<Vec<u8>, ContainerError>;

    async fn stop_container(&self, id: &str) -> Result<(), ContainerError>;

    async fn remove_container(&self, id: &str) -> Result<(), ContainerError>;
}

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Failed to connect to Docker: {0}")]
    DockerConnection(String),

    #[error("Failed to pull image {image}: {reason}")]
    ImagePullFailed { image: String, reason: String },

    #[error("Image {0} is not available locally and the pull policy forbids pulling it")]
    ImageNotFound(String),

    #[error("Failed to create container: {0}")]
    ContainerCreateFailed(String),

    #[error("Failed to start container: {0}")]
    ContainerStartFailed(String),

    #[error("Failed to inspect container: {0}")]
    InspectFailed(String),

    #[error("Container is not running")]
    NotRunning,

    #[error("Requested port ({0}) is not mapped")]
    PortNotMapped(u16),

    #[error("Container did not become ready within {0:?}")]
    StartupTimeout(Duration),

    #[error("Container stopped before it became ready: {0}")]
    ContainerExited(String),

    #[error("Invalid wait strategy: {0}")]
    InvalidWaitStrategy(String),

    #[error("Failed to copy {path} from container: {reason}")]
    CopyFailed { path: String, reason: String },

    #[error("Failed to stop container: {0}")]
    StopFailed(String),

    #[error("Failed to read container logs: {0}")]
    LogStream(String),
}
