// runtime crate

pub mod cleanup;
pub mod container;
pub mod docker;
pub mod generic;
pub mod wait;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export public items
pub use cleanup::{cleanup_containers, get_tracked_containers};
pub use container::{ContainerError, ContainerRuntime, LogSource, LogStream};
pub use docker::DockerRuntime;
pub use generic::{ContainerState, GenericContainer};
