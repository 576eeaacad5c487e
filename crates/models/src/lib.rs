// models crate

pub mod image;
pub mod request;

pub use image::{ImageName, ImageNameError, ImageVersion};
pub use request::{ContainerRequest, ExposedPort, PullPolicy, WaitFor, DEFAULT_STARTUP_TIMEOUT};
