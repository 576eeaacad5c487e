//! Azure Cosmos DB Linux emulator as a managed test container.
//!
//! ```no_run
//! # async fn run() -> Result<(), emulator::EmulatorError> {
//! let mut cosmos = emulator::CosmosDbEmulatorContainer::from_default_image()?;
//! cosmos.start().await?;
//! let endpoint = cosmos.emulator_endpoint().await?;
//! let key_store = cosmos.build_default_key_store().await?;
//! let client = key_store.http_client()?;
//! # let _ = (endpoint, client);
//! cosmos.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod container;
pub mod error;
pub mod key_store;

pub use container::{
    default_image, CosmosDbEmulatorContainer, DEFAULT_CERTIFICATE_PATH, DEFAULT_IMAGE_NAME,
    EMULATOR_KEY, PORT, READY_PATTERN,
};
pub use error::EmulatorError;
pub use key_store::KeyStore;
