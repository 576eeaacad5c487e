use crate::error::EmulatorError;
use crate::key_store::KeyStore;
use models::{ContainerRequest, ImageName, PullPolicy, WaitFor};
use runtime::{ContainerRuntime, DockerRuntime, GenericContainer};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_IMAGE_NAME: &str = "mcr.microsoft.com/cosmosdb/linux/azure-cosmos-emulator";

pub const PORT: u16 = 8081;

/// The emulator prints `Started` once every partition is up.
pub const READY_PATTERN: &str = r"(?s).*Started\r\n$";

/// Well-known account key published in the Azure Cosmos DB emulator
/// documentation. It is also the password of the emulator's certificate
/// archive. Not a secret.
pub const EMULATOR_KEY: &str =
    "C2y6yDjf5/R+ob0N8A7Cgv30VRDJIWEHLM+4QDU5DE2nQ9nDuVTqobD4b8mGGyPMbIZnqyMsEcaGQy67XIw/Jw==";

/// Where the Linux emulator writes its TLS certificate archive.
pub const DEFAULT_CERTIFICATE_PATH: &str = "/tmp/cosmos/appdata/default.sslcert.pfx";

const PARTITION_COUNT_ENV: &str = "AZURE_COSMOS_EMULATOR_PARTITION_COUNT";
const DATA_PERSISTENCE_ENV: &str = "AZURE_COSMOS_EMULATOR_ENABLE_DATA_PERSISTENCE";
const IP_ADDRESS_OVERRIDE_ENV: &str = "AZURE_COSMOS_EMULATOR_IP_ADDRESS_OVERRIDE";

pub fn default_image() -> Result<ImageName, EmulatorError> {
    Ok(ImageName::parse(DEFAULT_IMAGE_NAME)?)
}

fn url_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

/// An Azure Cosmos DB Linux emulator running in a container.
pub struct CosmosDbEmulatorContainer {
    container: GenericContainer,
}

impl CosmosDbEmulatorContainer {
    /// Configures the emulator against the local Docker daemon.
    pub fn new(image: ImageName) -> Result<Self, EmulatorError> {
        image.assert_compatible_with(&default_image()?)?;
        let runtime = DockerRuntime::new()?;
        Self::with_runtime(image, Arc::new(runtime))
    }

    pub fn from_default_image() -> Result<Self, EmulatorError> {
        Self::new(default_image()?)
    }

    /// Fails with [`EmulatorError::Configuration`] unless `image` belongs to the
    /// emulator repository (any tag) or was declared a substitute for it.
    pub fn with_runtime(
        image: ImageName,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, EmulatorError> {
        image.assert_compatible_with(&default_image()?)?;

        let request = ContainerRequest::new(image)
            .with_exposed_port(PORT)
            .with_wait_for(WaitFor::log_message(READY_PATTERN, 1));

        Ok(CosmosDbEmulatorContainer {
            container: GenericContainer::new(request, runtime),
        })
    }

    pub fn with_env(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configure(|r| r.with_env(key, value))
    }

    pub fn with_startup_timeout(self, timeout: Duration) -> Self {
        self.configure(|r| r.with_startup_timeout(timeout))
    }

    pub fn with_pull_policy(self, policy: PullPolicy) -> Self {
        self.configure(|r| r.with_pull_policy(policy))
    }

    pub fn with_partition_count(self, partitions: u32) -> Self {
        self.with_env(PARTITION_COUNT_ENV, partitions.to_string())
    }

    pub fn with_data_persistence(self, enabled: bool) -> Self {
        self.with_env(DATA_PERSISTENCE_ENV, enabled.to_string())
    }

    pub fn with_ip_address_override(self, address: impl Into<String>) -> Self {
        self.with_env(IP_ADDRESS_OVERRIDE_ENV, address)
    }

    fn configure(self, f: impl FnOnce(ContainerRequest) -> ContainerRequest) -> Self {
        CosmosDbEmulatorContainer {
            container: self.container.configure(f),
        }
    }

    pub fn container(&self) -> &GenericContainer {
        &self.container
    }

    pub fn id(&self) -> Option<&str> {
        self.container.id()
    }

    /// Starts the emulator and blocks until it logs `Started`.
    pub async fn start(&mut self) -> Result<(), EmulatorError> {
        Ok(self.container.start().await?)
    }

    pub async fn stop(&mut self) -> Result<(), EmulatorError> {
        Ok(self.container.stop().await?)
    }

    pub async fn is_running(&self) -> Result<bool, EmulatorError> {
        Ok(self.container.is_running().await?)
    }

    pub fn emulator_key(&self) -> &'static str {
        EMULATOR_KEY
    }

    /// `https://<host>:<mapped port>` of the running emulator. An IPv6 host
    /// is bracketed.
    pub async fn emulator_endpoint(&self) -> Result<String, EmulatorError> {
        let host = self.container.host().await?;
        let port = self.container.mapped_port(PORT).await?;
        Ok(format!("https://{}:{}", url_host(&host), port))
    }

    /// Copies the PKCS12 archive at `certificate_path` out of the container and
    /// loads it with the emulator key. Not cached: every call copies again.
    pub async fn build_key_store(&self, certificate_path: &str) -> Result<KeyStore, EmulatorError> {
        let bytes = self.container.copy_file_from(certificate_path).await?;
        logging::debug(&format!(
            "Loading {} bytes of PKCS12 data from {}",
            bytes.len(),
            certificate_path
        ));
        KeyStore::from_pkcs12(&bytes, EMULATOR_KEY)
    }

    pub async fn build_default_key_store(&self) -> Result<KeyStore, EmulatorError> {
        self.build_key_store(DEFAULT_CERTIFICATE_PATH).await
    }
}
