use emulator::{EmulatorError, KeyStore};
use models::ImageName;
use runtime::DockerRuntime;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Emulator(#[from] EmulatorError),

    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Key store at {0} contains no certificate")]
    NoCertificate(String),

    #[error("Failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

/// What a client needs to reach a running emulator.
#[derive(Debug, Serialize)]
pub struct ConnectionInfo {
    pub image: ImageName,
    pub container_id: String,
    pub endpoint: String,
    pub key: String,
}

impl ConnectionInfo {
    pub fn render(&self, json: bool) -> Result<String, CliError> {
        if json {
            return Ok(serde_json::to_string_pretty(self)?);
        }
        Ok(format!(
            "Image:     {}\nContainer: {}\nEndpoint:  {}\nKey:       {}",
            self.image, self.container_id, self.endpoint, self.key
        ))
    }
}

/// Parses `reference` and checks it can run the emulator.
pub fn check_image(reference: &str) -> Result<ImageName, EmulatorError> {
    let image = ImageName::parse(reference)?;
    image.assert_compatible_with(&emulator::default_image()?)?;
    Ok(image)
}

/// Writes the first certificate of `store` to `path` as DER.
pub fn export_certificate(
    store: &KeyStore,
    certificate_path: &str,
    path: &Path,
) -> Result<(), CliError> {
    let der = store
        .certificates()
        .first()
        .ok_or_else(|| CliError::NoCertificate(certificate_path.to_string()))?;

    std::fs::write(path, der).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Sets the log level from the CLI flags and turns on console echo. With
/// `machine_output`, stdout carries only the command's own output and every
/// log line goes to stderr.
pub fn configure_logging(verbose: bool, debug: bool, machine_output: bool) {
    logging::set_console_output(true);
    logging::set_console_stderr_only(machine_output);
    if debug {
        logging::set_log_level(logging::LogLevel::Debug);
        logging::debug("Debug mode enabled - showing emulator output");
    } else if verbose {
        logging::set_log_level(logging::LogLevel::Info);
        logging::info("Verbose mode enabled");
    } else {
        logging::set_log_level(logging::LogLevel::Warning);
    }
}

/// Clean up all containers this process started.
/// This is used by both main.rs and in tests
pub async fn cleanup_on_exit() {
    match tokio::time::timeout(Duration::from_secs(15), async {
        match DockerRuntime::new() {
            Ok(docker) => runtime::cleanup_containers(&docker).await,
            Err(_) => logging::info("Docker not available, skipping container cleanup"),
        }
    })
    .await
    {
        Ok(_) => logging::debug("Container cleanup completed successfully"),
        Err(_) => {
            logging::warning("Container cleanup timed out after 15 seconds, continuing with shutdown")
        }
    }

    logging::info("Resource cleanup completed");
}
