use crate::container::{ContainerError, ContainerRuntime, LogSource, LogStream};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, DownloadFromContainerOptions, InspectContainerOptions,
        LogOutput, LogsOptions, RemoveContainerOptions, StopContainerOptions,
    },
    errors::Error as DockerError,
    image::CreateImageOptions,
    models::HostConfig,
    Docker,
};
use futures_util::StreamExt;
use models::{ContainerRequest, ExposedPort};
use std::collections::HashMap;
use std::io::Read;

const STOP_TIMEOUT_SECS: i64 = 10;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new() -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ContainerError::DockerConnection(e.to_string()))?;

        Ok(DockerRuntime { docker })
    }

    pub fn client(&self) -> &Docker {
        &self.docker
    }
}

pub async fn is_available() -> bool {
    match Docker::connect_with_local_defaults() {
        Ok(docker) => match docker.ping().await {
            Ok(_) => true,
            Err(e) => {
                logging::error(&format!("Docker ping failed: {}", e));
                false
            }
        },
        Err(e) => {
            logging::error(&format!("Docker connection failed: {}", e));
            false
        }
    }
}

fn is_not_found(e: &DockerError) -> bool {
    matches!(
        e,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn is_not_modified(e: &DockerError) -> bool {
    matches!(
        e,
        DockerError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

/// Picks the host that published ports are reachable on.
///
/// An explicit override wins, then the host of a TCP `DOCKER_HOST`; a local
/// socket means `localhost`. IPv6 addresses from `DOCKER_HOST` stay bracketed.
pub fn resolve_host(host_override: Option<&str>, docker_host: Option<&str>) -> String {
    if let Some(host) = host_override.map(str::trim).filter(|h| !h.is_empty()) {
        return host.to_string();
    }

    if let Some(docker_host) = docker_host {
        for scheme in ["tcp://", "http://", "https://"] {
            if let Some(rest) = docker_host.strip_prefix(scheme) {
                let authority = rest.split('/').next().unwrap_or_default();
                let host = match authority.strip_prefix('[') {
                    // [::1]:2375 keeps its brackets so it can go straight into a URL
                    Some(v6) => match v6.split(']').next() {
                        Some(address) if !address.is_empty() => format!("[{}]", address),
                        _ => String::new(),
                    },
                    None => authority.split(':').next().unwrap_or_default().to_string(),
                };
                if !host.is_empty() {
                    return host;
                }
            }
        }
    }

    "localhost".to_string()
}

/// Docker hands files out as tar archives; returns the single regular file inside.
pub fn extract_single_file(archive: &[u8], path: &str) -> Result<Vec<u8>, ContainerError> {
    let copy_failed = |reason: String| ContainerError::CopyFailed {
        path: path.to_string(),
        reason,
    };

    let mut archive = tar::Archive::new(archive);
    let mut entries = archive.entries().map_err(|e| copy_failed(e.to_string()))?;

    let mut entry = match entries.next() {
        Some(entry) => entry.map_err(|e| copy_failed(e.to_string()))?,
        None => return Err(copy_failed("archive is empty".to_string())),
    };

    if !entry.header().entry_type().is_file() {
        return Err(copy_failed("path is not a regular file".to_string()));
    }

    let mut contents = Vec::new();
    entry
        .read_to_end(&mut contents)
        .map_err(|e| copy_failed(e.to_string()))?;

    Ok(contents)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, ContainerError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(ContainerError::InspectFailed(e.to_string())),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), ContainerError> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            if let Err(e) = result {
                return Err(ContainerError::ImagePullFailed {
                    image: image.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        logging::info(&format!("🐳 Pulled image: {}", image));
        Ok(())
    }

    async fn create_container(&self, request: &ContainerRequest) -> Result<String, ContainerError> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = request
            .exposed_ports()
            .iter()
            .map(|port| (port.to_string(), HashMap::new()))
            .collect();

        let options = Some(CreateContainerOptions {
            name: format!("cosmos-testbed-{}", uuid::Uuid::new_v4()),
            platform: None,
        });

        // Every exposed port gets an ephemeral host port.
        let host_config = HostConfig {
            publish_all_ports: Some(true),
            ..Default::default()
        };

        let config = Config {
            image: Some(request.image().canonical_name()),
            env: Some(request.env_list()),
            exposed_ports: Some(exposed_ports),
            labels: Some(HashMap::from([(
                "org.cosmos-testbed.managed".to_string(),
                "true".to_string(),
            )])),
            host_config: Some(host_config),
            ..Default::default()
        };

        let container = self
            .docker
            .create_container(options, config)
            .await
            .map_err(|e| ContainerError::ContainerCreateFailed(e.to_string()))?;

        for warning in &container.warnings {
            logging::warning(&format!("Docker: {}", warning));
        }

        Ok(container.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), ContainerError> {
        self.docker
            .start_container::<String>(id, None)
            .await
            .map_err(|e| ContainerError::ContainerStartFailed(e.to_string()))
    }

    async fn is_running(&self, id: &str) -> Result<bool, ContainerError> {
        match self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => Ok(info.state.and_then(|s| s.running).unwrap_or(false)),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(ContainerError::InspectFailed(e.to_string())),
        }
    }

    async fn mapped_port(&self, id: &str, port: ExposedPort) -> Result<u16, ContainerError> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| ContainerError::InspectFailed(e.to_string()))?;

        let bindings = info
            .network_settings
            .and_then(|settings| settings.ports)
            .and_then(|ports| ports.get(&port.to_string()).cloned().flatten())
            .unwrap_or_default();

        bindings
            .iter()
            .filter_map(|binding| binding.host_port.as_deref())
            .find_map(|host_port| host_port.parse::<u16>().ok())
            .ok_or(ContainerError::PortNotMapped(port.port()))
    }

    fn host(&self) -> String {
        resolve_host(
            std::env::var("TESTCONTAINERS_HOST_OVERRIDE").ok().as_deref(),
            std::env::var("DOCKER_HOST").ok().as_deref(),
        )
    }

    fn logs(&self, id: &str) -> LogStream<'_> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        self.docker
            .logs(id, Some(options))
            .filter_map(|result| {
                futures::future::ready(match result {
                    // A TTY container has a single console stream.
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        Some(Ok((LogSource::StdOut, message.to_vec())))
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        Some(Ok((LogSource::StdErr, message.to_vec())))
                    }
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(ContainerError::LogStream(e.to_string()))),
                })
            })
            .boxed()
    }

    async fn copy_file_from(&self, id: &str, path: &str) -> Result<Vec<u8>, ContainerError> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };

        let mut stream = self.docker.download_from_container(id, Some(options));
        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ContainerError::CopyFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
            archive.extend_from_slice(&chunk);
        }

        extract_single_file(&archive, path)
    }

    async fn stop_container(&self, id: &str) -> Result<(), ContainerError> {
        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };

        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) || is_not_modified(&e) => Ok(()),
            Err(e) => Err(ContainerError::StopFailed(e.to_string())),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), ContainerError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(ContainerError::StopFailed(e.to_string())),
        }
    }
}
