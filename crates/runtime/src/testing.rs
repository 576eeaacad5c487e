//! In-memory [`ContainerRuntime`] for exercising container lifecycles without Docker.

use crate::container::{ContainerError, ContainerRuntime, LogSource, LogStream};
use async_trait::async_trait;
use futures_util::StreamExt;
use models::{ContainerRequest, ExposedPort};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const FIRST_HOST_PORT: u16 = 49_152;

// Ids are unique per process because container tracking is process-wide.
static NEXT_CONTAINER_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug)]
struct FakeContainer {
    running: bool,
    ports: HashMap<ExposedPort, u16>,
}

#[derive(Debug, Default)]
struct FakeState {
    local_images: Vec<String>,
    host: Option<String>,
    log_frames: Vec<(LogSource, String)>,
    files: HashMap<String, Vec<u8>>,
    containers: HashMap<String, FakeContainer>,
    operations: Vec<String>,
    next_id: usize,
    fail_start: bool,
}

/// Records every call and serves canned logs and files.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local_image(self, image: &str) -> Self {
        self.update(|s| s.local_images.push(image.to_string()));
        self
    }

    /// Stdout chunks returned by every container's log stream, in order.
    pub fn with_logs(self, chunks: &[&str]) -> Self {
        let frames: Vec<(LogSource, &str)> =
            chunks.iter().map(|c| (LogSource::StdOut, *c)).collect();
        self.with_log_frames(&frames)
    }

    pub fn with_log_frames(self, frames: &[(LogSource, &str)]) -> Self {
        self.update(|s| {
            s.log_frames = frames
                .iter()
                .map(|(source, chunk)| (*source, chunk.to_string()))
                .collect()
        });
        self
    }

    /// Host reported for published ports; `localhost` otherwise.
    pub fn with_host(self, host: &str) -> Self {
        self.update(|s| s.host = Some(host.to_string()));
        self
    }

    pub fn with_file(self, path: &str, contents: Vec<u8>) -> Self {
        self.update(|s| {
            s.files.insert(path.to_string(), contents);
        });
        self
    }

    pub fn failing_start(self) -> Self {
        self.update(|s| s.fail_start = true);
        self
    }

    /// Simulates a container dying underneath its handle.
    pub fn kill(&self, id: &str) {
        self.update(|s| {
            if let Some(container) = s.containers.get_mut(id) {
                container.running = false;
            }
        });
    }

    pub fn operations(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.operations.clone())
            .unwrap_or_default()
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().map(|s| s.containers.len()).unwrap_or(0)
    }

    fn update<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    fn record(&self, operation: String) {
        self.update(|s| s.operations.push(operation));
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, ContainerError> {
        self.record(format!("image_exists {}", image));
        Ok(self.update(|s| s.local_images.iter().any(|i| i == image)))
    }

    async fn pull_image(&self, image: &str) -> Result<(), ContainerError> {
        self.record(format!("pull {}", image));
        self.update(|s| s.local_images.push(image.to_string()));
        Ok(())
    }

    async fn create_container(&self, request: &ContainerRequest) -> Result<String, ContainerError> {
        self.record(format!("create {}", request.image()));
        Ok(self.update(|s| {
            s.next_id += 1;
            let id = format!("fake-{}", NEXT_CONTAINER_ID.fetch_add(1, Ordering::Relaxed));
            let ports = request
                .exposed_ports()
                .iter()
                .enumerate()
                .map(|(i, port)| (*port, FIRST_HOST_PORT + (s.next_id * 10 + i) as u16))
                .collect();
            s.containers.insert(
                id.clone(),
                FakeContainer {
                    running: false,
                    ports,
                },
            );
            id
        }))
    }

    async fn start_container(&self, id: &str) -> Result<(), ContainerError> {
        self.record(format!("start {}", id));
        self.update(|s| {
            if s.fail_start {
                return Err(ContainerError::ContainerStartFailed(
                    "simulated start failure".to_string(),
                ));
            }
            match s.containers.get_mut(id) {
                Some(container) => {
                    container.running = true;
                    Ok(())
                }
                None => Err(ContainerError::ContainerStartFailed(format!(
                    "no such container: {}",
                    id
                ))),
            }
        })
    }

    async fn is_running(&self, id: &str) -> Result<bool, ContainerError> {
        Ok(self.update(|s| s.containers.get(id).map_or(false, |c| c.running)))
    }

    async fn mapped_port(&self, id: &str, port: ExposedPort) -> Result<u16, ContainerError> {
        self.update(|s| {
            s.containers
                .get(id)
                .and_then(|c| c.ports.get(&port).copied())
                .ok_or(ContainerError::PortNotMapped(port.port()))
        })
    }

    fn host(&self) -> String {
        self.update(|s| s.host.clone())
            .unwrap_or_else(|| "localhost".to_string())
    }

    fn logs(&self, id: &str) -> LogStream<'_> {
        self.record(format!("logs {}", id));
        let frames: Vec<Result<(LogSource, Vec<u8>), ContainerError>> = self.update(|s| {
            s.log_frames
                .iter()
                .map(|(source, chunk)| Ok((*source, chunk.as_bytes().to_vec())))
                .collect()
        });
        futures::stream::iter(frames).boxed()
    }

    async fn copy_file_from(&self, id: &str, path: &str) -> Result<Vec<u8>, ContainerError> {
        self.record(format!("copy {} {}", id, path));
        self.update(|s| {
            if !s.containers.get(id).map_or(false, |c| c.running) {
                return Err(ContainerError::CopyFailed {
                    path: path.to_string(),
                    reason: "container is not running".to_string(),
                });
            }
            s.files
                .get(path)
                .cloned()
                .ok_or_else(|| ContainerError::CopyFailed {
                    path: path.to_string(),
                    reason: "no such file or directory".to_string(),
                })
        })
    }

    async fn stop_container(&self, id: &str) -> Result<(), ContainerError> {
        self.record(format!("stop {}", id));
        self.kill(id);
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), ContainerError> {
        self.record(format!("remove {}", id));
        self.update(|s| s.containers.remove(id));
        Ok(())
    }
}
