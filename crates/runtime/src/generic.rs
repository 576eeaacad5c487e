use crate::cleanup::{track_container, untrack_container};
use crate::container::{ContainerError, ContainerRuntime};
use crate::wait::{self, LogMessageMatcher};
use models::{ContainerRequest, ExposedPort, PullPolicy, WaitFor};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Starting,
    Running,
    Stopped,
}

/// A container described by a [`ContainerRequest`] and driven through a
/// [`ContainerRuntime`]: created → starting → running → stopped.
///
/// Dropping a handle whose container was never stopped removes the container.
/// Inside a tokio runtime the removal is spawned onto it; elsewhere it blocks
/// on a private runtime. [`stop`](Self::stop) reports errors, drop only logs them.
pub struct GenericContainer {
    runtime: Arc<dyn ContainerRuntime>,
    request: ContainerRequest,
    state: ContainerState,
    id: Option<String>,
}

impl GenericContainer {
    pub fn new(request: ContainerRequest, runtime: Arc<dyn ContainerRuntime>) -> Self {
        GenericContainer {
            runtime,
            request,
            state: ContainerState::Created,
            id: None,
        }
    }

    /// Adjusts the request; only meaningful before [`start`](Self::start).
    pub fn configure(mut self, f: impl FnOnce(ContainerRequest) -> ContainerRequest) -> Self {
        let placeholder = ContainerRequest::new(self.request.image().clone());
        let request = std::mem::replace(&mut self.request, placeholder);
        self.request = f(request);
        self
    }

    pub fn request(&self) -> &ContainerRequest {
        &self.request
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub async fn start(&mut self) -> Result<(), ContainerError> {
        if self.state == ContainerState::Running {
            return Ok(());
        }

        // Reject a bad pattern before anything is created.
        let matcher = match self.request.wait_for() {
            WaitFor::Nothing => None,
            WaitFor::LogMessage { pattern, times } => Some(LogMessageMatcher::new(pattern, *times)?),
        };

        let image = self.request.image().canonical_name();
        self.ensure_image(&image).await?;

        self.state = ContainerState::Starting;
        logging::info(&format!("Starting container from image {}", image));

        let id = match self.runtime.create_container(&self.request).await {
            Ok(id) => id,
            Err(e) => {
                self.state = ContainerState::Stopped;
                return Err(e);
            }
        };
        track_container(&id);
        self.id = Some(id.clone());

        if let Err(e) = self.runtime.start_container(&id).await {
            self.discard(&id).await;
            return Err(e);
        }

        let startup_timeout = self.request.startup_timeout();
        let outcome = match matcher {
            None => Ok(Ok(())),
            Some(matcher) => {
                let stream = self.runtime.logs(&id);
                tokio::time::timeout(
                    startup_timeout,
                    wait::wait_for_log_message(&id, stream, matcher),
                )
                .await
            }
        };

        match outcome {
            Ok(Ok(())) => {
                self.state = ContainerState::Running;
                logging::info(&format!("Container {} is ready", id));
                Ok(())
            }
            Ok(Err(e)) => {
                logging::error(&format!("Container {} failed to become ready: {}", id, e));
                self.discard(&id).await;
                Err(e)
            }
            Err(_) => {
                logging::error(&format!(
                    "Container {} did not become ready within {:?}",
                    id, startup_timeout
                ));
                self.discard(&id).await;
                Err(ContainerError::StartupTimeout(startup_timeout))
            }
        }
    }

    /// Stops and removes the container. Calling it again is a no-op.
    pub async fn stop(&mut self) -> Result<(), ContainerError> {
        let Some(id) = self.id.take() else {
            self.state = ContainerState::Stopped;
            return Ok(());
        };

        logging::info(&format!("Stopping container {}", id));
        let stopped = self.runtime.stop_container(&id).await;
        let removed = self.runtime.remove_container(&id).await;
        untrack_container(&id);
        self.state = ContainerState::Stopped;

        stopped.and(removed)
    }

    pub async fn is_running(&self) -> Result<bool, ContainerError> {
        match (&self.id, self.state) {
            (Some(id), ContainerState::Running) => self.runtime.is_running(id).await,
            _ => Ok(false),
        }
    }

    pub async fn host(&self) -> Result<String, ContainerError> {
        self.running_id().await?;
        Ok(self.runtime.host())
    }

    pub async fn mapped_port(&self, port: u16) -> Result<u16, ContainerError> {
        let id = self.running_id().await?;
        self.runtime.mapped_port(id, ExposedPort::tcp(port)).await
    }

    pub async fn copy_file_from(&self, path: &str) -> Result<Vec<u8>, ContainerError> {
        let id = self.running_id().await?;
        logging::debug(&format!("Copying {} out of container {}", path, id));
        self.runtime.copy_file_from(id, path).await
    }

    async fn running_id(&self) -> Result<&str, ContainerError> {
        let id = self.id.as_deref().ok_or(ContainerError::NotRunning)?;
        if self.is_running().await? {
            Ok(id)
        } else {
            Err(ContainerError::NotRunning)
        }
    }

    async fn ensure_image(&self, image: &str) -> Result<(), ContainerError> {
        match self.request.pull_policy() {
            PullPolicy::Always => self.runtime.pull_image(image).await,
            PullPolicy::IfMissing => {
                if !self.runtime.image_exists(image).await? {
                    logging::info(&format!("Pulling image {}", image));
                    self.runtime.pull_image(image).await?;
                }
                Ok(())
            }
            PullPolicy::Never => {
                if self.runtime.image_exists(image).await? {
                    Ok(())
                } else {
                    Err(ContainerError::ImageNotFound(image.to_string()))
                }
            }
        }
    }

    async fn discard(&mut self, id: &str) {
        let _ = self.runtime.stop_container(id).await;
        let _ = self.runtime.remove_container(id).await;
        untrack_container(id);
        self.id = None;
        self.state = ContainerState::Stopped;
    }
}

impl Drop for GenericContainer {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };

        logging::info(&format!("Removing container {} as its handle was dropped", id));
        let runtime = Arc::clone(&self.runtime);
        let remove = async move {
            if let Err(e) = runtime.remove_container(&id).await {
                logging::warning(&format!("Failed to remove container {}: {}", id, e));
            }
            untrack_container(&id);
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(remove);
            }
            Err(_) => match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt.block_on(remove),
                Err(e) => logging::warning(&format!(
                    "No runtime available to remove a dropped container: {}",
                    e
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::get_tracked_containers;
    use crate::testing::FakeRuntime;
    use models::ImageName;
    use std::time::Duration;

    fn request(image: &str) -> ContainerRequest {
        ContainerRequest::new(ImageName::parse(image).unwrap())
            .with_exposed_port(8081)
            .with_wait_for(WaitFor::log_message(r"(?s).*Started\r\n$", 1))
    }

    #[tokio::test]
    async fn test_start_pulls_missing_image_and_waits() {
        let runtime = Arc::new(FakeRuntime::new().with_logs(&["Booting\r\n", "Started\r\n"]));
        let mut container = GenericContainer::new(request("redis:7"), runtime.clone());

        container.start().await.unwrap();

        assert_eq!(container.state(), ContainerState::Running);
        assert!(container.is_running().await.unwrap());
        let ops = runtime.operations();
        assert_eq!(ops[0], "image_exists redis:7");
        assert_eq!(ops[1], "pull redis:7");
        assert!(ops.iter().any(|op| op.starts_with("logs fake-")));

        container.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_local_image_is_not_pulled() {
        let runtime = Arc::new(
            FakeRuntime::new()
                .with_local_image("redis:7")
                .with_logs(&["Started\r\n"]),
        );
        let mut container = GenericContainer::new(request("redis:7"), runtime.clone());
        container.start().await.unwrap();

        assert!(!runtime.operations().iter().any(|op| op.starts_with("pull")));
        container.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_never_policy_fails_without_local_image() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut container = GenericContainer::new(
            request("redis:7").with_pull_policy(PullPolicy::Never),
            runtime.clone(),
        );

        let err = container.start().await.unwrap_err();
        assert!(matches!(err, ContainerError::ImageNotFound(_)));
        assert_eq!(runtime.container_count(), 0);
    }

    #[tokio::test]
    async fn test_queries_require_running_container() {
        let runtime = Arc::new(FakeRuntime::new().with_logs(&["Started\r\n"]));
        let mut container = GenericContainer::new(request("redis:7"), runtime.clone());

        assert!(!container.is_running().await.unwrap());
        assert!(matches!(
            container.mapped_port(8081).await,
            Err(ContainerError::NotRunning)
        ));
        assert!(matches!(container.host().await, Err(ContainerError::NotRunning)));

        container.start().await.unwrap();
        assert_eq!(container.host().await.unwrap(), "localhost");
        let port = container.mapped_port(8081).await.unwrap();
        assert!(port >= 49_152);
        assert!(matches!(
            container.mapped_port(9999).await,
            Err(ContainerError::PortNotMapped(9999))
        ));

        container.stop().await.unwrap();
        assert!(matches!(
            container.mapped_port(8081).await,
            Err(ContainerError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_container_killed_externally_is_not_running() {
        let runtime = Arc::new(FakeRuntime::new().with_logs(&["Started\r\n"]));
        let mut container = GenericContainer::new(request("redis:7"), runtime.clone());
        container.start().await.unwrap();

        let id = container.id().unwrap().to_string();
        runtime.kill(&id);

        assert!(!container.is_running().await.unwrap());
        assert!(matches!(
            container.copy_file_from("/etc/hostname").await,
            Err(ContainerError::NotRunning)
        ));
        container.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_readiness_discards_container() {
        let runtime = Arc::new(FakeRuntime::new().with_logs(&["Crashed\r\n"]));
        let mut container = GenericContainer::new(request("redis:7"), runtime.clone());

        let err = container.start().await.unwrap_err();
        assert!(matches!(err, ContainerError::ContainerExited(_)));
        assert_eq!(container.state(), ContainerState::Stopped);
        assert_eq!(container.id(), None);
        assert_eq!(runtime.container_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_start_discards_container() {
        let runtime = Arc::new(FakeRuntime::new().failing_start());
        let mut container = GenericContainer::new(request("redis:7"), runtime.clone());

        let err = container.start().await.unwrap_err();
        assert!(matches!(err, ContainerError::ContainerStartFailed(_)));
        assert_eq!(runtime.container_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_pattern_creates_nothing() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut container = GenericContainer::new(
            request("redis:7").with_wait_for(WaitFor::log_message("(", 1)),
            runtime.clone(),
        );

        let err = container.start().await.unwrap_err();
        assert!(matches!(err, ContainerError::InvalidWaitStrategy(_)));
        assert!(runtime.operations().is_empty());
    }

    #[tokio::test]
    async fn test_dropping_started_container_removes_it() {
        let runtime = Arc::new(FakeRuntime::new().with_logs(&["Started\r\n"]));
        let id = {
            let mut container = GenericContainer::new(request("redis:7"), runtime.clone());
            container.start().await.unwrap();
            container.id().unwrap().to_string()
        };

        // Removal is spawned onto this runtime; let it run.
        for _ in 0..10 {
            if runtime.container_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(runtime.container_count(), 0);
        assert!(runtime.operations().contains(&format!("remove {}", id)));
        assert!(!get_tracked_containers().contains(&id));
    }

    #[test]
    fn test_dropping_outside_a_runtime_removes_before_returning() {
        let runtime = Arc::new(FakeRuntime::new().with_logs(&["Started\r\n"]));
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let container = rt.block_on(async {
            let mut container = GenericContainer::new(request("redis:7"), runtime.clone());
            container.start().await.unwrap();
            container
        });
        drop(rt);

        assert_eq!(runtime.container_count(), 1);
        drop(container);
        assert_eq!(runtime.container_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_stopped_container_does_nothing() {
        let runtime = Arc::new(FakeRuntime::new().with_logs(&["Started\r\n"]));
        let mut container = GenericContainer::new(request("redis:7"), runtime.clone());
        container.start().await.unwrap();
        container.stop().await.unwrap();
        let before = runtime.operations().len();

        drop(container);
        tokio::task::yield_now().await;
        assert_eq!(runtime.operations().len(), before);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let runtime = Arc::new(FakeRuntime::new().with_logs(&["Started\r\n"]));
        let mut container = GenericContainer::new(
            request("redis:7").with_startup_timeout(Duration::from_secs(5)),
            runtime.clone(),
        );
        container.start().await.unwrap();

        container.stop().await.unwrap();
        container.stop().await.unwrap();
        assert_eq!(container.state(), ContainerState::Stopped);
        assert_eq!(
            runtime
                .operations()
                .iter()
                .filter(|op| op.starts_with("stop"))
                .count(),
            1
        );
    }
}
