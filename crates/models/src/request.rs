use crate::image::ImageName;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// How long a container may take to satisfy its wait strategy.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// A container-side TCP port that gets published on an ephemeral host port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExposedPort(u16);

impl ExposedPort {
    pub const fn tcp(port: u16) -> Self {
        ExposedPort(port)
    }

    pub fn port(&self) -> u16 {
        self.0
    }
}

// Docker keys port maps as "<port>/<proto>".
impl fmt::Display for ExposedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/tcp", self.0)
    }
}

/// Readiness condition evaluated after the container starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitFor {
    /// Ready as soon as the container is started.
    Nothing,
    /// Ready once `times` log lines fully match `pattern`.
    LogMessage { pattern: String, times: usize },
}

impl WaitFor {
    pub fn log_message(pattern: impl Into<String>, times: usize) -> Self {
        WaitFor::LogMessage {
            pattern: pattern.into(),
            times,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicy {
    Always,
    #[default]
    IfMissing,
    Never,
}

/// Everything a runtime needs to create and start one container.
#[derive(Debug, Clone)]
pub struct ContainerRequest {
    image: ImageName,
    exposed_ports: Vec<ExposedPort>,
    env: BTreeMap<String, String>,
    wait_for: WaitFor,
    startup_timeout: Duration,
    pull_policy: PullPolicy,
}

impl ContainerRequest {
    pub fn new(image: ImageName) -> Self {
        ContainerRequest {
            image,
            exposed_ports: Vec::new(),
            env: BTreeMap::new(),
            wait_for: WaitFor::Nothing,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            pull_policy: PullPolicy::default(),
        }
    }

    pub fn with_exposed_port(mut self, port: u16) -> Self {
        let port = ExposedPort::tcp(port);
        if !self.exposed_ports.contains(&port) {
            self.exposed_ports.push(port);
        }
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_wait_for(mut self, wait_for: WaitFor) -> Self {
        self.wait_for = wait_for;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_pull_policy(mut self, policy: PullPolicy) -> Self {
        self.pull_policy = policy;
        self
    }

    pub fn image(&self) -> &ImageName {
        &self.image
    }

    pub fn exposed_ports(&self) -> &[ExposedPort] {
        &self.exposed_ports
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Environment in the `KEY=value` form the Docker API expects.
    pub fn env_list(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }

    pub fn wait_for(&self) -> &WaitFor {
        &self.wait_for
    }

    pub fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }

    pub fn pull_policy(&self) -> PullPolicy {
        self.pull_policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request = ContainerRequest::new(ImageName::parse("redis").unwrap());
        assert!(request.exposed_ports().is_empty());
        assert_eq!(request.wait_for(), &WaitFor::Nothing);
        assert_eq!(request.startup_timeout(), DEFAULT_STARTUP_TIMEOUT);
        assert_eq!(request.pull_policy(), PullPolicy::IfMissing);
    }

    #[test]
    fn test_exposed_ports_are_deduplicated() {
        let request = ContainerRequest::new(ImageName::parse("redis").unwrap())
            .with_exposed_port(8081)
            .with_exposed_port(8081)
            .with_exposed_port(10250);
        assert_eq!(
            request.exposed_ports(),
            &[ExposedPort::tcp(8081), ExposedPort::tcp(10250)]
        );
        assert_eq!(request.exposed_ports()[0].to_string(), "8081/tcp");
    }

    #[test]
    fn test_env_list_is_sorted_key_value_pairs() {
        let request = ContainerRequest::new(ImageName::parse("redis").unwrap())
            .with_env("B", "2")
            .with_env("A", "1")
            .with_env("B", "3");
        assert_eq!(request.env_list(), vec!["A=1".to_string(), "B=3".to_string()]);
    }
}
