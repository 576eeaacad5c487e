use crate::container::ContainerRuntime;
use once_cell::sync::Lazy;
use std::sync::Mutex;

static RUNNING_CONTAINERS: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(Vec::new()));

pub fn track_container(id: &str) {
    if let Ok(mut containers) = RUNNING_CONTAINERS.lock() {
        if !containers.iter().any(|c| c == id) {
            containers.push(id.to_string());
        }
    }
}

pub fn untrack_container(id: &str) {
    if let Ok(mut containers) = RUNNING_CONTAINERS.lock() {
        containers.retain(|c| c != id);
    }
}

pub fn get_tracked_containers() -> Vec<String> {
    if let Ok(containers) = RUNNING_CONTAINERS.lock() {
        containers.clone()
    } else {
        vec![]
    }
}

/// Stops and removes every container started by this process that is still around.
pub async fn cleanup_containers(runtime: &dyn ContainerRuntime) {
    for container_id in get_tracked_containers() {
        if let Err(e) = runtime.stop_container(&container_id).await {
            logging::warning(&format!("Failed to stop container {}: {}", container_id, e));
        }
        if let Err(e) = runtime.remove_container(&container_id).await {
            logging::warning(&format!("Failed to remove container {}: {}", container_id, e));
        }
        untrack_container(&container_id);
    }
}
