//! Work-queue names handed to an instance at check-in.

/// Queue roles, in the order they are returned.
pub const QUEUE_ROLES: [&str; 3] = ["task", "networking", "auxiliary"];

/// `<swarm>-<hostname>-<role>` for each role.
pub fn attached_queues(swarm_name: &str, hostname: &str) -> Vec<String> {
    QUEUE_ROLES
        .iter()
        .map(|role| format!("{swarm_name}-{hostname}-{role}"))
        .collect()
}
