//! Template → new member construction.

use rand::Rng;

use fleetgrid_state::{SwarmId, SwarmMember};

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const SUFFIX_LEN: usize = 4;

/// Build a fresh pending member from a template.
///
/// Only configuration is copied: provider, image, flavor, disk settings,
/// boot configuration, and comment. Identity (id, provider instance id,
/// IP) and status are never carried over.
pub fn clone_from_template(
    template: &SwarmMember,
    hostname: &str,
    swarm: Option<SwarmId>,
) -> SwarmMember {
    let mut member = SwarmMember::new(template.cloud, hostname, &template.image, &template.flavor);
    member.disk_size_gb = template.disk_size_gb;
    member.disk_type = template.disk_type;
    member.delete_boot_volume = template.delete_boot_volume;
    member.configuration = template.configuration.clone();
    member.comment = template.comment.clone();
    member.swarm_id = swarm;
    member
}

/// `<base>-<suffix>`.
pub fn clone_hostname(base: &str, suffix: &str) -> String {
    format!("{base}-{suffix}")
}

/// Short random lowercase alphanumeric suffix.
pub fn random_suffix() -> String {
    let mut rng = rand::rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}
