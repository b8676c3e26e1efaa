//! Datastore key layout.
//!
//! ```text
//! /calico/v1/host/<hostname>/workload/<orchestrator>/<workload>/endpoint
//! /calico/v1/policy/profile/<profile>/rules
//! /calico/v1/policy/profile/<profile>/tags
//! ```

use crate::constants::KEY_ROOT;
use crate::identity::WorkloadIdentity;

/// Directory holding everything stored for one workload.
pub fn workload_dir(identity: &WorkloadIdentity) -> String {
    format!(
        "{KEY_ROOT}/host/{}/workload/{}/{}",
        identity.hostname, identity.orchestrator, identity.workload_id
    )
}

/// Key of the workload's endpoint record.
pub fn endpoint_key(identity: &WorkloadIdentity) -> String {
    format!("{}/endpoint", workload_dir(identity))
}

/// Directory holding a profile.
pub fn profile_dir(profile_id: &str) -> String {
    format!("{KEY_ROOT}/policy/profile/{profile_id}")
}

pub fn profile_rules_key(profile_id: &str) -> String {
    format!("{}/rules", profile_dir(profile_id))
}

pub fn profile_tags_key(profile_id: &str) -> String {
    format!("{}/tags", profile_dir(profile_id))
}
