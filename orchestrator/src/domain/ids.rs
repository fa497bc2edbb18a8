//! Identity generation for tasks and agents.
//!
//! Task ids are sortable by creation time (`TASK-YYYYMMDD-HHMMSS-<8hex>`);
//! agent ids only need local-to-process uniqueness on top of an encoded
//! spawn time, since global uniqueness is enforced by the caller checking
//! the task's (and, for reviewers, the global index's) existing agent set.

use chrono::Utc;
use rand::Rng;

fn random_hex(n: usize) -> String {
    let mut rng = rand::rng();
    (0..n).map(|_| format!("{:x}", rng.random_range(0..16u8))).collect()
}

/// `TASK-YYYYMMDD-HHMMSS-<8 hex>`; lexicographic order tracks creation order.
pub fn generate_task_id() -> String {
    let now = Utc::now();
    format!("TASK-{}-{}", now.format("%Y%m%d-%H%M%S"), random_hex(8))
}

/// `<type>-HHMMSS-<6 hex>`. `agent_type` is an arbitrary caller-supplied
/// string (investigator, builder, fixer, reviewer, ...) and is not
/// validated against a closed set.
pub fn generate_agent_id(agent_type: &str) -> String {
    let now = Utc::now();
    format!("{}-{}-{}", agent_type, now.format("%H%M%S"), random_hex(6))
}

/// Review ids don't need to encode time; a v7 UUID keeps them roughly
/// creation-ordered without hand-rolling a timestamp format.
pub fn generate_review_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
