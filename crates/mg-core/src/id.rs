//! Prefix-tagged identifier generation.
//!
//! Every entity id is `{prefix}_{32 hex chars}` — the hex tail is a v4
//! UUID with hyphens stripped, so ids are collision-resistant and the
//! prefix makes the entity kind readable in logs and query results.

use uuid::Uuid;

/// Prefix for interaction node ids.
pub const INTERACTION_PREFIX: &str = "int";

/// Prefix for semantic memory document ids.
pub const MEMORY_PREFIX: &str = "mem";

/// Generate a fresh prefix-tagged identifier.
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Generate an interaction id (`int_…`).
pub fn interaction_id() -> String {
    generate_id(INTERACTION_PREFIX)
}

/// Generate a memory document id (`mem_…`).
pub fn memory_id() -> String {
    generate_id(MEMORY_PREFIX)
}

/// Generate a per-call request trace id, tagged with the operation
/// name. Request ids are returned to callers for traceability but
/// never persisted.
pub fn request_id(operation: &str) -> String {
    generate_id(operation)
}
