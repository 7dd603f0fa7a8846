//! Interaction memory graph vocabulary.
//!
//! The pure-domain half of the engine: node/relationship types for the
//! conversation graph, metadata types for the semantic memory store,
//! prefix-tagged identifiers, heuristic topic extraction, and the
//! deterministic embedding function.
//!
//! Zero I/O — no opinions about transport or persistence.

pub mod embedding;
pub mod id;
pub mod time;
pub mod topics;
pub mod types;

pub use embedding::{EMBEDDING_DIM, cosine_distance, embed};
pub use id::{
    INTERACTION_PREFIX, MEMORY_PREFIX, generate_id, interaction_id, memory_id, request_id,
};
pub use time::{days_ago_iso8601, now_iso8601, now_unix_secs, unix_to_iso8601};
pub use topics::{DEFAULT_TOPIC_LIMIT, extract_topics, tokenize};
pub use types::{
    Emotion, InteractionRecord, LinkProperties, MemoryMetadata, MemoryType, NewInteraction,
    RecallContext, RelationshipType, Sentiment, TopicFrequency, UserProfile, ValidationReport,
};
