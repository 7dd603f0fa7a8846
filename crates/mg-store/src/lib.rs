//! Persistence for the interaction memory engine.
//!
//! Two SQLite-backed stores behind one session discipline: the
//! interaction graph (users, interactions, topics and their edges) and
//! the semantic memory store (embedded documents retrieved by cosine
//! distance). [`MemoryEngine`] composes them into the recall → persist
//! → validate workflow; [`analytics`] aggregates over the graph.

pub mod analytics;
pub mod engine;
pub mod error;
pub mod graph;
pub mod memory;
pub mod schema;
pub mod session;

pub use analytics::{InsightsReport, insights, topic_trends};
pub use engine::{
    DEFAULT_RECALL_DAYS, DEFAULT_RECALL_LIMIT, MemoryEngine, PersistMemory, PersistOutcome,
    PersistRequest, RecallRequest,
};
pub use error::{Result, StoreError, WriteStep};
pub use graph::{GraphCounts, GraphStore, LinkOutcome, RelatedFilter};
pub use memory::{DEFAULT_COLLECTION, MemoryFilter, MemoryHit, MemoryStore};
pub use session::{Driver, Session};
