//! The cognitive workflow: recall before answering, persist after,
//! validate when in doubt.
//!
//! Ordering is a usage convention, not stored state — persist works
//! without a prior recall, it just produces an unchained interaction.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use mg_core::{
    DEFAULT_TOPIC_LIMIT, Emotion, MemoryMetadata, MemoryType, NewInteraction, RecallContext,
    Sentiment, ValidationReport, extract_topics, now_iso8601,
};

use crate::error::Result;
use crate::graph::GraphStore;
use crate::memory::{DEFAULT_COLLECTION, MemoryStore};

/// Recall window defaults.
pub const DEFAULT_RECALL_DAYS: u32 = 7;
pub const DEFAULT_RECALL_LIMIT: u32 = 5;

const GRAPH_DB: &str = "graph.db";
const MEMORY_DB: &str = "memory.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallRequest {
    pub user: String,
    /// The incoming message, when available; topic suggestions are
    /// extracted from it.
    pub input: Option<String>,
    pub days: Option<u32>,
    pub limit: Option<u32>,
}

/// Semantic memory to store alongside a persisted interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistMemory {
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub importance: Option<f64>,
    pub tags: Option<String>,
    pub emotion: Option<Emotion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistRequest {
    pub user: String,
    pub input: String,
    pub output: String,
    pub intent: Option<String>,
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub entities: Vec<String>,
    /// Empty means: extract from the input.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Usually the `last_interaction_id` from a preceding recall.
    pub previous_id: Option<String>,
    pub memory: Option<PersistMemory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistOutcome {
    pub interaction_id: String,
    pub memory_id: Option<String>,
}

/// One interaction graph plus one semantic memory store. The two use
/// independent drivers with no cross-store ordering guarantee.
pub struct MemoryEngine {
    graph: GraphStore,
    memory: MemoryStore,
}

impl MemoryEngine {
    /// Open (creating if needed) both databases under `base_dir`.
    pub fn open(base_dir: &Path) -> Result<Self> {
        fs::create_dir_all(base_dir)?;
        Ok(MemoryEngine {
            graph: GraphStore::open(&base_dir.join(GRAPH_DB))?,
            memory: MemoryStore::open(&base_dir.join(MEMORY_DB))?,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(MemoryEngine {
            graph: GraphStore::open_in_memory()?,
            memory: MemoryStore::open_in_memory()?,
        })
    }

    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Consolidated context for an incoming message. Read-mostly: the
    /// only write is the user upsert. Never creates an interaction.
    pub fn recall(&self, request: &RecallRequest) -> Result<RecallContext> {
        let days = request.days.unwrap_or(DEFAULT_RECALL_DAYS);
        let limit = request.limit.unwrap_or(DEFAULT_RECALL_LIMIT);

        let profile = self.graph.get_or_create_profile(&request.user)?;
        let recent = self
            .graph
            .recent_interactions(&request.user, days, limit, None)?;
        let last_interaction_id = self.graph.last_interaction_id(&request.user)?;
        let suggested_topics = request
            .input
            .as_deref()
            .map(|input| extract_topics(input, DEFAULT_TOPIC_LIMIT))
            .unwrap_or_default();

        Ok(RecallContext {
            user: request.user.clone(),
            interaction_count: profile.interaction_count,
            is_new_user: profile.created,
            last_interaction_id,
            suggested_topics,
            recent_interactions: recent,
            timestamp: now_iso8601(),
        })
    }

    /// Record an exchange. Topics default to extraction from the input
    /// when the caller supplies none; the optional semantic memory is
    /// tagged with the new interaction id as its source. Not
    /// idempotent: every call creates a new node.
    pub fn persist(&self, request: &PersistRequest) -> Result<PersistOutcome> {
        // Fail on a bad memory attachment before the interaction is
        // written: a caller input error must reject the whole request,
        // not surface after the graph side is already durable.
        if let Some(memory) = &request.memory {
            if memory.content.trim().is_empty() {
                return Err(crate::error::StoreError::Validation(
                    "memory content must not be empty".into(),
                ));
            }
            self.memory_metadata(memory, &request.user, None).validate()
                .map_err(crate::error::StoreError::Validation)?;
        }

        let topics = if request.topics.is_empty() {
            extract_topics(&request.input, DEFAULT_TOPIC_LIMIT)
        } else {
            request.topics.clone()
        };

        let record = NewInteraction {
            user: request.user.clone(),
            input: request.input.clone(),
            output: request.output.clone(),
            intent: request.intent.clone(),
            sentiment: request.sentiment,
            entities: request.entities.clone(),
            topics,
        };

        let interaction_id = self
            .graph
            .create_interaction(&record, request.previous_id.as_deref())?;

        // The interaction is already durable here. A memory-side
        // failure must not discard its id, so it degrades to a warning.
        let memory_id = match &request.memory {
            Some(memory) => {
                let metadata =
                    self.memory_metadata(memory, &request.user, Some(&interaction_id));
                match self
                    .memory
                    .store(DEFAULT_COLLECTION, &memory.content, &metadata)
                {
                    Ok(id) => Some(id),
                    Err(e) => {
                        tracing::warn!(
                            interaction = %interaction_id,
                            error = %e,
                            "interaction stored but memory write failed"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        Ok(PersistOutcome {
            interaction_id,
            memory_id,
        })
    }

    /// Structural check of a stored interaction. A blank id is
    /// reported missing without touching the backend.
    pub fn validate(&self, id: &str) -> Result<ValidationReport> {
        if id.trim().is_empty() {
            return Ok(ValidationReport::missing());
        }
        self.graph.validate_interaction(id)
    }

    fn memory_metadata(
        &self,
        memory: &PersistMemory,
        user: &str,
        interaction_id: Option<&str>,
    ) -> MemoryMetadata {
        let mut metadata = MemoryMetadata::new(memory.memory_type);
        metadata.user = Some(user.to_string());
        if let Some(importance) = memory.importance {
            metadata.importance = importance;
        }
        metadata.tags = memory.tags.clone();
        metadata.emotion = memory.emotion;
        metadata.source = interaction_id.map(str::to_string);
        metadata
    }
}
