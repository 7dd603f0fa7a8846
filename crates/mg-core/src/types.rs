//! The closed vocabulary of the interaction graph and the semantic
//! memory store.
//!
//! Relationship types form a fixed enumerated set. Caller-supplied
//! strings are validated through [`RelationshipType::from_str`] and the
//! stored label always comes from [`RelationshipType::as_str`] — the
//! untrusted input never reaches a query.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sentiment classification of an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
    Mixed,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
            Sentiment::Mixed => "mixed",
        }
    }
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(Sentiment::Positive),
            "negative" => Ok(Sentiment::Negative),
            "neutral" => Ok(Sentiment::Neutral),
            "mixed" => Ok(Sentiment::Mixed),
            other => Err(format!(
                "invalid sentiment '{other}' (expected positive|negative|neutral|mixed)"
            )),
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed cross-link between two interactions.
///
/// The set is closed: anything outside it is rejected before a query
/// is built. The label would otherwise be interpolated into query
/// text, so this enum is a security boundary, not a convenience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    RelatedTo,
    Contradicts,
    BuildsOn,
    References,
    SimilarTo,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 5] = [
        RelationshipType::RelatedTo,
        RelationshipType::Contradicts,
        RelationshipType::BuildsOn,
        RelationshipType::References,
        RelationshipType::SimilarTo,
    ];

    /// The label as stored on the edge.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::RelatedTo => "RELATED_TO",
            RelationshipType::Contradicts => "CONTRADICTS",
            RelationshipType::BuildsOn => "BUILDS_ON",
            RelationshipType::References => "REFERENCES",
            RelationshipType::SimilarTo => "SIMILAR_TO",
        }
    }
}

impl FromStr for RelationshipType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|r| r.as_str() == s)
            .copied()
            .ok_or_else(|| format!("invalid relationship type '{s}'"))
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional scalar properties carried on a cross-link edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkProperties {
    pub similarity: Option<f64>,
    pub reason: Option<String>,
}

/// Input for creating an interaction node. The id and timestamp are
/// assigned by the store at write time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewInteraction {
    pub user: String,
    pub input: String,
    pub output: String,
    pub intent: Option<String>,
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// A stored interaction. Interactions are facts: once written they are
/// never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: String,
    pub user: String,
    pub input: String,
    pub output: String,
    pub timestamp: String,
    pub intent: Option<String>,
    pub sentiment: Option<Sentiment>,
    pub entities: Vec<String>,
    pub topics: Vec<String>,
}

/// A topic and how often a user's interactions reference it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicFrequency {
    pub topic: String,
    pub frequency: u64,
}

/// Result of the user profile upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user: String,
    pub interaction_count: u64,
    /// True when this call inserted the user node.
    pub created: bool,
    pub favorite_topics: Vec<TopicFrequency>,
}

/// Consolidated context returned by the recall step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallContext {
    pub user: String,
    pub interaction_count: u64,
    pub is_new_user: bool,
    pub last_interaction_id: Option<String>,
    pub suggested_topics: Vec<String>,
    pub recent_interactions: Vec<InteractionRecord>,
    pub timestamp: String,
}

/// Structural completeness report for a stored interaction.
///
/// A post-write health check: an interaction with zero topics is
/// legitimate and simply reports `has_at_least_one_topic = false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub exists: bool,
    pub has_owning_user: bool,
    pub has_at_least_one_topic: bool,
}

impl ValidationReport {
    /// Report for an id that was never resolved (or never supplied).
    pub fn missing() -> Self {
        ValidationReport {
            exists: false,
            has_owning_user: false,
            has_at_least_one_topic: false,
        }
    }

    pub fn valid(&self) -> bool {
        self.exists && self.has_owning_user
    }
}

/// Kind of a semantic memory document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Insight,
    Fact,
    Preference,
    Pattern,
    Connection,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Insight => "insight",
            MemoryType::Fact => "fact",
            MemoryType::Preference => "preference",
            MemoryType::Pattern => "pattern",
            MemoryType::Connection => "connection",
        }
    }
}

impl FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insight" => Ok(MemoryType::Insight),
            "fact" => Ok(MemoryType::Fact),
            "preference" => Ok(MemoryType::Preference),
            "pattern" => Ok(MemoryType::Pattern),
            "connection" => Ok(MemoryType::Connection),
            other => Err(format!(
                "invalid memory type '{other}' (expected insight|fact|preference|pattern|connection)"
            )),
        }
    }
}

/// Emotional tone attached to a memory document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Curiosity,
    Satisfaction,
    Concern,
    Neutral,
    Excitement,
}

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Curiosity => "curiosity",
            Emotion::Satisfaction => "satisfaction",
            Emotion::Concern => "concern",
            Emotion::Neutral => "neutral",
            Emotion::Excitement => "excitement",
        }
    }
}

impl FromStr for Emotion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "curiosity" => Ok(Emotion::Curiosity),
            "satisfaction" => Ok(Emotion::Satisfaction),
            "concern" => Ok(Emotion::Concern),
            "neutral" => Ok(Emotion::Neutral),
            "excitement" => Ok(Emotion::Excitement),
            other => Err(format!("invalid emotion '{other}'")),
        }
    }
}

fn default_confidence() -> f64 {
    0.8
}

fn default_importance() -> f64 {
    0.5
}

/// Structured metadata attached to a memory document.
///
/// `timestamp` and `source` are stamped by the store at write time;
/// callers may pre-set `source` (the persist workflow tags it with the
/// owning interaction id for traceability).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMetadata {
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub user: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "default_importance")]
    pub importance: f64,
    pub tags: Option<String>,
    pub emotion: Option<Emotion>,
    pub source: Option<String>,
}

impl MemoryMetadata {
    pub fn new(memory_type: MemoryType) -> Self {
        MemoryMetadata {
            memory_type,
            user: None,
            confidence: default_confidence(),
            importance: default_importance(),
            tags: None,
            emotion: None,
            source: None,
        }
    }

    /// Range-check the float fields. Called before any backend write.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "confidence must be within [0, 1], got {}",
                self.confidence
            ));
        }
        if !(0.0..=1.0).contains(&self.importance) {
            return Err(format!(
                "importance must be within [0, 1], got {}",
                self.importance
            ));
        }
        Ok(())
    }
}
