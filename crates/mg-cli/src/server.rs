use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;

use mg_core::{
    Emotion, InteractionRecord, LinkProperties, MemoryMetadata, MemoryType, RelationshipType,
    Sentiment, request_id,
};
use mg_store::{
    DEFAULT_COLLECTION, LinkOutcome, MemoryEngine, MemoryFilter, PersistMemory, PersistRequest,
    RecallRequest, RelatedFilter, StoreError, insights, topic_trends,
};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;

const DEFAULT_CONTEXT_DAYS: u32 = 7;
const DEFAULT_CONTEXT_LIMIT: u32 = 5;
const DEFAULT_ANALYTICS_DAYS: u32 = 30;
const DEFAULT_TREND_LIMIT: u32 = 10;
const DEFAULT_SEARCH_K: u32 = 5;

#[derive(Clone)]
pub struct MgServer {
    engine: Arc<MemoryEngine>,
    tool_router: ToolRouter<Self>,
}

impl MgServer {
    pub fn new(engine: MemoryEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            tool_router: Self::tool_router(),
        }
    }
}

/// Serialization toggle carried by every tool. Changes only the shape
/// of the response, never its content.
#[derive(Debug, Clone, Copy, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Success response in the requested format, always carrying the
/// request id.
fn render(
    format: OutputFormat,
    request_id: &str,
    summary: String,
    mut payload: serde_json::Value,
) -> CallToolResult {
    let body = match format {
        OutputFormat::Json => {
            if let Some(obj) = payload.as_object_mut() {
                obj.insert("request_id".into(), request_id.into());
            }
            serde_json::to_string_pretty(&payload).unwrap_or_default()
        }
        OutputFormat::Text => format!("{summary}\n[request {request_id}]"),
    };
    CallToolResult::success(vec![Content::text(body)])
}

/// Backend failure as a tool-level error payload. Raw errors never
/// cross the boundary and the server never exits on one.
fn action_failed(action: &str, request_id: &str, e: &StoreError) -> CallToolResult {
    tracing::error!(action, request = request_id, error = %e, "tool call failed");
    CallToolResult::error(vec![Content::text(format!(
        "{action} failed: {e}\n[request {request_id}]"
    ))])
}

/// Rejection of a malformed argument. Carries the request id like
/// every other response shape.
fn invalid(request_id: &str, message: String) -> McpError {
    McpError::invalid_params(format!("{message} [request {request_id}]"), None)
}

/// Splits validation failures (caller's fault, reported as
/// invalid_params) from backend failures (reported as an error
/// payload).
fn dispatch<T>(
    result: Result<T, StoreError>,
    action: &str,
    request_id: &str,
) -> Result<Result<T, CallToolResult>, McpError> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(StoreError::Validation(msg)) => Err(invalid(request_id, msg)),
        Err(e) => Ok(Err(action_failed(action, request_id, &e))),
    }
}

fn parse_sentiment(s: Option<&str>) -> Result<Option<Sentiment>, String> {
    s.map(Sentiment::from_str).transpose()
}

fn parse_memory_type(s: &str) -> Result<MemoryType, String> {
    MemoryType::from_str(s)
}

fn parse_emotion(s: Option<&str>) -> Result<Option<Emotion>, String> {
    s.map(Emotion::from_str).transpose()
}

fn interaction_lines(interactions: &[InteractionRecord]) -> String {
    let mut out = String::new();
    for rec in interactions {
        let _ = writeln!(
            out,
            "- [{}] {} — in: {} | out: {} | topics: {}",
            rec.timestamp,
            rec.id,
            rec.input,
            rec.output,
            rec.topics.join(", ")
        );
    }
    out
}

// --- Tool parameter types ---

#[derive(Debug, Deserialize, JsonSchema)]
struct ThinkRequest {
    /// User the incoming message belongs to
    user: String,
    /// The incoming message; topic suggestions are extracted from it
    input: Option<String>,
    /// Recall window in days (default 7)
    days: Option<u32>,
    /// Maximum recent interactions to return (default 5)
    limit: Option<u32>,
    #[serde(default)]
    format: OutputFormat,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RespondMemoryInput {
    /// The insight worth keeping long-term
    content: String,
    /// Memory kind: insight, fact, preference, pattern or connection
    r#type: String,
    /// Importance in [0, 1] (default 0.5)
    importance: Option<f64>,
    /// Free-form comma-separated tags
    tags: Option<String>,
    /// Emotional tone: curiosity, satisfaction, concern, neutral or excitement
    emotion: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RespondRequest {
    /// User who sent the message
    user: String,
    /// The user's message
    input: String,
    /// The response that was given
    output: String,
    /// Classified intent (e.g. question, request)
    intent: Option<String>,
    /// Sentiment: positive, negative, neutral or mixed
    sentiment: Option<String>,
    /// Named entities mentioned in the exchange
    #[serde(default)]
    entities: Vec<String>,
    /// Topics; extracted from the input when omitted
    #[serde(default)]
    topics: Vec<String>,
    /// last_interaction_id from the preceding think call, to chain the conversation
    previous_id: Option<String>,
    /// Optional semantic memory to store alongside the interaction
    memory: Option<RespondMemoryInput>,
    #[serde(default)]
    format: OutputFormat,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ValidateRequest {
    /// Interaction id returned by a previous respond call
    interaction_id: String,
    #[serde(default)]
    format: OutputFormat,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ContextRequest {
    /// User whose history to read
    user: String,
    /// Window in days (default 7)
    days: Option<u32>,
    /// Maximum interactions (default 5)
    limit: Option<u32>,
    /// Only interactions tagged with at least one of these topics
    topics: Option<Vec<String>>,
    #[serde(default)]
    format: OutputFormat,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct FindRelatedRequest {
    /// Match interactions tagged with any of these topics
    #[serde(default)]
    topics: Vec<String>,
    /// Match interactions mentioning any of these entities
    #[serde(default)]
    entities: Vec<String>,
    /// Restrict to one user
    user: Option<String>,
    /// Maximum results (default 5)
    limit: Option<u32>,
    #[serde(default)]
    format: OutputFormat,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ProfileRequest {
    /// User to look up (created on first reference)
    user: String,
    #[serde(default)]
    format: OutputFormat,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct LinkRequest {
    /// Source interaction id
    from_id: String,
    /// Target interaction id
    to_id: String,
    /// One of RELATED_TO, CONTRADICTS, BUILDS_ON, REFERENCES, SIMILAR_TO
    relationship: String,
    /// Optional similarity score for the edge
    similarity: Option<f64>,
    /// Optional human-readable reason for the link
    reason: Option<String>,
    #[serde(default)]
    format: OutputFormat,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct MemoryStoreRequest {
    /// Text of the memory
    content: String,
    /// Memory kind: insight, fact, preference, pattern or connection
    r#type: String,
    /// User the memory is about
    user: Option<String>,
    /// Confidence in [0, 1] (default 0.8)
    confidence: Option<f64>,
    /// Importance in [0, 1] (default 0.5)
    importance: Option<f64>,
    /// Free-form comma-separated tags
    tags: Option<String>,
    /// Emotional tone: curiosity, satisfaction, concern, neutral or excitement
    emotion: Option<String>,
    /// Collection name (default mindgraph_memories)
    collection: Option<String>,
    #[serde(default)]
    format: OutputFormat,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct MemorySearchRequest {
    /// Query texts; one result set is returned per text
    queries: Vec<String>,
    /// Nearest neighbors per query (default 5)
    k: Option<u32>,
    /// Only memories of this kind
    r#type: Option<String>,
    /// Only memories about this user
    user: Option<String>,
    /// Only memories at or above this importance
    min_importance: Option<f64>,
    /// Collection name (default mindgraph_memories)
    collection: Option<String>,
    #[serde(default)]
    format: OutputFormat,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct MemoryDocMetaInput {
    /// Memory kind (default fact)
    r#type: Option<String>,
    /// User the memory is about
    user: Option<String>,
    /// Confidence in [0, 1] (default 0.8)
    confidence: Option<f64>,
    /// Importance in [0, 1] (default 0.5)
    importance: Option<f64>,
    /// Free-form comma-separated tags
    tags: Option<String>,
    /// Emotional tone
    emotion: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct MemoryAddRequest {
    /// Document texts to store
    documents: Vec<String>,
    /// Per-document metadata; must match documents in length when present
    metadatas: Option<Vec<MemoryDocMetaInput>>,
    /// Caller-chosen ids; must match documents in length when present
    ids: Option<Vec<String>>,
    /// Collection name (default mindgraph_memories)
    collection: Option<String>,
    #[serde(default)]
    format: OutputFormat,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct InsightsRequest {
    /// Restrict to one user
    user: Option<String>,
    /// Window in days (default 30)
    days: Option<u32>,
    #[serde(default)]
    format: OutputFormat,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct TrendsRequest {
    /// Restrict to one user
    user: Option<String>,
    /// Window in days (default 30)
    days: Option<u32>,
    /// Top-N topics to return (default 10)
    limit: Option<u32>,
    #[serde(default)]
    format: OutputFormat,
}

#[tool_router]
impl MgServer {
    #[tool(
        description = "Recall context before answering. Call at the start of handling a message: returns the user's profile, their recent interactions, the id of the last one (pass it to respond as previous_id to chain the conversation), and topic suggestions extracted from the input. Read-mostly — never creates an interaction."
    )]
    async fn think(
        &self,
        Parameters(req): Parameters<ThinkRequest>,
    ) -> Result<CallToolResult, McpError> {
        let rid = request_id("think");
        let recall = RecallRequest {
            user: req.user,
            input: req.input,
            days: req.days,
            limit: req.limit,
        };

        let ctx = match dispatch(self.engine.recall(&recall), "think", &rid)? {
            Ok(ctx) => ctx,
            Err(failure) => return Ok(failure),
        };

        let mut summary = if ctx.is_new_user {
            format!("{} is new — no history yet.", ctx.user)
        } else {
            format!(
                "{} has {} interaction(s); last: {}.",
                ctx.user,
                ctx.interaction_count,
                ctx.last_interaction_id.as_deref().unwrap_or("none")
            )
        };
        if !ctx.suggested_topics.is_empty() {
            let _ = write!(summary, " Suggested topics: {}.", ctx.suggested_topics.join(", "));
        }
        if !ctx.recent_interactions.is_empty() {
            let _ = write!(summary, "\nRecent:\n{}", interaction_lines(&ctx.recent_interactions));
        }

        let payload = serde_json::to_value(&ctx).unwrap_or_default();
        Ok(render(req.format, &rid, summary, payload))
    }

    #[tool(
        description = "Persist an exchange after answering. Creates an interaction node owned by the user, chains it to previous_id when given, tags topics (extracted from the input when omitted), and optionally stores a semantic memory traceable back to this interaction. Not idempotent — every call creates a new interaction."
    )]
    async fn respond(
        &self,
        Parameters(req): Parameters<RespondRequest>,
    ) -> Result<CallToolResult, McpError> {
        let rid = request_id("respond");
        let sentiment =
            parse_sentiment(req.sentiment.as_deref()).map_err(|e| invalid(&rid, e))?;
        let memory = match &req.memory {
            Some(m) => Some(PersistMemory {
                content: m.content.clone(),
                memory_type: parse_memory_type(&m.r#type).map_err(|e| invalid(&rid, e))?,
                importance: m.importance,
                tags: m.tags.clone(),
                emotion: parse_emotion(m.emotion.as_deref()).map_err(|e| invalid(&rid, e))?,
            }),
            None => None,
        };

        let persist = PersistRequest {
            user: req.user,
            input: req.input,
            output: req.output,
            intent: req.intent,
            sentiment,
            entities: req.entities,
            topics: req.topics,
            previous_id: req.previous_id,
            memory,
        };

        let outcome = match dispatch(self.engine.persist(&persist), "respond", &rid)? {
            Ok(outcome) => outcome,
            Err(failure) => return Ok(failure),
        };

        let summary = match &outcome.memory_id {
            Some(mem) => format!(
                "stored interaction {} with memory {mem}",
                outcome.interaction_id
            ),
            None => format!("stored interaction {}", outcome.interaction_id),
        };
        let payload = serde_json::to_value(&outcome).unwrap_or_default();
        Ok(render(req.format, &rid, summary, payload))
    }

    #[tool(
        description = "Check that a stored interaction is structurally complete: the node exists, a user owns it, and it carries at least one topic. Use when in doubt about an earlier respond call. Zero topics is legitimate and still valid."
    )]
    async fn validate(
        &self,
        Parameters(req): Parameters<ValidateRequest>,
    ) -> Result<CallToolResult, McpError> {
        let rid = request_id("validate");
        let report = match dispatch(self.engine.validate(&req.interaction_id), "validate", &rid)? {
            Ok(report) => report,
            Err(failure) => return Ok(failure),
        };

        let summary = format!(
            "{}: exists={}, owned={}, topics={} — {}",
            req.interaction_id,
            report.exists,
            report.has_owning_user,
            report.has_at_least_one_topic,
            if report.valid() { "valid" } else { "invalid" }
        );
        let mut payload = serde_json::to_value(report).unwrap_or_default();
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("valid".into(), report.valid().into());
        }
        Ok(render(req.format, &rid, summary, payload))
    }

    #[tool(
        description = "Read a user's recent interactions: a time-windowed, newest-first slice of their conversation history, optionally restricted to given topics."
    )]
    async fn interaction_context(
        &self,
        Parameters(req): Parameters<ContextRequest>,
    ) -> Result<CallToolResult, McpError> {
        let rid = request_id("interaction_context");
        let result = self.engine.graph().recent_interactions(
            &req.user,
            req.days.unwrap_or(DEFAULT_CONTEXT_DAYS),
            req.limit.unwrap_or(DEFAULT_CONTEXT_LIMIT),
            req.topics.as_deref(),
        );
        let interactions = match dispatch(result, "interaction_context", &rid)? {
            Ok(interactions) => interactions,
            Err(failure) => return Ok(failure),
        };

        let summary = if interactions.is_empty() {
            format!("no recent interactions for {}", req.user)
        } else {
            format!(
                "{} interaction(s) for {}:\n{}",
                interactions.len(),
                req.user,
                interaction_lines(&interactions)
            )
        };
        let payload = serde_json::json!({ "interactions": interactions });
        Ok(render(req.format, &rid, summary, payload))
    }

    #[tool(
        description = "Find interactions related by topic, entity or user. Topics and entities each match any of their values; the dimensions you supply must all hold. Results are deduplicated, newest first."
    )]
    async fn interaction_find_related(
        &self,
        Parameters(req): Parameters<FindRelatedRequest>,
    ) -> Result<CallToolResult, McpError> {
        let rid = request_id("interaction_find_related");
        let filter = RelatedFilter {
            topics: req.topics,
            entities: req.entities,
            user: req.user,
        };
        let result = self
            .engine
            .graph()
            .find_related(&filter, req.limit.unwrap_or(DEFAULT_CONTEXT_LIMIT));
        let interactions = match dispatch(result, "interaction_find_related", &rid)? {
            Ok(interactions) => interactions,
            Err(failure) => return Ok(failure),
        };

        let summary = if interactions.is_empty() {
            "no related interactions".to_string()
        } else {
            format!(
                "{} related interaction(s):\n{}",
                interactions.len(),
                interaction_lines(&interactions)
            )
        };
        let payload = serde_json::json!({ "interactions": interactions });
        Ok(render(req.format, &rid, summary, payload))
    }

    #[tool(
        description = "Get a user's profile, creating the user on first reference: interaction count and their most frequent topics."
    )]
    async fn user_profile(
        &self,
        Parameters(req): Parameters<ProfileRequest>,
    ) -> Result<CallToolResult, McpError> {
        let rid = request_id("user_profile");
        let profile = match dispatch(
            self.engine.graph().get_or_create_profile(&req.user),
            "user_profile",
            &rid,
        )? {
            Ok(profile) => profile,
            Err(failure) => return Ok(failure),
        };

        let topics: Vec<String> = profile
            .favorite_topics
            .iter()
            .map(|t| format!("{} ({})", t.topic, t.frequency))
            .collect();
        let summary = format!(
            "{}: {} interaction(s){}{}",
            profile.user,
            profile.interaction_count,
            if profile.created { " (just created)" } else { "" },
            if topics.is_empty() {
                String::new()
            } else {
                format!("; favorite topics: {}", topics.join(", "))
            }
        );
        let payload = serde_json::to_value(&profile).unwrap_or_default();
        Ok(render(req.format, &rid, summary, payload))
    }

    #[tool(
        description = "Create a typed link between two interactions: RELATED_TO, CONTRADICTS, BUILDS_ON, REFERENCES or SIMILAR_TO, with optional similarity and reason. When either id does not resolve, nothing is written and created=false is reported."
    )]
    async fn graph_link(
        &self,
        Parameters(req): Parameters<LinkRequest>,
    ) -> Result<CallToolResult, McpError> {
        let rid = request_id("graph_link");
        let rel_type =
            RelationshipType::from_str(&req.relationship).map_err(|e| invalid(&rid, e))?;
        let props = LinkProperties {
            similarity: req.similarity,
            reason: req.reason,
        };

        let result = self
            .engine
            .graph()
            .create_cross_link(&req.from_id, &req.to_id, rel_type, Some(&props));
        let outcome = match dispatch(result, "graph_link", &rid)? {
            Ok(outcome) => outcome,
            Err(failure) => return Ok(failure),
        };

        let created = outcome == LinkOutcome::Created;
        let summary = if created {
            format!("linked {} -{}-> {}", req.from_id, rel_type, req.to_id)
        } else {
            format!(
                "no link written: {} or {} does not exist",
                req.from_id, req.to_id
            )
        };
        let payload = serde_json::json!({
            "created": created,
            "from_id": req.from_id,
            "to_id": req.to_id,
            "relationship": rel_type.as_str(),
        });
        Ok(render(req.format, &rid, summary, payload))
    }

    #[tool(
        description = "Store a semantic memory: an insight, fact, preference, pattern or connection worth keeping long-term, retrievable later by meaning rather than exact wording."
    )]
    async fn memory_store(
        &self,
        Parameters(req): Parameters<MemoryStoreRequest>,
    ) -> Result<CallToolResult, McpError> {
        let rid = request_id("memory_store");
        let mut metadata =
            MemoryMetadata::new(parse_memory_type(&req.r#type).map_err(|e| invalid(&rid, e))?);
        metadata.user = req.user;
        if let Some(confidence) = req.confidence {
            metadata.confidence = confidence;
        }
        if let Some(importance) = req.importance {
            metadata.importance = importance;
        }
        metadata.tags = req.tags;
        metadata.emotion = parse_emotion(req.emotion.as_deref()).map_err(|e| invalid(&rid, e))?;

        let collection = req.collection.as_deref().unwrap_or(DEFAULT_COLLECTION);
        let result = self.engine.memory().store(collection, &req.content, &metadata);
        let id = match dispatch(result, "memory_store", &rid)? {
            Ok(id) => id,
            Err(failure) => return Ok(failure),
        };

        let summary = format!("stored memory {id} in {collection}");
        let payload = serde_json::json!({ "memory_id": id, "collection": collection });
        Ok(render(req.format, &rid, summary, payload))
    }

    #[tool(
        description = "Search semantic memories by meaning. Returns up to k nearest memories per query text, closest first, optionally filtered by kind, user, or minimum importance. An unknown collection yields empty results, not an error."
    )]
    async fn memory_search(
        &self,
        Parameters(req): Parameters<MemorySearchRequest>,
    ) -> Result<CallToolResult, McpError> {
        let rid = request_id("memory_search");
        if req.queries.is_empty() {
            return Err(invalid(&rid, "at least one query text is required".to_string()));
        }
        let filter = MemoryFilter {
            memory_type: req
                .r#type
                .as_deref()
                .map(parse_memory_type)
                .transpose()
                .map_err(|e| invalid(&rid, e))?,
            user: req.user,
            min_importance: req.min_importance,
        };

        let collection = req.collection.as_deref().unwrap_or(DEFAULT_COLLECTION);
        let result = self.engine.memory().query(
            collection,
            &req.queries,
            req.k.unwrap_or(DEFAULT_SEARCH_K),
            Some(&filter),
        );
        let results = match dispatch(result, "memory_search", &rid)? {
            Ok(results) => results,
            Err(failure) => return Ok(failure),
        };

        let mut summary = String::new();
        let mut payload_sets = Vec::new();
        for (query, hits) in req.queries.iter().zip(&results) {
            let _ = writeln!(summary, "\"{query}\": {} hit(s)", hits.len());
            for hit in hits {
                let _ = writeln!(
                    summary,
                    "- {} (distance {:.3}): {}",
                    hit.id, hit.distance, hit.document
                );
            }
            payload_sets.push(
                hits.iter()
                    .map(|h| {
                        serde_json::json!({
                            "id": h.id,
                            "distance": h.distance,
                            "document": h.document,
                            "metadata": h.metadata,
                            "timestamp": h.timestamp,
                        })
                    })
                    .collect::<Vec<_>>(),
            );
        }
        let payload = serde_json::json!({ "results": payload_sets });
        Ok(render(req.format, &rid, summary.trim_end().to_string(), payload))
    }

    #[tool(
        description = "Bulk-store memory documents. Metadatas and ids, when given, must match the documents in length; ids are generated otherwise. The whole batch is rejected before any write on a mismatch."
    )]
    async fn memory_add(
        &self,
        Parameters(req): Parameters<MemoryAddRequest>,
    ) -> Result<CallToolResult, McpError> {
        let rid = request_id("memory_add");
        let metadatas = match &req.metadatas {
            Some(metas) => {
                let mut parsed = Vec::with_capacity(metas.len());
                for m in metas {
                    let mut metadata = MemoryMetadata::new(match &m.r#type {
                        Some(ty) => parse_memory_type(ty).map_err(|e| invalid(&rid, e))?,
                        None => MemoryType::Fact,
                    });
                    metadata.user = m.user.clone();
                    if let Some(confidence) = m.confidence {
                        metadata.confidence = confidence;
                    }
                    if let Some(importance) = m.importance {
                        metadata.importance = importance;
                    }
                    metadata.tags = m.tags.clone();
                    metadata.emotion =
                        parse_emotion(m.emotion.as_deref()).map_err(|e| invalid(&rid, e))?;
                    parsed.push(metadata);
                }
                Some(parsed)
            }
            None => None,
        };

        let collection = req.collection.as_deref().unwrap_or(DEFAULT_COLLECTION);
        let result = self.engine.memory().add_documents(
            collection,
            &req.documents,
            metadatas.as_deref(),
            req.ids.as_deref(),
        );
        let ids = match dispatch(result, "memory_add", &rid)? {
            Ok(ids) => ids,
            Err(failure) => return Ok(failure),
        };

        let summary = format!("added {} document(s) to {collection}", ids.len());
        let payload = serde_json::json!({ "ids": ids, "collection": collection });
        Ok(render(req.format, &rid, summary, payload))
    }

    #[tool(
        description = "Aggregate interaction statistics over a time window: total count plus distinct intents, sentiments and topic combinations, optionally scoped to one user."
    )]
    async fn analytics_insights(
        &self,
        Parameters(req): Parameters<InsightsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let rid = request_id("analytics_insights");
        let days = req.days.unwrap_or(DEFAULT_ANALYTICS_DAYS);
        let result = insights(self.engine.graph(), req.user.as_deref(), days);
        let report = match dispatch(result, "analytics_insights", &rid)? {
            Ok(report) => report,
            Err(failure) => return Ok(failure),
        };

        let summary = format!(
            "last {days}d: {} interaction(s), {} intent(s), {} sentiment(s), {} topic set(s)",
            report.total_interactions,
            report.distinct_intents,
            report.distinct_sentiments,
            report.distinct_topic_sets
        );
        let payload = serde_json::to_value(&report).unwrap_or_default();
        Ok(render(req.format, &rid, summary, payload))
    }

    #[tool(
        description = "Top topics by mention count over a time window, descending, optionally scoped to one user."
    )]
    async fn analytics_trends(
        &self,
        Parameters(req): Parameters<TrendsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let rid = request_id("analytics_trends");
        let days = req.days.unwrap_or(DEFAULT_ANALYTICS_DAYS);
        let result = topic_trends(
            self.engine.graph(),
            req.user.as_deref(),
            days,
            req.limit.unwrap_or(DEFAULT_TREND_LIMIT),
        );
        let trends = match dispatch(result, "analytics_trends", &rid)? {
            Ok(trends) => trends,
            Err(failure) => return Ok(failure),
        };

        let summary = if trends.is_empty() {
            format!("no topics in the last {days}d")
        } else {
            let lines: Vec<String> = trends
                .iter()
                .map(|t| format!("- {} ({})", t.topic, t.frequency))
                .collect();
            format!("top topics in the last {days}d:\n{}", lines.join("\n"))
        };
        let payload = serde_json::json!({ "trends": trends });
        Ok(render(req.format, &rid, summary, payload))
    }
}

#[tool_handler]
impl ServerHandler for MgServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "You have a persistent conversational memory: an interaction graph plus a \
                 semantic memory store.\n\n\
                 CONVENTION — recall, persist, validate:\n\
                 1. THINK: before answering a message, call think with the user and their \
                    input. Use the returned context silently; keep last_interaction_id.\n\
                 2. RESPOND: after answering, call respond with the exchange, passing \
                    last_interaction_id as previous_id so the conversation chains. Attach a \
                    memory when the exchange produced an insight worth keeping.\n\
                 3. VALIDATE: call validate with the returned interaction id only when in \
                    doubt about an earlier write.\n\n\
                 The ordering is a convention, not enforced — respond works without a prior \
                 think, it just creates an unchained interaction. Use memory_search to recall \
                 stored insights by meaning, graph_link to record how interactions relate, \
                 and the analytics tools for usage summaries."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_server() -> MgServer {
        MgServer::new(MemoryEngine::open_in_memory().unwrap())
    }

    fn text_from_result(result: &CallToolResult) -> String {
        result
            .content
            .iter()
            .filter_map(|c| match &c.raw {
                RawContent::Text(t) => Some(t.text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    fn parse_result(result: &CallToolResult) -> serde_json::Value {
        let text = text_from_result(result);
        serde_json::from_str(&text).expect("handler should return valid JSON")
    }

    fn think_req(user: &str) -> ThinkRequest {
        ThinkRequest {
            user: user.to_string(),
            input: None,
            days: None,
            limit: None,
            format: OutputFormat::Json,
        }
    }

    fn respond_req(user: &str) -> RespondRequest {
        RespondRequest {
            user: user.to_string(),
            input: "what is ownership in rust".to_string(),
            output: "every value has a single owner".to_string(),
            intent: Some("question".to_string()),
            sentiment: Some("neutral".to_string()),
            entities: vec![],
            topics: vec![],
            previous_id: None,
            memory: None,
            format: OutputFormat::Json,
        }
    }

    #[tokio::test]
    async fn test_think_new_user() {
        let server = make_server();
        let result = server.think(Parameters(think_req("ada"))).await.unwrap();
        let json = parse_result(&result);

        assert_eq!(json["is_new_user"], true);
        assert_eq!(json["interaction_count"], 0);
        assert!(json["last_interaction_id"].is_null());
        assert!(
            json["request_id"].as_str().unwrap().starts_with("think_"),
            "request id carries the tool name"
        );
    }

    #[tokio::test]
    async fn test_think_text_format_carries_request_id() {
        let server = make_server();
        let mut req = think_req("ada");
        req.format = OutputFormat::Text;
        let result = server.think(Parameters(req)).await.unwrap();
        let text = text_from_result(&result);
        assert!(text.contains("ada is new"));
        assert!(text.contains("[request think_"));
    }

    #[tokio::test]
    async fn test_think_respond_validate_roundtrip() {
        let server = make_server();

        let ctx = parse_result(&server.think(Parameters(think_req("ada"))).await.unwrap());
        assert!(ctx["last_interaction_id"].is_null());

        let outcome =
            parse_result(&server.respond(Parameters(respond_req("ada"))).await.unwrap());
        let interaction_id = outcome["interaction_id"].as_str().unwrap().to_string();
        assert!(interaction_id.starts_with("int_"));

        let report = parse_result(
            &server
                .validate(Parameters(ValidateRequest {
                    interaction_id: interaction_id.clone(),
                    format: OutputFormat::Json,
                }))
                .await
                .unwrap(),
        );
        assert_eq!(report["valid"], true);
        assert_eq!(report["has_at_least_one_topic"], true);

        let ctx = parse_result(&server.think(Parameters(think_req("ada"))).await.unwrap());
        assert_eq!(ctx["interaction_count"], 1);
        assert_eq!(ctx["last_interaction_id"], interaction_id.as_str());
    }

    #[tokio::test]
    async fn test_respond_rejects_unknown_sentiment() {
        let server = make_server();
        let mut req = respond_req("ada");
        req.sentiment = Some("ecstatic".to_string());
        let err = server.respond(Parameters(req)).await.unwrap_err();
        assert!(err.message.contains("invalid sentiment"));
        assert!(
            err.message.contains("[request respond_"),
            "rejections carry the request id too"
        );
    }

    #[tokio::test]
    async fn test_respond_with_memory() {
        let server = make_server();
        let mut req = respond_req("ada");
        req.memory = Some(RespondMemoryInput {
            content: "ada is learning rust ownership".to_string(),
            r#type: "insight".to_string(),
            importance: Some(0.7),
            tags: None,
            emotion: Some("curiosity".to_string()),
        });

        let outcome = parse_result(&server.respond(Parameters(req)).await.unwrap());
        let interaction_id = outcome["interaction_id"].as_str().unwrap();
        let memory_id = outcome["memory_id"].as_str().unwrap();
        assert!(memory_id.starts_with("mem_"));

        // The stored memory traces back to its interaction.
        let hits = parse_result(
            &server
                .memory_search(Parameters(MemorySearchRequest {
                    queries: vec!["ada is learning rust ownership".to_string()],
                    k: Some(1),
                    r#type: None,
                    user: None,
                    min_importance: None,
                    collection: None,
                    format: OutputFormat::Json,
                }))
                .await
                .unwrap(),
        );
        let hit = &hits["results"][0][0];
        assert_eq!(hit["id"], memory_id);
        assert_eq!(hit["metadata"]["source"], interaction_id);
    }

    #[tokio::test]
    async fn test_respond_rejects_out_of_range_memory_importance() {
        let server = make_server();
        let mut req = respond_req("ada");
        req.memory = Some(RespondMemoryInput {
            content: "x".to_string(),
            r#type: "fact".to_string(),
            importance: Some(2.0),
            tags: None,
            emotion: None,
        });
        let err = server.respond(Parameters(req)).await.unwrap_err();
        assert!(err.message.contains("importance"));
    }

    #[tokio::test]
    async fn test_validate_blank_id_invalid_without_error() {
        let server = make_server();
        let report = parse_result(
            &server
                .validate(Parameters(ValidateRequest {
                    interaction_id: "  ".to_string(),
                    format: OutputFormat::Json,
                }))
                .await
                .unwrap(),
        );
        assert_eq!(report["valid"], false);
        assert_eq!(report["exists"], false);
    }

    #[tokio::test]
    async fn test_interaction_context_topic_filter() {
        let server = make_server();
        server.respond(Parameters(respond_req("ada"))).await.unwrap();
        let mut tagged = respond_req("ada");
        tagged.topics = vec!["databases".to_string()];
        server.respond(Parameters(tagged)).await.unwrap();

        let json = parse_result(
            &server
                .interaction_context(Parameters(ContextRequest {
                    user: "ada".to_string(),
                    days: None,
                    limit: None,
                    topics: Some(vec!["databases".to_string()]),
                    format: OutputFormat::Json,
                }))
                .await
                .unwrap(),
        );
        let interactions = json["interactions"].as_array().unwrap();
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0]["topics"][0], "databases");
    }

    #[tokio::test]
    async fn test_find_related_by_topic() {
        let server = make_server();
        let mut req = respond_req("ada");
        req.topics = vec!["ownership".to_string()];
        server.respond(Parameters(req)).await.unwrap();

        let json = parse_result(
            &server
                .interaction_find_related(Parameters(FindRelatedRequest {
                    topics: vec!["ownership".to_string()],
                    entities: vec![],
                    user: None,
                    limit: None,
                    format: OutputFormat::Json,
                }))
                .await
                .unwrap(),
        );
        assert_eq!(json["interactions"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_user_profile_created_flag() {
        let server = make_server();
        let first = parse_result(
            &server
                .user_profile(Parameters(ProfileRequest {
                    user: "grace".to_string(),
                    format: OutputFormat::Json,
                }))
                .await
                .unwrap(),
        );
        assert_eq!(first["created"], true);

        let second = parse_result(
            &server
                .user_profile(Parameters(ProfileRequest {
                    user: "grace".to_string(),
                    format: OutputFormat::Json,
                }))
                .await
                .unwrap(),
        );
        assert_eq!(second["created"], false);
    }

    #[tokio::test]
    async fn test_graph_link_and_missing_endpoint() {
        let server = make_server();
        let a = parse_result(&server.respond(Parameters(respond_req("ada"))).await.unwrap());
        let b = parse_result(&server.respond(Parameters(respond_req("ada"))).await.unwrap());

        let linked = parse_result(
            &server
                .graph_link(Parameters(LinkRequest {
                    from_id: a["interaction_id"].as_str().unwrap().to_string(),
                    to_id: b["interaction_id"].as_str().unwrap().to_string(),
                    relationship: "BUILDS_ON".to_string(),
                    similarity: Some(0.8),
                    reason: None,
                    format: OutputFormat::Json,
                }))
                .await
                .unwrap(),
        );
        assert_eq!(linked["created"], true);

        let missing = parse_result(
            &server
                .graph_link(Parameters(LinkRequest {
                    from_id: a["interaction_id"].as_str().unwrap().to_string(),
                    to_id: "int_gone".to_string(),
                    relationship: "RELATED_TO".to_string(),
                    similarity: None,
                    reason: None,
                    format: OutputFormat::Json,
                }))
                .await
                .unwrap(),
        );
        assert_eq!(missing["created"], false);
    }

    #[tokio::test]
    async fn test_graph_link_rejects_unknown_relationship() {
        let server = make_server();
        let err = server
            .graph_link(Parameters(LinkRequest {
                from_id: "int_a".to_string(),
                to_id: "int_b".to_string(),
                relationship: "CAUSED_BY".to_string(),
                similarity: None,
                reason: None,
                format: OutputFormat::Json,
            }))
            .await
            .unwrap_err();
        assert!(err.message.contains("invalid relationship type"));
        assert!(err.message.contains("[request graph_link_"));
    }

    #[tokio::test]
    async fn test_memory_store_and_search() {
        let server = make_server();
        let stored = parse_result(
            &server
                .memory_store(Parameters(MemoryStoreRequest {
                    content: "the user prefers verbose compiler errors".to_string(),
                    r#type: "preference".to_string(),
                    user: Some("ada".to_string()),
                    confidence: None,
                    importance: Some(0.9),
                    tags: None,
                    emotion: None,
                    collection: None,
                    format: OutputFormat::Json,
                }))
                .await
                .unwrap(),
        );
        let memory_id = stored["memory_id"].as_str().unwrap();

        let found = parse_result(
            &server
                .memory_search(Parameters(MemorySearchRequest {
                    queries: vec!["verbose compiler errors".to_string()],
                    k: None,
                    r#type: Some("preference".to_string()),
                    user: Some("ada".to_string()),
                    min_importance: Some(0.5),
                    collection: None,
                    format: OutputFormat::Json,
                }))
                .await
                .unwrap(),
        );
        assert_eq!(found["results"][0][0]["id"], memory_id);
    }

    #[tokio::test]
    async fn test_memory_search_requires_queries() {
        let server = make_server();
        let err = server
            .memory_search(Parameters(MemorySearchRequest {
                queries: vec![],
                k: None,
                r#type: None,
                user: None,
                min_importance: None,
                collection: None,
                format: OutputFormat::Json,
            }))
            .await
            .unwrap_err();
        assert!(err.message.contains("at least one query"));
    }

    #[tokio::test]
    async fn test_memory_add_arity_mismatch() {
        let server = make_server();
        let err = server
            .memory_add(Parameters(MemoryAddRequest {
                documents: vec!["one".to_string(), "two".to_string()],
                metadatas: None,
                ids: Some(vec!["mem_only".to_string()]),
                collection: None,
                format: OutputFormat::Json,
            }))
            .await
            .unwrap_err();
        assert!(err.message.contains("ids"));
    }

    #[tokio::test]
    async fn test_memory_add_bulk() {
        let server = make_server();
        let json = parse_result(
            &server
                .memory_add(Parameters(MemoryAddRequest {
                    documents: vec![
                        "ada ships on fridays".to_string(),
                        "grace reviews every morning".to_string(),
                    ],
                    metadatas: None,
                    ids: None,
                    collection: None,
                    format: OutputFormat::Json,
                }))
                .await
                .unwrap(),
        );
        assert_eq!(json["ids"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_analytics_after_responds() {
        let server = make_server();
        server.respond(Parameters(respond_req("ada"))).await.unwrap();
        let mut second = respond_req("ada");
        second.intent = Some("request".to_string());
        second.topics = vec!["rust".to_string()];
        server.respond(Parameters(second)).await.unwrap();

        let insights = parse_result(
            &server
                .analytics_insights(Parameters(InsightsRequest {
                    user: Some("ada".to_string()),
                    days: None,
                    format: OutputFormat::Json,
                }))
                .await
                .unwrap(),
        );
        assert_eq!(insights["total_interactions"], 2);
        assert_eq!(insights["distinct_intents"], 2);

        let trends = parse_result(
            &server
                .analytics_trends(Parameters(TrendsRequest {
                    user: None,
                    days: None,
                    limit: Some(3),
                    format: OutputFormat::Json,
                }))
                .await
                .unwrap(),
        );
        assert!(!trends["trends"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_tool_registration() {
        let server = make_server();
        let info = server.get_info();

        assert!(info.instructions.is_some());
        assert!(info.capabilities.tools.is_some());
    }
}
