//! The interaction graph store.
//!
//! Executes the fixed query set against SQLite through the session
//! abstraction. All values are bound parameters; the only text ever
//! assembled into SQL is placeholder lists (`?,?,?`) and labels taken
//! from validated enums — caller strings never reach query text.

use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};

use mg_core::{
    InteractionRecord, LinkProperties, NewInteraction, RelationshipType, TopicFrequency,
    UserProfile, ValidationReport, interaction_id, now_iso8601,
};

use crate::error::{Result, StoreError, WriteStep};
use crate::schema;
use crate::session::Driver;

/// Outcome of a pattern-matched edge write: the write either matched
/// both endpoints and created the edge, or silently created nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    /// One or both endpoint ids did not resolve. Not an error — the
    /// permissive default for stale ids — but callers can tell.
    MissingEndpoint,
}

/// Filters for [`GraphStore::find_related`]. Dimensions are AND'd
/// together; the values inside each dimension are OR'd.
#[derive(Debug, Clone, Default)]
pub struct RelatedFilter {
    pub topics: Vec<String>,
    pub entities: Vec<String>,
    pub user: Option<String>,
}

/// Node counts for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct GraphCounts {
    pub users: u64,
    pub interactions: u64,
    pub topics: u64,
}

pub struct GraphStore {
    driver: Driver,
}

const INTERACTION_COLUMNS: &str =
    "i.id, i.user, i.input, i.output, i.timestamp, i.intent, i.sentiment, i.entities, i.topics";

impl GraphStore {
    pub fn open(path: &Path) -> Result<Self> {
        let driver = Driver::open(path)?;
        schema::initialize_graph(&driver.session())?;
        Ok(GraphStore { driver })
    }

    pub fn open_in_memory() -> Result<Self> {
        let driver = Driver::open_in_memory()?;
        schema::initialize_graph(&driver.session())?;
        Ok(GraphStore { driver })
    }

    // --- User profile ---

    /// Upsert the user node and return the profile. The upsert is
    /// idempotent under concurrent first-touch: `INSERT OR IGNORE`
    /// keyed on the name, `created_at` set once and never updated.
    pub fn get_or_create_profile(&self, user: &str) -> Result<UserProfile> {
        if user.trim().is_empty() {
            return Err(StoreError::Validation("user name must not be empty".into()));
        }

        let session = self.driver.session();
        let inserted = session.execute(
            "INSERT OR IGNORE INTO users (name, created_at) VALUES (?1, ?2)",
            params![user, now_iso8601()],
        )?;

        let interaction_count: u64 = session.query_row(
            "SELECT count(*) FROM initiated WHERE user = ?1",
            [user],
            |row| row.get(0),
        )?;

        let favorite_topics = favorite_topics_on(&session, user, 10)?;

        Ok(UserProfile {
            user: user.to_string(),
            interaction_count,
            created: inserted > 0,
            favorite_topics,
        })
    }

    // --- Reads ---

    /// Interactions for `user` within the last `days` days, newest
    /// first, optionally restricted to those whose topic array
    /// intersects `topics`. Empty result is not an error.
    pub fn recent_interactions(
        &self,
        user: &str,
        days: u32,
        limit: u32,
        topics: Option<&[String]>,
    ) -> Result<Vec<InteractionRecord>> {
        let cutoff = mg_core::days_ago_iso8601(days);
        let mut sql = format!(
            "SELECT {INTERACTION_COLUMNS} FROM interactions i \
             WHERE i.user = ?1 AND i.timestamp > ?2"
        );
        let mut values: Vec<Value> = vec![user.to_string().into(), cutoff.into()];

        if let Some(topics) = topics.filter(|t| !t.is_empty()) {
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM json_each(i.topics) WHERE json_each.value IN ({}))",
                placeholders(values.len() + 1, topics.len())
            ));
            values.extend(topics.iter().map(|t| Value::from(t.clone())));
        }

        sql.push_str(&format!(
            " ORDER BY i.timestamp DESC, i.rowid DESC LIMIT ?{}",
            values.len() + 1
        ));
        values.push(i64::from(limit).into());

        let session = self.driver.session();
        query_interactions(&session, &sql, values)
    }

    /// Most recent interaction id for `user`, if any.
    pub fn last_interaction_id(&self, user: &str) -> Result<Option<String>> {
        let session = self.driver.session();
        let mut stmt = session.prepare(
            "SELECT id FROM interactions WHERE user = ?1 \
             ORDER BY timestamp DESC, rowid DESC LIMIT 1",
        )?;
        let id = stmt.query_row([user], |row| row.get(0)).ok();
        Ok(id)
    }

    /// Interactions matching every supplied filter dimension,
    /// deduplicated, newest first. Topics match through ABOUT edges,
    /// entities through the denormalized array; both are OR'd within
    /// themselves and AND'd against each other and the user filter.
    pub fn find_related(&self, filter: &RelatedFilter, limit: u32) -> Result<Vec<InteractionRecord>> {
        let mut sql = format!(
            "SELECT DISTINCT {INTERACTION_COLUMNS}, i.timestamp, i.rowid FROM interactions i"
        );
        let mut conditions: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if !filter.topics.is_empty() {
            sql.push_str(" JOIN about a ON a.interaction_id = i.id");
            conditions.push(format!(
                "a.topic IN ({})",
                placeholders(values.len() + 1, filter.topics.len())
            ));
            values.extend(filter.topics.iter().map(|t| Value::from(t.clone())));
        }

        if let Some(user) = &filter.user {
            conditions.push(format!("i.user = ?{}", values.len() + 1));
            values.push(user.clone().into());
        }

        if !filter.entities.is_empty() {
            conditions.push(format!(
                "EXISTS (SELECT 1 FROM json_each(i.entities) WHERE json_each.value IN ({}))",
                placeholders(values.len() + 1, filter.entities.len())
            ));
            values.extend(filter.entities.iter().map(|e| Value::from(e.clone())));
        }

        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        sql.push_str(&format!(
            " ORDER BY i.timestamp DESC, i.rowid DESC LIMIT ?{}",
            values.len() + 1
        ));
        values.push(i64::from(limit).into());

        let session = self.driver.session();
        query_interactions(&session, &sql, values)
    }

    // --- Writes ---

    /// Create an interaction and its edges: (1) the node, (2) the
    /// FOLLOWS edge when a previous id is supplied and resolves,
    /// (3) user upsert + INITIATED, (4) topic upserts + ABOUT.
    ///
    /// The four steps are sequential, not a transaction. A step-1
    /// failure persists nothing; a later failure surfaces as
    /// [`StoreError::PartialWrite`] naming the failed step while the
    /// earlier steps remain. Callers needing all-or-nothing semantics
    /// use [`GraphStore::create_interaction_atomic`].
    pub fn create_interaction(
        &self,
        record: &NewInteraction,
        previous_id: Option<&str>,
    ) -> Result<String> {
        validate_new_interaction(record)?;
        let id = interaction_id();
        let session = self.driver.session();

        insert_node(&session, &id, record)?;

        if let Some(prev) = previous_id {
            link_chain(&session, prev, &id).map_err(|source| StoreError::PartialWrite {
                step: WriteStep::Chain,
                interaction_id: id.clone(),
                source,
            })?;
        }

        link_owner(&session, &record.user, &id).map_err(|source| StoreError::PartialWrite {
            step: WriteStep::Owner,
            interaction_id: id.clone(),
            source,
        })?;

        link_topics(&session, &id, &record.topics).map_err(|source| StoreError::PartialWrite {
            step: WriteStep::Topics,
            interaction_id: id.clone(),
            source,
        })?;

        tracing::debug!(interaction = %id, user = %record.user, "interaction stored");
        Ok(id)
    }

    /// The stricter variant: identical choreography wrapped in one
    /// transaction, so a failure at any step rolls everything back.
    pub fn create_interaction_atomic(
        &self,
        record: &NewInteraction,
        previous_id: Option<&str>,
    ) -> Result<String> {
        validate_new_interaction(record)?;
        let id = interaction_id();
        let session = self.driver.session();
        let tx = session.unchecked_transaction()?;

        insert_node(&tx, &id, record)?;
        if let Some(prev) = previous_id {
            link_chain(&tx, prev, &id)?;
        }
        link_owner(&tx, &record.user, &id)?;
        link_topics(&tx, &id, &record.topics)?;

        tx.commit()?;
        Ok(id)
    }

    /// Create a typed cross-link between two interactions. The
    /// relationship type was already validated by construction; the
    /// write is a distinguishable no-op when either endpoint is
    /// missing, matching pattern-match write semantics.
    pub fn create_cross_link(
        &self,
        from_id: &str,
        to_id: &str,
        rel_type: RelationshipType,
        properties: Option<&LinkProperties>,
    ) -> Result<LinkOutcome> {
        let props = properties.cloned().unwrap_or_default();
        let session = self.driver.session();
        let rows = session.execute(
            "INSERT INTO links (from_id, to_id, rel_type, similarity, reason) \
             SELECT ?1, ?2, ?3, ?4, ?5 \
             WHERE EXISTS (SELECT 1 FROM interactions WHERE id = ?1) \
               AND EXISTS (SELECT 1 FROM interactions WHERE id = ?2)",
            params![from_id, to_id, rel_type.as_str(), props.similarity, props.reason],
        )?;

        if rows > 0 {
            Ok(LinkOutcome::Created)
        } else {
            tracing::debug!(from = %from_id, to = %to_id, "cross-link skipped: endpoint missing");
            Ok(LinkOutcome::MissingEndpoint)
        }
    }

    // --- Health check ---

    /// Structural completeness of a stored interaction: presence of
    /// the node, an incoming INITIATED edge and at least one outgoing
    /// ABOUT edge. A health check, not a correctness proof.
    pub fn validate_interaction(&self, id: &str) -> Result<ValidationReport> {
        let session = self.driver.session();
        let report = session.query_row(
            "SELECT \
               EXISTS (SELECT 1 FROM interactions WHERE id = ?1), \
               EXISTS (SELECT 1 FROM initiated WHERE interaction_id = ?1), \
               EXISTS (SELECT 1 FROM about WHERE interaction_id = ?1)",
            [id],
            |row| {
                Ok(ValidationReport {
                    exists: row.get(0)?,
                    has_owning_user: row.get(1)?,
                    has_at_least_one_topic: row.get(2)?,
                })
            },
        )?;
        Ok(report)
    }

    /// Node counts for diagnostics and the stats command.
    pub fn counts(&self) -> Result<GraphCounts> {
        let session = self.driver.session();
        session
            .query_row(
                "SELECT (SELECT count(*) FROM users), \
                        (SELECT count(*) FROM interactions), \
                        (SELECT count(*) FROM topics)",
                [],
                |row| {
                    Ok(GraphCounts {
                        users: row.get(0)?,
                        interactions: row.get(1)?,
                        topics: row.get(2)?,
                    })
                },
            )
            .map_err(StoreError::from)
    }

    pub(crate) fn driver(&self) -> &Driver {
        &self.driver
    }
}

// --- Write choreography helpers (each step is one statement batch) ---

fn insert_node(conn: &Connection, id: &str, record: &NewInteraction) -> Result<()> {
    let entities = serde_json::to_string(&record.entities)
        .map_err(|e| StoreError::InvalidData(format!("entities not serializable: {e}")))?;
    let topics = serde_json::to_string(&dedupe(&record.topics))
        .map_err(|e| StoreError::InvalidData(format!("topics not serializable: {e}")))?;

    conn.execute(
        "INSERT INTO interactions (id, user, input, output, timestamp, intent, sentiment, entities, topics) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            record.user,
            record.input,
            record.output,
            now_iso8601(),
            record.intent,
            record.sentiment.map(|s| s.as_str()),
            entities,
            topics,
        ],
    )?;
    Ok(())
}

fn link_chain(conn: &Connection, prev_id: &str, next_id: &str) -> rusqlite::Result<()> {
    // No-op when the previous id does not resolve: stale chain
    // pointers are tolerated, not errors.
    conn.execute(
        "INSERT INTO follows (prev_id, next_id) \
         SELECT ?1, ?2 WHERE EXISTS (SELECT 1 FROM interactions WHERE id = ?1)",
        params![prev_id, next_id],
    )?;
    Ok(())
}

fn link_owner(conn: &Connection, user: &str, id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO users (name, created_at) VALUES (?1, ?2)",
        params![user, now_iso8601()],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO initiated (user, interaction_id) VALUES (?1, ?2)",
        params![user, id],
    )?;
    Ok(())
}

fn link_topics(conn: &Connection, id: &str, topics: &[String]) -> rusqlite::Result<()> {
    for topic in dedupe(topics) {
        conn.execute("INSERT OR IGNORE INTO topics (name) VALUES (?1)", [&topic])?;
        conn.execute(
            "INSERT INTO about (interaction_id, topic) VALUES (?1, ?2)",
            params![id, topic],
        )?;
    }
    Ok(())
}

fn validate_new_interaction(record: &NewInteraction) -> Result<()> {
    if record.user.trim().is_empty() {
        return Err(StoreError::Validation("user name must not be empty".into()));
    }
    Ok(())
}

/// Order-preserving deduplication of topic strings.
fn dedupe(topics: &[String]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(topics.len());
    for t in topics {
        if !seen.contains(t) {
            seen.push(t.clone());
        }
    }
    seen
}

fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn favorite_topics_on(conn: &Connection, user: &str, limit: u32) -> Result<Vec<TopicFrequency>> {
    let mut stmt = conn.prepare(
        "SELECT a.topic, count(*) AS frequency \
         FROM initiated ini \
         JOIN about a ON a.interaction_id = ini.interaction_id \
         WHERE ini.user = ?1 \
         GROUP BY a.topic \
         ORDER BY frequency DESC, a.topic ASC \
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![user, limit], |row| {
            Ok(TopicFrequency {
                topic: row.get(0)?,
                frequency: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

type RawInteraction = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
);

pub(crate) fn query_interactions(
    conn: &Connection,
    sql: &str,
    values: Vec<Value>,
) -> Result<Vec<InteractionRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let raw: Vec<RawInteraction> = stmt
        .query_map(params_from_iter(values), |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
            ))
        })?
        .collect::<std::result::Result<_, _>>()?;

    raw.into_iter().map(record_from_raw).collect()
}

fn record_from_raw(raw: RawInteraction) -> Result<InteractionRecord> {
    let (id, user, input, output, timestamp, intent, sentiment, entities, topics) = raw;
    let sentiment = match sentiment {
        Some(s) => Some(
            s.parse()
                .map_err(|e: String| StoreError::InvalidData(e))?,
        ),
        None => None,
    };
    let entities: Vec<String> = serde_json::from_str(&entities)
        .map_err(|e| StoreError::InvalidData(format!("bad entities array for {id}: {e}")))?;
    let topics: Vec<String> = serde_json::from_str(&topics)
        .map_err(|e| StoreError::InvalidData(format!("bad topics array for {id}: {e}")))?;

    Ok(InteractionRecord {
        id,
        user,
        input,
        output,
        timestamp,
        intent,
        sentiment,
        entities,
        topics,
    })
}
