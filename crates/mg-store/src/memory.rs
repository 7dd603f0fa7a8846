//! The semantic memory store.
//!
//! Content-addressable long-term memory: documents are embedded with
//! the fixed default embedding function at write time and retrieved by
//! ascending cosine distance against freshly embedded query texts.
//! Collections are created on first reference, reads and writes alike;
//! querying a name nobody has written to yields empty results, never
//! an error.

use std::path::Path;
use std::str::FromStr;

use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};

use mg_core::embedding::{self, cosine_distance, embed};
use mg_core::{Emotion, MemoryMetadata, MemoryType, memory_id, now_iso8601};

use crate::error::{Result, StoreError};
use crate::schema;
use crate::session::Driver;

/// Collection used when the caller does not name one.
pub const DEFAULT_COLLECTION: &str = "mindgraph_memories";

/// Source tag stamped on memories unless the caller supplies one.
const DEFAULT_SOURCE: &str = "mindgraph";

/// Metadata filter for [`MemoryStore::query`]. All present fields must
/// match for a document to be a candidate.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    pub memory_type: Option<MemoryType>,
    pub user: Option<String>,
    pub min_importance: Option<f64>,
}

/// One nearest-neighbor hit.
#[derive(Debug, Clone)]
pub struct MemoryHit {
    pub id: String,
    /// Cosine distance to the query embedding, in [0, 2].
    pub distance: f32,
    pub document: String,
    pub metadata: MemoryMetadata,
    pub timestamp: String,
}

pub struct MemoryStore {
    driver: Driver,
}

impl MemoryStore {
    pub fn open(path: &Path) -> Result<Self> {
        let driver = Driver::open(path)?;
        schema::initialize_memory(&driver.session())?;
        Ok(MemoryStore { driver })
    }

    pub fn open_in_memory() -> Result<Self> {
        let driver = Driver::open_in_memory()?;
        schema::initialize_memory(&driver.session())?;
        Ok(MemoryStore { driver })
    }

    /// Store one document. Metadata ranges are checked before any
    /// write; timestamp and source are stamped here (callers may
    /// pre-set `source` to tag the owning interaction).
    pub fn store(&self, collection: &str, content: &str, metadata: &MemoryMetadata) -> Result<String> {
        validate_document(content, metadata)?;

        let session = self.driver.session();
        let collection_id = resolve_collection(&session, collection)?;
        let id = memory_id();
        insert_memory(&session, collection_id, &id, content, metadata)?;

        tracing::debug!(memory = %id, collection = %collection, "memory stored");
        Ok(id)
    }

    /// Bulk insert. Arity mismatches between documents, metadatas and
    /// ids are rejected before anything is written; the whole batch
    /// lands in one transaction.
    pub fn add_documents(
        &self,
        collection: &str,
        documents: &[String],
        metadatas: Option<&[MemoryMetadata]>,
        ids: Option<&[String]>,
    ) -> Result<Vec<String>> {
        if let Some(metas) = metadatas {
            if metas.len() != documents.len() {
                return Err(StoreError::Validation(format!(
                    "{} documents but {} metadatas",
                    documents.len(),
                    metas.len()
                )));
            }
        }
        if let Some(ids) = ids {
            if ids.len() != documents.len() {
                return Err(StoreError::Validation(format!(
                    "{} documents but {} ids",
                    documents.len(),
                    ids.len()
                )));
            }
        }

        let fallback = MemoryMetadata::new(MemoryType::Fact);
        for (i, doc) in documents.iter().enumerate() {
            let meta = metadatas.map(|m| &m[i]).unwrap_or(&fallback);
            validate_document(doc, meta)?;
        }

        let session = self.driver.session();
        let collection_id = resolve_collection(&session, collection)?;
        let tx = session.unchecked_transaction()?;

        let mut assigned = Vec::with_capacity(documents.len());
        for (i, doc) in documents.iter().enumerate() {
            let meta = metadatas.map(|m| &m[i]).unwrap_or(&fallback);
            let id = ids.map(|ids| ids[i].clone()).unwrap_or_else(memory_id);
            insert_memory(&tx, collection_id, &id, doc, meta)?;
            assigned.push(id);
        }

        tx.commit()?;
        tracing::debug!(
            count = assigned.len(),
            collection = %collection,
            "documents added"
        );
        Ok(assigned)
    }

    /// Nearest neighbors for each query text: up to `k` hits per text,
    /// ascending cosine distance. The candidate set is narrowed by the
    /// metadata filter in SQL; ranking is a linear scan over the
    /// surviving embeddings.
    pub fn query(
        &self,
        collection: &str,
        query_texts: &[String],
        k: u32,
        filter: Option<&MemoryFilter>,
    ) -> Result<Vec<Vec<MemoryHit>>> {
        let session = self.driver.session();
        let collection_id = resolve_collection(&session, collection)?;
        let candidates = load_candidates(&session, collection_id, filter)?;
        drop(session);

        let k = k as usize;
        let mut results = Vec::with_capacity(query_texts.len());
        for text in query_texts {
            let query_vec = embed(text);
            let mut scored: Vec<(f32, &Candidate)> = candidates
                .iter()
                .map(|c| (cosine_distance(&query_vec, &c.embedding), c))
                .collect();
            scored.sort_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.1.id.cmp(&b.1.id))
            });

            results.push(
                scored
                    .into_iter()
                    .take(k)
                    .map(|(distance, c)| c.to_hit(distance))
                    .collect(),
            );
        }
        Ok(results)
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> Result<u64> {
        let session = self.driver.session();
        let collection_id = resolve_collection(&session, collection)?;
        let n = session.query_row(
            "SELECT count(*) FROM memories WHERE collection_id = ?1",
            [collection_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

fn validate_document(content: &str, metadata: &MemoryMetadata) -> Result<()> {
    if content.trim().is_empty() {
        return Err(StoreError::Validation("memory content must not be empty".into()));
    }
    metadata.validate().map_err(StoreError::Validation)
}

/// Collection lookup, creating the row on first reference.
fn resolve_collection(conn: &Connection, name: &str) -> Result<i64> {
    if name.trim().is_empty() {
        return Err(StoreError::Validation("collection name must not be empty".into()));
    }
    conn.execute(
        "INSERT OR IGNORE INTO collections (name) VALUES (?1)",
        [name],
    )?;
    let id = conn.query_row(
        "SELECT id FROM collections WHERE name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn insert_memory(
    conn: &Connection,
    collection_id: i64,
    id: &str,
    content: &str,
    metadata: &MemoryMetadata,
) -> Result<()> {
    let blob = embedding::to_bytes(&embed(content));
    let source = metadata.source.as_deref().unwrap_or(DEFAULT_SOURCE);
    conn.execute(
        "INSERT INTO memories \
         (id, collection_id, content, embedding, type, user, confidence, importance, \
          tags, emotion, timestamp, source) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            id,
            collection_id,
            content,
            blob,
            metadata.memory_type.as_str(),
            metadata.user,
            metadata.confidence,
            metadata.importance,
            metadata.tags,
            metadata.emotion.map(|e| e.as_str()),
            now_iso8601(),
            source,
        ],
    )?;
    Ok(())
}

struct Candidate {
    id: String,
    content: String,
    embedding: Vec<f32>,
    metadata: MemoryMetadata,
    timestamp: String,
}

impl Candidate {
    fn to_hit(&self, distance: f32) -> MemoryHit {
        MemoryHit {
            id: self.id.clone(),
            distance,
            document: self.content.clone(),
            metadata: self.metadata.clone(),
            timestamp: self.timestamp.clone(),
        }
    }
}

fn load_candidates(
    conn: &Connection,
    collection_id: i64,
    filter: Option<&MemoryFilter>,
) -> Result<Vec<Candidate>> {
    let mut sql = String::from(
        "SELECT id, content, embedding, type, user, confidence, importance, \
                tags, emotion, timestamp, source \
         FROM memories WHERE collection_id = ?1",
    );
    let mut values: Vec<Value> = vec![collection_id.into()];

    if let Some(filter) = filter {
        if let Some(ty) = filter.memory_type {
            values.push(ty.as_str().to_string().into());
            sql.push_str(&format!(" AND type = ?{}", values.len()));
        }
        if let Some(user) = &filter.user {
            values.push(user.clone().into());
            sql.push_str(&format!(" AND user = ?{}", values.len()));
        }
        if let Some(min) = filter.min_importance {
            values.push(min.into());
            sql.push_str(&format!(" AND importance >= ?{}", values.len()));
        }
    }

    type Raw = (
        String,
        String,
        Vec<u8>,
        String,
        Option<String>,
        f64,
        f64,
        Option<String>,
        Option<String>,
        String,
        String,
    );

    let mut stmt = conn.prepare(&sql)?;
    let raw: Vec<Raw> = stmt
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
                row.get(9)?,
                row.get(10)?,
            ))
        })?
        .collect::<std::result::Result<_, _>>()?;

    raw.into_iter()
        .map(|(id, content, blob, ty, user, confidence, importance, tags, emotion, timestamp, source)| {
            let memory_type = MemoryType::from_str(&ty).map_err(StoreError::InvalidData)?;
            let emotion = match emotion {
                Some(e) => Some(Emotion::from_str(&e).map_err(StoreError::InvalidData)?),
                None => None,
            };
            Ok(Candidate {
                id,
                content,
                embedding: embedding::from_bytes(&blob),
                metadata: MemoryMetadata {
                    memory_type,
                    user,
                    confidence,
                    importance,
                    tags,
                    emotion,
                    source: Some(source),
                },
                timestamp,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::open_in_memory().unwrap()
    }

    fn meta(ty: MemoryType) -> MemoryMetadata {
        MemoryMetadata::new(ty)
    }

    #[test]
    fn test_store_returns_prefixed_id() {
        let id = store()
            .store(DEFAULT_COLLECTION, "the user prefers dark mode", &meta(MemoryType::Preference))
            .unwrap();
        assert!(id.starts_with("mem_"));
    }

    #[test]
    fn test_store_rejects_out_of_range_confidence() {
        let mut m = meta(MemoryType::Fact);
        m.confidence = 1.2;
        let err = store().store(DEFAULT_COLLECTION, "x", &m).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn test_store_rejects_empty_content() {
        let err = store()
            .store(DEFAULT_COLLECTION, "   ", &meta(MemoryType::Fact))
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn test_exact_content_is_top_hit() {
        let store = store();
        store
            .store(DEFAULT_COLLECTION, "the user prefers dark mode themes", &meta(MemoryType::Preference))
            .unwrap();
        store
            .store(DEFAULT_COLLECTION, "quarterly revenue exceeded projections", &meta(MemoryType::Fact))
            .unwrap();

        let results = store
            .query(
                DEFAULT_COLLECTION,
                &["the user prefers dark mode themes".to_string()],
                5,
                None,
            )
            .unwrap();
        let hits = &results[0];
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document, "the user prefers dark mode themes");
        assert!(hits[0].distance < 1e-6);
        assert!(hits[0].distance <= hits[1].distance, "ascending distance");
    }

    #[test]
    fn test_query_respects_k() {
        let store = store();
        for i in 0..8 {
            store
                .store(
                    DEFAULT_COLLECTION,
                    &format!("memory number {i} about rust"),
                    &meta(MemoryType::Insight),
                )
                .unwrap();
        }

        let results = store
            .query(DEFAULT_COLLECTION, &["rust".to_string()], 5, None)
            .unwrap();
        assert_eq!(results[0].len(), 5);
    }

    #[test]
    fn test_query_missing_collection_is_empty_not_error() {
        let results = store()
            .query("never_written", &["anything".to_string()], 5, None)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_empty());
    }

    #[test]
    fn test_query_one_result_set_per_text() {
        let store = store();
        store
            .store(DEFAULT_COLLECTION, "rust ownership", &meta(MemoryType::Insight))
            .unwrap();

        let results = store
            .query(
                DEFAULT_COLLECTION,
                &["rust".to_string(), "ownership".to_string()],
                3,
                None,
            )
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_filter_by_type_and_user() {
        let store = store();
        let mut pref = meta(MemoryType::Preference);
        pref.user = Some("ada".to_string());
        store.store(DEFAULT_COLLECTION, "ada likes terse logs", &pref).unwrap();

        let mut fact = meta(MemoryType::Fact);
        fact.user = Some("grace".to_string());
        store.store(DEFAULT_COLLECTION, "grace likes terse logs", &fact).unwrap();

        let filter = MemoryFilter {
            memory_type: Some(MemoryType::Preference),
            user: Some("ada".to_string()),
            min_importance: None,
        };
        let results = store
            .query(DEFAULT_COLLECTION, &["terse logs".to_string()], 5, Some(&filter))
            .unwrap();
        assert_eq!(results[0].len(), 1);
        assert_eq!(results[0][0].metadata.user.as_deref(), Some("ada"));
    }

    #[test]
    fn test_filter_min_importance() {
        let store = store();
        let mut low = meta(MemoryType::Fact);
        low.importance = 0.2;
        store.store(DEFAULT_COLLECTION, "low importance note", &low).unwrap();

        let mut high = meta(MemoryType::Fact);
        high.importance = 0.9;
        store.store(DEFAULT_COLLECTION, "high importance note", &high).unwrap();

        let filter = MemoryFilter {
            min_importance: Some(0.5),
            ..Default::default()
        };
        let results = store
            .query(DEFAULT_COLLECTION, &["note".to_string()], 5, Some(&filter))
            .unwrap();
        assert_eq!(results[0].len(), 1);
        assert_eq!(results[0][0].document, "high importance note");
    }

    #[test]
    fn test_source_defaults_and_overrides() {
        let store = store();
        store
            .store(DEFAULT_COLLECTION, "untagged memory", &meta(MemoryType::Fact))
            .unwrap();

        let mut tagged = meta(MemoryType::Fact);
        tagged.source = Some("int_abc123".to_string());
        store.store(DEFAULT_COLLECTION, "tagged memory", &tagged).unwrap();

        let results = store
            .query(DEFAULT_COLLECTION, &["untagged memory".to_string()], 1, None)
            .unwrap();
        assert_eq!(results[0][0].metadata.source.as_deref(), Some("mindgraph"));

        let results = store
            .query(DEFAULT_COLLECTION, &["tagged memory".to_string()], 1, None)
            .unwrap();
        assert_eq!(results[0][0].metadata.source.as_deref(), Some("int_abc123"));
    }

    #[test]
    fn test_add_documents_generates_ids() {
        let store = store();
        let docs = vec!["first note".to_string(), "second note".to_string()];
        let ids = store.add_documents(DEFAULT_COLLECTION, &docs, None, None).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|id| id.starts_with("mem_")));
        assert_eq!(store.count(DEFAULT_COLLECTION).unwrap(), 2);
    }

    #[test]
    fn test_add_documents_arity_mismatch_writes_nothing() {
        let store = store();
        let docs = vec!["one".to_string(), "two".to_string()];
        let metas = vec![meta(MemoryType::Fact)];
        let err = store
            .add_documents(DEFAULT_COLLECTION, &docs, Some(&metas), None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.count(DEFAULT_COLLECTION).unwrap(), 0);
    }

    #[test]
    fn test_add_documents_caller_ids_kept() {
        let store = store();
        let docs = vec!["pinned note".to_string()];
        let ids = vec!["mem_custom01".to_string()];
        let assigned = store
            .add_documents(DEFAULT_COLLECTION, &docs, None, Some(&ids))
            .unwrap();
        assert_eq!(assigned, ids);
    }

    #[test]
    fn test_collections_are_isolated() {
        let store = store();
        store
            .store("workspace_a", "note in a", &meta(MemoryType::Fact))
            .unwrap();

        let results = store
            .query("workspace_b", &["note in a".to_string()], 5, None)
            .unwrap();
        assert!(results[0].is_empty());
        assert_eq!(store.count("workspace_a").unwrap(), 1);
    }
}
