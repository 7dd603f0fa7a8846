//! Read-only aggregations over the interaction graph.

use rusqlite::types::Value;
use rusqlite::params_from_iter;
use serde::{Deserialize, Serialize};

use mg_core::{TopicFrequency, days_ago_iso8601};

use crate::error::Result;
use crate::graph::GraphStore;

/// Aggregate view of a time window, optionally scoped to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightsReport {
    pub total_interactions: u64,
    pub distinct_intents: u64,
    pub distinct_sentiments: u64,
    /// Count of distinct topic arrays, not distinct topics. Two
    /// interactions tagged `["rust"]` and `["rust","graphs"]` count as
    /// two. A coarse diversity signal; per-topic detail comes from
    /// [`topic_trends`].
    pub distinct_topic_sets: u64,
}

pub fn insights(graph: &GraphStore, user: Option<&str>, days: u32) -> Result<InsightsReport> {
    let cutoff = days_ago_iso8601(days);
    let mut sql = String::from(
        "SELECT count(*), \
                count(DISTINCT intent), \
                count(DISTINCT sentiment), \
                count(DISTINCT topics) \
         FROM interactions WHERE timestamp > ?1",
    );
    let mut values: Vec<Value> = vec![cutoff.into()];

    if let Some(user) = user {
        values.push(user.to_string().into());
        sql.push_str(&format!(" AND user = ?{}", values.len()));
    }

    let session = graph.driver().session();
    let report = session.query_row(&sql, params_from_iter(values), |row| {
        Ok(InsightsReport {
            total_interactions: row.get(0)?,
            distinct_intents: row.get(1)?,
            distinct_sentiments: row.get(2)?,
            distinct_topic_sets: row.get(3)?,
        })
    })?;
    Ok(report)
}

/// Top topics by ABOUT-edge mention count in the window, descending.
pub fn topic_trends(
    graph: &GraphStore,
    user: Option<&str>,
    days: u32,
    limit: u32,
) -> Result<Vec<TopicFrequency>> {
    let cutoff = days_ago_iso8601(days);
    let mut sql = String::from(
        "SELECT a.topic, count(*) AS mentions \
         FROM about a \
         JOIN interactions i ON i.id = a.interaction_id \
         WHERE i.timestamp > ?1",
    );
    let mut values: Vec<Value> = vec![cutoff.into()];

    if let Some(user) = user {
        values.push(user.to_string().into());
        sql.push_str(&format!(" AND i.user = ?{}", values.len()));
    }

    values.push(i64::from(limit).into());
    sql.push_str(&format!(
        " GROUP BY a.topic ORDER BY mentions DESC, a.topic ASC LIMIT ?{}",
        values.len()
    ));

    let session = graph.driver().session();
    let mut stmt = session.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), |row| {
            Ok(TopicFrequency {
                topic: row.get(0)?,
                frequency: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mg_core::{NewInteraction, Sentiment};

    fn seed(store: &GraphStore, user: &str, intent: &str, sentiment: Sentiment, topics: &[&str]) {
        store
            .create_interaction(
                &NewInteraction {
                    user: user.to_string(),
                    input: "input".to_string(),
                    output: "output".to_string(),
                    intent: Some(intent.to_string()),
                    sentiment: Some(sentiment),
                    entities: vec![],
                    topics: topics.iter().map(|s| s.to_string()).collect(),
                },
                None,
            )
            .unwrap();
    }

    #[test]
    fn test_insights_counts() {
        let store = GraphStore::open_in_memory().unwrap();
        seed(&store, "ada", "question", Sentiment::Neutral, &["rust"]);
        seed(&store, "ada", "question", Sentiment::Positive, &["rust"]);
        seed(&store, "ada", "request", Sentiment::Neutral, &["rust", "graphs"]);

        let report = insights(&store, Some("ada"), 7).unwrap();
        assert_eq!(report.total_interactions, 3);
        assert_eq!(report.distinct_intents, 2);
        assert_eq!(report.distinct_sentiments, 2);
        // ["rust"] twice and ["rust","graphs"] once: two distinct sets
        assert_eq!(report.distinct_topic_sets, 2);
    }

    #[test]
    fn test_insights_user_scoping() {
        let store = GraphStore::open_in_memory().unwrap();
        seed(&store, "ada", "question", Sentiment::Neutral, &["rust"]);
        seed(&store, "grace", "question", Sentiment::Neutral, &["rust"]);

        assert_eq!(insights(&store, Some("ada"), 7).unwrap().total_interactions, 1);
        assert_eq!(insights(&store, None, 7).unwrap().total_interactions, 2);
    }

    #[test]
    fn test_insights_empty_window() {
        let store = GraphStore::open_in_memory().unwrap();
        let report = insights(&store, None, 7).unwrap();
        assert_eq!(report.total_interactions, 0);
        assert_eq!(report.distinct_topic_sets, 0);
    }

    #[test]
    fn test_trends_ranked_and_limited() {
        let store = GraphStore::open_in_memory().unwrap();
        seed(&store, "ada", "q", Sentiment::Neutral, &["rust", "graphs"]);
        seed(&store, "ada", "q", Sentiment::Neutral, &["rust"]);
        seed(&store, "ada", "q", Sentiment::Neutral, &["rust", "sqlite"]);

        let trends = topic_trends(&store, None, 7, 2).unwrap();
        assert_eq!(trends.len(), 2);
        assert_eq!(trends[0].topic, "rust");
        assert_eq!(trends[0].frequency, 3);
    }

    #[test]
    fn test_trends_user_scoping() {
        let store = GraphStore::open_in_memory().unwrap();
        seed(&store, "ada", "q", Sentiment::Neutral, &["rust"]);
        seed(&store, "grace", "q", Sentiment::Neutral, &["python"]);

        let trends = topic_trends(&store, Some("grace"), 7, 10).unwrap();
        assert_eq!(trends.len(), 1);
        assert_eq!(trends[0].topic, "python");
    }
}
