use std::fmt;

/// Step of the four-part interaction write choreography.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStep {
    /// Step 1: the interaction node itself.
    Node,
    /// Step 2: the FOLLOWS edge from the previous interaction.
    Chain,
    /// Step 3: user upsert + INITIATED edge.
    Owner,
    /// Step 4: topic upserts + ABOUT edges.
    Topics,
}

impl WriteStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteStep::Node => "interaction node",
            WriteStep::Chain => "FOLLOWS edge",
            WriteStep::Owner => "INITIATED edge",
            WriteStep::Topics => "ABOUT edges",
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sqlite(rusqlite::Error),
    /// Malformed input, rejected before any backend call.
    Validation(String),
    /// A later step of the non-atomic interaction write failed.
    /// Earlier steps remain persisted; the id names the surviving node.
    PartialWrite {
        step: WriteStep,
        interaction_id: String,
        source: rusqlite::Error,
    },
    InvalidData(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "I/O error: {e}"),
            StoreError::Sqlite(e) => write!(f, "SQLite error: {e}"),
            StoreError::Validation(msg) => write!(f, "validation error: {msg}"),
            StoreError::PartialWrite {
                step,
                interaction_id,
                source,
            } => write!(
                f,
                "partial write: {} failed for {interaction_id} ({source}); earlier steps persisted",
                step.as_str()
            ),
            StoreError::InvalidData(msg) => write!(f, "invalid data: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Sqlite(e) => Some(e),
            StoreError::PartialWrite { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
