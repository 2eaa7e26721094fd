//! Core type definitions for docsync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Schema version written into every persisted record.
pub const SCHEMA_VERSION: u32 = 1;

/// Kind of a tracked remote entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A document.
    #[default]
    Page,
    /// A collection container whose rows are pages.
    Database,
}

impl EntityKind {
    /// Returns the lowercase name used in file names and front-matter.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityKind::Page => "page",
            EntityKind::Database => "database",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a remote user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserKind {
    /// A human account.
    #[default]
    Person,
    /// An integration or automation.
    Bot,
}

/// Work requested by a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    /// Fetch unless a registry already exists.
    Init,
    /// Always reprocess when the remote copy is newer.
    Update,
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueType::Init => f.write_str("init"),
            QueueType::Update => f.write_str("update"),
        }
    }
}

/// Numbering class of a queue record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueClass {
    /// Real-time triggered work, numbered downward below the threshold.
    Priority,
    /// Bulk discovery work, numbered upward from the threshold.
    Batch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&EntityKind::Database).unwrap(), "\"database\"");
        assert_eq!(serde_json::to_string(&UserKind::Bot).unwrap(), "\"bot\"");
        assert_eq!(serde_json::to_string(&QueueType::Init).unwrap(), "\"init\"");
    }

    #[test]
    fn display() {
        assert_eq!(EntityKind::Page.to_string(), "page");
        assert_eq!(QueueType::Update.to_string(), "update");
    }
}
