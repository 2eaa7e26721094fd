//! Remote document source contract.
//!
//! The concrete API client lives outside this workspace. The engine only
//! depends on [`RemoteSource`], the entity and block model below, and the
//! permanent/transient split of [`RemoteError`].

use crate::id::EntityId;
use crate::types::{EntityKind, UserKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors returned by a remote source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The entity does not exist or is not shared with the integration.
    #[error("remote object not found: {id}")]
    NotFound {
        /// The requested id.
        id: String,
    },

    /// Access to the object is denied.
    #[error("forbidden: {message}")]
    Forbidden {
        /// Server message.
        message: String,
    },

    /// The credentials were rejected.
    #[error("unauthenticated: {message}")]
    Unauthenticated {
        /// Server message.
        message: String,
    },

    /// The request was malformed.
    #[error("validation failed: {message}")]
    Validation {
        /// Server message.
        message: String,
    },

    /// The remote asked the client to slow down.
    #[error("rate limited")]
    RateLimited {
        /// Server-suggested wait, if any.
        retry_after: Option<Duration>,
    },

    /// The remote failed to handle the request.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP-like status code.
        status: u16,
        /// Server message.
        message: String,
    },

    /// The request never completed (connection, timeout, decoding).
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// The caller cancelled the request.
    #[error("remote call cancelled")]
    Cancelled,
}

impl RemoteError {
    /// Creates a not-found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a server error.
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Returns true if repeating the request can never succeed.
    ///
    /// Queue items failing with a permanent error are dropped.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            RemoteError::NotFound { .. }
                | RemoteError::Forbidden { .. }
                | RemoteError::Unauthenticated { .. }
                | RemoteError::Validation { .. }
        )
    }

    /// Returns true for rate-limit responses.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RemoteError::RateLimited { .. })
    }

    /// Returns true if the request may succeed when repeated.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::RateLimited { .. } | RemoteError::Server { .. } | RemoteError::Transport { .. }
        )
    }
}

/// Reference to a remote user, possibly not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserRef {
    /// User id.
    pub id: EntityId,
    /// Display name, once resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Account kind, once resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<UserKind>,
    /// Contact address, once resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl UserRef {
    /// Creates an unresolved reference.
    #[must_use]
    pub fn new(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Returns true if a display name is known.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.name.is_some()
    }
}

/// A fully fetched remote user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// User id.
    pub id: EntityId,
    /// Display name.
    pub name: String,
    /// Account kind.
    pub kind: UserKind,
    /// Contact address.
    pub email: Option<String>,
}

/// Metadata of a page or database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    /// Entity id.
    pub id: EntityId,
    /// Page or database.
    pub kind: EntityKind,
    /// Current display title.
    pub title: String,
    /// Parent entity, `None` for workspace-level entities.
    pub parent_id: Option<EntityId>,
    /// Last remote edit.
    pub last_edited: DateTime<Utc>,
    /// Author.
    pub created_by: Option<UserRef>,
    /// Last editor.
    pub last_edited_by: Option<UserRef>,
    /// Archived entities are not materialized.
    pub archived: bool,
}

impl Entity {
    /// Creates a page with the given id, title and edit time.
    #[must_use]
    pub fn page(id: impl Into<EntityId>, title: impl Into<String>, last_edited: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            kind: EntityKind::Page,
            title: title.into(),
            parent_id: None,
            last_edited,
            created_by: None,
            last_edited_by: None,
            archived: false,
        }
    }

    /// Creates a database with the given id, title and edit time.
    #[must_use]
    pub fn database(
        id: impl Into<EntityId>,
        title: impl Into<String>,
        last_edited: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: EntityKind::Database,
            ..Self::page(id, title, last_edited)
        }
    }

    /// Sets the parent.
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<EntityId>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }
}

/// Content block kinds understood by the converter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    /// Plain paragraph.
    Paragraph,
    /// Heading of level 1 to 3.
    Heading(u8),
    /// Bulleted list item.
    BulletedItem,
    /// Numbered list item.
    NumberedItem,
    /// Checkbox item.
    ToDo {
        /// Whether the box is ticked.
        checked: bool,
    },
    /// Quotation.
    Quote,
    /// Fenced code.
    Code {
        /// Language tag.
        language: String,
    },
    /// Horizontal rule.
    Divider,
    /// Embedded image.
    Image {
        /// Download URL.
        url: String,
    },
    /// Attached file.
    File {
        /// Download URL.
        url: String,
        /// Display name.
        name: String,
    },
    /// Link to a child page.
    ChildPage,
    /// Link to a child database.
    ChildDatabase,
    /// Anything the converter does not render.
    Unsupported(String),
}

/// A node of an entity's content tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block id; for child pages and databases, the child entity id.
    pub id: EntityId,
    /// What the block is.
    pub kind: BlockKind,
    /// Plain text content (title for child links).
    pub text: String,
    /// True if the remote reports nested blocks.
    pub has_children: bool,
    /// Nested blocks, filled by a tree fetch.
    pub children: Vec<Block>,
}

impl Block {
    /// Creates a leaf block.
    #[must_use]
    pub fn new(id: impl Into<EntityId>, kind: BlockKind, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            text: text.into(),
            has_children: false,
            children: Vec::new(),
        }
    }

    /// Attaches nested blocks.
    #[must_use]
    pub fn with_children(mut self, children: Vec<Block>) -> Self {
        self.has_children = !children.is_empty();
        self.children = children;
        self
    }
}

/// One page of block children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockPage {
    /// Blocks of this page, without their nested children.
    pub blocks: Vec<Block>,
    /// Cursor for the next page, `None` on the last page.
    pub next_cursor: Option<String>,
}

/// One page of database rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityPage {
    /// Rows of this page.
    pub entities: Vec<Entity>,
    /// Cursor for the next page, `None` on the last page.
    pub next_cursor: Option<String>,
}

/// Visitor decision during a search scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchControl {
    /// Keep scanning.
    Continue,
    /// Stop; no further results are requested.
    Stop,
}

/// Client for the remote document source.
///
/// Implementations handle authentication and pagination; the engine
/// wraps them for rate limiting and retries.
pub trait RemoteSource: Send + Sync {
    /// Fetches the metadata of one page or database.
    fn fetch_entity(&self, id: &EntityId) -> RemoteResult<Entity>;

    /// Fetches one page of the direct children of a block or page.
    fn fetch_block_children(&self, id: &EntityId, cursor: Option<&str>) -> RemoteResult<BlockPage>;

    /// Fetches one page of rows of a database.
    fn query_database(&self, id: &EntityId, cursor: Option<&str>) -> RemoteResult<EntityPage>;

    /// Scans shared entities sorted by last edit, newest first.
    ///
    /// `visit` is called once per entity until it returns
    /// [`SearchControl::Stop`] or results run out.
    fn search(
        &self,
        query: &str,
        visit: &mut dyn FnMut(Entity) -> SearchControl,
    ) -> RemoteResult<()>;

    /// Fetches a user.
    fn fetch_user(&self, id: &EntityId) -> RemoteResult<User>;

    /// Downloads a binary asset.
    fn download(&self, url: &str) -> RemoteResult<Vec<u8>>;
}

impl<R: RemoteSource + ?Sized> RemoteSource for std::sync::Arc<R> {
    fn fetch_entity(&self, id: &EntityId) -> RemoteResult<Entity> {
        (**self).fetch_entity(id)
    }

    fn fetch_block_children(&self, id: &EntityId, cursor: Option<&str>) -> RemoteResult<BlockPage> {
        (**self).fetch_block_children(id, cursor)
    }

    fn query_database(&self, id: &EntityId, cursor: Option<&str>) -> RemoteResult<EntityPage> {
        (**self).query_database(id, cursor)
    }

    fn search(
        &self,
        query: &str,
        visit: &mut dyn FnMut(Entity) -> SearchControl,
    ) -> RemoteResult<()> {
        (**self).search(query, visit)
    }

    fn fetch_user(&self, id: &EntityId) -> RemoteResult<User> {
        (**self).fetch_user(id)
    }

    fn download(&self, url: &str) -> RemoteResult<Vec<u8>> {
        (**self).download(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(RemoteError::not_found("x").is_permanent());
        assert!(RemoteError::Forbidden {
            message: "no".into()
        }
        .is_permanent());
        assert!(!RemoteError::server(502, "bad gateway").is_permanent());
        assert!(RemoteError::server(502, "bad gateway").is_retryable());
        assert!(RemoteError::RateLimited { retry_after: None }.is_rate_limited());
        assert!(!RemoteError::Cancelled.is_retryable());
        assert!(!RemoteError::Cancelled.is_permanent());
    }

    #[test]
    fn block_children_flag() {
        let leaf = Block::new("b1", BlockKind::Paragraph, "text");
        assert!(!leaf.has_children);
        let parent = Block::new("b0", BlockKind::BulletedItem, "item").with_children(vec![leaf]);
        assert!(parent.has_children);
    }
}
