//! Test fixtures and store helpers.

use chrono::{DateTime, TimeZone, Utc};
use docsync_core::{Block, BlockKind, Entity, User, UserKind, UserRef};
use docsync_store::{git_available, GitConfig, GitStore, MemoryStore};
use std::path::Path;
use std::sync::{Arc, Once};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Midnight UTC on the given day of January 2024.
pub fn time(day: u32) -> DateTime<Utc> {
    time_at(day, 0)
}

/// The given hour of the given day of January 2024.
pub fn time_at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0)
        .single()
        .expect("valid fixture date")
}

/// A page edited on `day`.
pub fn page(id: &str, title: &str, day: u32) -> Entity {
    Entity::page(id, title, time(day))
}

/// A page edited on `day` under `parent`.
pub fn child_page(id: &str, title: &str, parent: &str, day: u32) -> Entity {
    Entity::page(id, title, time(day)).with_parent(parent)
}

/// A paragraph block.
pub fn paragraph(id: &str, text: &str) -> Block {
    Block::new(id, BlockKind::Paragraph, text)
}

/// A link to a child page.
pub fn child_link(id: &str, title: &str) -> Block {
    Block::new(id, BlockKind::ChildPage, title)
}

/// An image block.
pub fn image(id: &str, url: &str) -> Block {
    Block::new(id, BlockKind::Image { url: url.into() }, "")
}

/// A person.
pub fn person(id: &str, name: &str) -> User {
    User {
        id: id.into(),
        name: name.into(),
        kind: UserKind::Person,
        email: None,
    }
}

/// Sets both author references of `entity` to unresolved `user`.
pub fn authored_by(mut entity: Entity, user: &str) -> Entity {
    entity.created_by = Some(UserRef::new(user));
    entity.last_edited_by = Some(UserRef::new(user));
    entity
}

/// A fresh in-memory store.
pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

/// A git checkout in a temporary directory, removed on drop.
pub struct TempCheckout {
    /// The store over the checkout.
    pub store: Arc<GitStore>,
    dir: TempDir,
}

impl TempCheckout {
    /// Initializes a checkout without a remote.
    ///
    /// Returns `None` when the `git` executable is not available, so
    /// callers can skip.
    pub fn new() -> Option<Self> {
        if !git_available() {
            return None;
        }
        let dir = TempDir::new().expect("Failed to create temp directory");
        let config = GitConfig::new().with_author("docsync test", "docsync@example.invalid");
        let store = GitStore::open(dir.path(), config, &CancellationToken::new())
            .expect("Failed to open git store");
        Some(Self {
            store: Arc::new(store),
            dir,
        })
    }

    /// Root of the checkout.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
///
/// The filter comes from `RUST_LOG`, defaulting to `warn`. Output goes
/// through the test harness so it is captured per test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_times_are_ordered() {
        assert!(time(1) < time(2));
        assert!(time_at(1, 5) < time(2));
        assert_eq!(time(3), time_at(3, 0));
    }

    #[test]
    fn authored_entities_have_unresolved_users() {
        let entity = authored_by(page("p", "Page", 1), "u1");
        let user = entity.created_by.unwrap();
        assert!(!user.is_resolved());
    }

    #[test]
    fn temp_checkout_opens_when_git_exists() {
        init_tracing();
        if let Some(checkout) = TempCheckout::new() {
            assert!(checkout.path().join(".git").exists());
        }
    }
}
