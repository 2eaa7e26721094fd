//! Event parsing and queueing.

use crate::auth::SignatureVerifier;
use crate::config::WebhookConfig;
use crate::error::WebhookResult;
use docsync_core::{
    EntityId, Queue, QueueClass, QueueEntry, QueueItem, QueueType, Registries,
};
use docsync_engine::Notifier;
use docsync_store::Store;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A raw inbound request, as received by the HTTP front end.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    /// Timestamp header, Unix seconds.
    pub timestamp: Option<String>,
    /// Signature header.
    pub signature: Option<String>,
    /// Raw body.
    pub body: Vec<u8>,
}

impl WebhookRequest {
    /// Creates an unsigned request.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Attaches timestamp and signature headers.
    pub fn signed(mut self, timestamp: impl Into<String>, signature: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self.signature = Some(signature.into());
        self
    }
}

/// The entity an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventEntity {
    /// Entity id.
    pub id: EntityId,
}

/// A change event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebhookEvent {
    /// Event type, such as `page.created` or `page.content_updated`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// The entity that changed. Absent on some event types.
    #[serde(default)]
    pub entity: Option<EventEntity>,
}

/// What an event asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    /// The entity was created or changed.
    Upsert,
    /// The entity was deleted.
    Delete,
    /// Not an event this listener acts on.
    Ignore,
}

impl WebhookEvent {
    /// Parses an event body.
    pub fn parse(body: &[u8]) -> WebhookResult<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Classifies the event by its type suffix.
    pub fn action(&self) -> EventAction {
        let Some((scope, verb)) = self.event_type.split_once('.') else {
            return EventAction::Ignore;
        };
        if !matches!(scope, "page" | "database" | "data_source") {
            return EventAction::Ignore;
        }
        match verb {
            "created" | "undeleted" | "moved" | "content_updated" | "properties_updated"
            | "schema_updated" | "updated" => EventAction::Upsert,
            "deleted" => EventAction::Delete,
            _ => EventAction::Ignore,
        }
    }
}

/// What handling an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// A priority update record was created and the worker woken.
    Queued {
        /// Queue record number.
        record: u64,
        /// Folder the entity will be written to.
        folder: String,
    },
    /// A deletion was seen and only logged.
    DeleteIgnored,
    /// The event was not relevant.
    Ignored,
}

/// Verifies, parses and queues inbound events.
///
/// Queue writes from concurrent events are serialized through a mutex so
/// record numbers never collide.
pub struct WebhookHandler {
    config: WebhookConfig,
    verifier: SignatureVerifier,
    store: Arc<dyn Store>,
    registries: Registries,
    queue: Queue,
    notifier: Option<Notifier>,
    enqueue_lock: Mutex<()>,
}

impl WebhookHandler {
    /// Creates a handler over `store` that wakes `notifier` after queueing.
    pub fn new(config: WebhookConfig, store: Arc<dyn Store>, notifier: Option<Notifier>) -> Self {
        Self {
            verifier: SignatureVerifier::new(&config),
            registries: Registries::new(Arc::clone(&store)),
            queue: Queue::new(Arc::clone(&store)),
            config,
            store,
            notifier,
            enqueue_lock: Mutex::new(()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Verifies and parses a request, then processes it on the blocking
    /// pool.
    ///
    /// Rejections are returned right away. An accepted event is handled
    /// by a detached task that keeps running if the caller goes away;
    /// the returned handle may be awaited or dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn accept(self: &Arc<Self>, request: &WebhookRequest) -> WebhookResult<JoinHandle<()>> {
        self.verifier.verify(
            request.timestamp.as_deref(),
            request.signature.as_deref(),
            &request.body,
        )?;
        let event = WebhookEvent::parse(&request.body)?;
        tracing::debug!(event = %event.event_type, "event accepted");

        let handler = Arc::clone(self);
        Ok(tokio::task::spawn_blocking(move || {
            if let Err(e) = handler.process(&event) {
                tracing::error!(event = %event.event_type, error = %e, "event processing failed");
            }
        }))
    }

    /// Verifies, parses and processes a request on the calling thread.
    pub fn handle(&self, request: &WebhookRequest) -> WebhookResult<EventOutcome> {
        self.verifier.verify(
            request.timestamp.as_deref(),
            request.signature.as_deref(),
            &request.body,
        )?;
        self.process(&WebhookEvent::parse(&request.body)?)
    }

    /// Acts on a parsed event.
    pub fn process(&self, event: &WebhookEvent) -> WebhookResult<EventOutcome> {
        let action = event.action();
        let Some(entity) = event.entity.as_ref().filter(|_| action != EventAction::Ignore) else {
            tracing::debug!(event = %event.event_type, "ignoring event");
            return Ok(EventOutcome::Ignored);
        };

        if action == EventAction::Delete {
            tracing::info!(entity = %entity.id, "deletion event received; not propagated");
            return Ok(EventOutcome::DeleteIgnored);
        }

        let (record, folder) = {
            let _guard = self.enqueue_lock.lock();
            let folder = self
                .registries
                .load_page(&entity.id)?
                .map_or_else(|| self.config.default_folder.clone(), |r| r.folder);

            let mut tx = self.store.begin_tx();
            let item = QueueItem::new(entity.id.clone(), None);
            let entry = QueueEntry::new(QueueType::Update, folder.clone(), vec![item]);
            let record = self.queue.create(&mut tx, entry, QueueClass::Priority)?;
            self.store
                .commit(tx, &format!("webhook: queued {}", entity.id))?;
            (record, folder)
        };
        tracing::info!(entity = %entity.id, record, %folder, event = %event.event_type, "queued from event");

        if let Some(notifier) = &self.notifier {
            notifier.notify();
        }
        Ok(EventOutcome::Queued { record, folder })
    }
}

impl std::fmt::Debug for WebhookHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookHandler")
            .field("default_folder", &self.config.default_folder)
            .field("verifier", &self.verifier)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(body: &str) -> WebhookEvent {
        WebhookEvent::parse(body.as_bytes()).unwrap()
    }

    #[test]
    fn classifies_event_types() {
        let upsert = event(r#"{"type": "page.content_updated", "entity": {"id": "p1"}}"#);
        assert_eq!(upsert.action(), EventAction::Upsert);
        assert_eq!(upsert.entity.unwrap().id, EntityId::new("p1"));

        assert_eq!(event(r#"{"type": "database.created"}"#).action(), EventAction::Upsert);
        assert_eq!(event(r#"{"type": "page.deleted"}"#).action(), EventAction::Delete);
        assert_eq!(event(r#"{"type": "comment.created"}"#).action(), EventAction::Ignore);
        assert_eq!(event(r#"{"type": "ping"}"#).action(), EventAction::Ignore);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(WebhookEvent::parse(b"not json").is_err());
        assert!(WebhookEvent::parse(br#"{"entity": {"id": "p1"}}"#).is_err());
    }
}
