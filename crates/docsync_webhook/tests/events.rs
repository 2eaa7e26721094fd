//! Inbound events queue work and wake the sync worker.

use docsync_core::{EntityId, Queue, QueueClass, QueueType};
use docsync_engine::{EngineConfig, RootConfig, SyncEngine, SyncOptions, SyncWorker, WorkerConfig};
use docsync_store::{MemoryStore, Store};
use docsync_testkit::prelude::*;
use docsync_webhook::{
    EventOutcome, SignatureVerifier, WebhookConfig, WebhookError, WebhookHandler, WebhookRequest,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SECRET: &str = "whsec-test";

fn body(event_type: &str, id: &str) -> Vec<u8> {
    format!(r#"{{"type": "{event_type}", "entity": {{"id": "{id}", "type": "page"}}}}"#).into_bytes()
}

fn signed(config: &WebhookConfig, body: Vec<u8>) -> WebhookRequest {
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let signature = SignatureVerifier::new(config)
        .sign(&timestamp, &body)
        .unwrap();
    WebhookRequest::new(body).signed(timestamp, format!("sha256={signature}"))
}

fn handler(config: WebhookConfig) -> (Arc<MemoryStore>, WebhookHandler) {
    init_tracing();
    let store = memory_store();
    let handler = WebhookHandler::new(config, store.clone(), None);
    (store, handler)
}

#[test]
fn update_event_queues_priority_record_in_default_folder() {
    let config = WebhookConfig::new().with_secret(SECRET).with_default_folder("inbox");
    let (store, handler) = handler(config.clone());

    let outcome = handler
        .handle(&signed(&config, body("page.content_updated", "p1")))
        .unwrap();
    let EventOutcome::Queued { record, folder } = outcome else {
        panic!("expected a queued outcome, got {outcome:?}");
    };
    assert_eq!(folder, "inbox");
    assert_eq!(Queue::class_of(record), QueueClass::Priority);

    let queue = Queue::new(store.clone());
    let entry = queue.read(record).unwrap();
    assert_eq!(entry.kind, QueueType::Update);
    assert_eq!(entry.items[0].id, EntityId::new("p1"));
    assert_eq!(store.commits().len(), 1);
}

#[test]
fn known_entity_is_queued_in_its_registry_folder() {
    let config = WebhookConfig::new();
    let (store, handler) = handler(config);
    let remote = Arc::new(MockRemote::new());
    remote.add_page(page("r1", "Root", 1), vec![]);
    let engine = SyncEngine::new(
        EngineConfig::new().with_root(RootConfig::new("r1", "wiki")),
        store.clone(),
        remote,
    );
    engine.seed_roots().unwrap();
    engine.sync(&SyncOptions::default(), &CancellationToken::new()).unwrap();

    let outcome = handler
        .handle(&WebhookRequest::new(body("page.created", "r1")))
        .unwrap();
    assert!(matches!(outcome, EventOutcome::Queued { ref folder, .. } if folder == "wiki"));
}

#[test]
fn rejected_requests_queue_nothing() {
    let config = WebhookConfig::new().with_secret(SECRET);
    let (store, handler) = handler(config.clone());

    let mut tampered = signed(&config, body("page.created", "p1"));
    tampered.body = body("page.created", "p2");
    assert!(matches!(
        handler.handle(&tampered),
        Err(WebhookError::InvalidSignature)
    ));

    let unsigned = WebhookRequest::new(body("page.created", "p1"));
    let err = handler.handle(&unsigned).unwrap_err();
    assert_eq!(err.status(), 401);

    let stale = {
        let body = body("page.created", "p1");
        let timestamp = (chrono::Utc::now().timestamp() - 600).to_string();
        let signature = SignatureVerifier::new(&config).sign(&timestamp, &body).unwrap();
        WebhookRequest::new(body).signed(timestamp, signature)
    };
    assert!(matches!(
        handler.handle(&stale),
        Err(WebhookError::StaleTimestamp { .. })
    ));

    for timestamp in [i64::MIN.to_string(), i64::MAX.to_string()] {
        let request = WebhookRequest::new(body("page.created", "p1")).signed(timestamp, "00");
        assert_eq!(handler.handle(&request).unwrap_err().status(), 401);
    }

    assert!(Queue::new(store.clone()).list().unwrap().is_empty());
    assert!(store.commits().is_empty());
}

#[test]
fn deletions_and_unknown_events_are_not_queued() {
    let (store, handler) = handler(WebhookConfig::new());

    let deleted = handler
        .handle(&WebhookRequest::new(body("page.deleted", "p1")))
        .unwrap();
    assert_eq!(deleted, EventOutcome::DeleteIgnored);

    let comment = handler
        .handle(&WebhookRequest::new(body("comment.created", "c1")))
        .unwrap();
    assert_eq!(comment, EventOutcome::Ignored);

    let bare = handler
        .handle(&WebhookRequest::new(br#"{"type": "page.created"}"#.to_vec()))
        .unwrap();
    assert_eq!(bare, EventOutcome::Ignored);

    assert!(store.files().is_empty());
}

#[tokio::test]
async fn accepted_events_are_processed_detached() {
    let config = WebhookConfig::new().with_secret(SECRET);
    let (store, handler) = handler(config.clone());
    let handler = Arc::new(handler);

    let mut handles = Vec::new();
    for id in ["p1", "p2", "p3"] {
        handles.push(
            handler
                .accept(&signed(&config, body("page.properties_updated", id)))
                .unwrap(),
        );
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let queue = Queue::new(store.clone());
    let records = queue.list().unwrap();
    assert_eq!(records.len(), 3);
    let mut queued: Vec<EntityId> = records
        .into_iter()
        .map(|r| queue.read(r).unwrap().items[0].id.clone())
        .collect();
    queued.sort();
    assert_eq!(queued, vec![EntityId::new("p1"), EntityId::new("p2"), EntityId::new("p3")]);
    assert_eq!(store.commits().len(), 3);

    assert!(handler
        .accept(&WebhookRequest::new(body("page.created", "p4")))
        .is_err());
}

#[tokio::test]
async fn event_burst_wakes_worker_once() {
    init_tracing();
    let store = memory_store();
    let cancel = CancellationToken::new();
    let passes = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&passes);
    let worker = SyncWorker::spawn(
        WorkerConfig::default().with_debounce(Duration::from_millis(50)),
        cancel.clone(),
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    );
    let handler = Arc::new(WebhookHandler::new(
        WebhookConfig::new(),
        store.clone(),
        Some(worker.notifier()),
    ));

    for n in 0..5 {
        handler
            .accept(&WebhookRequest::new(body("page.content_updated", &format!("p{n}"))))
            .unwrap()
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(passes.load(Ordering::SeqCst), 1);
    let records = Queue::new(store.clone()).list().unwrap();
    assert_eq!(records.len(), 5);
    assert!(store.exists(&Queue::record_path(records[0])).unwrap());

    cancel.cancel();
    worker.join().await;
}
