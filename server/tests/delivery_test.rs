//! Integration tests for the delivery engine against in-process collaborators:
//! live delivery, offline push jobs, persistence failure, registry degrade,
//! fan-out exclusivity and read receipts.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use aalap_server::chat::delivery;
use aalap_server::chat::store::{MessageStore, SqliteMessageStore};
use aalap_server::db::models::{Message, NewMessage};
use aalap_server::error::{RegistryError, SendError, StoreError};
use aalap_server::notify::{MemoryPushQueue, PushQueue};
use aalap_server::registry::{
    ConnectionChange, MemoryRegistry, PresenceRecord, PresenceStatus, SocketRegistry,
};
use aalap_server::state::{AppState, GatewaySettings};
use aalap_server::ws::protocol::{MessageReadPayload, SendMessagePayload};
use aalap_server::ws::session::Session;
use async_trait::async_trait;
use axum::extract::ws::Message as WsMessage;
use tokio::sync::mpsc;

/// Store whose writes always fail. Membership reads still work.
struct FailingStore {
    members: Vec<String>,
}

#[async_trait]
impl MessageStore for FailingStore {
    async fn create_message(&self, _new: NewMessage) -> Result<Message, StoreError> {
        Err(StoreError::Unavailable("disk full".to_string()))
    }

    async fn find_conversation_members(&self, _: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.members.clone())
    }

    async fn append_delivered(&self, _: &str, _: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk full".to_string()))
    }

    async fn append_read(&self, _: &str, _: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk full".to_string()))
    }

    async fn get_message(&self, _: &str) -> Result<Option<Message>, StoreError> {
        Ok(None)
    }
}

/// SQLite store that counts member lookups.
struct CountingStore {
    inner: SqliteMessageStore,
    member_lookups: AtomicUsize,
}

#[async_trait]
impl MessageStore for CountingStore {
    async fn create_message(&self, new: NewMessage) -> Result<Message, StoreError> {
        self.inner.create_message(new).await
    }

    async fn find_conversation_members(&self, id: &str) -> Result<Vec<String>, StoreError> {
        self.member_lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.find_conversation_members(id).await
    }

    async fn append_delivered(&self, message_id: &str, user_id: &str) -> Result<(), StoreError> {
        self.inner.append_delivered(message_id, user_id).await
    }

    async fn append_read(&self, message_id: &str, user_id: &str) -> Result<(), StoreError> {
        self.inner.append_read(message_id, user_id).await
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>, StoreError> {
        self.inner.get_message(id).await
    }
}

/// Registry that accepts connections but cannot answer socket lookups.
#[derive(Default)]
struct UnreachableLookupRegistry {
    inner: MemoryRegistry,
}

#[async_trait]
impl SocketRegistry for UnreachableLookupRegistry {
    async fn add_connection(
        &self,
        user_id: &str,
        socket_id: &str,
    ) -> Result<ConnectionChange, RegistryError> {
        self.inner.add_connection(user_id, socket_id).await
    }

    async fn remove_connection(
        &self,
        socket_id: &str,
    ) -> Result<Option<ConnectionChange>, RegistryError> {
        self.inner.remove_connection(socket_id).await
    }

    async fn get_sockets(&self, _: &str) -> Result<HashSet<String>, RegistryError> {
        Err(RegistryError::Unavailable("connection refused".to_string()))
    }

    async fn get_owner(&self, socket_id: &str) -> Result<Option<String>, RegistryError> {
        self.inner.get_owner(socket_id).await
    }

    async fn set_presence(&self, user_id: &str, status: PresenceStatus) -> Result<(), RegistryError> {
        self.inner.set_presence(user_id, status).await
    }

    async fn get_presence(&self, user_id: &str) -> Result<Option<PresenceRecord>, RegistryError> {
        self.inner.get_presence(user_id).await
    }
}

struct Harness {
    state: AppState,
    store: SqliteMessageStore,
    queue: MemoryPushQueue,
}

async fn harness(members: &[&str]) -> Harness {
    let db = aalap_server::db::init_memory_db().expect("Failed to init DB");
    let store = SqliteMessageStore::new(db);
    for member in members {
        store.add_member("c1", member).await.unwrap();
    }
    let queue = MemoryPushQueue::new();
    let state = AppState::new(
        b"test-secret".to_vec(),
        Arc::new(MemoryRegistry::new()),
        Arc::new(store.clone()),
        Arc::new(queue.clone()),
        GatewaySettings::default(),
    );
    Harness { state, store, queue }
}

/// Register a socket for `user_id` both in the registry and on the local hub.
async fn connect(state: &AppState, user_id: &str) -> (Session, mpsc::UnboundedReceiver<WsMessage>) {
    let session = Session::new(user_id, None);
    let (tx, rx) = mpsc::unbounded_channel();
    state.hub.attach(&session.socket_id, tx);
    state
        .registry
        .add_connection(user_id, &session.socket_id)
        .await
        .unwrap();
    (session, rx)
}

/// Drain every JSON event currently queued for a socket.
fn drain(rx: &mut mpsc::UnboundedReceiver<WsMessage>) -> Vec<serde_json::Value> {
    let mut events = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let WsMessage::Text(text) = msg {
            events.push(serde_json::from_str(text.as_str()).unwrap());
        }
    }
    events
}

fn named<'a>(events: &'a [serde_json::Value], name: &str) -> Vec<&'a serde_json::Value> {
    events.iter().filter(|e| e["event"] == name).collect()
}

fn text(content: &str, temp_id: &str) -> SendMessagePayload {
    SendMessagePayload {
        conversation_id: Some("c1".to_string()),
        content: Some(content.to_string()),
        temp_id: Some(temp_id.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_online_member_gets_message_and_receipt() {
    let h = harness(&["alice", "bob"]).await;
    let (alice, mut alice_rx) = connect(&h.state, "alice").await;
    let (_bob, mut bob_rx) = connect(&h.state, "bob").await;

    let report = delivery::send_message(&h.state, &alice, text("hi", "t1"))
        .await
        .unwrap();

    assert_eq!(report.delivered_to, vec!["bob"]);
    assert!(report.push_queued_for.is_empty());

    let bob_events = drain(&mut bob_rx);
    let messages = named(&bob_events, "message");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["data"]["_id"], report.message_id.as_str());
    assert_eq!(messages[0]["data"]["content"], "hi");
    assert_eq!(messages[0]["data"]["senderId"], "alice");
    assert_eq!(messages[0]["data"]["tempId"], "t1");

    let alice_events = drain(&mut alice_rx);
    let status = named(&alice_events, "message_status");
    assert_eq!(status.len(), 1);
    assert_eq!(status[0]["data"]["messageId"], report.message_id.as_str());
    assert_eq!(status[0]["data"]["deliveredTo"], serde_json::json!(["bob"]));
    assert_eq!(status[0]["data"]["pushQueuedFor"], serde_json::json!([]));

    let stored = h.store.get_message(&report.message_id).await.unwrap().unwrap();
    assert_eq!(stored.status.delivered_to, vec!["bob"]);
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_offline_member_gets_push_job() {
    let h = harness(&["alice", "bob"]).await;
    let (alice, mut alice_rx) = connect(&h.state, "alice").await;

    let report = delivery::send_message(&h.state, &alice, text("hey", "t2"))
        .await
        .unwrap();

    assert!(report.delivered_to.is_empty());
    assert_eq!(report.push_queued_for, vec!["bob"]);

    let jobs = h.queue.peek_pending(10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].user_id, "bob");
    assert_eq!(jobs[0].title, "New message");
    assert_eq!(jobs[0].body, "hey");
    assert_eq!(jobs[0].data["conversationId"], "c1");
    assert_eq!(jobs[0].data["messageId"], report.message_id.as_str());
    assert_eq!(jobs[0].data["senderId"], "alice");
    assert!(jobs[0].created_at.is_some());

    let alice_events = drain(&mut alice_rx);
    let status = named(&alice_events, "message_status");
    assert_eq!(status[0]["data"]["pushQueuedFor"], serde_json::json!(["bob"]));
}

#[tokio::test]
async fn test_room_subscribers_receive_broadcast() {
    let h = harness(&["alice", "bob"]).await;
    let (alice, mut alice_rx) = connect(&h.state, "alice").await;
    let (bob, mut bob_rx) = connect(&h.state, "bob").await;
    h.state.hub.join("c1", &alice.socket_id);
    h.state.hub.join("c1", &bob.socket_id);

    delivery::send_message(&h.state, &alice, text("room", "t3"))
        .await
        .unwrap();

    // room + direct; clients de-duplicate by _id
    let bob_events = drain(&mut bob_rx);
    let messages = named(&bob_events, "message");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["data"]["_id"], messages[1]["data"]["_id"]);

    let alice_events = drain(&mut alice_rx);
    assert_eq!(named(&alice_events, "message").len(), 1);
    assert_eq!(named(&alice_events, "message_status").len(), 1);
}

#[tokio::test]
async fn test_persistence_failure_reports_temp_id_and_sends_nothing() {
    let queue = MemoryPushQueue::new();
    let state = AppState::new(
        b"test-secret".to_vec(),
        Arc::new(MemoryRegistry::new()),
        Arc::new(FailingStore {
            members: vec!["alice".to_string(), "bob".to_string()],
        }),
        Arc::new(queue.clone()),
        GatewaySettings::default(),
    );
    let (alice, mut alice_rx) = connect(&state, "alice").await;
    let (bob, mut bob_rx) = connect(&state, "bob").await;
    state.hub.join("c1", &bob.socket_id);

    let err = delivery::send_message(&state, &alice, text("lost", "t-fail"))
        .await
        .unwrap_err();

    assert!(matches!(err, SendError::Persistence { .. }));
    assert_eq!(err.temp_id(), Some("t-fail"));
    assert_eq!(err.client_message(), "Failed to save message");
    assert!(drain(&mut bob_rx).is_empty());
    assert!(drain(&mut alice_rx).is_empty());
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_missing_conversation_is_rejected_with_temp_id() {
    let h = harness(&["alice"]).await;
    let (alice, _rx) = connect(&h.state, "alice").await;

    let payload = SendMessagePayload {
        conversation_id: Some("   ".to_string()),
        temp_id: Some("t-bad".to_string()),
        ..Default::default()
    };
    let err = delivery::send_message(&h.state, &alice, payload)
        .await
        .unwrap_err();

    assert!(matches!(err, SendError::Validation { .. }));
    assert_eq!(err.temp_id(), Some("t-bad"));
}

#[tokio::test]
async fn test_non_member_sender_is_allowed() {
    let h = harness(&["bob"]).await;
    let (mallory, _rx) = connect(&h.state, "mallory").await;

    let report = delivery::send_message(&h.state, &mallory, text("hi", "t4"))
        .await
        .unwrap();
    assert_eq!(report.push_queued_for, vec!["bob"]);
}

#[tokio::test]
async fn test_registry_lookup_failure_falls_back_to_push_and_origin_ack() {
    let db = aalap_server::db::init_memory_db().unwrap();
    let store = SqliteMessageStore::new(db);
    store.add_member("c1", "alice").await.unwrap();
    store.add_member("c1", "bob").await.unwrap();
    let queue = MemoryPushQueue::new();
    let state = AppState::new(
        b"test-secret".to_vec(),
        Arc::new(UnreachableLookupRegistry::default()),
        Arc::new(store),
        Arc::new(queue.clone()),
        GatewaySettings::default(),
    );
    let (alice, mut alice_rx) = connect(&state, "alice").await;
    let (_bob, mut bob_rx) = connect(&state, "bob").await;

    let report = delivery::send_message(&state, &alice, text("hi", "t5"))
        .await
        .unwrap();

    assert!(report.delivered_to.is_empty());
    assert_eq!(report.push_queued_for, vec!["bob"]);
    assert!(named(&drain(&mut bob_rx), "message").is_empty());

    let alice_events = drain(&mut alice_rx);
    assert_eq!(named(&alice_events, "message_status").len(), 1);
}

#[tokio::test]
async fn test_fan_out_partitions_members() {
    let h = harness(&["alice", "bob", "carol", "dave"]).await;
    let (alice, _alice_rx) = connect(&h.state, "alice").await;
    let (_bob, _bob_rx) = connect(&h.state, "bob").await;
    let (_dave, _dave_rx) = connect(&h.state, "dave").await;

    let report = delivery::send_message(&h.state, &alice, text("all", "t6"))
        .await
        .unwrap();

    let delivered: HashSet<_> = report.delivered_to.iter().cloned().collect();
    let queued: HashSet<_> = report.push_queued_for.iter().cloned().collect();
    assert!(delivered.is_disjoint(&queued));
    assert!(!delivered.contains("alice") && !queued.contains("alice"));

    let everyone: HashSet<_> = delivered.union(&queued).cloned().collect();
    let expected: HashSet<_> = ["bob", "carol", "dave"].iter().map(|s| s.to_string()).collect();
    assert_eq!(everyone, expected);
    assert_eq!(queued, HashSet::from(["carol".to_string()]));
}

#[tokio::test]
async fn test_image_without_text_uses_placeholder_preview() {
    let h = harness(&["alice", "bob"]).await;
    let (alice, _rx) = connect(&h.state, "alice").await;

    let payload: SendMessagePayload = serde_json::from_value(serde_json::json!({
        "conversationId": "c1",
        "type": "image",
        "attachments": [{"url": "https://cdn.example/cat.png", "type": "image/png"}]
    }))
    .unwrap();
    delivery::send_message(&h.state, &alice, payload).await.unwrap();

    let jobs = h.queue.peek_pending(1).await.unwrap();
    assert_eq!(jobs[0].body, "[image]");
}

#[tokio::test]
async fn test_mark_read_records_receipt_and_notifies_room() {
    let h = harness(&["alice", "bob"]).await;
    let (alice, mut alice_rx) = connect(&h.state, "alice").await;
    let (bob, _bob_rx) = connect(&h.state, "bob").await;
    h.state.hub.join("c1", &alice.socket_id);

    let report = delivery::send_message(&h.state, &alice, text("read me", "t7"))
        .await
        .unwrap();
    drain(&mut alice_rx);

    delivery::mark_read(
        &h.state,
        &bob,
        MessageReadPayload {
            conversation_id: "c1".to_string(),
            message_id: report.message_id.clone(),
        },
    )
    .await
    .unwrap();

    let events = drain(&mut alice_rx);
    let reads = named(&events, "message_read");
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0]["data"]["userId"], "bob");
    assert_eq!(reads[0]["data"]["messageId"], report.message_id.as_str());

    let stored = h.store.get_message(&report.message_id).await.unwrap().unwrap();
    assert_eq!(stored.status.read_by, vec!["bob"]);
}

#[tokio::test]
async fn test_mark_read_unknown_message_fails() {
    let h = harness(&["alice"]).await;
    let (alice, _rx) = connect(&h.state, "alice").await;

    let err = delivery::mark_read(
        &h.state,
        &alice,
        MessageReadPayload {
            conversation_id: "c1".to_string(),
            message_id: "missing".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, StoreError::MessageNotFound(_)));
}

#[tokio::test]
async fn test_members_are_resolved_once_per_send() {
    let db = aalap_server::db::init_memory_db().unwrap();
    let inner = SqliteMessageStore::new(db);
    inner.add_member("c1", "alice").await.unwrap();
    inner.add_member("c1", "bob").await.unwrap();
    let store = Arc::new(CountingStore {
        inner,
        member_lookups: AtomicUsize::new(0),
    });
    let state = AppState::new(
        b"test-secret".to_vec(),
        Arc::new(MemoryRegistry::new()),
        store.clone(),
        Arc::new(MemoryPushQueue::new()),
        GatewaySettings::default(),
    );
    let (alice, _alice_rx) = connect(&state, "alice").await;
    let (_bob, _bob_rx) = connect(&state, "bob").await;

    let report = delivery::send_message(&state, &alice, text("once", "t8"))
        .await
        .unwrap();

    assert_eq!(report.delivered_to, vec!["bob"]);
    assert_eq!(store.member_lookups.load(Ordering::SeqCst), 1);
}
