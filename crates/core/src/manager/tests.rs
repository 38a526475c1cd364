use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::yield_now;
use tokio::time::timeout;
use tripagent_model::{Photo, Role, ToolCall};
use tripagent_test_transport::{PresetResponse, TestTransport};

use super::*;
use crate::error::StorageError;
use crate::storage::MemoryStorage;
use crate::trip_context::TripContextCache;

const WAIT: Duration = Duration::from_secs(5);

fn manager(transport: &TestTransport) -> ConversationManager {
    ConversationManagerBuilder::with_transport(transport.clone()).build()
}

async fn wait_for_requests(transport: &TestTransport, count: usize) {
    timeout(WAIT, async {
        while transport.request_count() < count {
            yield_now().await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_send_to_default_conversation() {
    let transport = TestTransport::default();
    transport.add_reply(PresetResponse::with_text("Yosemite is..."));
    let manager = manager(&transport);
    let mut events = manager.subscribe();

    let resp = manager
        .send_message(
            ConversationId::DEFAULT,
            "Tell me about Yosemite",
            ChatContext::default(),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(resp.response, "Yosemite is...");
    assert!(!resp.conversation_id.is_default());

    let state = manager.state().await.unwrap();
    assert_eq!(state.active_conversation, resp.conversation_id);
    let active = state.active().unwrap();
    assert_eq!(active.title, "Tell me about Yosemite");
    assert_eq!(active.messages.len(), 2);
    assert_eq!(active.messages[0].role, Role::User);
    assert_eq!(active.messages[1].content, "Yosemite is...");
    assert!(!state.has_pending);

    let mut switched = 0;
    let mut added = 0;
    while let Some(event) = events.try_recv() {
        match event {
            ConversationEvent::ConversationSwitched { conversation_id } => {
                assert_eq!(conversation_id, resp.conversation_id);
                switched += 1;
            }
            ConversationEvent::MessageAdded { .. } => added += 1,
            _ => {}
        }
    }
    assert_eq!((switched, added), (1, 2));
}

#[tokio::test]
async fn test_history_is_sent() {
    let transport = TestTransport::default();
    transport.add_reply(PresetResponse::with_text("ok"));
    let manager = manager(&transport);

    let history = [
        Message::user("Plan a trip to Zion"),
        Message::assistant("Sure!"),
        Message::assistant("Network trouble").into_error(),
    ];
    manager
        .send_message(
            ConversationId::new("trip"),
            "In June",
            ChatContext::default(),
            &history,
        )
        .await
        .unwrap();

    let request = &transport.requests()[0];
    let contents: Vec<_> = request
        .messages
        .iter()
        .map(|msg| msg.content.as_str())
        .collect();
    assert_eq!(contents, ["Plan a trip to Zion", "Sure!", "In June"]);
    assert_eq!(request.last_user_message(), Some("In June"));
}

#[tokio::test]
async fn test_failure_creates_error_message() {
    let transport = TestTransport::default();
    transport.add_reply(PresetResponse::with_failure(
        "server responded with 503 Service Unavailable",
    ));
    let manager = manager(&transport);

    let id = ConversationId::new("trip");
    let resp = manager
        .send_message(id.clone(), "Hi", ChatContext::default(), &[])
        .await
        .unwrap();
    assert!(resp.is_error());

    let state = manager.state().await.unwrap();
    let conv = &state.conversations[0];
    assert_eq!(conv.messages.len(), 2);
    assert!(conv.messages[1].is_error);
    assert!(conv.messages[1].content.contains("temporarily unavailable"));
}

#[tokio::test]
async fn test_segments_and_photos() {
    let transport = TestTransport::default();
    let photo = Photo::with_url("https://example.com/arches.jpg");
    transport.add_reply(
        PresetResponse::with_text("Part 1 Part 2")
            .segments(["Part 1", "Part 2"])
            .photos(vec![photo.clone()]),
    );
    let manager = manager(&transport);

    manager
        .send_message(
            ConversationId::new("arches"),
            "Arches?",
            ChatContext::default(),
            &[],
        )
        .await
        .unwrap();

    let state = manager.state().await.unwrap();
    let messages = &state.conversations[0].messages;
    assert_eq!(messages.len(), 3);
    assert!(messages[1].photos.is_empty());
    assert_eq!(messages[2].photos, vec![photo]);
}

#[tokio::test]
async fn test_replaced_request_creates_no_message() {
    let transport = TestTransport::default();
    let _gate =
        transport.add_gated_reply_for("first", PresetResponse::with_text("1"));
    transport.add_reply_for("second", PresetResponse::with_text("2"));
    let manager = manager(&transport);
    let id = ConversationId::new("trip");

    let first = tokio::spawn({
        let manager = manager.clone();
        let id = id.clone();
        async move {
            manager
                .send_message(id, "first", ChatContext::default(), &[])
                .await
        }
    });
    wait_for_requests(&transport, 1).await;

    let second = manager
        .send_message(id, "second", ChatContext::default(), &[])
        .await
        .unwrap();
    assert_eq!(second.response, "2");
    assert!(first.await.unwrap().unwrap_err().is_cancelled());

    let state = manager.state().await.unwrap();
    let contents: Vec<_> = state.conversations[0]
        .messages
        .iter()
        .map(|msg| msg.content.as_str())
        .collect();
    assert_eq!(contents, ["first", "second", "2"]);
}

#[tokio::test]
async fn test_abort_request() {
    let transport = TestTransport::default();
    let _gate = transport.add_gated_reply(PresetResponse::with_text("-"));
    let manager = manager(&transport);
    let id = ConversationId::new("trip");

    let pending = tokio::spawn({
        let manager = manager.clone();
        let id = id.clone();
        async move {
            manager
                .send_message(id, "hello", ChatContext::default(), &[])
                .await
        }
    });
    wait_for_requests(&transport, 1).await;
    assert!(manager.has_pending_request(&id).await.unwrap());

    assert!(manager.abort_request(&id).await.unwrap());
    assert!(pending.await.unwrap().unwrap_err().is_cancelled());
    assert!(!manager.abort_request(&id).await.unwrap());
    assert!(!manager.state().await.unwrap().has_pending);
}

#[tokio::test]
async fn test_abort_request_to_new_conversation() {
    let transport = TestTransport::default();
    let _gate = transport.add_gated_reply(PresetResponse::with_text("-"));
    let manager = manager(&transport);
    let mut events = manager.subscribe();

    let pending = tokio::spawn({
        let manager = manager.clone();
        async move {
            manager
                .send_message(
                    ConversationId::DEFAULT,
                    "Weekend in Big Sur",
                    ChatContext::default(),
                    &[],
                )
                .await
        }
    });
    wait_for_requests(&transport, 1).await;

    // The caller still only knows the default identity.
    assert!(
        manager
            .abort_request(&ConversationId::DEFAULT)
            .await
            .unwrap()
    );
    assert!(pending.await.unwrap().unwrap_err().is_cancelled());

    let state = manager.state().await.unwrap();
    assert!(!state.has_pending);
    assert_eq!(state.active().unwrap().messages.len(), 1);
    while let Some(event) = events.try_recv() {
        if let ConversationEvent::MessageAdded { message, .. } = event {
            assert_eq!(message.role, Role::User);
        }
    }
}

#[tokio::test]
async fn test_load_and_delete() {
    let storage = MemoryStorage::with_conversations([
        Conversation::new("a", "Grand Canyon"),
        Conversation::new("b", "Acadia"),
    ]);
    let transport = TestTransport::default();
    let manager = ConversationManagerBuilder::with_transport(transport)
        .with_storage(storage)
        .build();

    assert_eq!(manager.load_from_storage().await.unwrap(), 2);
    assert_eq!(manager.load_from_storage().await.unwrap(), 2);

    manager
        .switch_conversation(ConversationId::new("a"))
        .await
        .unwrap();
    manager.delete_conversation("a").await.unwrap();

    let state = manager.state().await.unwrap();
    assert!(state.active_conversation.is_default());
    assert_eq!(state.conversations.len(), 1);
    assert_eq!(state.conversations[0].id, "b");

    let err = manager.delete_conversation("a").await.unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::NotFound(_))));
}

#[tokio::test]
async fn test_state_change_callback() {
    let transport = TestTransport::default();
    transport.add_reply(PresetResponse::with_text("Glacier is..."));
    let manager = manager(&transport);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = manager.on_state_change(move |state| {
        tx.send(state.clone()).ok();
    });

    let id = ConversationId::new("glacier");
    manager
        .send_message(id.clone(), "Glacier?", ChatContext::default(), &[])
        .await
        .unwrap();

    // Wait for the snapshot showing the delivered response.
    timeout(WAIT, async {
        loop {
            let state: ManagerState = rx.recv().await.unwrap();
            let done = state
                .conversations
                .first()
                .is_some_and(|conv| conv.messages.len() == 2);
            if done && !state.is_loading(&id) {
                break;
            }
        }
    })
    .await
    .unwrap();

    subscription.unsubscribe();
    assert!(manager.inner.observers.is_empty());
}

#[tokio::test]
async fn test_cache_updated_after_delivery() {
    let transport = TestTransport::default();
    transport.add_reply(PresetResponse::with_text("Here are flights").tools_used(
        vec![ToolCall::GetParkDetails {
            park_code: "zion".to_owned(),
        }],
    ));
    let cache = Arc::new(TripContextCache::default());
    let manager = ConversationManagerBuilder::with_transport(transport)
        .with_cache_updater(cache.clone())
        .build();

    let resp = manager
        .send_message(
            ConversationId::DEFAULT,
            "Zion flights",
            ChatContext::default(),
            &[],
        )
        .await
        .unwrap();
    let summary = cache.summary(&resp.conversation_id).unwrap();
    assert!(summary.parks.contains("zion"));

    let id = resp.conversation_id.as_str().unwrap();
    manager.delete_conversation(id).await.unwrap();
    assert!(cache.summary(&resp.conversation_id).is_none());
}

#[tokio::test]
async fn test_shutdown() {
    let transport = TestTransport::default();
    let _gate = transport.add_gated_reply(PresetResponse::with_text("-"));
    let manager = manager(&transport);
    let seen = Arc::new(Mutex::new(None));

    let pending = tokio::spawn({
        let manager = manager.clone();
        let seen = Arc::clone(&seen);
        async move {
            let result = manager
                .send_message(
                    ConversationId::new("x"),
                    "hi",
                    ChatContext::default(),
                    &[],
                )
                .await;
            *seen.lock().unwrap() = Some(result.is_err());
        }
    });
    wait_for_requests(&transport, 1).await;

    manager.shutdown().await;
    pending.await.unwrap();
    assert_eq!(*seen.lock().unwrap(), Some(true));
    assert!(transport.requests()[0].cancel.is_cancelled());
}
