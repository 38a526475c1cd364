use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, yield_now};
use tokio::time::timeout;
use tripagent_core::{
    ConversationEvent, ConversationManager, ConversationManagerBuilder, Error,
    EventStream, MemoryStorage, QueuedResponse, Storage,
};
use tripagent_model::{ChatContext, ConversationId, Role};
use tripagent_test_transport::{PresetResponse, TestTransport};

const WAIT: Duration = Duration::from_secs(5);

type SendHandle = JoinHandle<Result<QueuedResponse, Error>>;

async fn wait_for_requests(transport: &TestTransport, count: usize) {
    timeout(WAIT, async {
        while transport.request_count() < count {
            yield_now().await;
        }
    })
    .await
    .expect("transport was not called in time");
}

fn spawn_send(
    manager: &ConversationManager,
    id: &str,
    content: &'static str,
) -> SendHandle {
    let manager = manager.clone();
    let id = ConversationId::new(id);
    tokio::spawn(async move {
        manager
            .send_message(id, content, ChatContext::default(), &[])
            .await
    })
}

fn drain(events: &mut EventStream) -> Vec<ConversationEvent> {
    let mut drained = vec![];
    while let Some(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

#[tokio::test]
async fn test_user_message_persisted_before_response() {
    let storage = Arc::new(MemoryStorage::default());
    let transport = TestTransport::default();
    let gate = transport.add_gated_reply_for(
        "Tell me about Yosemite",
        PresetResponse::with_text("Yosemite National Park is..."),
    );
    let manager = ConversationManagerBuilder::with_transport(transport.clone())
        .with_shared_storage(storage.clone())
        .build();

    let sending = tokio::spawn({
        let manager = manager.clone();
        async move {
            manager
                .send_message(
                    ConversationId::DEFAULT,
                    "Tell me about Yosemite",
                    ChatContext::default(),
                    &[],
                )
                .await
        }
    });
    wait_for_requests(&transport, 1).await;

    // The transport has not answered yet.
    let stored = storage.load_conversations().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].messages.len(), 1);
    assert_eq!(stored[0].messages[0].role, Role::User);
    assert_eq!(stored[0].messages[0].content, "Tell me about Yosemite");

    gate.open();
    let resp = sending.await.unwrap().unwrap();
    assert_eq!(resp.conversation_id.as_str(), Some(stored[0].id.as_str()));

    let stored = storage.get(&stored[0].id).unwrap();
    let assistant: Vec<_> = stored
        .messages
        .iter()
        .filter(|msg| msg.role == Role::Assistant)
        .collect();
    assert_eq!(assistant.len(), 1);
    assert_eq!(assistant[0].content, "Yosemite National Park is...");
}

#[tokio::test]
async fn test_switching_keeps_requests_running() {
    let transport = TestTransport::default();
    let gate =
        transport.add_gated_reply_for("a?", PresetResponse::with_text("a!"));
    let manager = ConversationManagerBuilder::with_transport(transport.clone())
        .build();

    let sending = spawn_send(&manager, "a", "a?");
    wait_for_requests(&transport, 1).await;

    manager
        .switch_conversation(ConversationId::new("b"))
        .await
        .unwrap();
    let a = ConversationId::new("a");
    assert!(manager.has_pending_request(&a).await.unwrap());
    let state = manager.state().await.unwrap();
    assert_eq!(state.active_conversation, ConversationId::new("b"));
    assert!(state.is_loading(&a));

    gate.open();
    assert_eq!(sending.await.unwrap().unwrap().response, "a!");
    assert!(!transport.requests()[0].cancel.is_cancelled());
}

#[tokio::test]
async fn test_abort_all_requests() {
    let transport = TestTransport::default();
    let manager = ConversationManagerBuilder::with_transport(transport.clone())
        .build();

    let mut tasks = vec![];
    for (id, content) in [("a", "to a"), ("b", "to b"), ("c", "to c")] {
        let _gate = transport
            .add_gated_reply_for(content, PresetResponse::with_text("-"));
        tasks.push(spawn_send(&manager, id, content));
    }
    wait_for_requests(&transport, 3).await;
    let mut events = manager.subscribe();

    assert_eq!(manager.abort_all_requests().await.unwrap(), 3);
    for task in tasks {
        assert!(task.await.unwrap().unwrap_err().is_cancelled());
    }

    let state = manager.state().await.unwrap();
    assert!(!state.has_pending);
    assert!(state.loading.is_empty());

    let stopped = drain(&mut events)
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                ConversationEvent::LoadingChanged {
                    is_loading: false,
                    ..
                }
            )
        })
        .count();
    assert_eq!(stopped, 3);
}

#[tokio::test]
async fn test_conversations_are_independent() {
    let transport = TestTransport::default();
    let slow =
        transport.add_gated_reply_for("slow", PresetResponse::with_text("1"));
    transport.add_reply_for("fast", PresetResponse::with_text("2"));
    let manager = ConversationManagerBuilder::with_transport(transport.clone())
        .build();

    let first = spawn_send(&manager, "a", "slow");
    wait_for_requests(&transport, 1).await;
    let second = spawn_send(&manager, "b", "fast");

    assert_eq!(second.await.unwrap().unwrap().response, "2");
    slow.open();
    assert_eq!(first.await.unwrap().unwrap().response, "1");

    let state = manager.state().await.unwrap();
    assert_eq!(state.conversations.len(), 2);
    for conv in &state.conversations {
        assert_eq!(conv.messages.len(), 2);
    }
}
