//! End-to-end scenarios: a real pipe tree driven by an in-process engine.

mod common;

use std::time::{Duration, Instant};

use chrono::NaiveTime;

use common::{drain, open_reader, read_lines, send_line, wait_until, within, TestClient};
use ratox::engine::memory::MemoryEngine;
use ratox::engine::{ConnectionKind, EngineEvent, MessageKind, MessagingEngine, PublicKey};
use ratox::fifo::{Direction, FifoScope, FriendFifo, GlobalFifo};
use ratox::lifecycle::LifecycleState;
use ratox::router::format;

fn persisted_engine(peers: &[([u8; 32], &str)]) -> MemoryEngine {
    let original = MemoryEngine::generate();
    for (key, name) in peers {
        original.seed_friend(PublicKey(*key), name).unwrap();
    }
    MemoryEngine::from_state(&original.save_state()).unwrap()
}

#[tokio::test]
async fn test_startup_restores_friends_and_pipes() {
    let tc = TestClient::with_engine(persisted_engine(&[([0xaa; 32], "Ann"), ([0xbb; 32], "Bob")]));
    within(tc.client.start()).await.unwrap();
    assert_eq!(tc.client.state(), LifecycleState::Running);

    let layout = tc.layout();
    assert_eq!(tc.client.registry().len(), 2);
    for key in [PublicKey([0xaa; 32]), PublicKey([0xbb; 32])] {
        assert!(layout.friend_dir(&key).is_dir());
        for fifo in FriendFifo::ALL {
            assert!(ratox::fifo::pipe::is_fifo(&layout.friend(&key, fifo)));
        }
    }
    for fifo in GlobalFifo::ALL {
        assert!(ratox::fifo::pipe::is_fifo(&layout.global(fifo)));
    }

    let id = std::fs::read_to_string(layout.id_file()).unwrap();
    assert_eq!(id, format!("{}\n", tc.engine.self_address()));

    tc.client.shutdown().await;
}

#[tokio::test]
async fn test_request_in_through_pipe_adds_friend() {
    let tc = TestClient::new();
    within(tc.client.start()).await.unwrap();

    let key = PublicKey([0x42; 32]);
    send_line(&tc.layout().global(GlobalFifo::RequestIn), &key.to_hex());

    let registry = tc.client.registry().clone();
    assert!(wait_until(|| registry.by_key(&key).is_some()).await);
    assert!(tc.layout().friend_dir(&key).is_dir());
    assert!(tc.layout().state_file().exists());

    tc.client.shutdown().await;
}

#[tokio::test]
async fn test_incoming_message_reaches_text_out() {
    let tc = TestClient::with_engine(persisted_engine(&[([0xbb; 32], "Bob")]));
    within(tc.client.start()).await.unwrap();

    let key = PublicKey([0xbb; 32]);
    let friend = tc.client.registry().by_key(&key).unwrap();
    let reader = open_reader(&tc.layout().friend(&key, FriendFifo::TextOut));

    tc.engine.inject(EngineEvent::FriendMessage {
        friend: friend.handle,
        text: "hi".to_string(),
        kind: MessageKind::Normal,
    });

    let lines = read_lines(&reader, 1).await;
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("] <Bob> hi"), "unexpected line {:?}", lines[0]);

    tc.client.shutdown().await;
}

#[test]
fn test_message_formatting() {
    let ten = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
    assert_eq!(
        format::message_line(ten, "Bob", "hi", MessageKind::Normal),
        "[10:00:00] <Bob> hi"
    );
    assert_eq!(
        format::message_line(ten, "Bob", "waves", MessageKind::Action),
        "[10:00:00] * Bob waves"
    );
}

#[tokio::test]
async fn test_text_in_through_pipe_sends_message() {
    let tc = TestClient::with_engine(persisted_engine(&[([0xcc; 32], "Cy")]));
    within(tc.client.start()).await.unwrap();

    let key = PublicKey([0xcc; 32]);
    let text_in = tc.layout().friend(&key, FriendFifo::TextIn);
    send_line(&text_in, &"é".repeat(686));
    send_line(&text_in, &"é".repeat(687));
    send_line(&text_in, "/me waves");

    let engine = tc.engine.clone();
    assert!(wait_until(|| engine.sent_messages().len() == 2).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sent = tc.engine.sent_messages();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].text.len(), 1372);
    assert_eq!(sent[1].text, "waves");
    assert_eq!(sent[1].kind, MessageKind::Action);

    tc.client.shutdown().await;
}

#[tokio::test]
async fn test_connection_change_writes_status() {
    let tc = TestClient::with_engine(persisted_engine(&[([0xdd; 32], "Dee")]));
    within(tc.client.start()).await.unwrap();

    let key = PublicKey([0xdd; 32]);
    let friend = tc.client.registry().by_key(&key).unwrap();
    let reader = open_reader(&tc.layout().friend(&key, FriendFifo::Status));

    tc.engine.inject(EngineEvent::FriendConnectionStatus {
        friend: friend.handle,
        connection: ConnectionKind::Udp,
    });
    assert_eq!(read_lines(&reader, 1).await, vec!["online".to_string()]);

    tc.engine.inject(EngineEvent::FriendConnectionStatus {
        friend: friend.handle,
        connection: ConnectionKind::None,
    });
    assert_eq!(read_lines(&reader, 1).await, vec!["offline".to_string()]);

    tc.client.shutdown().await;
}

#[tokio::test]
async fn test_recreating_pipe_keeps_one_descriptor() {
    let tc = TestClient::new();
    within(tc.client.start()).await.unwrap();

    let gateway = tc.client.gateway();
    let path = tc.layout().global(GlobalFifo::RequestOut);
    let before = gateway.table().len();

    gateway
        .create_fifo(&path, Direction::Output, FifoScope::Global)
        .unwrap();
    gateway
        .create_fifo(&path, Direction::Output, FifoScope::Global)
        .unwrap();

    assert_eq!(gateway.table().len(), before);
    assert_eq!(gateway.table().paths().iter().filter(|p| **p == path).count(), 1);

    tc.client.shutdown().await;
}

#[tokio::test]
async fn test_idle_cleanup_spares_global_pipes() {
    let tc = TestClient::with_engine(persisted_engine(&[([0xee; 32], "Eve")]));
    within(tc.client.start()).await.unwrap();

    let gateway = tc.client.gateway();
    let later = Instant::now() + Duration::from_secs(31 * 60);
    let removed = gateway.sweep_idle(later);

    let key = PublicKey([0xee; 32]);
    assert!(!removed.is_empty());
    assert!(removed.iter().all(|p| p.starts_with(tc.layout().friend_dir(&key))));
    for fifo in GlobalFifo::ALL {
        assert!(gateway.table().contains(&tc.layout().global(fifo)));
    }

    // Output to a released pipe still works once a reader shows up.
    let reader = open_reader(&tc.layout().friend(&key, FriendFifo::Status));
    assert!(gateway.write_status(&key, "online"));
    assert_eq!(drain(&reader), vec!["online".to_string()]);

    tc.client.shutdown().await;
}

#[tokio::test]
async fn test_remove_friend_keeps_directory() {
    let tc = TestClient::with_engine(persisted_engine(&[([0x12; 32], "Fay")]));
    within(tc.client.start()).await.unwrap();

    let key = PublicKey([0x12; 32]);
    let removed = tc.client.remove_friend(&key).unwrap();
    assert_eq!(removed.name, "Fay");
    assert!(tc.client.registry().is_empty());
    assert!(tc.engine.friends().is_empty());
    assert!(tc.layout().friend_dir(&key).is_dir());
    assert!(tc.client.remove_friend(&key).is_err());

    tc.client.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let tc = TestClient::new();
    within(tc.client.start()).await.unwrap();

    within(tc.client.shutdown()).await;
    within(tc.client.shutdown()).await;

    assert_eq!(tc.client.state(), LifecycleState::Stopped);
    assert!(tc.engine.is_killed());
    assert!(tc.client.engine().is_released());
    assert!(tc.layout().state_file().exists());
    assert!(tc.client.start().await.is_err());
}
