//! Broadcast engine
//!
//! Fans one message out to every connection in a registry snapshot.

use futures_util::future::join_all;
use tracing::{error, warn};

use crate::connection::MAX_FRAME_LENGTH;
use crate::error::ChatError;
use crate::message::Message;
use crate::registry::Registry;

/// Outcome of one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers the frame was fully written to
    pub delivered: usize,
    /// Peers whose send failed; each was closed
    pub failed: Vec<String>,
}

/// Deliver `message` to every peer registered at the moment of the call.
///
/// A failed send closes that peer, which drives its own lifecycle into
/// disconnect cleanup. It never stops delivery to the others.
pub async fn broadcast(registry: &Registry, message: &Message) -> BroadcastReport {
    match message.encode() {
        Ok(frame) => broadcast_frame(registry, &frame).await,
        Err(e) => {
            error!("Dropping broadcast: {}", e);
            BroadcastReport::default()
        }
    }
}

/// Deliver an already encoded frame to every registered peer.
///
/// Frames longer than `MAX_FRAME_LENGTH` are dropped without touching any
/// peer, since no receiver could decode them.
pub async fn broadcast_frame(registry: &Registry, frame: &str) -> BroadcastReport {
    if frame.len() > MAX_FRAME_LENGTH {
        let e = ChatError::FrameTooLong {
            len: frame.len(),
            max: MAX_FRAME_LENGTH,
        };
        error!("Dropping broadcast: {}", e);
        return BroadcastReport::default();
    }

    let snapshot = registry.snapshot();
    let results = join_all(snapshot.iter().map(|(username, connection)| {
        async move { (username, connection, connection.send(frame).await) }
    }))
    .await;

    let mut report = BroadcastReport::default();
    for (username, connection, result) in results {
        match result {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                if !matches!(e, ChatError::ConnectionClosed) {
                    warn!("Send to '{}' failed: {}", username, e);
                }
                connection.close();
                report.failed.push(username.clone());
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::pipe;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn test_broadcast_reaches_every_registered_peer() {
        let registry = Registry::new();
        let (alice, _ra, alice_peer) = pipe();
        let (bob, _rb, bob_peer) = pipe();
        registry.try_register("alice", &alice);
        registry.try_register("bob", &bob);

        let message = Message::new("alice", "hi").stamped("ts");
        let report = broadcast(&registry, &message).await;
        assert_eq!(report.delivered, 2);
        assert!(report.failed.is_empty());

        for peer in [alice_peer, bob_peer] {
            let mut lines = BufReader::new(peer).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            assert_eq!(Message::decode(&line).unwrap(), message);
        }
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_registry() {
        let registry = Registry::new();
        let report = broadcast(&registry, &Message::new("a", "b")).await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_failed_peer_is_closed_and_others_still_receive() {
        let registry = Registry::new();
        let (alice, _ra, alice_peer) = pipe();
        let (bob, _rb, bob_peer) = pipe();
        let (carol, _rc, carol_peer) = pipe();
        registry.try_register("alice", &alice);
        registry.try_register("bob", &bob);
        registry.try_register("carol", &carol);

        // Bob's peer is gone, so writing to him fails
        drop(bob_peer);

        let message = Message::new("alice", "still here").stamped("ts");
        let report = broadcast(&registry, &message).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, vec!["bob".to_string()]);
        assert!(bob.is_closed());
        assert!(!alice.is_closed());

        for peer in [alice_peer, carol_peer] {
            let mut lines = BufReader::new(peer).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            assert_eq!(Message::decode(&line).unwrap().body(), "still here");
        }
    }

    #[tokio::test]
    async fn test_closed_peer_counts_as_failed() {
        let registry = Registry::new();
        let (alice, _ra, _pa) = pipe();
        registry.try_register("alice", &alice);
        alice.close();

        let report = broadcast(&registry, &Message::new("x", "y")).await;
        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_dropped_without_closing_peers() {
        let registry = Registry::new();
        let (alice, _ra, _pa) = pipe();
        registry.try_register("alice", &alice);

        let frame = "x".repeat(MAX_FRAME_LENGTH + 1);
        let report = broadcast_frame(&registry, &frame).await;
        assert_eq!(report, BroadcastReport::default());
        assert!(!alice.is_closed());

        let report = broadcast_frame(&registry, &frame[..MAX_FRAME_LENGTH]).await;
        assert_eq!(report.delivered, 1);
    }

    #[tokio::test]
    async fn test_concurrent_broadcasts_keep_frames_whole() {
        let registry = Arc::new(Registry::new());
        let (alice, _ra, alice_peer) = pipe();
        registry.try_register("alice", &alice);

        let mut tasks = Vec::new();
        for i in 0..8 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let body = format!("{}", i).repeat(5000);
                broadcast(&registry, &Message::new("bob", body)).await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().delivered, 1);
        }

        let mut lines = BufReader::new(alice_peer).lines();
        for _ in 0..8 {
            let line = lines.next_line().await.unwrap().unwrap();
            let message = Message::decode(&line).unwrap();
            let first = message.body().chars().next().unwrap();
            assert!(message.body().chars().all(|c| c == first));
        }
    }
}
