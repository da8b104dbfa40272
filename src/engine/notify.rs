//! Push delivery of replies that arrive outside a request, such as a
//! payment confirmation from the poller or the post-restore restart
//! notice. Platform adapters subscribe globally or per actor over the
//! WebSocket stream.

use dashmap::DashMap;
use keywarden_types::{ActorId, Reply, StreamEvent};
use tokio::sync::broadcast;

/// Manages broadcast channels for asynchronous replies.
pub struct ReplyBroadcaster {
    /// Global channel carrying every pushed reply
    global_tx: broadcast::Sender<StreamEvent>,
    /// Per-actor channels
    actor_txs: DashMap<ActorId, broadcast::Sender<StreamEvent>>,
}

impl std::fmt::Debug for ReplyBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyBroadcaster")
            .field("global_subscribers", &self.global_tx.receiver_count())
            .field("actor_channels", &self.actor_txs.len())
            .finish()
    }
}

impl ReplyBroadcaster {
    pub fn new() -> Self {
        let (global_tx, _) = broadcast::channel(1000);
        Self {
            global_tx,
            actor_txs: DashMap::new(),
        }
    }

    /// Subscribe to every pushed reply
    pub fn subscribe_global(&self) -> broadcast::Receiver<StreamEvent> {
        self.global_tx.subscribe()
    }

    /// Subscribe to one actor's pushed replies
    pub fn subscribe_actor(&self, actor: &ActorId) -> broadcast::Receiver<StreamEvent> {
        let tx = self.actor_txs.entry(actor.clone()).or_insert_with(|| {
            let (tx, _) = broadcast::channel(100);
            tx
        });
        tx.subscribe()
    }

    /// Push a reply to subscribers
    pub fn push(&self, actor: &ActorId, reply: Reply) {
        let event = StreamEvent {
            actor: actor.clone(),
            reply,
        };

        let _ = self.global_tx.send(event.clone());

        if let Some(tx) = self.actor_txs.get(actor) {
            let _ = tx.send(event);
        }
    }

    pub fn global_subscriber_count(&self) -> usize {
        self.global_tx.receiver_count()
    }

    /// Drop per-actor senders nobody listens to anymore
    pub fn cleanup_idle_channels(&self) {
        self.actor_txs.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl Default for ReplyBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn global_subscription_receives_pushes() {
        let broadcaster = ReplyBroadcaster::new();
        let mut rx = broadcaster.subscribe_global();

        let actor = ActorId::from("alice");
        broadcaster.push(&actor, Reply::new("payment received"));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.actor, actor);
        assert_eq!(event.reply.text, "payment received");
    }

    #[tokio::test]
    async fn actor_subscription_only_sees_its_own() {
        let broadcaster = ReplyBroadcaster::new();
        let alice = ActorId::from("alice");
        let bob = ActorId::from("bob");
        let mut rx = broadcaster.subscribe_actor(&alice);

        broadcaster.push(&bob, Reply::new("for bob"));
        broadcaster.push(&alice, Reply::new("for alice"));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.reply.text, "for alice");
        assert!(rx.try_recv().is_err());
    }
}
