//! Per-actor conversation sessions.
//!
//! The session table is owned exclusively by the engine: a session is
//! created when a flow starts, replaced as the flow advances, and
//! removed on completion, cancellation or access rejection. Sessions
//! for different actors never interact. The table also remembers the
//! id of the last reply shown to each actor so the next reply can
//! supersede it in place, whether or not a flow is active.

use dashmap::DashMap;
use keywarden_types::ActorId;
use uuid::Uuid;

/// Position inside a flow, carrying the fields collected so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    CreateAwaitingCredential {
        paid: bool,
    },
    CreateAwaitingDuration {
        paid: bool,
        credential: String,
    },
    CreateAwaitingPayment {
        order_id: String,
    },
    RenewAwaitingSelection {
        page: usize,
    },
    RenewAwaitingDuration {
        credential: String,
    },
    DeleteAwaitingSelection {
        page: usize,
    },
    DeleteAwaitingConfirmation {
        credential: String,
    },
    RestoreAwaitingArchive,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub step: Step,
}

#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: DashMap<ActorId, Session>,
    last_replies: DashMap<ActorId, Uuid>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, actor: &ActorId) -> Option<Session> {
        self.sessions.get(actor).map(|s| s.value().clone())
    }

    pub fn step(&self, actor: &ActorId) -> Option<Step> {
        self.sessions.get(actor).map(|s| s.step.clone())
    }

    /// Enter or advance a flow.
    pub fn set_step(&self, actor: &ActorId, step: Step) {
        self.sessions.insert(actor.clone(), Session { step });
    }

    /// Discard the session, returning the step it was on.
    pub fn clear(&self, actor: &ActorId) -> Option<Step> {
        self.sessions.remove(actor).map(|(_, s)| s.step)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Record the reply last shown to this actor and return the one
    /// it supersedes.
    pub fn swap_last_reply(&self, actor: &ActorId, reply_id: Uuid) -> Option<Uuid> {
        self.last_replies.insert(actor.clone(), reply_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_are_independent_per_actor() {
        let table = SessionTable::new();
        let alice = ActorId::from("alice");
        let bob = ActorId::from("bob");

        table.set_step(&alice, Step::RestoreAwaitingArchive);
        table.set_step(&bob, Step::CreateAwaitingCredential { paid: true });

        table.clear(&alice);
        assert!(table.step(&alice).is_none());
        assert_eq!(
            table.step(&bob),
            Some(Step::CreateAwaitingCredential { paid: true })
        );
    }

    #[test]
    fn last_reply_survives_session_clear() {
        let table = SessionTable::new();
        let alice = ActorId::from("alice");
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(table.swap_last_reply(&alice, first), None);
        table.set_step(&alice, Step::RestoreAwaitingArchive);
        table.clear(&alice);
        assert_eq!(table.swap_last_reply(&alice, second), Some(first));
    }
}
