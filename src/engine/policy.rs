//! Capability policy: which flows an actor may start and on what
//! terms. One policy drives both the administrator surface and the
//! public self-service surface; the old copy-pasted free/paid bot
//! variants collapse into these two questions.

use crate::store::{AccessMode, PolicySnapshot};
use keywarden_types::ActorId;

/// The operations an actor can try to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Create,
    Renew,
    Delete,
    List,
    Info,
    Backup,
    Restore,
    ToggleMode,
}

/// Terms for a permitted create flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateTerms {
    pub requires_payment: bool,
    pub max_days: u32,
}

/// Administrator creates are free and effectively unbounded.
pub const ADMIN_MAX_DAYS: u32 = 9999;
/// Self-service creates gate a price computation, so the duration is
/// bounded tighter.
pub const SELF_SERVICE_MAX_DAYS: u32 = 365;

pub trait Capability {
    fn is_admin(&self, actor: &ActorId) -> bool;
    fn may_start(&self, actor: &ActorId, flow: FlowKind) -> bool;
    fn create_terms(&self, actor: &ActorId) -> CreateTerms;
}

impl Capability for PolicySnapshot {
    fn is_admin(&self, actor: &ActorId) -> bool {
        &self.admin == actor
    }

    fn may_start(&self, actor: &ActorId, flow: FlowKind) -> bool {
        if self.is_admin(actor) {
            return true;
        }
        match flow {
            // Self-service provisioning, browsing and info are open
            // in public mode only.
            FlowKind::Create | FlowKind::List | FlowKind::Info => {
                self.mode == AccessMode::Public
            }
            // Everything that mutates other people's credentials or
            // the installation itself stays with the administrator.
            FlowKind::Renew
            | FlowKind::Delete
            | FlowKind::Backup
            | FlowKind::Restore
            | FlowKind::ToggleMode => false,
        }
    }

    fn create_terms(&self, actor: &ActorId) -> CreateTerms {
        if self.is_admin(actor) {
            CreateTerms {
                requires_payment: false,
                max_days: ADMIN_MAX_DAYS,
            }
        } else {
            CreateTerms {
                requires_payment: true,
                max_days: SELF_SERVICE_MAX_DAYS,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(mode: AccessMode) -> PolicySnapshot {
        PolicySnapshot {
            mode,
            admin: ActorId::from("admin"),
            daily_price: 1000,
            min_price: 500,
        }
    }

    #[test]
    fn admin_may_start_everything_in_any_mode() {
        let policy = snapshot(AccessMode::Private);
        let admin = ActorId::from("admin");
        for flow in [
            FlowKind::Create,
            FlowKind::Renew,
            FlowKind::Delete,
            FlowKind::List,
            FlowKind::Info,
            FlowKind::Backup,
            FlowKind::Restore,
            FlowKind::ToggleMode,
        ] {
            assert!(policy.may_start(&admin, flow));
        }
        assert!(!policy.create_terms(&admin).requires_payment);
    }

    #[test]
    fn public_mode_opens_self_service_only() {
        let policy = snapshot(AccessMode::Public);
        let guest = ActorId::from("guest");

        assert!(policy.may_start(&guest, FlowKind::Create));
        assert!(policy.may_start(&guest, FlowKind::List));
        assert!(!policy.may_start(&guest, FlowKind::Delete));
        assert!(!policy.may_start(&guest, FlowKind::Restore));

        let terms = policy.create_terms(&guest);
        assert!(terms.requires_payment);
        assert_eq!(terms.max_days, SELF_SERVICE_MAX_DAYS);
    }

    #[test]
    fn private_mode_rejects_non_admin_flows() {
        let policy = snapshot(AccessMode::Private);
        let guest = ActorId::from("guest");
        assert!(!policy.may_start(&guest, FlowKind::Create));
        assert!(!policy.may_start(&guest, FlowKind::Info));
    }
}
