//! Payment intents and the confirmation poller.
//!
//! An intent lives from creation until it is confirmed, rejected,
//! aged out, or abandoned by a cancel. Completion must be exclusive
//! with cancellation: both paths *take* the intent out of the table,
//! and the paid path does so only after acquiring the store lock, so
//! two concurrent "paid" observations — or a cancel racing a
//! confirmation — provision at most one record.

pub mod client;

use crate::engine::notify::ReplyBroadcaster;
use crate::engine::session::SessionTable;
use crate::error::{AppError, AppResult};
use crate::reload::SharedControl;
use crate::store::{SharedCore, SubscriptionRecord};
use chrono::Utc;
use dashmap::DashMap;
use keywarden_types::{ActorId, MenuAction, MenuButton, Reply};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub use client::{PaymentRef, ProviderClient, ProviderStatus};

/// One outstanding payment attempt.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub order_id: String,
    pub actor: ActorId,
    pub credential: String,
    pub days: u32,
    pub price: u64,
    pub payable_reference: String,
    pub provider_expires_at: String,
    created_at: Instant,
}

impl PaymentIntent {
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

pub struct PaymentCoordinator {
    core: SharedCore,
    client: ProviderClient,
    sessions: Arc<SessionTable>,
    broadcaster: Arc<ReplyBroadcaster>,
    control: SharedControl,
    intents: DashMap<String, PaymentIntent>,
    poll_interval: Duration,
    max_age: Duration,
}

impl std::fmt::Debug for PaymentCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentCoordinator")
            .field("outstanding", &self.intents.len())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl PaymentCoordinator {
    pub fn new(
        core: SharedCore,
        client: ProviderClient,
        sessions: Arc<SessionTable>,
        broadcaster: Arc<ReplyBroadcaster>,
        control: SharedControl,
        poll_interval: Duration,
        max_age: Duration,
    ) -> Self {
        Self {
            core,
            client,
            sessions,
            broadcaster,
            control,
            intents: DashMap::new(),
            poll_interval,
            max_age,
        }
    }

    pub fn outstanding(&self) -> usize {
        self.intents.len()
    }

    /// Create a provider transaction and register the intent. The
    /// provider call happens before any lock is taken; the price
    /// floor is checked first so no transaction is created for an
    /// amount the provider would refuse.
    pub async fn create_intent(
        &self,
        actor: &ActorId,
        credential: &str,
        days: u32,
        daily_price: u64,
        min_price: u64,
    ) -> AppResult<PaymentIntent> {
        let price = u64::from(days) * daily_price;
        if price < min_price {
            return Err(AppError::BelowMinimum {
                price,
                min: min_price,
            });
        }

        let order_id = new_order_id(actor);
        let payment = self.client.create_transaction(&order_id, price).await?;

        let intent = PaymentIntent {
            order_id: order_id.clone(),
            actor: actor.clone(),
            credential: credential.to_string(),
            days,
            price,
            payable_reference: payment.payable_reference,
            provider_expires_at: payment.provider_expires_at,
            created_at: Instant::now(),
        };
        self.intents.insert(order_id, intent.clone());
        info!(order_id = %intent.order_id, price, "payment intent created");
        Ok(intent)
    }

    /// Register an already-built intent. Test seam for poller logic.
    #[cfg(test)]
    pub fn insert_intent(&self, intent: PaymentIntent) {
        self.intents.insert(intent.order_id.clone(), intent);
    }

    /// Forget an intent without provisioning (cancelled or reset
    /// session). Returns whether the intent was still outstanding.
    pub fn abandon(&self, order_id: &str) -> bool {
        self.intents.remove(order_id).is_some()
    }

    /// Drive the confirmation poller until the process exits.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    /// One poller pass over every outstanding intent. A failed
    /// provider query is retried on the next tick, never treated as
    /// terminal.
    pub async fn poll_once(&self) {
        let snapshot: Vec<(String, Duration)> = self
            .intents
            .iter()
            .map(|entry| (entry.order_id.clone(), entry.age()))
            .collect();

        for (order_id, age) in snapshot {
            if age > self.max_age {
                if let Some((_, intent)) = self.intents.remove(&order_id) {
                    warn!(order_id = %order_id, "payment intent aged out");
                    self.finish_without_provisioning(
                        &intent,
                        "Payment window expired. The order was cancelled.",
                    );
                }
                continue;
            }

            match self.client.check_status(&order_id).await {
                Ok(ProviderStatus::Paid) => {
                    if let Err(e) = self.complete_paid(&order_id).await {
                        warn!(order_id = %order_id, "paid completion failed: {}", e);
                    }
                }
                Ok(ProviderStatus::Failed) => {
                    if let Some((_, intent)) = self.intents.remove(&order_id) {
                        self.finish_without_provisioning(
                            &intent,
                            "Payment failed or expired at the provider.",
                        );
                    }
                }
                Ok(ProviderStatus::Pending) => {}
                Err(e) => {
                    warn!(order_id = %order_id, "status poll failed, will retry: {}", e);
                }
            }
        }
    }

    /// Provision for a confirmed payment, exactly once.
    ///
    /// The store lock is acquired first and the intent is taken out
    /// of the table while holding it, so a concurrent confirmation or
    /// cancel for the same order finds the intent gone and does
    /// nothing.
    pub async fn complete_paid(&self, order_id: &str) -> AppResult<Option<SubscriptionRecord>> {
        let mut core = self.core.lock().await;
        let Some((_, intent)) = self.intents.remove(order_id) else {
            return Ok(None);
        };

        let today = Utc::now().date_naive();
        let result = core.provision(&intent.credential, intent.days, today);
        drop(core);

        self.sessions.clear(&intent.actor);

        match result {
            Ok((record, roster_changed)) => {
                info!(order_id = %order_id, credential = %record.credential, "paid credential provisioned");
                if roster_changed {
                    if let Err(e) = self.control.reload().await {
                        warn!("service reload after paid provisioning failed: {}", e);
                    }
                }
                self.broadcaster.push(
                    &intent.actor,
                    Reply::new(format!(
                        "Payment received. Credential `{}` is active until {}.",
                        record.credential, record.expires_on
                    ))
                    .with_menu(vec![vec![MenuButton::new("Menu", MenuAction::Main)]]),
                );
                Ok(Some(record))
            }
            Err(e) => {
                self.broadcaster.push(
                    &intent.actor,
                    Reply::new(format!(
                        "Payment received but provisioning failed: {}. Contact the administrator.",
                        e
                    )),
                );
                Err(e)
            }
        }
    }

    fn finish_without_provisioning(&self, intent: &PaymentIntent, notice: &str) {
        self.sessions.clear(&intent.actor);
        self.broadcaster.push(
            &intent.actor,
            Reply::new(notice.to_string())
                .with_menu(vec![vec![MenuButton::new("Menu", MenuAction::Main)]]),
        );
    }
}

fn new_order_id(actor: &ActorId) -> String {
    let tag: String = actor
        .as_str()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(16)
        .collect();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!("KW-{}-{}", tag, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaymentConfig;
    use crate::reload::ServiceControl;
    use crate::store::{AccessConfig, AccessMode, AccessRoster, CoreState, CredentialStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingControl {
        reloads: AtomicUsize,
    }

    impl CountingControl {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                reloads: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ServiceControl for CountingControl {
        async fn reload(&self) -> AppResult<()> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn restart_frontend(&self) -> AppResult<()> {
            Ok(())
        }
    }

    fn provider_client() -> ProviderClient {
        ProviderClient::new(&PaymentConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            slug: "test".to_string(),
            api_key: "test".to_string(),
            poll_secs: 60,
            intent_max_age_secs: 1800,
            timeout_secs: 1,
        })
    }

    fn coordinator(dir: &TempDir) -> (Arc<PaymentCoordinator>, SharedCore) {
        let credentials =
            CredentialStore::load(dir.path().join("credentials.json")).unwrap();
        let access = AccessRoster::load_or_seed(
            dir.path().join("access.json"),
            AccessConfig {
                mode: AccessMode::Public,
                admin: ActorId::from("admin"),
                daily_price: 1000,
                min_price: 500,
                enabled: Vec::new(),
            },
        )
        .unwrap();
        let core = CoreState::new(credentials, access).into_shared();
        let coordinator = Arc::new(PaymentCoordinator::new(
            core.clone(),
            provider_client(),
            Arc::new(SessionTable::new()),
            Arc::new(ReplyBroadcaster::new()),
            CountingControl::new(),
            Duration::from_secs(60),
            Duration::from_secs(1800),
        ));
        (coordinator, core)
    }

    fn intent(order_id: &str) -> PaymentIntent {
        PaymentIntent {
            order_id: order_id.to_string(),
            actor: ActorId::from("guest"),
            credential: "paid-cred".to_string(),
            days: 30,
            price: 30_000,
            payable_reference: "REF-1".to_string(),
            provider_expires_at: String::new(),
            created_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn below_minimum_is_rejected_before_any_provider_call() {
        let dir = TempDir::new().unwrap();
        let (coordinator, _) = coordinator(&dir);

        // 1 day * 300 = 300 < 500 floor; an unreachable provider URL
        // proves no network call was attempted.
        let err = coordinator
            .create_intent(&ActorId::from("guest"), "cred", 1, 300, 500)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BelowMinimum { price: 300, min: 500 }));
        assert_eq!(coordinator.outstanding(), 0);
    }

    #[tokio::test]
    async fn concurrent_paid_confirmations_provision_exactly_once() {
        let dir = TempDir::new().unwrap();
        let (coordinator, core) = coordinator(&dir);
        coordinator.insert_intent(intent("ORD-1"));

        let a = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.complete_paid("ORD-1").await })
        };
        let b = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.complete_paid("ORD-1").await })
        };

        let results = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
        let provisioned = results.iter().filter(|r| r.is_some()).count();
        assert_eq!(provisioned, 1);

        let core = core.lock().await;
        assert_eq!(core.credentials.len(), 1);
        assert!(core.access.contains("paid-cred"));
    }

    #[tokio::test]
    async fn abandoned_intent_is_never_provisioned() {
        let dir = TempDir::new().unwrap();
        let (coordinator, core) = coordinator(&dir);
        coordinator.insert_intent(intent("ORD-2"));

        assert!(coordinator.abandon("ORD-2"));
        let record = coordinator.complete_paid("ORD-2").await.unwrap();
        assert!(record.is_none());
        assert_eq!(core.lock().await.credentials.len(), 0);
    }
}
