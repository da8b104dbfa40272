//! The conversational engine: a per-actor finite state machine that
//! turns a sequence of inbound events into one completed operation
//! against the credential store and roster.
//!
//! Store mutations happen only in a flow's terminal step, so a cancel
//! never has anything to unwind. All external side effects (service
//! reload, payment provider, IP enrichment) run outside the store
//! lock.

pub mod notify;
pub mod policy;
pub mod session;

use crate::backup::BackupRestoreManager;
use crate::error::AppError;
use crate::ipinfo::IpInfoClient;
use crate::payment::PaymentCoordinator;
use crate::reload::SharedControl;
use crate::store::{read_domain, SharedCore, SubscriptionRecord};
use chrono::{NaiveDate, Utc};
use keywarden_types::{
    ActorId, CredentialInfo, DocumentPayload, Inbound, MenuAction, MenuButton, Reply,
    SelectionFlow,
};
use policy::{Capability, FlowKind, ADMIN_MAX_DAYS};
use session::{SessionTable, Step};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Selection listings show this many credentials per page.
pub const PAGE_SIZE: usize = 10;

pub struct ConversationEngine {
    core: SharedCore,
    sessions: Arc<SessionTable>,
    payments: Arc<PaymentCoordinator>,
    backup: Arc<BackupRestoreManager>,
    control: SharedControl,
    ipinfo: Arc<IpInfoClient>,
    domain_path: PathBuf,
    service_name: String,
    service_port: u16,
}

impl std::fmt::Debug for ConversationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationEngine")
            .field("active_sessions", &self.sessions.active_count())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::too_many_arguments)]
impl ConversationEngine {
    pub fn new(
        core: SharedCore,
        sessions: Arc<SessionTable>,
        payments: Arc<PaymentCoordinator>,
        backup: Arc<BackupRestoreManager>,
        control: SharedControl,
        ipinfo: Arc<IpInfoClient>,
        domain_path: PathBuf,
        service_name: String,
        service_port: u16,
    ) -> Self {
        Self {
            core,
            sessions,
            payments,
            backup,
            control,
            ipinfo,
            domain_path,
            service_name,
            service_port,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    /// Process one inbound event for one actor and return the replies
    /// to render. Replies for different actors never interact.
    pub async fn handle(&self, actor: &ActorId, inbound: Inbound) -> Vec<Reply> {
        let replies = match inbound {
            Inbound::MenuSelect { action } => self.on_action(actor, action).await,
            Inbound::Text { text } => self.on_text(actor, &text).await,
            Inbound::Document { name, data } => self.on_document(actor, &name, &data).await,
        };
        self.finalize(actor, replies)
    }

    /// Stamp superseding info: the first reply of a turn replaces the
    /// last reply previously shown to this actor.
    fn finalize(&self, actor: &ActorId, mut replies: Vec<Reply>) -> Vec<Reply> {
        if let Some(last) = replies.last() {
            let previous = self.sessions.swap_last_reply(actor, last.id);
            if let (Some(first), Some(previous)) = (replies.first_mut(), previous) {
                first.supersedes = Some(previous);
            }
        }
        replies
    }

    async fn on_action(&self, actor: &ActorId, action: MenuAction) -> Vec<Reply> {
        let policy = self.core.lock().await.policy_snapshot();

        match action {
            MenuAction::Main => vec![self.main_menu_reply(actor, &policy).await],
            MenuAction::Cancel => self.cancel(actor, &policy).await,

            MenuAction::Create => {
                if !policy.may_start(actor, FlowKind::Create) {
                    return vec![self.denied_reply()];
                }
                let terms = policy.create_terms(actor);
                self.sessions.set_step(
                    actor,
                    Step::CreateAwaitingCredential {
                        paid: terms.requires_payment,
                    },
                );
                let text = if terms.requires_payment {
                    format!(
                        "Enter the new credential (3-20 letters, digits, - or _).\nPrice: {} per day.",
                        policy.daily_price
                    )
                } else {
                    "Enter the new credential (3-20 letters, digits, - or _).".to_string()
                };
                vec![Reply::new(text).with_menu(cancel_row())]
            }

            MenuAction::Renew => {
                if !policy.may_start(actor, FlowKind::Renew) {
                    return vec![self.denied_reply()];
                }
                self.enter_selection(actor, SelectionFlow::Renew, 1).await
            }

            MenuAction::Delete => {
                if !policy.may_start(actor, FlowKind::Delete) {
                    return vec![self.denied_reply()];
                }
                self.enter_selection(actor, SelectionFlow::Delete, 1).await
            }

            MenuAction::Page { flow, page } => self.paginate(actor, flow, page).await,

            MenuAction::SelectRenew { credential } => {
                match self.sessions.step(actor) {
                    Some(Step::RenewAwaitingSelection { .. }) => {}
                    _ => return vec![self.stale_button_reply(actor, &policy).await],
                }
                if self.core.lock().await.credentials.get(&credential).is_none() {
                    return vec![
                        Reply::new(format!("Credential `{}` no longer exists.", credential))
                            .with_menu(cancel_row()),
                    ];
                }
                self.sessions
                    .set_step(actor, Step::RenewAwaitingDuration { credential: credential.clone() });
                vec![Reply::new(format!(
                    "Renewing `{}`.\nEnter the additional duration in days (1-{}).",
                    credential, ADMIN_MAX_DAYS
                ))
                .with_menu(cancel_row())]
            }

            MenuAction::SelectDelete { credential } => {
                match self.sessions.step(actor) {
                    Some(Step::DeleteAwaitingSelection { .. }) => {}
                    _ => return vec![self.stale_button_reply(actor, &policy).await],
                }
                self.sessions.set_step(
                    actor,
                    Step::DeleteAwaitingConfirmation {
                        credential: credential.clone(),
                    },
                );
                vec![Reply::new(format!("Delete credential `{}`?", credential)).with_menu(vec![
                    vec![
                        MenuButton::new(
                            "Yes, delete",
                            MenuAction::ConfirmDelete {
                                credential: credential.clone(),
                            },
                        ),
                        MenuButton::new("Cancel", MenuAction::Cancel),
                    ],
                ])]
            }

            MenuAction::ConfirmDelete { credential } => {
                if !policy.may_start(actor, FlowKind::Delete) {
                    return vec![self.denied_reply()];
                }
                match self.sessions.step(actor) {
                    Some(Step::DeleteAwaitingConfirmation { credential: pending })
                        if pending == credential => {}
                    _ => return vec![self.stale_button_reply(actor, &policy).await],
                }
                self.sessions.clear(actor);
                self.delete_now(actor, &policy, &credential).await
            }

            MenuAction::List => {
                if !policy.may_start(actor, FlowKind::List) {
                    return vec![self.denied_reply()];
                }
                vec![self.listing_reply().await]
            }

            MenuAction::Info => {
                if !policy.may_start(actor, FlowKind::Info) {
                    return vec![self.denied_reply()];
                }
                vec![self.info_reply().await]
            }

            MenuAction::Backup => {
                if !policy.may_start(actor, FlowKind::Backup) {
                    return vec![self.denied_reply()];
                }
                self.backup_now().await
            }

            MenuAction::Restore => {
                if !policy.may_start(actor, FlowKind::Restore) {
                    return vec![self.denied_reply()];
                }
                self.sessions.set_step(actor, Step::RestoreAwaitingArchive);
                vec![Reply::new(
                    "Send the backup archive as a document.\nCurrent data will be overwritten.",
                )
                .with_menu(cancel_row())]
            }

            MenuAction::ToggleMode => {
                if !policy.may_start(actor, FlowKind::ToggleMode) {
                    return vec![self.denied_reply()];
                }
                let toggled = {
                    let mut core = self.core.lock().await;
                    core.access.toggle_mode()
                };
                match toggled {
                    Ok(mode) => {
                        info!(mode = mode.as_str(), "operating mode changed");
                        let policy = self.core.lock().await.policy_snapshot();
                        let mut reply = self.main_menu_reply(actor, &policy).await;
                        reply.text =
                            format!("Mode is now {}.\n\n{}", mode.as_str(), reply.text);
                        vec![reply]
                    }
                    Err(e) => vec![self.failure_reply(&e)],
                }
            }
        }
    }

    async fn on_text(&self, actor: &ActorId, text: &str) -> Vec<Reply> {
        let policy = self.core.lock().await.policy_snapshot();
        let text = text.trim();

        let Some(step) = self.sessions.step(actor) else {
            let mut reply = self.main_menu_reply(actor, &policy).await;
            reply.text = format!("No operation in progress.\n\n{}", reply.text);
            return vec![reply];
        };

        match step {
            Step::CreateAwaitingCredential { paid } => {
                if let Err(e) = validate_credential(text) {
                    return vec![self.reprompt(&e)];
                }
                self.sessions.set_step(
                    actor,
                    Step::CreateAwaitingDuration {
                        paid,
                        credential: text.to_string(),
                    },
                );
                let terms = policy.create_terms(actor);
                let text = if paid {
                    format!(
                        "Enter the duration in days (1-{}).\nPrice: {} per day.",
                        terms.max_days, policy.daily_price
                    )
                } else {
                    format!("Enter the duration in days (1-{}).", terms.max_days)
                };
                vec![Reply::new(text).with_menu(cancel_row())]
            }

            Step::CreateAwaitingDuration { paid, credential } => {
                let terms = policy.create_terms(actor);
                let days = match parse_duration(text, terms.max_days) {
                    Ok(days) => days,
                    Err(e) => return vec![self.reprompt(&e)],
                };

                if paid {
                    self.start_payment(actor, &credential, days, &policy).await
                } else {
                    self.sessions.clear(actor);
                    self.provision_now(actor, &policy, &credential, days).await
                }
            }

            Step::CreateAwaitingPayment { .. } => vec![Reply::new(
                "Waiting for the payment to be confirmed.\nPay the reference shown above, or cancel.",
            )
            .with_menu(cancel_row())],

            Step::RenewAwaitingSelection { page } => {
                self.selection_reply(SelectionFlow::Renew, page).await
            }
            Step::DeleteAwaitingSelection { page } => {
                self.selection_reply(SelectionFlow::Delete, page).await
            }

            Step::RenewAwaitingDuration { credential } => {
                let days = match parse_duration(text, ADMIN_MAX_DAYS) {
                    Ok(days) => days,
                    Err(e) => return vec![self.reprompt(&e)],
                };
                self.sessions.clear(actor);
                self.renew_now(actor, &policy, &credential, days).await
            }

            Step::DeleteAwaitingConfirmation { credential } => vec![Reply::new(format!(
                "Use the buttons to confirm deleting `{}`.",
                credential
            ))
            .with_menu(vec![vec![
                MenuButton::new(
                    "Yes, delete",
                    MenuAction::ConfirmDelete {
                        credential: credential.clone(),
                    },
                ),
                MenuButton::new("Cancel", MenuAction::Cancel),
            ]])],

            Step::RestoreAwaitingArchive => vec![Reply::new(
                "Send the backup archive as a document, or cancel.",
            )
            .with_menu(cancel_row())],
        }
    }

    /// Documents are honored only in the restore step and only from
    /// the administrator; everything else is ignored by this engine.
    async fn on_document(&self, actor: &ActorId, name: &str, data: &[u8]) -> Vec<Reply> {
        let policy = self.core.lock().await.policy_snapshot();

        match self.sessions.step(actor) {
            Some(Step::RestoreAwaitingArchive) if policy.is_admin(actor) => {
                self.sessions.clear(actor);
                info!(archive = %name, "restore archive received");
                match self.backup.restore(data).await {
                    Ok(outcome) if outcome.applied.is_empty() => vec![Reply::new(
                        "The archive contained no recognized resources. Nothing was changed.",
                    )
                    .with_menu(main_row())],
                    Ok(outcome) => {
                        let mut text = format!(
                            "Restore applied: {}.",
                            outcome.applied.join(", ")
                        );
                        if outcome.reload_ok {
                            text.push_str(" Service reloaded.");
                        } else {
                            text.push_str(" Warning: service reload failed.");
                        }
                        text.push_str("\nThe front-end will restart shortly.");
                        vec![Reply::new(text).with_menu(main_row())]
                    }
                    Err(e) => vec![self.failure_reply(&e)],
                }
            }
            _ => Vec::new(),
        }
    }

    /// Cancel is valid from any state: discard the session, abandon
    /// any outstanding payment intent, never touch the store.
    async fn cancel(&self, actor: &ActorId, policy: &crate::store::PolicySnapshot) -> Vec<Reply> {
        if let Some(Step::CreateAwaitingPayment { order_id }) = self.sessions.clear(actor) {
            if self.payments.abandon(&order_id) {
                info!(order_id = %order_id, "payment intent abandoned by cancel");
            }
        }
        let mut reply = self.main_menu_reply(actor, policy).await;
        reply.text = format!("Operation cancelled.\n\n{}", reply.text);
        vec![reply]
    }

    async fn enter_selection(
        &self,
        actor: &ActorId,
        flow: SelectionFlow,
        page: usize,
    ) -> Vec<Reply> {
        // An empty listing is a valid result, not an error, and holds
        // no session.
        let total = self.core.lock().await.credentials.len();
        if total == 0 {
            return vec![Reply::new("No credentials provisioned yet.").with_menu(main_row())];
        }
        let step = match flow {
            SelectionFlow::Renew => Step::RenewAwaitingSelection { page },
            SelectionFlow::Delete => Step::DeleteAwaitingSelection { page },
        };
        self.sessions.set_step(actor, step);
        self.selection_reply(flow, page).await
    }

    /// Pagination re-renders the same selection step without
    /// consuming it; the stored page index follows along.
    async fn paginate(&self, actor: &ActorId, flow: SelectionFlow, page: usize) -> Vec<Reply> {
        let matches = matches!(
            (flow, self.sessions.step(actor)),
            (SelectionFlow::Renew, Some(Step::RenewAwaitingSelection { .. }))
                | (SelectionFlow::Delete, Some(Step::DeleteAwaitingSelection { .. }))
        );
        if !matches {
            let policy = self.core.lock().await.policy_snapshot();
            return vec![self.stale_button_reply(actor, &policy).await];
        }

        let (replies, clamped) = {
            let total = self.core.lock().await.credentials.len();
            let clamped = clamp_page(page, total);
            (self.selection_reply(flow, clamped).await, clamped)
        };
        let step = match flow {
            SelectionFlow::Renew => Step::RenewAwaitingSelection { page: clamped },
            SelectionFlow::Delete => Step::DeleteAwaitingSelection { page: clamped },
        };
        self.sessions.set_step(actor, step);
        replies
    }

    async fn selection_reply(&self, flow: SelectionFlow, page: usize) -> Vec<Reply> {
        let today = today();
        let listing = self.core.lock().await.list(today);
        if listing.is_empty() {
            return vec![Reply::new("No credentials provisioned yet.").with_menu(main_row())];
        }

        let total_pages = page_count(listing.len());
        let page = clamp_page(page, listing.len());
        let slice = page_slice(&listing, page);

        let mut rows: Vec<Vec<MenuButton>> = slice
            .iter()
            .map(|info| {
                let label = format!("{} ({})", info.credential, info.status.as_str());
                let action = match flow {
                    SelectionFlow::Renew => MenuAction::SelectRenew {
                        credential: info.credential.clone(),
                    },
                    SelectionFlow::Delete => MenuAction::SelectDelete {
                        credential: info.credential.clone(),
                    },
                };
                vec![MenuButton::new(label, action)]
            })
            .collect();

        let mut nav = Vec::new();
        if page > 1 {
            nav.push(MenuButton::new(
                "Prev",
                MenuAction::Page {
                    flow,
                    page: page - 1,
                },
            ));
        }
        if page < total_pages {
            nav.push(MenuButton::new(
                "Next",
                MenuAction::Page {
                    flow,
                    page: page + 1,
                },
            ));
        }
        if !nav.is_empty() {
            rows.push(nav);
        }
        rows.push(vec![MenuButton::new("Cancel", MenuAction::Cancel)]);

        let title = match flow {
            SelectionFlow::Renew => "renew",
            SelectionFlow::Delete => "delete",
        };
        vec![Reply::new(format!(
            "Pick a credential to {} (page {}/{}):",
            title, page, total_pages
        ))
        .with_menu(rows)]
    }

    async fn start_payment(
        &self,
        actor: &ActorId,
        credential: &str,
        days: u32,
        policy: &crate::store::PolicySnapshot,
    ) -> Vec<Reply> {
        match self
            .payments
            .create_intent(actor, credential, days, policy.daily_price, policy.min_price)
            .await
        {
            Ok(intent) => {
                self.sessions.set_step(
                    actor,
                    Step::CreateAwaitingPayment {
                        order_id: intent.order_id.clone(),
                    },
                );
                let mut text = format!(
                    "Invoice for `{}`\nDuration: {} days\nTotal: {}\n\nPay reference: {}\nPayment is checked automatically.",
                    credential, days, intent.price, intent.payable_reference
                );
                if !intent.provider_expires_at.is_empty() {
                    text.push_str(&format!("\nPay before: {}", intent.provider_expires_at));
                }
                vec![Reply::new(text).with_menu(cancel_row())]
            }
            Err(AppError::BelowMinimum { price, min }) => {
                self.sessions.clear(actor);
                vec![Reply::new(format!(
                    "Minimum transaction is {}. This order is {}.",
                    min, price
                ))
                .with_menu(main_row())]
            }
            Err(e) => {
                self.sessions.clear(actor);
                warn!("payment intent creation failed: {}", e);
                vec![Reply::new(
                    "Could not create the payment. Try again later.",
                )
                .with_menu(main_row())]
            }
        }
    }

    async fn provision_now(
        &self,
        actor: &ActorId,
        policy: &crate::store::PolicySnapshot,
        credential: &str,
        days: u32,
    ) -> Vec<Reply> {
        let outcome = {
            let mut core = self.core.lock().await;
            core.provision(credential, days, today())
        };
        match outcome {
            Ok((record, roster_changed)) => {
                info!(credential = %record.credential, by = %actor, "credential provisioned");
                let reload_ok = self.reload_if(roster_changed).await;
                vec![
                    self.account_reply(&record, reload_ok),
                    self.main_menu_reply(actor, policy).await,
                ]
            }
            Err(e) => vec![self.failure_reply(&e)],
        }
    }

    async fn renew_now(
        &self,
        actor: &ActorId,
        policy: &crate::store::PolicySnapshot,
        credential: &str,
        days: u32,
    ) -> Vec<Reply> {
        let outcome = {
            let mut core = self.core.lock().await;
            core.extend(credential, days, today())
        };
        match outcome {
            Ok((record, roster_changed)) => {
                info!(credential = %record.credential, by = %actor, "credential renewed");
                let reload_ok = self.reload_if(roster_changed).await;
                vec![
                    self.account_reply(&record, reload_ok),
                    self.main_menu_reply(actor, policy).await,
                ]
            }
            Err(e) => vec![self.failure_reply(&e)],
        }
    }

    async fn delete_now(
        &self,
        actor: &ActorId,
        policy: &crate::store::PolicySnapshot,
        credential: &str,
    ) -> Vec<Reply> {
        let outcome = {
            let mut core = self.core.lock().await;
            core.remove(credential)
        };
        match outcome {
            Ok(roster_changed) => {
                info!(credential = %credential, by = %actor, "credential deleted");
                let reload_ok = self.reload_if(roster_changed).await;
                let mut text = format!("Credential `{}` deleted.", credential);
                if !reload_ok {
                    text.push_str("\nWarning: service reload failed.");
                }
                let mut menu_reply = self.main_menu_reply(actor, policy).await;
                menu_reply.text = format!("{}\n\n{}", text, menu_reply.text);
                vec![menu_reply]
            }
            Err(e) => vec![self.failure_reply(&e)],
        }
    }

    async fn backup_now(&self) -> Vec<Reply> {
        match self.backup.backup().await {
            Ok(bytes) => {
                let name = format!(
                    "keywarden-backup-{}.zip",
                    Utc::now().format("%Y%m%d-%H%M%S")
                );
                vec![Reply::new("Backup archive attached.")
                    .with_document(DocumentPayload { name, data: bytes })
                    .with_menu(main_row())]
            }
            Err(e) => vec![self.failure_reply(&e)],
        }
    }

    async fn listing_reply(&self) -> Reply {
        let listing = self.core.lock().await.list(today());
        if listing.is_empty() {
            return Reply::new("No credentials provisioned yet.").with_menu(main_row());
        }
        let mut text = String::from("Credentials:\n");
        for info in &listing {
            text.push_str(&format!(
                "{} [{}] expires {}\n",
                info.credential,
                info.status.as_str(),
                info.expires_on
            ));
        }
        Reply::new(text.trim_end().to_string()).with_menu(main_row())
    }

    async fn info_reply(&self) -> Reply {
        let enrichment = self.ipinfo.lookup().await;
        let domain = read_domain(&self.domain_path);
        Reply::new(format!(
            "Service : {}\nDomain  : {}\nIP      : {}\nPort    : {}\nCity    : {}\nISP     : {}",
            self.service_name,
            domain.as_deref().unwrap_or("(not configured)"),
            enrichment.public_ip,
            self.service_port,
            enrichment.city,
            enrichment.isp
        ))
        .with_menu(main_row())
    }

    async fn main_menu_reply(
        &self,
        actor: &ActorId,
        policy: &crate::store::PolicySnapshot,
    ) -> Reply {
        let domain = read_domain(&self.domain_path);
        let text = format!(
            "{} access\nDomain : {}\nMode   : {}\nPrice  : {} / day\n\nPick an option:",
            self.service_name,
            domain.as_deref().unwrap_or("(not configured)"),
            policy.mode.as_str(),
            policy.daily_price
        );

        let mut rows = Vec::new();
        let mut first_row = Vec::new();
        if policy.may_start(actor, FlowKind::Create) {
            first_row.push(MenuButton::new("Provision credential", MenuAction::Create));
        }
        if policy.may_start(actor, FlowKind::Info) {
            first_row.push(MenuButton::new("System info", MenuAction::Info));
        }
        if !first_row.is_empty() {
            rows.push(first_row);
        }
        if policy.is_admin(actor) {
            rows.push(vec![
                MenuButton::new("Renew", MenuAction::Renew),
                MenuButton::new("Delete", MenuAction::Delete),
            ]);
            rows.push(vec![
                MenuButton::new("List", MenuAction::List),
                MenuButton::new("Toggle mode", MenuAction::ToggleMode),
            ]);
            rows.push(vec![
                MenuButton::new("Backup", MenuAction::Backup),
                MenuButton::new("Restore", MenuAction::Restore),
            ]);
        } else if policy.may_start(actor, FlowKind::List) {
            rows.push(vec![MenuButton::new("List", MenuAction::List)]);
        }

        Reply::new(text).with_menu(rows)
    }

    fn account_reply(&self, record: &SubscriptionRecord, reload_ok: bool) -> Reply {
        let domain = read_domain(&self.domain_path);
        let mut text = format!(
            "Credential : {}\nExpires on : {}\nDomain     : {}",
            record.credential,
            record.expires_on,
            domain.as_deref().unwrap_or("(not configured)")
        );
        if !reload_ok {
            text.push_str("\nWarning: service reload failed.");
        }
        Reply::new(text)
    }

    /// Fire the reload side effect when the roster changed, after the
    /// lock is long gone. Returns whether the service picked it up.
    async fn reload_if(&self, roster_changed: bool) -> bool {
        if !roster_changed {
            return true;
        }
        match self.control.reload().await {
            Ok(()) => true,
            Err(e) => {
                warn!("service reload failed: {}", e);
                false
            }
        }
    }

    fn denied_reply(&self) -> Reply {
        Reply::new("Access denied.")
    }

    fn reprompt(&self, error: &AppError) -> Reply {
        Reply::new(format!("{}. Try again:", error)).with_menu(cancel_row())
    }

    fn failure_reply(&self, error: &AppError) -> Reply {
        let text = match error {
            AppError::DuplicateCredential(name) => {
                format!("Credential `{}` already exists.", name)
            }
            AppError::NotFound(name) => format!("Credential `{}` was not found.", name),
            AppError::Provider(_) | AppError::Reload(_) | AppError::Http(_) => {
                "An external service failed. Try again later.".to_string()
            }
            other => format!("Operation failed: {}", other),
        };
        Reply::new(text).with_menu(main_row())
    }

    async fn stale_button_reply(
        &self,
        actor: &ActorId,
        policy: &crate::store::PolicySnapshot,
    ) -> Reply {
        let mut reply = self.main_menu_reply(actor, policy).await;
        reply.text = format!("That selection is no longer active.\n\n{}", reply.text);
        reply
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn cancel_row() -> Vec<Vec<MenuButton>> {
    vec![vec![MenuButton::new("Cancel", MenuAction::Cancel)]]
}

fn main_row() -> Vec<Vec<MenuButton>> {
    vec![vec![MenuButton::new("Menu", MenuAction::Main)]]
}

/// Credential text: 3-20 characters of letters, digits, hyphen,
/// underscore.
pub fn validate_credential(text: &str) -> Result<(), AppError> {
    let len = text.chars().count();
    if !(3..=20).contains(&len) {
        return Err(AppError::validation("Credential must be 3-20 characters"));
    }
    if !text
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::validation(
            "Only letters, digits, - and _ are allowed",
        ));
    }
    Ok(())
}

/// Duration text: an integer in 1..=max days.
pub fn parse_duration(text: &str, max_days: u32) -> Result<u32, AppError> {
    text.parse::<u32>()
        .ok()
        .and_then(|days| check_duration(days, max_days).ok())
        .ok_or_else(|| AppError::Validation(format!("Duration must be 1-{} days", max_days)))
}

/// Duration already parsed (API callers): an integer in 1..=max days.
pub fn check_duration(days: u32, max_days: u32) -> Result<u32, AppError> {
    if (1..=max_days).contains(&days) {
        Ok(days)
    } else {
        Err(AppError::Validation(format!(
            "Duration must be 1-{} days",
            max_days
        )))
    }
}

pub(crate) fn page_count(total: usize) -> usize {
    total.div_ceil(PAGE_SIZE).max(1)
}

pub(crate) fn clamp_page(page: usize, total: usize) -> usize {
    page.clamp(1, page_count(total))
}

pub(crate) fn page_slice(listing: &[CredentialInfo], page: usize) -> &[CredentialInfo] {
    let start = (page - 1) * PAGE_SIZE;
    let end = (start + PAGE_SIZE).min(listing.len());
    &listing[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use keywarden_types::CredentialStatus;
    use proptest::prelude::*;

    fn info(name: &str) -> CredentialInfo {
        CredentialInfo {
            credential: name.to_string(),
            expires_on: "2026-12-31".parse().unwrap(),
            status: CredentialStatus::Active,
        }
    }

    #[test]
    fn validator_accepts_the_documented_alphabet() {
        assert!(validate_credential("abc").is_ok());
        assert!(validate_credential("user_01-x").is_ok());
        assert!(validate_credential("ab").is_err());
        assert!(validate_credential(&"x".repeat(21)).is_err());
        assert!(validate_credential("has space").is_err());
        assert!(validate_credential("émoji").is_err());
    }

    #[test]
    fn duration_bounds_are_inclusive() {
        assert_eq!(parse_duration("1", 365).unwrap(), 1);
        assert_eq!(parse_duration("365", 365).unwrap(), 365);
        assert!(parse_duration("0", 365).is_err());
        assert!(parse_duration("366", 365).is_err());
        assert!(parse_duration("ten", 365).is_err());
        assert!(parse_duration("-3", 365).is_err());
    }

    #[test]
    fn pages_partition_a_listing_of_25() {
        let listing: Vec<CredentialInfo> =
            (0..25).map(|i| info(&format!("cred-{:02}", i))).collect();

        assert_eq!(page_count(25), 3);
        let pages: Vec<&[CredentialInfo]> =
            (1..=3).map(|p| page_slice(&listing, p)).collect();
        assert_eq!(pages[0].len(), 10);
        assert_eq!(pages[1].len(), 10);
        assert_eq!(pages[2].len(), 5);

        let mut union: Vec<&str> = pages
            .iter()
            .flat_map(|p| p.iter().map(|i| i.credential.as_str()))
            .collect();
        let total = union.len();
        union.sort_unstable();
        union.dedup();
        assert_eq!(union.len(), total);
        assert_eq!(total, 25);
    }

    #[test]
    fn page_clamps_into_valid_range() {
        assert_eq!(clamp_page(0, 25), 1);
        assert_eq!(clamp_page(9, 25), 3);
        assert_eq!(clamp_page(2, 0), 1);
    }

    proptest! {
        #[test]
        fn validator_never_panics(text in "\\PC{0,40}") {
            let _ = validate_credential(&text);
        }

        #[test]
        fn valid_names_always_pass(name in "[A-Za-z0-9_-]{3,20}") {
            prop_assert!(validate_credential(&name).is_ok());
        }
    }
}
