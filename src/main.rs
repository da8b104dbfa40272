use keywarden::{
    backup::BackupRestoreManager,
    config::AppConfig,
    engine::{notify::ReplyBroadcaster, session::SessionTable, ConversationEngine},
    ipinfo::IpInfoClient,
    payment::{PaymentCoordinator, ProviderClient},
    reload::{CommandControl, SharedControl},
    store::{AccessConfig, AccessMode, AccessRoster, CoreState, CredentialStore},
    sweeper::ExpirySweeper,
    web,
};
use keywarden_types::ActorId;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging first
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keywarden=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting keywarden v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::init()?;
    info!("Configuration loaded");

    if config.server.api_key.is_empty() {
        error!("API key not configured!");
        error!("Set server.api_key in config/default.toml or KEYWARDEN_SERVER__API_KEY");
        return Err(anyhow::anyhow!("API key not configured"));
    }

    // Load persisted state: the credential collection and the access
    // configuration, both behind the single exclusion domain.
    let credentials = CredentialStore::load(&config.paths.credentials)?;
    let seed = AccessConfig {
        mode: match config.access.mode.as_str() {
            "public" => AccessMode::Public,
            _ => AccessMode::Private,
        },
        admin: ActorId::new(config.access.admin.clone()),
        daily_price: config.access.daily_price,
        min_price: config.access.min_price,
        enabled: Vec::new(),
    };
    let access = AccessRoster::load_or_seed(&config.paths.access, seed)?;
    info!(
        credentials = credentials.len(),
        roster = access.enabled().len(),
        "State loaded"
    );
    let core = CoreState::new(credentials, access).into_shared();

    let control: SharedControl = Arc::new(CommandControl::from_config(&config.service));

    // Heal any drift between the roster and the derived-active set
    // before serving traffic.
    let boot_diff = {
        let mut guard = core.lock().await;
        let today = chrono::Utc::now().date_naive();
        guard.reconcile_roster(today)?
    };
    if boot_diff.changed() {
        info!(
            added = boot_diff.added.len(),
            removed = boot_diff.removed.len(),
            "Roster reconciled at startup"
        );
        if let Err(e) = control.reload().await {
            error!("Service reload after startup reconciliation failed: {}", e);
        }
    }
    let ipinfo = Arc::new(IpInfoClient::new(&config.ipinfo));
    let sessions = Arc::new(SessionTable::new());
    let broadcaster = Arc::new(ReplyBroadcaster::new());

    // Payment confirmation poller
    let payments = Arc::new(PaymentCoordinator::new(
        core.clone(),
        ProviderClient::new(&config.payment),
        sessions.clone(),
        broadcaster.clone(),
        control.clone(),
        Duration::from_secs(config.payment.poll_secs),
        Duration::from_secs(config.payment.intent_max_age_secs),
    ));
    tokio::spawn(payments.clone().run());
    info!(
        poll_secs = config.payment.poll_secs,
        "Payment poller started"
    );

    // Expiry sweeper
    let sweeper = Arc::new(ExpirySweeper::new(
        core.clone(),
        control.clone(),
        Duration::from_secs(config.sweeper.interval_secs),
    ));
    tokio::spawn(sweeper.clone().run());
    info!(
        interval_secs = config.sweeper.interval_secs,
        "Expiry sweeper started"
    );

    let backup = Arc::new(BackupRestoreManager::new(
        core.clone(),
        &config.paths,
        control.clone(),
        Duration::from_secs(config.service.restart_delay_secs),
    ));

    let engine = Arc::new(ConversationEngine::new(
        core.clone(),
        sessions,
        payments,
        backup.clone(),
        control.clone(),
        ipinfo.clone(),
        config.paths.domain.clone(),
        config.service.name.clone(),
        config.service.port,
    ));

    let state = web::AppState {
        core,
        engine,
        sweeper,
        backup,
        broadcaster,
        control,
        ipinfo,
    };
    let app = web::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
