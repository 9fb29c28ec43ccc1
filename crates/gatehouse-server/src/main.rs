//! Gatehouse - identity federation broker

use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::Settings;
use gatehouse_api::AppState;
use gatehouse_dsync::{
    directories, event_log, groups, users, DirectoryController, DirectorySync, EventDispatcher,
    Groups, HttpWebhookTransport, Users, WebhookEventsLogger,
};
use gatehouse_sso::saml::XmlSamlValidator;
use gatehouse_sso::{
    federation, registry, setup_link, ConnectionRegistry, FederationController, IdTokenService,
    OAuthController, OAuthControllerConfig, SetupLinkController,
};
use gatehouse_store::{DatabaseDriver, EncryptionKey, MemoryDriver, Store};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let settings = Settings::load().context("Failed to load configuration")?;
    info!("Starting Gatehouse v{}", env!("CARGO_PKG_VERSION"));

    let driver: Arc<dyn DatabaseDriver> = Arc::new(MemoryDriver::new());
    let state = build_state(&settings, driver.clone())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cleanup = spawn_cleanup_task(
        driver,
        Duration::from_secs(settings.database.cleanup_interval_secs),
        shutdown_rx,
    );

    let app = create_app(state);
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .context("Invalid server address")?;

    info!("Server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the sweep before exiting
    let _ = shutdown_tx.send(true);
    let _ = cleanup.await;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gatehouse=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn build_state(settings: &Settings, driver: Arc<dyn DatabaseDriver>) -> Result<AppState> {
    let encryption = match &settings.database.encryption_key {
        Some(key) => Some(
            EncryptionKey::from_base64(key).context("Invalid database encryption key")?,
        ),
        None => None,
    };
    let external_url = settings.server.external_url.clone();

    let connections = ConnectionRegistry::new(Store::new(
        driver.clone(),
        registry::NAMESPACE,
        None,
        encryption.clone(),
    ));

    let id_tokens = IdTokenService::new(
        settings.jwt.secret.clone(),
        settings.jwt.issuer.clone(),
        settings.jwt.expiry_secs,
    );
    let oauth = Arc::new(OAuthController::new(
        driver.clone(),
        encryption.clone(),
        connections.clone(),
        Arc::new(XmlSamlValidator),
        id_tokens,
        OAuthControllerConfig {
            external_url: external_url.clone(),
            saml_audience: settings.saml.audience.clone(),
            access_token_ttl: settings.oauth.access_token_ttl_secs,
            code_ttl: settings.oauth.code_ttl_secs,
            session_ttl: settings.oauth.session_ttl_secs,
        },
    ));

    let setup_links = SetupLinkController::new(
        Store::new(
            driver.clone(),
            setup_link::NAMESPACE,
            None,
            encryption.clone(),
        ),
        external_url.clone(),
    );

    let federation = FederationController::new(
        Store::new(
            driver.clone(),
            federation::NAMESPACE,
            None,
            encryption.clone(),
        ),
        external_url.clone(),
        settings.saml.certificate.clone(),
    );

    let directory_controller = DirectoryController::new(
        Store::new(
            driver.clone(),
            directories::NAMESPACE,
            None,
            encryption.clone(),
        ),
        external_url,
    );
    let dsync_users = Users::new(Store::new(
        driver.clone(),
        users::NAMESPACE,
        None,
        encryption.clone(),
    ));
    let dsync_groups = Groups::new(
        Store::new(driver.clone(), groups::NAMESPACE, None, encryption.clone()),
        Store::new(
            driver.clone(),
            groups::MEMBERS_NAMESPACE,
            None,
            encryption.clone(),
        ),
    );
    let logger = WebhookEventsLogger::new(Store::new(
        driver,
        event_log::NAMESPACE,
        None,
        encryption,
    ));
    let dispatcher = EventDispatcher::new(Arc::new(HttpWebhookTransport::new()), logger);
    let dsync = DirectorySync::new(directory_controller, dsync_users, dsync_groups, dispatcher);

    Ok(AppState::new(
        oauth,
        connections,
        setup_links,
        federation,
        dsync,
    ))
}

fn create_app(state: AppState) -> Router {
    gatehouse_api::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Periodic sweep of expired sessions, codes and tokens. Owned here so
/// shutdown can cancel it; a sweep interrupted mid-run is re-done next tick.
fn spawn_cleanup_task(
    driver: Arc<dyn DatabaseDriver>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; skip it
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => match driver.reap_expired().await {
                    Ok(reaped) if reaped > 0 => info!(reaped, "Reaped expired records"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Expiry sweep failed"),
                },
                _ = shutdown.changed() => break,
            }
        }
    })
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
