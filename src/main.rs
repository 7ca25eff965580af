use anyhow::{Context, Result};
use keyway::api::{create_router, AppState};
use keyway::config::{IdentityMode, KeywayConfig, QueueBackend, Secrets, StorageBackend};
use keyway::credentials::{
    Cipher, CredentialStore, CredentialVault, InMemoryCredentialStore, SqliteCredentialStore,
};
use keyway::identity::{IdentityGateway, IdentityToolkitGateway, LocalIdentityGateway, ToolkitConfig};
use keyway::oauth::{run_state_cleanup, HttpTokenEndpoint, ProviderRegistry, StateManager};
use keyway::queue::{EventQueue, InMemoryQueue, NatsQueue};
use keyway::session::SessionIssuer;
use keyway::webhook::WebhookGateway;
use std::sync::Arc;
use tracing::{info, warn};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "keyway=info,tower_http=info".into());

    if std::env::var("KEYWAY_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("keyway starting...");

    let config = KeywayConfig::from_env().context("Failed to load configuration")?;
    let secrets = Secrets::from_env(config.identity.mode).context("Missing required secrets")?;

    let cipher = Arc::new(Cipher::new(&secrets.encryption_key)?);

    let store: Arc<dyn CredentialStore> = match config.storage.backend {
        StorageBackend::Sqlite => {
            info!(path = %config.storage.sqlite_path, "Using SQLite credential store");
            Arc::new(SqliteCredentialStore::new(&config.storage.sqlite_path)?)
        }
        StorageBackend::Memory => {
            warn!("Using in-memory credential store, tokens are lost on restart");
            Arc::new(InMemoryCredentialStore::new())
        }
    };

    let identity: Arc<dyn IdentityGateway> = match config.identity.mode {
        IdentityMode::Local => {
            warn!("Using local identity provider, for development only");
            let secret = secrets.session_secret.clone().unwrap_or_default();
            Arc::new(LocalIdentityGateway::new(secret.as_bytes())?)
        }
        IdentityMode::IdentityToolkit => {
            let project_id = config
                .identity
                .project_id
                .clone()
                .context("identity.project_id is required for identity_toolkit mode")?;
            Arc::new(IdentityToolkitGateway::new(ToolkitConfig {
                project_id,
                api_key: secrets.identity_api_key.clone().unwrap_or_default(),
                admin_token: secrets.identity_admin_token.clone().unwrap_or_default(),
                api_base: config.identity.api_base.clone(),
                jwks_url: config.identity.jwks_url.clone(),
                timeout: config.timeouts.identity(),
            })?)
        }
    };

    let queue: Arc<dyn EventQueue> = match config.queue.backend {
        QueueBackend::Nats => Arc::new(NatsQueue::connect(&config.nats).await?),
        QueueBackend::Memory => {
            warn!("Using in-memory event queue, events are not delivered anywhere");
            Arc::new(InMemoryQueue::new())
        }
    };

    let providers = Arc::new(ProviderRegistry::from_clients(
        secrets.oauth_clients.iter().map(|client| {
            (
                client.provider.as_str(),
                client.client_id.as_str(),
                client.client_secret.as_str(),
            )
        }),
    ));
    info!(providers = ?providers.configured(), "OAuth providers configured");

    let endpoint = Arc::new(HttpTokenEndpoint::new(config.timeouts.token_endpoint())?);

    let vault = CredentialVault::new(
        store.clone(),
        cipher,
        providers.clone(),
        endpoint,
        config.timeouts.store(),
    );

    let sessions = SessionIssuer::new(
        identity,
        store,
        &config.server.base_url,
        config.session.ttl(),
        config.session.check_revoked,
        config.timeouts.store(),
    );

    let webhooks = WebhookGateway::new(
        secrets.webhook_secret.as_bytes(),
        config.webhook.tolerance_seconds,
        queue,
        config.timeouts.queue(),
    );

    let oauth_states = StateManager::new(config.oauth.state_expiry_seconds);
    tokio::spawn(run_state_cleanup(
        oauth_states.clone(),
        config.oauth.state_cleanup_interval_seconds,
    ));

    let app = create_router(AppState {
        sessions,
        vault,
        webhooks,
        providers,
        oauth_states,
        base_url: config.server.base_url.clone(),
        cookie_secure: config.session.cookie_secure(&config.server.base_url),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;

    info!(address = %config.server.bind_address, base_url = %config.server.base_url, "keyway listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
