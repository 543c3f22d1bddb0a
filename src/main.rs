use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tracing::{error, info};

mod config;
mod error;
mod events;
mod managers;
mod messages;
mod state;
mod telegram;
mod verification;
mod web;

use config::Config;
use events::handle_update;
use managers::{create_shared_admission_manager, create_shared_followup_manager, SharedAdmissionManager};
use state::{create_shared_store, PersistentStore};
use telegram::{run_polling, ChatPlatform, SharedPlatform, TelegramClient};
use verification::{create_shared_verification_registry, SharedVerificationRegistry};
use web::{start_web_server, AppState, TurnstileClient, WebServerConfig};

/// Shared application state
pub struct Data {
    pub platform: SharedPlatform,
    pub admission_manager: SharedAdmissionManager,
}

/// Log every live verification event when the process receives SIGUSR1
#[cfg(unix)]
fn spawn_snapshot_dumper(registry: SharedVerificationRegistry) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut usr1 = match signal(SignalKind::user_defined1()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to install SIGUSR1 handler: {}", e);
                return;
            }
        };
        while usr1.recv().await.is_some() {
            let snapshot = registry.snapshot();
            info!("{} live verification events", snapshot.len());
            for event in snapshot {
                info!("  {}", event);
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse().validate()?;
    config.log_summary();

    info!("Opening store at {}", config.database_path.display());
    let store = create_shared_store(PersistentStore::open(&config.database_path)?);

    let client = Arc::new(TelegramClient::connect(&config.api_addr, &config.bot_token).await?);
    info!("Authorized as @{} ({})", client.bot_username(), client.me().id);
    let platform: SharedPlatform = client.clone();

    let registry = create_shared_verification_registry(Some(store.clone()), config.transition_policy);
    let followups = create_shared_followup_manager(platform.clone());
    let admission_manager =
        create_shared_admission_manager(platform.clone(), store.clone(), registry.clone(), followups);

    let data = Arc::new(Data {
        platform,
        admission_manager,
    });

    let app_state = AppState::new(
        registry.clone(),
        TurnstileClient::new(config.turnstile_secret()),
        &config.bot_token,
        config.site_key(),
        config.testing,
    );
    let web_server = tokio::spawn(start_web_server(WebServerConfig::from_config(&config), app_state));

    #[cfg(unix)]
    spawn_snapshot_dumper(registry);

    let polling = run_polling(client, move |update| handle_update(update, data.clone()));

    tokio::select! {
        _ = polling => {}
        result = web_server => {
            match result {
                Ok(Ok(())) => error!("Web server stopped"),
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(e.into()),
            }
        }
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
