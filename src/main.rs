use git_deploy_hook::error::WebhookError;
use git_deploy_hook::logging::{FileLogger, setup_logging};
use git_deploy_hook::notify::Notifier;
use git_deploy_hook::trigger::TriggerSet;
use git_deploy_hook::{AppState, WebhookConfig, api, load_config, write_default_config};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "webhook.toml";

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config_path = PathBuf::from(
        std::env::var("WEBHOOK_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );

    if !config_path.exists() {
        if let Err(e) = write_default_config(&config_path) {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
        println!(
            "a new {} file was created. Please open this file and configure webhook, then run it again.",
            config_path.display()
        );
        std::process::exit(0);
    }

    let config: WebhookConfig = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let file_logger = config.log_dir.clone().map(|dir| {
        FileLogger::new(dir).with_max_files(
            config
                .max_log_files
                .unwrap_or(git_deploy_hook::DEFAULT_MAX_LOG_FILES),
        )
    });
    // Held for the process lifetime so file logs get flushed
    let _log_guard = match setup_logging(config.debug, file_logger.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config, config_path).await {
        error!("Failed to run: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: WebhookConfig, config_path: PathBuf) -> Result<(), WebhookError> {
    let triggers = TriggerSet::from_config(&config)?;
    if triggers.is_empty() {
        warn!("No triggers configured in {:?}; deliveries will be ignored", config_path);
    }

    let notifier = Notifier::new(config.notify_timeout())
        .map_err(|e| WebhookError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
    let state = Arc::new(AppState::new(triggers, notifier, config.deploy_settings()));

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| config.bind_address().to_string());

    let app = api::router(state.clone());

    info!("{} {} listening on {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), bind_address);
    info!("Using config at {:?} ({} trigger(s))", config_path, state.triggers.len());
    let listener = tokio::net::TcpListener::bind(bind_address.as_str()).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
