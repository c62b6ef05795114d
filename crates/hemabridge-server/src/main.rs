//! hemabridge - blood-cancer risk triage server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hemabridge_core::auth::{self, TokenIssuer};
use hemabridge_core::config::HemabridgeConfig;
use hemabridge_core::policy::Role;
use hemabridge_core::store::{NewUser, Store, StoreError};
use hemabridge_server::{AppState, router};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_CONFIG: &str = "hemabridge.toml";

/// hemabridge - blood-cancer risk triage server
#[derive(Parser, Debug)]
#[command(name = "hemabridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults apply when `hemabridge.toml`
    /// is absent)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding `server.bind`
    #[arg(long)]
    bind: Option<String>,

    /// Database file, overriding `database.path`
    #[arg(long)]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,

    /// Create the demo accounts doctor/doctor123 and patient/patient123
    SeedUsers,

    /// Print the effective configuration as TOML
    ShowConfig,

    /// Disable an account; its tokens are rejected from the next request on
    Deactivate {
        /// Login name of the account
        username: String,
    },

    /// Re-enable a disabled account
    Activate {
        /// Login name of the account
        username: String,
    },
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<HemabridgeConfig> {
    let mut config = match &cli.config {
        Some(path) => HemabridgeConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).exists() => {
            HemabridgeConfig::from_file(Path::new(DEFAULT_CONFIG))
                .context("failed to load hemabridge.toml")?
        },
        None => HemabridgeConfig::default(),
    };

    if let Some(bind) = &cli.bind {
        config.server.bind.clone_from(bind);
    }
    if let Some(database) = &cli.database {
        config.database.path.clone_from(database);
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_file.as_deref())?;
    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::SeedUsers => seed_users(&config),
        Commands::ShowConfig => {
            print!("{}", config.to_toml().context("failed to render config")?);
            Ok(())
        },
        Commands::Deactivate { username } => set_account_active(&config, &username, false),
        Commands::Activate { username } => set_account_active(&config, &username, true),
    }
}

async fn serve(config: HemabridgeConfig) -> Result<()> {
    let secret = config
        .auth
        .secret()
        .context("refusing to start without a token secret")?;
    let tokens = TokenIssuer::new(secret, config.auth.token_ttl()).context("invalid token secret")?;
    let store = Store::open(&config.database.path).with_context(|| {
        format!(
            "failed to open database at {}",
            config.database.path.display()
        )
    })?;
    let model = config
        .model
        .build_handler()
        .context("failed to initialize the model handler")?;

    let state = AppState::new(store, model, tokens, config.auth.throttle);
    spawn_throttle_cleanup(&state, Duration::from_secs(config.auth.throttle.window_secs));

    let app = router(state, config.server.upload_limit_bytes);
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    info!(addr = %config.server.bind, "HemaBridge listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("HemaBridge stopped");
    Ok(())
}

fn spawn_throttle_cleanup(state: &AppState, every: Duration) {
    let throttle = state.throttle.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            throttle.cleanup();
        }
    });
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = sigterm.recv() => {},
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            },
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
}

fn seed_users(config: &HemabridgeConfig) -> Result<()> {
    let store = Store::open(&config.database.path).context("failed to open database")?;
    let demo = [
        ("doctor", "doctor@hemabridge.local", "doctor123", Role::Doctor),
        ("patient", "patient@hemabridge.local", "patient123", Role::Patient),
    ];

    for (username, email, password, role) in demo {
        let new = NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: auth::hash_password(password).context("failed to hash password")?,
            role,
        };
        match store.create_user(&new) {
            Ok(user) => info!(user_id = user.id, username, role = %role, "demo user created"),
            Err(StoreError::Duplicate { .. }) => info!(username, "demo user already present"),
            Err(e) => return Err(e).context("failed to create demo user"),
        }
    }
    Ok(())
}

fn set_account_active(config: &HemabridgeConfig, username: &str, active: bool) -> Result<()> {
    let store = Store::open(&config.database.path).context("failed to open database")?;
    let user = store
        .user_by_username(username)
        .context("failed to look up account")?
        .with_context(|| format!("no account named {username}"))?;
    store
        .set_active(user.id, active)
        .context("failed to update account")?;
    info!(user_id = user.id, username, active, "account updated");
    Ok(())
}
