//! # alva
//!
//! Terminal client for the Alva dashboard: sign in, watch the assistant's
//! tasks, plans, thoughts and activity live, and queue or remove tasks.

#![deny(unsafe_code)]

mod render;

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::Level;

use alva_core::security::Credentials;
use alva_core::{NewTask, TaskId};
use alva_settings::AlvaSettings;
use alva_sync::realtime::RealtimeConfig;
use alva_sync::{
    clear_session, load_session, save_session, AuthClient, AuthError, DashboardSession,
    SupabaseBackend, SupabaseConfig,
};
use alva_telemetry::TelemetryConfig;

/// Redraw at least this often so relative times and the status age.
const REDRAW_INTERVAL: Duration = Duration::from_secs(30);
/// How long `task add` / `task rm` wait for the change feed to confirm.
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Realtime dashboard for the Alva assistant.
#[derive(Parser, Debug)]
#[command(name = "alva", version, about = "Realtime dashboard for the Alva assistant")]
struct Cli {
    /// Log at debug level for the alva crates.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password.
    Login {
        email: String,
        /// Read from stdin when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    /// Sign out and forget the saved session.
    Logout,
    /// Live dashboard, redrawn on every change. Ctrl-C exits.
    Watch,
    /// Print the dashboard once and exit.
    Status,
    #[command(subcommand)]
    Task(TaskCommand),
}

#[derive(Subcommand, Debug)]
enum TaskCommand {
    /// Queue a task for the assistant.
    Add {
        title: String,
        #[arg(short, long)]
        description: Option<String>,
        /// 1 (most urgent) to 5.
        #[arg(short, long, default_value_t = 3)]
        priority: u8,
        /// Estimated minutes.
        #[arg(short, long)]
        estimate: Option<u32>,
    },
    /// Delete a task by id.
    Rm { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = alva_settings::load_settings().context("Failed to load settings")?;
    init_logging(&settings, cli.verbose)?;

    match cli.command {
        Command::Login { email, password } => login(&settings, &email, password).await,
        Command::Logout => logout(&settings).await,
        Command::Watch => watch(&settings).await,
        Command::Status => status(&settings).await,
        Command::Task(TaskCommand::Add {
            title,
            description,
            priority,
            estimate,
        }) => {
            let mut task = NewTask::new(title).with_priority(priority);
            if let Some(description) = description {
                task = task.with_description(description);
            }
            if let Some(minutes) = estimate {
                task = task.with_estimate(minutes);
            }
            add_task(&settings, task).await
        }
        Command::Task(TaskCommand::Rm { id }) => remove_task(&settings, TaskId::from_raw(id)).await,
    }
}

fn init_logging(settings: &AlvaSettings, verbose: bool) -> Result<()> {
    let mut config = TelemetryConfig {
        log_level: settings.logging.level()?,
        module_levels: settings.logging.module_levels()?,
        json: settings.logging.json,
    };
    if verbose {
        for module in ["alva", "alva_sync", "alva_state"] {
            config = config.with_module_level(module, Level::DEBUG);
        }
    }
    alva_telemetry::init_telemetry(&config).context("Failed to initialize logging")
}

fn auth_client(settings: &AlvaSettings) -> Result<AuthClient> {
    Ok(AuthClient::new(
        settings.backend.base_url(),
        settings.backend.anon_key()?,
        Duration::from_millis(settings.backend.request_timeout_ms),
    )?)
}

/// Credentials for the saved session, refreshed first when it has expired.
async fn signed_in(settings: &AlvaSettings) -> Result<Credentials> {
    let path = settings.session.resolved_path();
    let session = load_session(&path).ok_or(AuthError::NotSignedIn)?;
    let anon_key = settings.backend.anon_key()?;

    if !session.is_expired(Utc::now()) {
        return Ok(Credentials::with_session(anon_key, session));
    }
    tracing::info!("session expired, refreshing");
    let refreshed = match auth_client(settings)?.refresh(&session).await {
        Ok(s) => s,
        Err(AuthError::NotSignedIn) => {
            forget(&path)?;
            return Err(AuthError::NotSignedIn.into());
        }
        Err(e) => return Err(e.into()),
    };
    save_session(&path, &refreshed)?;
    Ok(Credentials::with_session(anon_key, refreshed))
}

async fn open_session(settings: &AlvaSettings) -> Result<DashboardSession> {
    let credentials = signed_in(settings).await?;
    let config = SupabaseConfig {
        base_url: settings.backend.base_url().to_string(),
        request_timeout: Duration::from_millis(settings.backend.request_timeout_ms),
        realtime: RealtimeConfig {
            heartbeat_interval: Duration::from_millis(settings.realtime.heartbeat_interval_ms),
            join_timeout: Duration::from_millis(settings.realtime.join_timeout_ms),
        },
    };
    let backend = SupabaseBackend::new(config, credentials).context("Failed to create backend client")?;
    Ok(DashboardSession::start(Arc::new(backend)))
}

async fn login(settings: &AlvaSettings, email: &str, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => read_password()?,
    };
    let session = auth_client(settings)?.sign_in(email, &password).await?;
    let path = settings.session.resolved_path();
    save_session(&path, &session)
        .with_context(|| format!("Failed to save session to {}", path.display()))?;
    println!("Signed in as {}", session.user_email.as_deref().unwrap_or(email));
    Ok(())
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    std::io::stderr().flush().ok();
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn logout(settings: &AlvaSettings) -> Result<()> {
    let path = settings.session.resolved_path();
    let Some(session) = load_session(&path) else {
        println!("Not signed in");
        return Ok(());
    };
    if let Err(e) = auth_client(settings)?.sign_out(&session).await {
        tracing::warn!(error = %e, "server-side sign-out failed, forgetting session anyway");
    }
    forget(&path)?;
    println!("Signed out");
    Ok(())
}

fn forget(path: &Path) -> Result<()> {
    let removed = clear_session(path)
        .with_context(|| format!("Failed to remove session file {}", path.display()))?;
    if !removed {
        tracing::debug!(path = %path.display(), "no session file to remove");
    }
    Ok(())
}

async fn status(settings: &AlvaSettings) -> Result<()> {
    let session = open_session(settings).await?;
    let snapshot = session.loaded().await?;
    print!("{}", render::dashboard(&snapshot, Utc::now()));
    session.shutdown().await;
    Ok(())
}

async fn watch(settings: &AlvaSettings) -> Result<()> {
    let session = open_session(settings).await?;
    let mut rx = session.watch();
    let mut redraw = tokio::time::interval(REDRAW_INTERVAL);

    loop {
        let snapshot = Arc::clone(&rx.borrow_and_update());
        // Clear screen, cursor home.
        print!("\x1b[2J\x1b[H{}", render::dashboard(&snapshot, Utc::now()));
        std::io::stdout().flush().ok();

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                break;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = redraw.tick() => {}
        }
    }

    session.shutdown().await;
    Ok(())
}

async fn add_task(settings: &AlvaSettings, task: NewTask) -> Result<()> {
    let session = open_session(settings).await?;
    session.loaded().await?;
    let id = session.create_task(task).await?;

    let mut rx = session.watch();
    let confirmed = tokio::time::timeout(CONFIRM_TIMEOUT, rx.wait_for(|s| s.task(&id).is_some()))
        .await
        .is_ok_and(|r| r.is_ok());
    if confirmed {
        println!("Created {id}");
    } else {
        println!("Created {id} (not yet confirmed by the change feed)");
    }
    session.shutdown().await;
    Ok(())
}

async fn remove_task(settings: &AlvaSettings, id: TaskId) -> Result<()> {
    let session = open_session(settings).await?;
    session.loaded().await?;
    session
        .delete_task(&id)
        .await
        .with_context(|| format!("Failed to delete task {id}"))?;

    let mut rx = session.watch();
    let confirmed = tokio::time::timeout(CONFIRM_TIMEOUT, rx.wait_for(|s| s.task(&id).is_none()))
        .await
        .is_ok_and(|r| r.is_ok());
    if confirmed {
        println!("Deleted {id}");
    } else {
        println!("Deleted {id} (not yet confirmed by the change feed)");
    }
    session.shutdown().await;
    Ok(())
}
