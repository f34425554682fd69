//! `taskboard` -- a task board whose task list stays live against a store.
//!
//! Connects to a `taskboard-server`, mounts a sync engine for one owner and
//! runs a single board command. Configuration via CLI flags, environment
//! variables, or config file (`~/.config/taskboard/config.toml`).
//!
//! ```bash
//! # Print the board
//! cargo run --bin taskboard -- --store-url ws://127.0.0.1:9000/ws --owner-id alice
//!
//! # Create a task, then follow the board live
//! cargo run --bin taskboard -- --owner-id alice add "Write docs" --tag docs
//! cargo run --bin taskboard -- --owner-id alice watch
//! ```

use std::fmt::Write as _;
use std::io::{self, Write as _};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use taskboard::config::{CliArgs, ClientConfig, Command, ConfigError};
use taskboard::gateway::RemoteStore;
use taskboard::gateway::ws::WsStore;
use taskboard::sync::SyncError;
use taskboard::sync::collection::BoardColumn;
use taskboard::sync::engine::SyncEngine;
use taskboard_proto::failure::Failure;
use taskboard_proto::task::{NewTask, TaskId, TaskPatch};

/// Errors that end a CLI run.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Configuration could not be loaded or is incomplete.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Connect(#[from] Failure),

    /// A board operation failed.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Writing to stdout failed.
    #[error("output error: {0}")]
    Io(#[from] io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // Logs go to a file; stdout carries the board.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let command = cli.command.clone().unwrap_or(Command::List);
    tracing::info!(?command, "taskboard starting");

    match run(&config, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "taskboard failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskboard.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(config: &ClientConfig, command: Command) -> Result<(), CliError> {
    let url = config.store_url()?;
    let scope = config.scope()?;

    let store = Arc::new(WsStore::connect(url.as_str(), config.to_ws_options()).await?);
    let engine = SyncEngine::mount(store, scope, config.to_engine_config()).await?;

    let result = execute(&engine, command).await;
    engine.shutdown().await;
    result
}

async fn execute<S: RemoteStore>(engine: &SyncEngine<S>, command: Command) -> Result<(), CliError> {
    match command {
        Command::List => {
            engine.refresh().await?;
            print_board(engine)?;
        }
        Command::Add {
            title,
            description,
            status,
            tags,
            sprint,
        } => {
            let mut task = NewTask::new(title)
                .with_description(description)
                .with_status(status)
                .with_tags(tags);
            if let Some(sprint) = sprint {
                task = task.with_sprint(sprint);
            }
            let id = engine.create(task).await?;
            println!("created {id}");
            print_board(engine)?;
        }
        Command::Edit {
            id,
            title,
            description,
            tags,
            sprint,
        } => {
            let id = TaskId::new(id);
            let patch = TaskPatch {
                title,
                description,
                tags,
                sprint_id: sprint,
                ..TaskPatch::default()
            };
            report(&id, engine.update(&id, patch).await?);
            print_board(engine)?;
        }
        Command::Move { id, status } => {
            let id = TaskId::new(id);
            report(&id, engine.move_task(&id, status).await?);
            print_board(engine)?;
        }
        Command::Delete { id } => {
            let id = TaskId::new(id);
            report(&id, engine.delete(&id).await?);
            print_board(engine)?;
        }
        Command::Watch => watch(engine).await?,
    }
    Ok(())
}

/// Reprints the board on every revision until Ctrl-C or feed loss.
async fn watch<S: RemoteStore>(engine: &SyncEngine<S>) -> Result<(), CliError> {
    let mut revisions = engine.watch();
    print_board(engine)?;
    if !engine.feed_alive() {
        return Err(SyncError::FeedLost.into());
    }
    loop {
        tokio::select! {
            changed = revisions.changed() => {
                if changed.is_err() || !engine.feed_alive() {
                    return Err(SyncError::FeedLost.into());
                }
                print_board(engine)?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }
    Ok(())
}

fn report(id: &TaskId, applied: bool) {
    if !applied {
        println!("no change to {id}");
    }
}

fn print_board<S: RemoteStore>(engine: &SyncEngine<S>) -> io::Result<()> {
    let mut out = io::stdout().lock();
    out.write_all(render_board(&engine.board()).as_bytes())?;
    out.flush()
}

fn render_board(columns: &[BoardColumn]) -> String {
    let mut out = String::new();
    for column in columns {
        let _ = writeln!(out, "== {} ({}) ==", column.title, column.tasks.len());
        for task in &column.tasks {
            let _ = write!(out, "  [{}] {}", task.id, task.title);
            if !task.tags.is_empty() {
                let _ = write!(out, "  #{}", task.tags.join(" #"));
            }
            if let Some(sprint) = &task.sprint_id {
                let _ = write!(out, "  ({sprint})");
            }
            out.push('\n');
        }
    }
    out
}
