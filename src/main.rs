//! Visitor Flow - capture, recognize and count store visitors.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use visitor_flow::config::{AppConfig, ConfigLoader};
use visitor_flow::display;
use visitor_flow::metrics::{today, HttpMetricsClient, MetricsClient};
use visitor_flow::supervisor::{EventBus, Supervisor, DEFAULT_EVENT_CHANNEL_CAPACITY};
use visitor_flow::worker::Channel;
use visitor_flow::workflow::{Workflow, WorkflowCommand, WorkflowPhase, WorkflowStatus};

#[derive(Parser)]
#[command(
    name = "visitor-flow",
    about = "Capture, recognize and count store visitors",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (defaults to .visitor-flow.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print worker output without truncation.
    #[arg(long, global = true)]
    raw: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the interactive capture workflow (default).
    Run,
    /// Look up the unique visitor count for a day.
    Count {
        /// Day to query, YYYY-MM-DD (defaults to today).
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Option<AppConfig> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    match loader.load() {
        Ok(mut config) => {
            config.apply_process_env();
            Some(config)
        }
        Err(e) => {
            display::print_error(&e.to_string());
            None
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Some(config) = load_config(cli.config) else {
        return ExitCode::FAILURE;
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config, cli.raw).await,
        Commands::Count { date } => count(&config, date).await,
    }
}

async fn count(config: &AppConfig, date: Option<NaiveDate>) -> ExitCode {
    let client = match HttpMetricsClient::from_config(&config.metrics) {
        Ok(client) => client,
        Err(e) => {
            display::print_error(&e.to_string());
            return ExitCode::FAILURE;
        }
    };

    match client.fetch_metrics(date.unwrap_or_else(today)).await {
        Ok(metrics) => {
            display::print_count(&metrics);
            ExitCode::SUCCESS
        }
        Err(e) => {
            display::print_error(&format!("Failed to fetch count: {e}"));
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &AppConfig, raw_mode: bool) -> ExitCode {
    let metrics: Arc<dyn MetricsClient> = match HttpMetricsClient::from_config(&config.metrics) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            display::print_error(&e.to_string());
            return ExitCode::FAILURE;
        }
    };

    let (bus, events_rx) = EventBus::new(DEFAULT_EVENT_CHANNEL_CAPACITY);
    let subscription = bus.subscribe_to(&[Channel::ProcessStatus, Channel::RecognitionStatus]);
    let supervisor = Arc::new(Supervisor::new(config.supervisor_settings(), Arc::new(bus)));
    let workflow = Workflow::new(supervisor, metrics, config.workflow_settings());

    let (commands_tx, commands_rx) = mpsc::channel(16);
    let projection = tokio::spawn(project(subscription, workflow.subscribe(), raw_mode));
    let input = tokio::spawn(read_commands(commands_tx.clone(), workflow.subscribe()));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = commands_tx.send(WorkflowCommand::Shutdown).await;
        }
    });

    println!("Press Enter to start or stop capture, q then Enter to quit.");
    workflow.run(events_rx, commands_rx).await;

    input.abort();
    projection.abort();
    ExitCode::SUCCESS
}

/// Print events and phase changes until the workflow goes away.
async fn project(
    mut subscription: visitor_flow::supervisor::EventSubscription,
    mut status_rx: watch::Receiver<WorkflowStatus>,
    raw_mode: bool,
) {
    let mut last_shown: Option<(WorkflowPhase, bool)> = None;

    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Some(event) => display::print_event(&event, raw_mode),
                None => break,
            },
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status_rx.borrow_and_update().clone();
                let shown = (status.phase, status.controls_enabled);
                if last_shown != Some(shown) {
                    last_shown = Some(shown);
                    display::print_status(&status, Instant::now());
                }
            }
        }
    }
}

/// Map terminal input to workflow commands.
async fn read_commands(
    commands_tx: mpsc::Sender<WorkflowCommand>,
    status_rx: watch::Receiver<WorkflowStatus>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let command = match line.trim() {
            "q" | "quit" => WorkflowCommand::Shutdown,
            _ if status_rx.borrow().phase == WorkflowPhase::Capturing => WorkflowCommand::Stop,
            _ => WorkflowCommand::Start,
        };
        if commands_tx.send(command).await.is_err() || command == WorkflowCommand::Shutdown {
            break;
        }
    }
}
