//! CLI for fanwork
//!
//! Subcommands:
//! - `emit-log`: broadcast a message (or each stdin line) to the `logs` exchange
//! - `receive-logs`: print every broadcast until interrupted
//! - `new-task`: put one task on the work queue
//! - `worker`: process tasks from the work queue until interrupted

use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fanwork::broker::{AmqpSession, BrokerClient, Prefetch};
use fanwork::config::{Settings, load_config};
use fanwork::dispatcher::{DeliveryDispatcher, DispatchReport, ShutdownKind};
use fanwork::handler::{Handler, Jitter, LogLine, SimulatedWork};
use fanwork::publisher::Publisher;
use fanwork::topology::{QueueHandle, TopologyManager};
use fanwork::utils::logging;
use fanwork::utils::signals::wait_for_shutdown_signal;

const DEFAULT_TASK: &str = "Work Queues!";
const EXIT_FAILURE: u8 = 1;
const EXIT_FORCED_SHUTDOWN: u8 = 2;

#[derive(Parser)]
#[command(name = "fanwork")]
enum Command {
    /// Broadcast a log line to every connected receiver
    EmitLog {
        /// Message to send; reads lines from stdin when omitted
        message: Vec<String>,
    },
    /// Print every broadcast until interrupted
    ReceiveLogs {
        /// Wait a random 1-4s before printing each line
        #[arg(long)]
        jitter: bool,
    },
    /// Queue one task; each '.' in it costs the worker one time unit
    NewTask {
        /// Task text (default: "Work Queues!")
        message: Vec<String>,
    },
    /// Process tasks from the work queue until interrupted
    Worker {
        /// Unacknowledged tasks this worker may hold (0 = unbounded)
        #[arg(long)]
        prefetch: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    logging::init(&settings.log.level);

    match run(cmd, &settings).await {
        Ok(ShutdownKind::Clean) => ExitCode::SUCCESS,
        Ok(ShutdownKind::Forced) => ExitCode::from(EXIT_FORCED_SHUTDOWN),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run(cmd: Command, settings: &Settings) -> Result<ShutdownKind, Box<dyn std::error::Error>> {
    let session = Arc::new(AmqpSession::connect(&settings.broker.amqp_uri()).await?);

    match cmd {
        Command::EmitLog { message } => {
            emit_log(session, settings, message).await?;
            Ok(ShutdownKind::Clean)
        }
        Command::NewTask { message } => {
            new_task(session, settings, message).await?;
            Ok(ShutdownKind::Clean)
        }
        Command::ReceiveLogs { jitter } => {
            let jitter = if jitter { Jitter::demo() } else { Jitter::None };
            let handler = Arc::new(LogLine::new().with_jitter(jitter));
            let queue = TopologyManager::new(Arc::clone(&session))
                .declare(&settings.topology.fanout())
                .await?;
            let report = consume(session, settings, &queue, Prefetch::Unbounded, handler).await?;
            Ok(report.shutdown)
        }
        Command::Worker { prefetch } => {
            let prefetch = prefetch
                .map(Prefetch::from_count)
                .unwrap_or_else(|| settings.worker.prefetch());
            let handler = Arc::new(SimulatedWork::new(settings.worker.unit_delay()));
            let queue = TopologyManager::new(Arc::clone(&session))
                .declare(&settings.topology.work_queue())
                .await?;
            let report = consume(session, settings, &queue, prefetch, handler).await?;
            Ok(report.shutdown)
        }
    }
}

async fn emit_log(
    session: Arc<AmqpSession>,
    settings: &Settings,
    message: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let target = TopologyManager::new(Arc::clone(&session))
        .prepare_publisher(&settings.topology.fanout())
        .await?;
    let publisher = Publisher::new(Arc::clone(&session));

    if !message.is_empty() {
        publisher.publish(message.join(" "), &target).await?;
    } else {
        if std::io::stdin().is_terminal() {
            info!("Enter messages, one per line (Ctrl-D to finish)");
        }
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            publisher.publish(line, &target).await?;
        }
    }

    session.close().await?;
    Ok(())
}

async fn new_task(
    session: Arc<AmqpSession>,
    settings: &Settings,
    message: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = if message.is_empty() {
        DEFAULT_TASK.to_string()
    } else {
        message.join(" ")
    };

    let target = TopologyManager::new(Arc::clone(&session))
        .prepare_publisher(&settings.topology.work_queue())
        .await?;
    Publisher::new(Arc::clone(&session))
        .publish(text, &target)
        .await?;

    session.close().await?;
    Ok(())
}

async fn consume<H: Handler>(
    session: Arc<AmqpSession>,
    settings: &Settings,
    queue: &QueueHandle,
    prefetch: Prefetch,
    handler: Arc<H>,
) -> Result<DispatchReport, Box<dyn std::error::Error>> {
    let shutdown = CancellationToken::new();
    let dispatcher = DeliveryDispatcher::new(session)
        .with_shutdown(shutdown.clone())
        .with_grace(settings.worker.shutdown_grace());

    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            warn!("Failed to listen for shutdown signals: {}", e);
            return;
        }
        info!("Shutdown signal received. Exiting gracefully.");
        shutdown.cancel();
    });

    info!("Waiting for messages. To exit press CTRL+C");
    let report = dispatcher.run(queue, prefetch, handler).await?;
    Ok(report)
}
