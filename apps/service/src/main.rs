use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logger::LevelFilter;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use pingmon::config::{self, Config, ConfigTargets, MonitorSection, NotifySection, ProbeKind};
use pingmon::journal::spawn_journal;
use pingmon::monitoring::checker::{PingChecker, TcpChecker};
use pingmon::monitoring::notifier::{
    DisabledNotifier, TelegramNotifier, WebhookNotifier, added_message,
};
use pingmon::monitoring::{
    EventBus, Monitor, MonitorEvent, Notifier, ProbeExecutor, Prober, StatusEvent, StopSignal,
};
use pingmon::{Target, TargetList, TargetSource};

#[derive(Debug, Parser)]
#[command(name = "pingmon", version, about = "Watch hosts and get told when they go up or down")]
struct Cli {
    /// Config file, defaults to $XDG_CONFIG_HOME/pingmon/config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output, repeat for trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Monitor all configured targets until Ctrl-C
    Run,
    /// Manage the target list
    #[command(subcommand)]
    Targets(TargetsCommand),
    /// Probe one address once
    Check { address: String },
    /// Send a test message through the configured notifier
    NotifyTest,
    /// Print the effective configuration
    Config,
}

#[derive(Debug, Subcommand)]
enum TargetsCommand {
    List,
    Add {
        address: String,
        #[arg(short, long, default_value = "")]
        group: String,
        #[arg(short, long, default_value = "")]
        note: String,
    },
    Remove {
        address: String,
        #[arg(short, long, default_value = "")]
        group: String,
    },
}

fn build_prober(section: &MonitorSection) -> Arc<dyn Prober> {
    let executor = match section.probe {
        ProbeKind::Icmp => ProbeExecutor::new(Arc::new(PingChecker::new())),
        ProbeKind::Tcp => ProbeExecutor::new(Arc::new(TcpChecker::new(section.tcp_port))),
    };
    Arc::new(executor)
}

fn build_notifier(section: &NotifySection) -> Result<Arc<dyn Notifier>> {
    let notifier: Arc<dyn Notifier> = match section {
        NotifySection::None => Arc::new(DisabledNotifier),
        NotifySection::Telegram { token, chat_id } => {
            Arc::new(TelegramNotifier::new(token.as_str(), chat_id.as_str())?)
        }
        NotifySection::Webhook { url } => Arc::new(WebhookNotifier::new(url.as_str())?),
    };
    Ok(notifier)
}

fn print_status(event: &StatusEvent) {
    let rtt = event.rtt_ms.map(|ms| format!("{ms} ms")).unwrap_or_else(|| "-".to_string());
    let group = if event.group.is_empty() { "-" } else { event.group.as_str() };
    println!(
        "{} {:<12} {:<28} {:<7} {}",
        event.timestamp.format("%H:%M:%S"),
        group,
        event.address,
        event.status,
        rtt
    );
}

async fn run(path: PathBuf, config: Config) -> Result<()> {
    let settings = config.monitor_settings()?;
    let targets = Arc::new(ConfigTargets::new(&path, config.targets.clone()));
    let bus = EventBus::default();

    let mut console = bus.subscribe();
    let journal = config.log_file.clone().map(|log_file| spawn_journal(bus.subscribe(), log_file));

    let mut monitor = Monitor::new(
        settings,
        targets,
        build_prober(&config.monitor),
        build_notifier(&config.notify)?,
        bus,
    );
    monitor.start().with_context(|| format!("Add targets to {} first", path.display()))?;

    let display = tokio::spawn(async move {
        loop {
            match console.recv().await {
                Ok(MonitorEvent::Status(event)) => print_status(&event),
                Ok(MonitorEvent::Log(line)) => println!("{}", line.text),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Interrupted, stopping");
    monitor.stop().await;

    // dropping the monitor closes the bus for the sinks
    drop(monitor);
    let _ = display.await;
    if let Some(journal) = journal {
        let _ = journal.await;
    }

    Ok(())
}

/// Config with environment overrides, never written back
fn load(path: &Path) -> Result<Config> {
    let mut config = Config::from_config(Some(path))?;
    config.apply_env_overrides();
    Ok(config)
}

/// Announce a new target when lifecycle notices are enabled
async fn announce_added(path: &Path, target: &Target) -> Result<()> {
    let config = load(path)?;
    if !config.monitor.notify_lifecycle {
        return Ok(());
    }
    build_notifier(&config.notify)?.send(&added_message(target)).await?;
    Ok(())
}

async fn targets_command(path: PathBuf, command: TargetsCommand) -> Result<()> {
    let mut config = Config::from_config(Some(&path))?;
    let list = TargetList::from_targets(config.targets.clone());
    let mut added = None;

    match command {
        TargetsCommand::List => {
            for target in list.targets() {
                let group = if target.group.is_empty() { "-" } else { target.group.as_str() };
                println!("{:<12} {:<28} {}", group, target.address, target.note);
            }
            return Ok(());
        }
        TargetsCommand::Add { address, group, note } => {
            let target = Target::new(group, address.trim(), note);
            list.add(target.clone())?;
            added = Some(target);
        }
        TargetsCommand::Remove { address, group } => {
            let removed = list.remove(&address, &group)?;
            println!("Removed {}", removed.address);
        }
    }

    config.targets = list.targets();
    config.write_config(&path)?;

    if let Some(target) = added {
        info!(address = %target.address, group = %target.group, "Target added");
        if let Err(e) = announce_added(&path, &target).await {
            warn!(error = %e, "Failed to announce added target");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    logger::init_with_level(match cli.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    });

    let path = config::resolve_path(cli.config.as_ref())?;

    match cli.command {
        Command::Run => {
            let config = load(&path)?;
            run(path, config).await
        }
        Command::Targets(command) => targets_command(path, command).await,
        Command::Check { address } => {
            let config = load(&path)?;
            let settings = config.monitor_settings()?;
            let prober = build_prober(&config.monitor);
            let result = prober.probe(&address, settings.timeout, &StopSignal::never()).await;
            match (result.reachable, result.rtt_ms) {
                (true, Some(ms)) => println!("{address} ONLINE {ms} ms"),
                (true, None) => println!("{address} ONLINE"),
                _ => println!("{address} OFFLINE"),
            }
            if let Some(ip) = result.resolved {
                println!("answered by {ip}");
            }
            Ok(())
        }
        Command::NotifyTest => {
            let notifier = build_notifier(&load(&path)?.notify)?;
            notifier.send("✅ pingmon test message").await?;
            println!("Test message sent");
            Ok(())
        }
        Command::Config => {
            let config = load(&path)?;
            println!("Config file: {}", path.display());
            print!("{config}");
            Ok(())
        }
    }
}
