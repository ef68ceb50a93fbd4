use clap::{Parser, Subcommand};
use natrouter::capture::{LinkLayer, SocketSet};
use natrouter::config::{self, Config};
use natrouter::dataplane::{ArpTable, NatTable, Outbound, Router};
use natrouter::telemetry::{MetricsRegistry, init_logging};
use natrouter::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Receive buffer size; large enough for any Ethernet frame
const RX_BUFFER: usize = 2048;

/// Frames waiting to be handled
const RX_QUEUE: usize = 1024;

/// First pause after a receive error; doubles while errors persist
const RX_BACKOFF_MIN: Duration = Duration::from_millis(10);
const RX_BACKOFF_MAX: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "natrouter")]
#[command(about = "A userspace IPv4 router with NAT")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run the router
    Run {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate config.toml
    Validate {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Config {
            action: ConfigAction::Validate { config },
        } => {
            init_logging(None);
            cmd_config_validate(&config)
        }
        Commands::Run { config } => cmd_run(&config),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn cmd_config_validate(config_path: &Path) -> Result<()> {
    println!("[INFO] Validating {}...", config_path.display());

    let cfg = config::load(config_path)?;
    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        Err(Error::Config("validation failed".to_string()))
    } else {
        println!("[INFO] Configuration is valid");
        Ok(())
    }
}

fn cmd_run(config_path: &Path) -> Result<()> {
    let cfg = config::load(config_path)?;
    init_logging(Some(&cfg.log));
    info!("Loaded {}", config_path.display());

    let validation = config::validate(&cfg);
    for warning in &validation.warnings {
        warn!("{}", warning);
    }
    if validation.has_errors() {
        for err in &validation.errors {
            error!("{}", err);
        }
        return Err(Error::Config("validation failed".to_string()));
    }

    let rt = tokio::runtime::Runtime::new().map_err(Error::Io)?;
    rt.block_on(run(cfg))
}

async fn run(cfg: Config) -> Result<()> {
    let metrics = Arc::new(MetricsRegistry::new());
    let interfaces = config::interface_table(&cfg)?;
    let routes = config::routing_table(&cfg)?;
    info!(
        interfaces = interfaces.len(),
        routes = routes.len(),
        "Tables loaded"
    );

    let mut links = SocketSet::new();
    let (tx, mut rx) = mpsc::channel::<(String, Vec<u8>)>(RX_QUEUE);

    for iface in interfaces.iter() {
        info!("Binding to interface {}...", iface.name);
        let socket = links.bind(&iface.name).map_err(|e| {
            Error::Startup(format!(
                "failed to bind to {}: {}. Run with root privileges.",
                iface.name, e
            ))
        })?;
        info!(interface = %iface.name, ip = %iface.ip, mac = %iface.mac, "Interface up");

        let name = iface.name.clone();
        let tx = tx.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; RX_BUFFER];
            let mut failures = 0u32;
            loop {
                match socket.recv(&mut buf).await {
                    Ok(len) => {
                        failures = 0;
                        if tx.send((name.clone(), buf[..len].to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        metrics.record_rx_error(&name);
                        let pause = rx_backoff(failures);
                        failures = failures.saturating_add(1);
                        error!(interface = %name, "Receive error: {} (retrying in {:?})", e, pause);
                        tokio::time::sleep(pause).await;
                    }
                }
            }
        });
    }
    drop(tx);

    let mut router = Router::with_arp_cache(
        interfaces,
        routes,
        ArpTable::new(cfg.arp.timers()),
        metrics.clone(),
    );

    if let Some(nat) = cfg.nat.as_ref().filter(|nat| nat.enabled) {
        let external_ip = router
            .interfaces()
            .resolve(&nat.external)
            .map(|iface| iface.ip)
            .ok_or_else(|| Error::InterfaceNotFound {
                name: nat.external.clone(),
            })?;
        let table = Arc::new(NatTable::new(external_ip, nat.timeouts(), metrics.clone()));
        table.start_reaper()?;
        router.enable_nat(table, &nat.external, &nat.internal)?;
    }

    info!("Router started, processing packets...");
    let mut aging_timer = Router::<ArpTable>::aging_interval();

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some((ingress, frame)) = received else {
                    warn!("All receive tasks stopped");
                    break;
                };
                let out = router.handle_frame(&ingress, &frame);
                transmit_all(&links, &metrics, out).await;
            }
            _ = aging_timer.tick() => {
                let out = router.run_aging();
                transmit_all(&links, &metrics, out).await;
                debug!(metrics = ?metrics.export(), "Aging tick");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    router.shutdown();
    Ok(())
}

fn rx_backoff(failures: u32) -> Duration {
    RX_BACKOFF_MIN
        .saturating_mul(1u32 << failures.min(16))
        .min(RX_BACKOFF_MAX)
}

async fn transmit_all<L: LinkLayer>(links: &L, metrics: &MetricsRegistry, out: Outbound) {
    for (interface, frame) in out {
        if let Err(e) = links.transmit(&interface, &frame).await {
            metrics.record_tx_error(&interface);
            warn!(interface = %interface, "Failed to send: {}", e);
        }
    }
}
