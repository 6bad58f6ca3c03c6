//! blescan - BLE presence counting daemon.
//!
//! Run with: `cargo run -p blescan-service -- --config config.toml`

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use blescan_core::{BeaconEngine, BleScanner, CountingEngine, RetryConfig};
use blescan_service::{
    Config, DeliveryController, DeliveryOptions, Exit, HealthFlag, HealthFlags, HttpTransport,
    MeshRelay, MeshTransport, Pipeline, QueueSink, ScanTimeCalibrator, SharedHealth, StatusLeds,
    StorageSink, SysfsLed, default_config_path,
};
use blescan_store::{ShardStore, reconstruct_files};

/// Exit status telling the supervisor that the shutdown beacon was seen.
const SHUTDOWN_EXIT_CODE: u8 = 100;

/// Budget for a single AT command or transmit status from the radio.
#[cfg(feature = "xbee")]
const RADIO_COMMAND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// blescan - count BLE devices and track beacons, deliver to files, HTTP and mesh.
#[derive(Parser, Debug)]
#[command(name = "blescan")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon in the foreground (default behavior).
    Run,

    /// Validate the configuration and print what would run.
    Check,

    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

type HttpController = Arc<DeliveryController<HttpTransport>>;
type MeshController = Arc<DeliveryController<MeshTransport>>;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("blescan={level}").parse()?)
                .add_directive(format!("blescan_service={level}").parse()?)
                .add_directive(format!("blescan_core={level}").parse()?)
                .add_directive(format!("blescan_store={level}").parse()?),
        )
        .init();

    let path = args.config.unwrap_or_else(default_config_path);
    match args.command {
        Some(Command::Check) => check(&path),
        Some(Command::Init { force }) => init(&path, force),
        Some(Command::Run) | None => run(&path).await,
    }
}

fn check(path: &Path) -> anyhow::Result<ExitCode> {
    let config = Config::load_validated(path)?;
    println!("{} is valid", path.display());
    println!("  device id:  {}", config.device.id.unwrap_or_default());
    println!("  counting:   storage {:?}, http {}", config.counting.storage, config.counting.http);
    println!("  beacon:     storage {:?}", config.beacon.storage);
    if config.mesh.enabled {
        let role = config.mesh.role();
        println!("  mesh:       {} on {} as {}", config.mesh.node_id, config.mesh.port, role);
    }
    Ok(ExitCode::SUCCESS)
}

fn init(path: &Path, force: bool) -> anyhow::Result<ExitCode> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(ExitCode::SUCCESS)
}

async fn run(path: &Path) -> anyhow::Result<ExitCode> {
    let config = Config::load_validated(path)
        .with_context(|| format!("Cannot start with {}", path.display()))?;
    let device_id = config.device.id.unwrap_or_default();
    info!("Starting blescan as board {}", device_id);

    let health = HealthFlags::shared();
    health.raise(HealthFlag::Setup);

    let leds = config.device.led.then(|| {
        StatusLeds::start(
            health.clone(),
            SysfsLed::open(&config.led.green),
            SysfsLed::open(&config.led.red),
        )
    });

    let http = start_http(&config, &health).await?;
    let (relay, mesh) = if config.mesh.enabled {
        start_mesh(&config, &health, http.clone()).await?
    } else {
        (None, None)
    };

    let mut locations = BTreeSet::new();
    for (_, dir) in config
        .storage_dirs(&config.counting.storage)
        .into_iter()
        .chain(config.storage_dirs(&config.beacon.storage))
    {
        locations.insert(dir);
    }
    for dir in &locations {
        match reconstruct_files(dir) {
            Ok(report) if report.days > 0 => info!(
                "Merged {} past day(s) into {} file(s) in {}",
                report.days,
                report.files,
                dir.display()
            ),
            Ok(_) => {}
            Err(e) => warn!("Reconstruction in {} failed: {}", dir.display(), e),
        }
    }

    let counting = CountingEngine::new(config.counting_config())?;
    let beacon = BeaconEngine::new(config.beacon_config())?;
    let calibrator =
        ScanTimeCalibrator::new(config.device.scan_time, Some(&config.device.state_dir));
    let scanner = BleScanner::open()
        .await
        .context("No usable Bluetooth adapter")?;

    let mut pipeline = Pipeline::new(scanner, counting, beacon, calibrator);
    for (name, dir) in config.storage_dirs(&config.counting.storage) {
        if let Some(store) = open_store(&dir, device_id) {
            pipeline.add_counting_sink(Box::new(StorageSink::new(name, store)));
        }
    }
    for (name, dir) in config.storage_dirs(&config.beacon.storage) {
        if let Some(store) = open_store(&dir, device_id) {
            pipeline.add_beacon_sink(Box::new(StorageSink::new(name, store)));
        }
    }
    if config.counting.http
        && let Some(http) = &http
    {
        pipeline.add_counting_sink(Box::new(QueueSink::http(Arc::clone(http))));
    }
    if let Some(mesh) = &mesh {
        pipeline.add_counting_sink(Box::new(QueueSink::mesh(Arc::clone(mesh))));
    }

    health.clear(HealthFlag::Setup);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));
    let exit = pipeline.run(cancel).await;

    info!("Shutting down");
    if let Some(mesh) = &mesh {
        mesh.stop().await;
    }
    if let Some(relay) = &relay {
        relay.stop().await;
    }
    if let Some(http) = &http {
        http.stop().await;
    }
    if let Some(leds) = leds {
        leds.stop().await;
    }

    Ok(match exit {
        Exit::ShutdownBeacon => ExitCode::from(SHUTDOWN_EXIT_CODE),
        Exit::Cancelled => ExitCode::SUCCESS,
    })
}

fn open_store(dir: &Path, device_id: u32) -> Option<ShardStore> {
    match ShardStore::open(dir, device_id) {
        Ok(store) => Some(store),
        Err(e) if e.is_permission_denied() => {
            error!("No permission to write {}, skipping it: {}", dir.display(), e);
            None
        }
        Err(e) => {
            warn!("Storage {} unavailable, skipping it: {}", dir.display(), e);
            None
        }
    }
}

/// The HTTP controller serves the counting sink and, on a mesh target, the
/// forwarded summaries.
async fn start_http(config: &Config, health: &SharedHealth) -> anyhow::Result<Option<HttpController>> {
    let Some(url) = config.http.url.as_deref().filter(|url| !url.is_empty()) else {
        return Ok(None);
    };
    let forwards = config.mesh.enabled && config.mesh.is_receiver();
    if !config.counting.http && !forwards {
        return Ok(None);
    }

    let transport = HttpTransport::new(url, config.http.request_timeout())?;
    let options = DeliveryOptions {
        capacity: config.http.queue_capacity,
        stacking_threshold: config.http.stacking_threshold,
        retry: RetryConfig::fixed(config.http.retry_interval()),
        drain_timeout: config.http.drain_timeout(),
        stacking_flag: Some(HealthFlag::HttpStacking),
        unreachable_flag: Some(HealthFlag::HttpUnreachable),
    };
    let controller = Arc::new(DeliveryController::new(transport, options, health.clone()));
    controller.start().await;
    info!("Delivering to {}", url);
    Ok(Some(controller))
}

#[cfg(feature = "xbee")]
async fn start_mesh(
    config: &Config,
    health: &SharedHealth,
    http: Option<HttpController>,
) -> anyhow::Result<(Option<Arc<MeshRelay>>, Option<MeshController>)> {
    use blescan_service::mesh::{InboundHandler, XBeeFactory, XBeeSettings};
    use blescan_service::{RelayOptions, Role};
    use blescan_types::SummaryRecord;

    let mesh = &config.mesh;
    let role = mesh.role();
    let settings = XBeeSettings {
        port: mesh.port.clone(),
        baud_rate: mesh.baud_rate,
        pan_id: mesh.pan_id,
        is_coordinator: mesh.is_coordinator,
        node_id: mesh.node_id.clone(),
        command_timeout: RADIO_COMMAND_TIMEOUT,
    };

    let inbound: Option<InboundHandler> = match (role, http) {
        (Role::Receiver, Some(http)) => Some(Arc::new(move |record: SummaryRecord| http.enqueue(record))),
        _ => None,
    };
    let options = RelayOptions {
        role,
        targets: mesh.targets.clone(),
        discovery_timeout: mesh.discovery_timeout(),
        rediscover_interval: mesh.rediscover_interval(),
        crash_cooldown: mesh.crash_cooldown(),
    };
    let relay = MeshRelay::new(
        Arc::new(XBeeFactory::new(settings)),
        options,
        health.clone(),
        inbound,
    );
    info!("Opening mesh radio on {} at {} baud", mesh.port, mesh.baud_rate);
    relay.start().await;

    if role == Role::Receiver {
        return Ok((Some(relay), None));
    }

    let options = DeliveryOptions {
        capacity: mesh.queue_capacity,
        stacking_threshold: mesh.stacking_threshold,
        retry: RetryConfig::fixed(mesh.retry_interval()),
        drain_timeout: mesh.drain_timeout(),
        stacking_flag: Some(HealthFlag::MeshStacking),
        unreachable_flag: Some(HealthFlag::MeshUnreachable),
    };
    let controller = Arc::new(DeliveryController::new(
        MeshTransport::new(Arc::clone(&relay)),
        options,
        health.clone(),
    ));
    controller.start().await;
    Ok((Some(relay), Some(controller)))
}

#[cfg(not(feature = "xbee"))]
async fn start_mesh(
    _config: &Config,
    _health: &SharedHealth,
    _http: Option<HttpController>,
) -> anyhow::Result<(Option<Arc<MeshRelay>>, Option<MeshController>)> {
    anyhow::bail!("mesh is enabled but blescan was built without the `xbee` feature")
}

/// Cancel on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C");
    }
    cancel.cancel();
}
