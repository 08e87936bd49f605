//! Runs the register proxy: a local Modbus TCP server mirroring register blocks of one
//! upstream Modbus TCP device.

use std::net::{IpAddr, SocketAddr};
use std::num::ParseIntError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use clap::Parser;
use rodbus::server::RequestHandler;
use rodbus::DecodeLevel;
use rodbus_proxy::config::{DeviceConfig, ProxyConfig};
use rodbus_proxy::transport::client::RodbusUpstream;
use rodbus_proxy::transport::server::{lock, spawn_proxy_server, ProxyRegisters};
use rodbus_proxy::Gateway;
use tokio::time::MissedTickBehavior;

/// period of the statistics log line
const REPORT_PERIOD: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "rodbus-proxy")]
#[command(about = "Mirrors register blocks of a Modbus TCP device onto a local Modbus TCP server")]
#[command(version)]
struct Cli {
    #[arg(short = 'c', long, help = "Path to a JSON5 configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'd',
        long,
        help = "Upstream device as <host> or <host>:<port>, IPv6 with a port as [<ip>]:<port>"
    )]
    device: Option<String>,

    #[arg(short = 'l', long, help = "Socket address of the local server (e.g. 0.0.0.0:502)")]
    listen: Option<SocketAddr>,

    #[arg(long, help = "Log level: trace, debug, info, warn or error")]
    log_level: Option<String>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(ref e) = run().await {
        println!("error: {e}");
    }

    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from_str(&config.logging.level)?)
        .with_target(false)
        .init();

    let timing = config.timing.to_timing();
    let blocks = config.block_table()?;
    tracing::info!(
        "proxying {} blocks from {}:{}",
        blocks.len(),
        config.device.host,
        config.device.port
    );

    let registers = ProxyRegisters::new(config.proxy.register_count).wrap();
    let _server =
        spawn_proxy_server(&config.proxy, registers.clone(), DecodeLevel::default()).await?;

    let upstream = RodbusUpstream::spawn(
        &config.device,
        config.timing.response_timeout(),
        timing.reconnect_delay,
        DecodeLevel::default(),
    );
    let mut gateway = Gateway::new(upstream, blocks, timing, &**lock(&registers));

    let mut ticker = tokio::time::interval(config.timing.tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut report = tokio::time::interval_at(
        tokio::time::Instant::now() + REPORT_PERIOD,
        REPORT_PERIOD,
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                gateway.tick(Instant::now(), &mut **lock(&registers));
            }
            _ = report.tick() => {
                tracing::info!("{}", gateway.statistics());
            }
            res = &mut shutdown => {
                res?;
                tracing::info!("shutting down, {}", gateway.statistics());
                return Ok(());
            }
        }
    }
}

fn load_config(cli: &Cli) -> Result<ProxyConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => ProxyConfig::load_from_file(path)?,
        None => ProxyConfig::default(),
    };

    if let Some(device) = &cli.device {
        apply_device(&mut config.device, device)?;
    }

    if let Some(listen) = cli.listen {
        config.proxy.listen = listen;
    }

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Override the device host, and the port when one is given, from a command line value
fn apply_device(device: &mut DeviceConfig, value: &str) -> Result<(), ParseIntError> {
    if let Ok(addr) = value.parse::<SocketAddr>() {
        device.host = addr.ip().to_string();
        device.port = addr.port();
        return Ok(());
    }

    // bare addresses, IPv6 ones included, carry no port
    if let Ok(ip) = value.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        device.host = ip.to_string();
        return Ok(());
    }

    match value.rsplit_once(':') {
        Some((host, port)) => {
            device.port = port.parse()?;
            device.host = host.to_string();
        }
        None => device.host = value.to_string(),
    }
    Ok(())
}
