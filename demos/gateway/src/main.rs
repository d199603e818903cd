use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use tracing::{info, warn};

use devgate::dispatcher::Dispatcher;
use devgate::memory::MemoryBackend;
use devgate::message::{OtaKind, OtaPackage, SessionInfo};

use devgate_http::server::Server;

fn parse_device(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((token, name)) if !token.is_empty() && !name.is_empty() => {
            Ok((token.to_owned(), name.to_owned()))
        }
        _ => Err(format!("`{s}` is not in the `TOKEN=NAME` form")),
    }
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server address.
    #[arg(long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    address: Ipv4Addr,

    /// Server port.
    #[arg(short, long, default_value_t = 8081)]
    port: u16,

    /// Root of the device API.
    #[arg(long, default_value = "/api/v1")]
    api_root: String,

    /// Milliseconds a request waits for the backend.
    #[arg(long, default_value_t = 60_000)]
    timeout_ms: u64,

    /// Registered device, as `TOKEN=NAME`. May be repeated.
    #[arg(long = "device", value_parser = parse_device)]
    devices: Vec<(String, String)>,

    /// Provisioning key accepted by the gateway.
    #[arg(long, requires = "provision_secret")]
    provision_key: Option<String>,

    /// Provisioning secret accepted by the gateway.
    #[arg(long, requires = "provision_key")]
    provision_secret: Option<String>,

    /// Firmware image served to every device.
    #[arg(long)]
    firmware: Option<PathBuf>,

    /// Title of the served firmware.
    #[arg(long, default_value = "firmware")]
    firmware_title: String,

    /// Version of the served firmware.
    #[arg(long, default_value = "1.0")]
    firmware_version: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();

    let mut backend = MemoryBackend::new();

    for (id, (token, name)) in cli.devices.into_iter().enumerate() {
        info!("Registering device {name}");
        let session = SessionInfo::new(format!("{id:04}"), name, "default");
        backend = backend.device(token, session);
    }

    if let (Some(key), Some(secret)) = (cli.provision_key, cli.provision_secret) {
        backend = backend.provisioning(key, secret, "provisioned");
    }

    if let Some(path) = cli.firmware {
        let data = tokio::fs::read(&path).await?;
        info!(
            "Serving firmware {} {} ({} bytes)",
            cli.firmware_title,
            cli.firmware_version,
            data.len()
        );
        backend = backend.package(
            OtaKind::Firmware,
            OtaPackage::new(cli.firmware_title, cli.firmware_version, data),
        );
    }

    let dispatcher = Dispatcher::new(Arc::new(backend));

    Server::new(dispatcher)
        .address(cli.address)
        .port(cli.port)
        .api_root(&cli.api_root)
        .request_timeout(Duration::from_millis(cli.timeout_ms))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Unable to listen for the shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
        })
        .run()
        .await?;

    Ok(())
}
