use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use dm_client::{
    DeviceData, DeviceFirmware, DeviceInfo, DeviceLocation, LogEntry, LogSeverity, ManagedClient,
    ManagedClientConfig, ResponseCode,
};
use dm_protocol::ServerTopic;
use dm_transport::LoopbackTransport;
use serde_json::json;
use tracing::{error, info, warn};

pub mod device;
pub mod server;

use device::{SimulatedFlasher, SimulatedRebooter};
use server::SimulatedServer;

/// IoT device-management simulator
///
/// Manages a simulated gateway against an in-memory management server and
/// drives a firmware download, a firmware update and a reboot end to end.
#[derive(Parser, Debug)]
#[command(name = "iotdm-simulator")]
#[command(about = "Run a managed device against an in-memory management server")]
#[command(version = "0.1.0")]
pub struct Args {
    /// Device type id
    #[arg(long, default_value = "iotsample-gateway")]
    pub device_type: String,

    /// Device id
    #[arg(long, default_value = "gw-01")]
    pub device_id: String,

    /// Session lifetime in seconds (0 never expires, otherwise at least 3600)
    #[arg(short, long, default_value = "3600")]
    pub lifetime: u64,

    /// Firmware image the server asks the device to download
    #[arg(long, default_value = "http://firmware.example.com/gw/2.0.0.bin")]
    pub firmware_url: String,

    /// Version of the offered firmware image
    #[arg(long, default_value = "2.0.0")]
    pub firmware_version: String,

    /// Simulated time each firmware step takes, in milliseconds
    #[arg(long, default_value = "250")]
    pub work_ms: u64,

    /// Wait for each device reaction, in seconds
    #[arg(short = 't', long, default_value = "10")]
    pub step_timeout: u64,

    /// Make the firmware download fail
    #[arg(long)]
    pub fail_download: bool,

    /// Skip the reboot step
    #[arg(long)]
    pub skip_reboot: bool,

    /// Log every device publish, not only notifications
    #[arg(long)]
    pub show_raw_data: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn lifetime_duration(&self) -> Duration {
        Duration::from_secs(self.lifetime)
    }

    pub fn step_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.step_timeout)
    }

    /// Validate command line arguments
    pub fn validate(&self) -> Result<()> {
        if self.device_type.trim().is_empty() || self.device_id.trim().is_empty() {
            bail!("Device type and device id must not be empty");
        }

        if self.lifetime != 0 && self.lifetime < dm_client::MIN_LIFETIME.as_secs() {
            bail!(
                "Lifetime must be 0 or at least {}s, got {}s",
                dm_client::MIN_LIFETIME.as_secs(),
                self.lifetime
            );
        }

        if self.step_timeout == 0 {
            bail!("Step timeout must be positive");
        }

        match self.log_level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                bail!(
                    "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
                    self.log_level
                );
            }
        }

        Ok(())
    }

    /// Parse arguments, letting `IOTDM_*` environment variables override them
    pub fn from_env() -> Result<Self> {
        let mut args = Args::parse();

        if let Ok(device_id) = std::env::var("IOTDM_DEVICE_ID") {
            args.device_id = device_id;
        }

        if let Ok(lifetime) = std::env::var("IOTDM_LIFETIME") {
            args.lifetime = lifetime
                .parse()
                .context("Invalid IOTDM_LIFETIME environment variable")?;
        }

        if let Ok(url) = std::env::var("IOTDM_FIRMWARE_URL") {
            args.firmware_url = url;
        }

        if let Ok(log_level) = std::env::var("IOTDM_LOG_LEVEL") {
            args.log_level = log_level;
        }

        args.validate()?;
        Ok(args)
    }
}

/// Initialize tracing with the given level unless `RUST_LOG` is set
fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level.to_lowercase())),
        )
        .with_thread_names(true)
        .init();
}

fn build_device(args: &Args) -> Result<DeviceData> {
    let data = DeviceData::builder()
        .type_id(&args.device_type)
        .device_id(&args.device_id)
        .device_info(
            DeviceInfo::new()
                .with_serial_number("SIM-10087")
                .with_manufacturer("Simulated Devices")
                .with_model("SIM-GW")
                .with_device_class("gateway")
                .with_fw_version("1.0.0")
                .with_hw_version("rev-a"),
        )
        .metadata(json!({"simulated": true}))
        .firmware(DeviceFirmware::new().with_version("1.0.0"))
        .build()?;
    Ok(data)
}

/// Firmware download then update, as the server would drive them
fn run_firmware(server: &SimulatedServer, args: &Args) -> Result<()> {
    let timeout = args.step_timeout_duration();

    info!("Phase 2: firmware download");
    let req_id = server.command(
        ServerTopic::FirmwareDownload,
        Some(json!({"url": args.firmware_url, "version": args.firmware_version})),
    );
    let response = server.await_response(&req_id, timeout)?;
    if response.rc != ResponseCode::ACCEPTED {
        bail!("Download rejected with rc {}: {:?}", response.rc, response.message);
    }

    if args.fail_download {
        let reported = server.await_notification("mgmt.firmware", "state", "IDLE", timeout)?;
        warn!(
            "Download failed as requested, device reported {}",
            reported["updateStatus"]
        );
        return Ok(());
    }
    server.await_notification("mgmt.firmware", "state", "DOWNLOADED", timeout)?;
    info!("Device downloaded firmware {}", args.firmware_version);

    info!("Phase 3: firmware update");
    let req_id = server.command(ServerTopic::FirmwareUpdate, None);
    let response = server.await_response(&req_id, timeout)?;
    if response.rc != ResponseCode::ACCEPTED {
        bail!("Update rejected with rc {}: {:?}", response.rc, response.message);
    }
    let reported = server.await_notification("mgmt.firmware", "state", "IDLE", timeout)?;
    if reported["updateStatus"] != json!("SUCCESS") {
        bail!("Update finished with {}", reported["updateStatus"]);
    }
    server.await_notification("deviceInfo", "fwVersion", &args.firmware_version, timeout)?;
    info!("Device now runs firmware {}", args.firmware_version);
    Ok(())
}

fn run_reboot(server: &SimulatedServer, args: &Args) -> Result<()> {
    info!("Phase 4: reboot");
    let req_id = server.command(ServerTopic::Reboot, None);
    let response = server.await_response(&req_id, args.step_timeout_duration())?;
    info!("Reboot answered with rc {}", response.rc);

    let req_id = server.command(ServerTopic::FactoryReset, None);
    let response = server.await_response(&req_id, args.step_timeout_duration())?;
    info!(
        "Factory reset answered with rc {}: {}",
        response.rc,
        response.message.as_deref().unwrap_or("")
    );
    Ok(())
}

/// Run the complete simulation
///
/// manage → firmware download/update → reboot → diagnostics → disconnect
fn run_simulation(args: &Args) -> Result<()> {
    let transport = LoopbackTransport::new();
    let server = SimulatedServer::start(transport.server(), args.show_raw_data);

    let client = ManagedClient::new(
        build_device(args)?,
        Arc::new(transport.clone()),
        ManagedClientConfig::new()
            .with_lifetime(args.lifetime_duration())
            .with_request_timeout(args.step_timeout_duration()),
    )
    .context("Failed to create managed client")?;

    client.add_firmware_handler(Arc::new(SimulatedFlasher {
        work: Duration::from_millis(args.work_ms),
        fail_download: args.fail_download,
    }))?;
    client.add_device_action_handler(Arc::new(SimulatedRebooter))?;

    info!("Phase 1: manage");
    client
        .manage()
        .context("Failed during manage handshake")?;
    info!(
        "Device {} managed, supports {:?}",
        args.device_id,
        client.supports()
    );

    let outcome = run_firmware(&server, args).and_then(|_| {
        if args.skip_reboot {
            Ok(())
        } else {
            run_reboot(&server, args)
        }
    });

    info!("Phase 5: diagnostics");
    client
        .update_location(&DeviceLocation::new(30.28565, -97.73921).with_accuracy(10.0))
        .context("Failed to report location")?;
    let summary = match &outcome {
        Ok(()) => LogEntry::new("simulation finished", LogSeverity::Informational),
        Err(e) => LogEntry::new(format!("simulation failed: {}", e), LogSeverity::Error),
    };
    client.add_log(&summary).context("Failed to send log entry")?;

    info!("Phase 6: disconnect");
    client.disconnect().context("Failed to disconnect")?;
    client.close();
    transport.shutdown();
    outcome
}

fn main() -> Result<()> {
    let args = Args::from_env()?;
    init_tracing(&args.log_level);

    info!(
        "Simulating {}:{} (lifetime {}s)",
        args.device_type, args.device_id, args.lifetime
    );
    match run_simulation(&args) {
        Ok(()) => {
            info!("Simulation completed");
            Ok(())
        }
        Err(e) => {
            error!("Simulation failed: {:#}", e);
            Err(anyhow!("simulation failed"))
        }
    }
}
