//! Command handlers for the bluelink CLI

use bluelink::protocol::ble_display_name;
use bluelink::{
    AddressingMode, BluetoothError, BluetoothLink, BtleplugStack, DeviceDescriptor, DeviceScanner,
    DeviceSettings, LinkEvent, LinkTask, Locator,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::cli::{Cli, Commands};
use crate::config::CliConfig;
use crate::error::{CliError, Result};

const STDIN_BUFFER_SIZE: usize = 1024;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: CliConfig) -> Result<()> {
        let stack = BtleplugStack::new().await?;

        match cli.command {
            Commands::Scan { json, duration } => {
                let config = match duration {
                    Some(secs) => config.with_scan_duration(secs),
                    None => config,
                };
                Self::handle_scan_command(stack, &config, json).await
            }
            Commands::Connect {
                name,
                address,
                ble,
                settings,
                save,
                hex,
            } => {
                let device = match (name, address, settings) {
                    (Some(name), _, _) => Self::find_by_name(stack.clone(), &config, &name).await?,
                    (None, Some(address), _) => Self::from_address(&config, &address, ble)?,
                    (None, None, Some(path)) => Self::from_settings(&config, &path)?,
                    (None, None, None) => {
                        return Err(CliError::Config(
                            "one of --name, --address or --settings is required".into(),
                        ))
                    }
                };

                if let Some(path) = save {
                    let json = serde_json::to_string_pretty(&DeviceSettings::from(&device))?;
                    std::fs::write(&path, json)?;
                    info!("Saved device settings to {}", path);
                }

                Self::handle_connect_command(stack, &config, device, hex).await
            }
        }
    }

    /// Handle the scan command
    async fn handle_scan_command(stack: BtleplugStack, config: &CliConfig, json: bool) -> Result<()> {
        let (mut scanner, _events) = DeviceScanner::new(config.scan_config(), stack);
        scanner.scan().await?;

        if json {
            let settings: Vec<DeviceSettings> =
                scanner.devices().iter().map(DeviceSettings::from).collect();
            println!("{}", serde_json::to_string_pretty(&settings)?);
            return Ok(());
        }

        if scanner.devices().is_empty() {
            println!("No devices found");
        }
        for device in scanner.devices() {
            let transport = if device.is_ble { "BLE" } else { "classic" };
            println!("{:<32} {:<38} {}", device.name, device.locator, transport);
        }
        Ok(())
    }

    /// Handle the connect command, bridging the link to stdin/stdout
    async fn handle_connect_command(
        stack: BtleplugStack,
        config: &CliConfig,
        device: DeviceDescriptor,
        hex_output: bool,
    ) -> Result<()> {
        info!("Connecting to {}", device);
        let (link, mut events) = BluetoothLink::new(device, config.link_config(), stack);
        let (task, handle) = LinkTask::new(link);
        let join = task.spawn();
        handle.connect()?;

        let mut stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut buf = vec![0u8; STDIN_BUFFER_SIZE];
        let mut stdin_open = true;

        let outcome = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(LinkEvent::Connected) => info!("Link ready, bridging stdin/stdout"),
                    Some(LinkEvent::BytesReceived(bytes)) => {
                        if hex_output {
                            stdout.write_all(format!("{}\n", hex::encode(&bytes)).as_bytes()).await?;
                        } else {
                            stdout.write_all(&bytes).await?;
                        }
                        stdout.flush().await?;
                    }
                    Some(LinkEvent::BytesSent(bytes)) => debug!("Sent {} bytes", bytes.len()),
                    Some(LinkEvent::CommunicationError { kind, message }) => {
                        error!("{}: {}", kind, message);
                        break Err(CliError::Link(format!("{}: {}", kind, message)));
                    }
                    Some(LinkEvent::Disconnected) | None => break Ok(()),
                },

                read = stdin.read(&mut buf), if stdin_open => match read? {
                    0 => {
                        debug!("stdin closed, disconnecting");
                        stdin_open = false;
                        handle.disconnect()?;
                    }
                    n => handle.write(buf[..n].to_vec())?,
                },
            }
        };

        if handle.shutdown().is_err() {
            debug!("Link task already stopped");
        }
        if let Err(e) = join.await {
            warn!("Link task ended abnormally: {}", e);
        }

        outcome
    }

    async fn find_by_name(
        stack: BtleplugStack,
        config: &CliConfig,
        name: &str,
    ) -> Result<DeviceDescriptor> {
        let (mut scanner, _events) = DeviceScanner::new(config.scan_config(), stack);
        scanner.scan().await?;

        if !scanner.select_by_name(name) {
            return Err(CliError::DeviceNotFound(name.to_string()));
        }
        scanner
            .active_device()
            .cloned()
            .ok_or_else(|| CliError::DeviceNotFound(name.to_string()))
    }

    fn from_address(config: &CliConfig, address: &str, ble: bool) -> Result<DeviceDescriptor> {
        let locator = match config.scan.addressing_mode {
            AddressingMode::Address => Locator::address(address)?,
            AddressingMode::OpaqueId => Locator::opaque_id(address)?,
        };
        let name = if ble {
            ble_display_name(address)
        } else {
            address.to_string()
        };
        Ok(DeviceDescriptor::new(name, locator, ble))
    }

    fn from_settings(config: &CliConfig, path: &str) -> Result<DeviceDescriptor> {
        let contents = std::fs::read_to_string(path)?;
        let settings: DeviceSettings = serde_json::from_str(&contents)?;

        let expected = config.scan.addressing_mode;
        if settings.mode() != expected {
            return Err(BluetoothError::AddressingMismatch {
                expected: expected.as_str(),
                actual: settings.mode().as_str(),
            }
            .into());
        }

        info!("Restoring {} from {}", settings.device_name(), path);
        Ok(DeviceDescriptor::try_from(settings)?)
    }
}
