//! Async driver that owns a link and serializes access to it

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{BluetoothError, Result};
use crate::link::BluetoothLink;
use crate::native::BluetoothStack;

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// Requests accepted by a running [`LinkTask`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    Connect,
    Write(Vec<u8>),
    Disconnect,
    Shutdown,
}

/// Cloneable handle for sending commands to a [`LinkTask`]
#[derive(Debug, Clone)]
pub struct LinkHandle {
    commands: mpsc::UnboundedSender<LinkCommand>,
}

impl LinkHandle {
    pub fn connect(&self) -> Result<()> {
        self.send(LinkCommand::Connect)
    }

    pub fn write(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(LinkCommand::Write(data.into()))
    }

    pub fn disconnect(&self) -> Result<()> {
        self.send(LinkCommand::Disconnect)
    }

    /// Disconnect and stop the task
    pub fn shutdown(&self) -> Result<()> {
        self.send(LinkCommand::Shutdown)
    }

    fn send(&self, command: LinkCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| BluetoothError::ChannelClosed)
    }
}

// ----------------------------------------------------------------------------
// Link Task
// ----------------------------------------------------------------------------

/// Owns one [`BluetoothLink`] and pumps commands and native events into it
pub struct LinkTask<S> {
    link: BluetoothLink<S>,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
    /// When the current connection attempt is given up
    connect_deadline: Option<Instant>,
}

impl<S> LinkTask<S>
where
    S: BluetoothStack + 'static,
{
    pub fn new(link: BluetoothLink<S>) -> (Self, LinkHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = Self {
            link,
            commands: rx,
            connect_deadline: None,
        };
        (task, LinkHandle { commands: tx })
    }

    /// Run the task on the current tokio runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process commands and native events until shut down or every handle
    /// is dropped. The link is torn down on exit.
    pub async fn run(mut self) {
        info!("Link task for {} starting", self.link.device());

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(LinkCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command),
                    }
                }

                native = self.link.next_native_event() => {
                    if let Some((session, event)) = native {
                        self.link.handle_native_event(session, event);
                    }
                }

                _ = Self::deadline(self.connect_deadline) => {
                    self.connect_deadline = None;
                    self.link.abort_connect("Connection timed out");
                }
            }

            if !self.link.is_connecting() {
                self.connect_deadline = None;
            }
        }

        self.link.disconnect();
        info!("Link task stopped");
    }

    fn handle_command(&mut self, command: LinkCommand) {
        debug!("Link command: {:?}", command);

        match command {
            LinkCommand::Connect => {
                self.link.connect();
                self.connect_deadline = self
                    .link
                    .config()
                    .connect_timeout
                    .map(|timeout| Instant::now() + timeout);
            }
            LinkCommand::Write(data) => self.link.write(&data),
            LinkCommand::Disconnect => self.link.disconnect(),
            LinkCommand::Shutdown => {}
        }
    }

    async fn deadline(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
