//! Classic RFCOMM sockets through the BlueZ profile API

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bluer::rfcomm::{Profile, ProfileHandle, Role, Stream};
use bluer::{Address, Session};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::device::Locator;
use crate::error::NativeError;
use crate::native::{EventSink, NativeEvent, RfcommSocket, SocketEvent};

const READ_BUFFER_SIZE: usize = 1024;

// ----------------------------------------------------------------------------
// BlueZ Session
// ----------------------------------------------------------------------------

/// Connection to bluetoothd used to open RFCOMM sockets
#[derive(Clone)]
pub struct BluerRfcomm {
    session: Session,
}

impl BluerRfcomm {
    pub async fn new() -> Result<Self, NativeError> {
        let session = Session::new().await.map_err(socket_error)?;
        Ok(Self { session })
    }

    pub(super) fn socket(&self, events: EventSink<NativeEvent>, runtime: Handle) -> BluerSocket {
        BluerSocket {
            session: self.session.clone(),
            runtime,
            events,
            shared: Arc::new(Shared::default()),
            writer: None,
            task: None,
        }
    }
}

fn socket_error(e: bluer::Error) -> NativeError {
    NativeError::Socket(e.to_string())
}

// ----------------------------------------------------------------------------
// Socket
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Shared {
    rx: Mutex<VecDeque<u8>>,
    connected: AtomicBool,
}

impl Shared {
    fn rx(&self) -> MutexGuard<'_, VecDeque<u8>> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(super) struct BluerSocket {
    session: Session,
    runtime: Handle,
    events: EventSink<NativeEvent>,
    shared: Arc<Shared>,
    writer: Option<mpsc::UnboundedSender<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl RfcommSocket for BluerSocket {
    fn connect_to_service(&mut self, locator: &Locator, service_class: Uuid) {
        let address = match locator {
            Locator::Address(addr) => addr.parse::<Address>().map_err(|e| {
                NativeError::Socket(format!("invalid address {}: {}", addr, e))
            }),
            Locator::OpaqueId(_) => Err(NativeError::Unsupported(
                "RFCOMM needs a hardware address",
            )),
        };
        let address = match address {
            Ok(address) => address,
            Err(e) => {
                self.events.emit(SocketEvent::Error(e).into());
                return;
            }
        };

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        self.writer = Some(writer_tx);

        let connection = Connection {
            session: self.session.clone(),
            events: self.events.clone(),
            shared: Arc::clone(&self.shared),
        };
        self.task = Some(
            self.runtime
                .spawn(connection.run(address, service_class, writer_rx)),
        );
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, NativeError> {
        if !self.shared.connected.load(Ordering::Acquire) {
            return Err(NativeError::Socket("not connected".into()));
        }

        match &self.writer {
            Some(writer) if writer.send(data.to_vec()).is_ok() => Ok(data.len()),
            _ => Err(NativeError::Socket("socket closed".into())),
        }
    }

    fn bytes_available(&self) -> usize {
        self.shared.rx().len()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, NativeError> {
        let mut rx = self.shared.rx();
        let n = buf.len().min(rx.len());
        for (slot, byte) in buf.iter_mut().zip(rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn close(&mut self) {
        self.shared.connected.store(false, Ordering::Release);
        self.writer = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for BluerSocket {
    fn drop(&mut self) {
        self.close();
    }
}

// ----------------------------------------------------------------------------
// Connection Task
// ----------------------------------------------------------------------------

/// Opens the stream and shuttles bytes between it and the socket handle
struct Connection {
    session: Session,
    events: EventSink<NativeEvent>,
    shared: Arc<Shared>,
}

impl Connection {
    async fn run(
        self,
        address: Address,
        service_class: Uuid,
        mut writes: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        // The profile stays registered for the lifetime of the stream
        let (stream, _profile) = match self.open(address, service_class).await {
            Ok(opened) => opened,
            Err(e) => {
                self.emit(SocketEvent::Error(e));
                return;
            }
        };

        info!("RFCOMM stream to {} open", address);
        self.shared.connected.store(true, Ordering::Release);
        self.emit(SocketEvent::Connected);

        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            tokio::select! {
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        self.shared.connected.store(false, Ordering::Release);
                        self.emit(SocketEvent::Disconnected);
                        break;
                    }
                    Ok(n) => {
                        self.shared.rx().extend(&buf[..n]);
                        self.emit(SocketEvent::ReadyRead);
                    }
                    Err(e) => {
                        self.shared.connected.store(false, Ordering::Release);
                        self.emit(SocketEvent::Error(e.into()));
                        break;
                    }
                },

                data = writes.recv() => match data {
                    Some(data) => {
                        if let Err(e) = writer.write_all(&data).await {
                            self.emit(SocketEvent::Error(e.into()));
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        debug!("RFCOMM stream to {} closed", address);
    }

    async fn open(
        &self,
        address: Address,
        service_class: Uuid,
    ) -> Result<(Stream, ProfileHandle), NativeError> {
        let adapter = self.session.default_adapter().await.map_err(socket_error)?;
        let device = adapter.device(address).map_err(socket_error)?;

        let profile = Profile {
            uuid: service_class,
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        let mut handle = self
            .session
            .register_profile(profile)
            .await
            .map_err(socket_error)?;

        debug!("Connecting profile {} on {}", service_class, address);
        let connect = async {
            device
                .connect_profile(&service_class)
                .await
                .map_err(socket_error)
        };
        let request = connection_request(connect, handle.next()).await?;
        let stream = request.accept().map_err(socket_error)?;
        Ok((stream, handle))
    }

    fn emit(&self, event: SocketEvent) {
        self.events.emit(event.into());
    }
}

/// Wait for BlueZ to hand over the profile connection.
///
/// A failed connect fails at once, since no request will follow it. A request
/// that arrives first is returned while the connect call is still pending:
/// BlueZ only completes that call once the request has been answered.
async fn connection_request<C, R, T>(connect: C, request: R) -> Result<T, NativeError>
where
    C: Future<Output = Result<(), NativeError>>,
    R: Future<Output = Option<T>>,
{
    tokio::pin!(connect);
    tokio::pin!(request);

    let unregistered = || NativeError::Socket("profile unregistered".into());
    tokio::select! {
        connected = &mut connect => {
            connected?;
            request.await.ok_or_else(unregistered)
        }
        incoming = &mut request => incoming.ok_or_else(unregistered),
    }
}
