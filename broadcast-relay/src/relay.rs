//! The relay's control loop.
//!
//! One task owns the [`Registry`] and is the only writer to client sockets.
//! Each accepted connection gets a reader task that reads at most
//! [`READ_BUFFER_SIZE`] bytes at a time and forwards the result over a bounded
//! channel. The control loop waits on the listener and that channel together,
//! under a single idle timeout:
//!
//! - listener ready: accept, enable keepalive, admit to the registry
//! - reader data: fan the bytes out to every other connection
//! - reader hang-up or error: evict that connection
//! - timeout with nothing ready: send the heartbeat probe to everyone
//!
//! Because the timeout covers the whole wait, the heartbeat only fires after a
//! full window of silence across every connection and the listener.

use std::{future::Future, io, net::SocketAddr, time::Duration};

use tokio::{
    io::AsyncReadExt,
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::{mpsc, watch},
    time,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::{EVENT_CHANNEL_CAPACITY, KeepaliveConfig, READ_BUFFER_SIZE, RelayConfig},
    discovery::ServiceRegistrar,
    error::RelayError,
    heartbeat,
    listener::{apply_keepalive, bind_listener},
    registry::{Connection, ConnectionId, Registry},
};

pub struct Relay {
    listener: TcpListener,
    config: RelayConfig,
    connection_count: watch::Sender<usize>,
}

impl Relay {
    /// Bind the listener, then announce it through `registrar` exactly once.
    ///
    /// Must be called from within a Tokio runtime. If registration fails the
    /// listener is closed before the error is returned.
    pub fn start<R>(config: RelayConfig, registrar: &R) -> Result<Self, RelayError>
    where
        R: ServiceRegistrar + ?Sized,
    {
        let listener = bind_listener(&config)?;
        let addr = listener
            .local_addr()
            .map_err(|source| RelayError::Listen {
                addr: config.bind_addr(),
                backlog: config.backlog,
                source,
            })?;
        info!(%addr, family = %config.family, backlog = config.backlog, "socket listening");

        let advertisement = config.advertisement.clone().with_port(addr.port());
        if let Err(err) = registrar.register(&advertisement) {
            error!(error = %err, "service registration failed, closing listener");
            return Err(err.into());
        }

        Ok(Self::new(listener, config))
    }

    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        let (connection_count, _) = watch::channel(0);
        Self {
            listener,
            config,
            connection_count,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of registered connections, updated on every admit and eviction.
    pub fn connection_count(&self) -> watch::Receiver<usize> {
        self.connection_count.subscribe()
    }

    /// Run until `shutdown` resolves or the wait fails. Returning drops every
    /// connection and the listener.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()>,
    {
        let Relay {
            listener,
            config,
            connection_count,
        } = self;
        let idle_timeout = config.idle_timeout;
        let mut multiplexer = Multiplexer::new(config.keepalive, connection_count);
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(connections = multiplexer.registry.len(), "relay shutting down");
                    break;
                }
                wake = time::timeout(idle_timeout, multiplexer.wait(&listener)) => {
                    match wake {
                        Err(_) => multiplexer.handle_idle(idle_timeout).await,
                        Ok(Wake::Accepted(result)) => multiplexer.handle_accept(result),
                        Ok(Wake::Reader(Some(event))) => multiplexer.handle_reader_event(event).await,
                        // Unreachable while the multiplexer holds its own sender.
                        Ok(Wake::Reader(None)) => {
                            error!("reader event channel closed");
                            return Err(RelayError::Wait("reader event channel closed"));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<(), RelayError> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

/// What a reader task saw on its socket.
#[derive(Debug)]
enum ReaderEvent {
    Received { id: ConnectionId, payload: Vec<u8> },
    HungUp { id: ConnectionId },
    Failed { id: ConnectionId, error: io::Error },
}

enum Wake {
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Reader(Option<ReaderEvent>),
}

struct Multiplexer {
    registry: Registry<OwnedWriteHalf>,
    events_tx: mpsc::Sender<ReaderEvent>,
    events_rx: mpsc::Receiver<ReaderEvent>,
    keepalive: KeepaliveConfig,
    connection_count: watch::Sender<usize>,
    next_id: u64,
}

impl Multiplexer {
    fn new(keepalive: KeepaliveConfig, connection_count: watch::Sender<usize>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry: Registry::new(),
            events_tx,
            events_rx,
            keepalive,
            connection_count,
            next_id: 1,
        }
    }

    /// Wait for the listener or any reader, whichever is ready first.
    async fn wait(&mut self, listener: &TcpListener) -> Wake {
        select! {
            accepted = listener.accept() => Wake::Accepted(accepted),
            event = self.events_rx.recv() => Wake::Reader(event),
        }
    }

    fn handle_accept(&mut self, result: io::Result<(TcpStream, SocketAddr)>) {
        match result {
            Ok((stream, peer)) => self.admit(stream, peer),
            Err(err) => warn!(error = ?err, "failed to accept connection"),
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(err) = apply_keepalive(&stream, &self.keepalive) {
            warn!(%peer, error = ?err, "failed to enable keepalive");
        }

        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        let (reader, writer) = stream.into_split();
        let reader_task = tokio::spawn(read_loop(id, reader, self.events_tx.clone()));
        let connection = Connection::new(id, peer, writer).with_reader(reader_task.abort_handle());

        if self.registry.add(connection) {
            info!(%peer, connection = %id, "new connection");
            self.publish_count();
        }
    }

    async fn handle_reader_event(&mut self, event: ReaderEvent) {
        match event {
            ReaderEvent::Received { id, payload } => {
                let delivery = self.registry.broadcast(Some(id), &payload).await;
                debug!(
                    connection = %id,
                    bytes = payload.len(),
                    delivered = delivery.delivered,
                    failed = delivery.failed,
                    "relayed"
                );
            }
            ReaderEvent::HungUp { id } => {
                info!(connection = %id, "connection hung up");
                self.evict(id);
            }
            ReaderEvent::Failed { id, error } => {
                warn!(connection = %id, kind = ?error.kind(), ?error, "recv failed");
                self.evict(id);
            }
        }
    }

    async fn handle_idle(&mut self, idle_timeout: Duration) {
        debug!(?idle_timeout, "no activity for a full idle window");
        heartbeat::send_probe(&mut self.registry).await;
    }

    fn evict(&mut self, id: ConnectionId) {
        if let Some(connection) = self.registry.remove(id) {
            debug!(connection = %id, peer = %connection.peer(), "evicted");
            drop(connection);
            self.publish_count();
        }
    }

    fn publish_count(&self) {
        self.connection_count.send_replace(self.registry.len());
    }
}

/// Forward everything read from one client to the control loop until the
/// peer hangs up, the read fails, or the loop goes away.
async fn read_loop(id: ConnectionId, mut reader: OwnedReadHalf, events: mpsc::Sender<ReaderEvent>) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let (event, last) = match reader.read(&mut buf).await {
            Ok(0) => (ReaderEvent::HungUp { id }, true),
            Ok(n) => (
                ReaderEvent::Received {
                    id,
                    payload: buf[..n].to_vec(),
                },
                false,
            ),
            Err(error) => (ReaderEvent::Failed { id, error }, true),
        };

        if events.send(event).await.is_err() || last {
            break;
        }
    }
}
