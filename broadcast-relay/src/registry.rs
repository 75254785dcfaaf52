//! The set of open client connections and the fan-out over them.
//!
//! The registry is owned by the relay's control task and is the only place
//! client sockets are written to. Eviction happens through [`Registry::remove`]
//! alone; a failed send never removes anyone, so a fan-out pass can never
//! invalidate the membership it is walking.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::AbortHandle;
use tracing::warn;

/// Relay-assigned handle for one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Write side of one client plus the reader task feeding its input to the
/// relay. Dropping it closes the socket and stops the reader.
pub struct Connection<W> {
    id: ConnectionId,
    peer: SocketAddr,
    writer: W,
    reader: Option<AbortHandle>,
}

impl<W> Connection<W> {
    pub fn new(id: ConnectionId, peer: SocketAddr, writer: W) -> Self {
        Self {
            id,
            peer,
            writer,
            reader: None,
        }
    }

    /// Tie the lifetime of the reader task to this connection.
    pub fn with_reader(mut self, reader: AbortHandle) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl<W> Drop for Connection<W> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

pub struct Registry<W> {
    connections: HashMap<ConnectionId, Connection<W>>,
}

impl<W> Default for Registry<W> {
    fn default() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }
}

impl<W> Registry<W> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a connection. Returns `false`, dropping `connection`, if its id
    /// is already registered.
    pub fn add(&mut self, connection: Connection<W>) -> bool {
        use std::collections::hash_map::Entry;

        match self.connections.entry(connection.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(connection);
                true
            }
        }
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection<W>> {
        self.connections.remove(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn peer(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&id).map(Connection::peer)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Current membership, sorted by id so passes are deterministic.
    pub fn snapshot(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl<W> Registry<W>
where
    W: AsyncWrite + Unpin,
{
    /// Write `payload` to every member except `sender`.
    ///
    /// Recipients are fixed by a snapshot taken before the first write. A
    /// failed write is logged and counted; the recipient stays registered and
    /// the pass carries on.
    pub async fn broadcast(&mut self, sender: Option<ConnectionId>, payload: &[u8]) -> Delivery {
        let mut delivery = Delivery::default();

        for id in self.snapshot() {
            if Some(id) == sender {
                continue;
            }
            let Some(connection) = self.connections.get_mut(&id) else {
                continue;
            };

            match connection.writer.write_all(payload).await {
                Ok(()) => delivery.delivered += 1,
                Err(error) => {
                    warn!(connection = %id, peer = %connection.peer, ?error, "send failed");
                    delivery.failed += 1;
                }
            }
        }

        delivery
    }
}
