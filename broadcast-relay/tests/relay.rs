use std::{net::SocketAddr, time::Duration};

use anyhow::Result;
use broadcast_relay::{
    Relay, config::RelayConfig, discovery::LoggingRegistrar, heartbeat::PROBE,
};
use socket2::SockRef;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::{oneshot, watch},
    task::JoinHandle,
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(3);
const QUIET: Duration = Duration::from_millis(200);

struct RunningRelay {
    addr: SocketAddr,
    connections: watch::Receiver<usize>,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<()>,
}

impl RunningRelay {
    async fn spawn(idle_timeout: Duration) -> Result<Self> {
        let config = RelayConfig::default().port(0).idle_timeout(idle_timeout);
        let relay = Relay::start(config, &LoggingRegistrar)?;
        let port = relay.local_addr()?.port();
        let connections = relay.connection_count();

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            let _ = relay.run_until(shutdown).await;
        });

        Ok(Self {
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            connections,
            shutdown,
            server,
        })
    }

    async fn connect(&self) -> Result<TcpStream> {
        Ok(TcpStream::connect(self.addr).await?)
    }

    /// Connect `n` clients and wait until the relay has admitted all of them.
    async fn connect_all(&mut self, n: usize) -> Result<Vec<TcpStream>> {
        let mut clients = Vec::with_capacity(n);
        for _ in 0..n {
            clients.push(self.connect().await?);
        }
        self.wait_for_connections(n).await?;
        Ok(clients)
    }

    async fn wait_for_connections(&mut self, n: usize) -> Result<()> {
        timeout(WAIT, self.connections.wait_for(|count| *count == n)).await??;
        Ok(())
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.server.await;
    }
}

async fn read_exactly(stream: &mut TcpStream, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    timeout(WAIT, stream.read_exact(&mut buf)).await??;
    Ok(buf)
}

async fn assert_silent(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    match timeout(QUIET, stream.read(&mut buf)).await {
        Err(_) => {}
        Ok(Ok(n)) => panic!("expected silence, got {:?}", &buf[..n]),
        Ok(Err(err)) => panic!("expected silence, got error {err}"),
    }
}

#[tokio::test]
async fn three_client_scenario() -> Result<()> {
    let mut relay = RunningRelay::spawn(Duration::from_secs(60)).await?;
    let mut clients = relay.connect_all(3).await?;
    let mut c = clients.pop().unwrap();
    let mut b = clients.pop().unwrap();
    let mut a = clients.pop().unwrap();

    a.write_all(b"hi").await?;
    assert_eq!(read_exactly(&mut b, 2).await?, b"hi");
    assert_eq!(read_exactly(&mut c, 2).await?, b"hi");
    assert_silent(&mut a).await;

    c.shutdown().await?;
    drop(c);
    relay.wait_for_connections(2).await?;

    b.write_all(b"yo").await?;
    assert_eq!(read_exactly(&mut a, 2).await?, b"yo");
    assert_silent(&mut b).await;

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn sender_order_is_preserved() -> Result<()> {
    let mut relay = RunningRelay::spawn(Duration::from_secs(60)).await?;
    let mut clients = relay.connect_all(2).await?;
    let mut b = clients.pop().unwrap();
    let mut a = clients.pop().unwrap();

    let mut expected = Vec::new();
    for i in 0..50 {
        let line = format!("line {i}\n");
        a.write_all(line.as_bytes()).await?;
        expected.extend_from_slice(line.as_bytes());
    }

    assert_eq!(read_exactly(&mut b, expected.len()).await?, expected);
    assert_silent(&mut a).await;

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn payload_larger_than_one_read_arrives_intact() -> Result<()> {
    let mut relay = RunningRelay::spawn(Duration::from_secs(60)).await?;
    let mut clients = relay.connect_all(2).await?;
    let mut b = clients.pop().unwrap();
    let mut a = clients.pop().unwrap();

    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    a.write_all(&payload).await?;

    assert_eq!(read_exactly(&mut b, payload.len()).await?, payload);

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn reset_peer_is_evicted_without_disturbing_others() -> Result<()> {
    let mut relay = RunningRelay::spawn(Duration::from_secs(60)).await?;
    let mut clients = relay.connect_all(3).await?;
    let c = clients.pop().unwrap();
    let mut b = clients.pop().unwrap();
    let mut a = clients.pop().unwrap();

    // Zero linger turns the close into a reset, so the relay sees a read error
    // rather than an orderly hang-up.
    SockRef::from(&c).set_linger(Some(Duration::ZERO))?;
    drop(c);
    relay.wait_for_connections(2).await?;

    a.write_all(b"still here").await?;
    assert_eq!(read_exactly(&mut b, 10).await?, b"still here");

    b.write_all(b"me too").await?;
    assert_eq!(read_exactly(&mut a, 6).await?, b"me too");

    // The listener survives the eviction and keeps admitting newcomers.
    let mut d = relay.connect().await?;
    relay.wait_for_connections(3).await?;

    a.write_all(b"welcome").await?;
    assert_eq!(read_exactly(&mut d, 7).await?, b"welcome");
    assert_eq!(read_exactly(&mut b, 7).await?, b"welcome");

    d.write_all(b"thanks").await?;
    assert_eq!(read_exactly(&mut a, 6).await?, b"thanks");
    assert_eq!(read_exactly(&mut b, 6).await?, b"thanks");
    assert_silent(&mut d).await;

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn heartbeat_after_idle_window() -> Result<()> {
    let mut relay = RunningRelay::spawn(Duration::from_secs(1)).await?;
    let mut clients = relay.connect_all(2).await?;

    for client in &mut clients {
        assert_eq!(read_exactly(client, PROBE.len()).await?, PROBE);
    }
    // One probe per window: nothing more until the next window has passed.
    for client in &mut clients {
        assert_silent(client).await;
    }

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn heartbeat_goes_only_to_current_connections() -> Result<()> {
    let mut relay = RunningRelay::spawn(Duration::from_millis(400)).await?;
    let mut clients = relay.connect_all(3).await?;
    let gone = clients.pop().unwrap();
    drop(gone);
    relay.wait_for_connections(2).await?;

    for client in &mut clients {
        assert_eq!(read_exactly(client, PROBE.len()).await?, PROBE);
    }

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn traffic_holds_off_the_heartbeat() -> Result<()> {
    let mut relay = RunningRelay::spawn(Duration::from_millis(500)).await?;
    let mut clients = relay.connect_all(2).await?;
    let mut b = clients.pop().unwrap();
    let mut a = clients.pop().unwrap();

    let mut expected = Vec::new();
    for _ in 0..8 {
        a.write_all(b"ping").await?;
        expected.extend_from_slice(b"ping");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Everything b saw while a kept talking is a's traffic, never the probe.
    assert_eq!(read_exactly(&mut b, expected.len()).await?, expected);

    // Once a goes quiet the probe follows.
    assert_eq!(read_exactly(&mut a, PROBE.len()).await?, PROBE);
    assert_eq!(read_exactly(&mut b, PROBE.len()).await?, PROBE);

    relay.stop().await;
    Ok(())
}
