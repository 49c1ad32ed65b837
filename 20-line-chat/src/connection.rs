use std::io;
use std::net::SocketAddr;

use tokio::{
    io::{AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpStream, tcp::OwnedReadHalf},
    select,
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::line::{read_line, write_line};
use crate::registry::{ConnectionId, Registry};

/// One accepted client socket.
///
/// The read half stays with the handler that owns the `Connection`. The write
/// half belongs to a dedicated writer task fed by a bounded queue; direct
/// replies and broadcasts both go through that queue, so lines from different
/// producers are never interleaved on the wire.
///
/// If the registry evicts the connection because its queue filled up, the
/// next (or pending) `read_line` fails with `ConnectionAborted`.
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    reader: BufReader<OwnedReadHalf>,
    outbound: Option<mpsc::Sender<String>>,
    writer: Option<JoinHandle<()>>,
    eviction: CancellationToken,
    registry: Registry,
}

impl Connection {
    /// Splits `stream`, starts its writer task and registers it.
    pub fn new(
        stream: TcpStream,
        id: ConnectionId,
        registry: Registry,
        queue_capacity: usize,
    ) -> Self {
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let (outbound, inbox) = mpsc::channel(queue_capacity.max(1));
        let writer = tokio::spawn(run_writer(id, writer, inbox));
        let eviction = CancellationToken::new();
        registry.add(id, outbound.clone(), eviction.clone());

        Self {
            id,
            peer,
            reader: BufReader::new(reader),
            outbound: Some(outbound),
            writer: Some(writer),
            eviction,
            registry,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        select! {
            line = read_line(&mut self.reader) => line,
            _ = self.eviction.cancelled() => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "evicted after outbound queue filled up",
            )),
        }
    }

    pub fn is_evicted(&self) -> bool {
        self.eviction.is_cancelled()
    }

    /// Queues one line for this connection, waiting for queue space.
    pub async fn write_line(&self, text: impl Into<String>) -> io::Result<()> {
        let Some(outbound) = &self.outbound else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already closed",
            ));
        };
        outbound
            .send(text.into())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer task stopped"))
    }

    /// Leaves the registry, lets the writer drain what is already queued and
    /// shuts the socket down. Safe to call more than once.
    pub async fn close(&mut self) {
        self.registry.remove(self.id);
        self.outbound = None;

        if let Some(writer) = self.writer.take() {
            if let Err(err) = writer.await {
                warn!(connection = self.id, error = ?err, "writer task failed");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_none()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The writer task is detached here and finishes once the queue drains.
        self.registry.remove(self.id);
    }
}

async fn run_writer<W>(id: ConnectionId, mut writer: W, mut inbox: mpsc::Receiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = inbox.recv().await {
        if let Err(err) = write_line(&mut writer, &line).await {
            debug!(connection = id, error = ?err, "failed to deliver line to client");
            return;
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!(connection = id, error = ?err, "failed to shut down client writer cleanly");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    async fn connected_pair(registry: &Registry) -> (Connection, BufReader<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let client = TcpStream::connect(addr).await.expect("connect");
        let (server, _) = listener.accept().await.expect("accept");
        (
            Connection::new(server, 1, registry.clone(), 8),
            BufReader::new(client),
        )
    }

    async fn next_line(client: &mut BufReader<TcpStream>) -> String {
        let mut line = String::new();
        client.read_line(&mut line).await.expect("client read");
        line
    }

    #[tokio::test]
    async fn new_connection_is_registered() {
        let registry = Registry::new();
        let (connection, _client) = connected_pair(&registry).await;

        assert!(registry.contains(connection.id()));
        assert!(connection.peer().is_some());
    }

    #[tokio::test]
    async fn replies_and_broadcasts_arrive_as_whole_lines() {
        let registry = Registry::new();
        let (connection, mut client) = connected_pair(&registry).await;

        connection.write_line("Logged in").await.expect("reply");
        registry.broadcast("alice: hello");

        assert_eq!(next_line(&mut client).await, "Logged in\r\n");
        assert_eq!(next_line(&mut client).await, "alice: hello\r\n");
    }

    #[tokio::test]
    async fn close_flushes_queue_then_disconnects() {
        let registry = Registry::new();
        let (mut connection, mut client) = connected_pair(&registry).await;

        connection.write_line("Bye").await.expect("farewell");
        connection.close().await;

        assert!(registry.is_empty());
        assert_eq!(next_line(&mut client).await, "Bye\r\n");
        assert_eq!(next_line(&mut client).await, "");
    }

    #[tokio::test]
    async fn close_twice_is_harmless() {
        let registry = Registry::new();
        let (mut connection, _client) = connected_pair(&registry).await;

        connection.close().await;
        connection.close().await;

        assert!(connection.is_closed());
        assert!(connection.write_line("late").await.is_err());
    }

    #[tokio::test]
    async fn dropping_removes_from_registry() {
        let registry = Registry::new();
        let (connection, _client) = connected_pair(&registry).await;

        drop(connection);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn lagging_connection_is_evicted_and_disconnected() {
        let registry = Registry::new();
        let (mut connection, mut client) = connected_pair(&registry).await;

        // Nothing yields between these, so the writer cannot drain the queue.
        let mut delivered = 0;
        for i in 0..16 {
            delivered += registry.broadcast(&format!("line {i}"));
        }

        assert!(delivered < 16);
        assert!(connection.is_evicted());
        assert!(!registry.contains(connection.id()));

        let err = connection
            .read_line()
            .await
            .expect_err("evicted connection stops reading");
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);

        connection.close().await;
        let mut received = 0;
        while !next_line(&mut client).await.is_empty() {
            received += 1;
        }
        assert_eq!(received, delivered);
    }

    #[tokio::test]
    async fn reads_client_lines() {
        let registry = Registry::new();
        let (mut connection, mut client) = connected_pair(&registry).await;

        client
            .get_mut()
            .write_all(b"REGISTER alice secret\r\n")
            .await
            .expect("client write");
        client.get_mut().shutdown().await.expect("client shutdown");

        assert_eq!(
            connection.read_line().await.expect("read"),
            Some("REGISTER alice secret".to_string())
        );
        assert_eq!(connection.read_line().await.expect("read eof"), None);
    }
}
