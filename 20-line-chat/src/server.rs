use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    connection::Connection,
    dispatch::{Dispatcher, Outcome, Session},
    registry::{ConnectionId, Registry},
    store::CredentialStore,
};

/// Outbound lines buffered per connection before it is evicted as too slow.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

pub struct Server {
    listener: TcpListener,
    store: CredentialStore,
    registry: Registry,
    queue_capacity: usize,
}

impl Server {
    pub fn new(listener: TcpListener, store: CredentialStore) -> Self {
        Self {
            listener,
            store,
            registry: Registry::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub async fn bind<A>(addr: A, store: CredentialStore) -> Result<Self>
    where
        A: ToSocketAddrs + std::fmt::Display,
    {
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self::new(listener, store))
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to the live connection set, shared with every handler.
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            store,
            registry,
            queue_capacity,
        } = self;
        let state = Arc::new(ServerState {
            dispatcher: Dispatcher::new(store, registry.clone()),
            registry,
            next_id: AtomicU64::new(1),
            queue_capacity,
        });
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(connections = state.registry.len(), "server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

struct ServerState {
    dispatcher: Dispatcher,
    registry: Registry,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl ServerState {
    fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<ServerState>,
) {
    match result {
        Ok((stream, peer)) => spawn_client_handler(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_client_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<ServerState>) {
    let state = Arc::clone(state);
    let id = state.next_id();
    let connection = Connection::new(stream, id, state.registry.clone(), state.queue_capacity);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(connection, state).await {
            warn!(connection = id, peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

async fn handle_connection(mut connection: Connection, state: Arc<ServerState>) -> Result<()> {
    let id = connection.id();
    let peer = connection.peer();
    info!(connection = id, ?peer, "client connected");

    let mut session = Session::new(id);
    let result = run_client_session(&state.dispatcher, &mut connection, &mut session).await;
    connection.close().await;

    info!(connection = id, ?peer, login = session.login(), "client disconnected");
    result
}

async fn run_client_session(
    dispatcher: &Dispatcher,
    connection: &mut Connection,
    session: &mut Session,
) -> Result<()> {
    loop {
        let Some(line) = connection
            .read_line()
            .await
            .context("failed to read from client")?
        else {
            debug!(connection = connection.id(), "client closed the stream");
            break;
        };

        match dispatcher.dispatch_line(session, &line).await {
            Outcome::Reply(text) => connection.write_line(text).await?,
            Outcome::Broadcast { recipients } => {
                debug!(connection = connection.id(), recipients, "broadcast chat line");
            }
            Outcome::Disconnect(farewell) => {
                connection.write_line(farewell).await?;
                break;
            }
        }
    }

    Ok(())
}
