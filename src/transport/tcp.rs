//! TCP transport.
//!
//! Binds a [`ConnectionActor`] to any byte stream: a reader loop on the I/O
//! actor feeds [`ConnectionActor::receive`], and a writer task drains the
//! connection's outbound queue through [`PacketCodec`]. The reader stops
//! when the connection's shutdown token is cancelled, the peer closes the
//! stream, or a frame fails to decode.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ClientConfig, SessionConfig};
use crate::core::codec::PacketCodec;
use crate::core::packet::Packet;
use crate::error::{constants, Result, SessionError};
use crate::events::EventBus;
use crate::protocol::connection::{ConnectionActor, ConnectionBuilder};
use crate::protocol::server::SessionRegistry;
use crate::runtime::affinity::{self, Actor};
use crate::runtime::executor::Executor;
use crate::world::WorldStore;

/// Drive `conn` over `stream` until the connection closes.
pub async fn attach<T>(
    conn: Arc<ConnectionActor>,
    stream: T,
    mut outbound: mpsc::UnboundedReceiver<Packet>,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let codec = PacketCodec::new(conn.config().transport.max_packet_size);
    let (mut sink, mut frames) = Framed::new(stream, codec).split();

    let peer = conn.display_name().to_string();
    let writer = tokio::spawn(affinity::scope(Actor::Io, async move {
        while let Some(packet) = outbound.recv().await {
            if let Err(e) = sink.send(packet).await {
                warn!(peer = %peer, error = %e, "Write failed");
                break;
            }
        }
        let _ = sink.close().await;
    }));

    let shutdown = conn.shutdown_token();
    let result = affinity::scope(Actor::Io, async {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                frame = frames.next() => match frame {
                    Some(Ok(packet)) => {
                        // An error here means the connection already tore down
                        if conn.receive(packet).is_err() {
                            break Ok(());
                        }
                    }
                    Some(Err(e)) => {
                        conn.fatal(&e);
                        break Err(e);
                    }
                    None => {
                        conn.connection_lost();
                        break Ok(());
                    }
                }
            }
        }
    })
    .await;

    // Lets the queued disconnect notice reach the peer
    if let Err(e) = writer.await {
        debug!(peer = %conn.display_name(), error = %e, "Writer task ended abnormally");
    }
    result
}

/// Connect to a server and start driving the connection.
#[instrument(skip(config, builder), fields(address = %config.address))]
pub async fn connect(
    config: &ClientConfig,
    builder: ConnectionBuilder,
) -> Result<(Arc<ConnectionActor>, JoinHandle<Result<()>>)> {
    let stream = tokio::time::timeout(config.connection_timeout, TcpStream::connect(&config.address))
        .await
        .map_err(|_| {
            SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Connection attempt timed out",
            ))
        })??;
    stream.set_nodelay(true)?;

    let (conn, outbound) = builder.display_name(config.address.clone()).build()?;
    info!("Connected");
    let task = tokio::spawn(attach(conn.clone(), stream, outbound));
    Ok((conn, task))
}

/// Everything a server needs to accept sessions.
#[derive(Clone)]
pub struct ServerContext {
    pub config: Arc<SessionConfig>,
    pub world: Arc<dyn WorldStore>,
    pub executor: Arc<dyn Executor>,
    pub registry: Arc<SessionRegistry>,
    pub bus: EventBus,
}

impl ServerContext {
    pub fn new(
        config: Arc<SessionConfig>,
        world: Arc<dyn WorldStore>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.server.max_players));
        Self {
            config,
            world,
            executor,
            registry,
            bus: crate::events::global().clone(),
        }
    }

    fn builder(&self, peer: String) -> ConnectionBuilder {
        ConnectionBuilder::server(self.config.clone())
            .display_name(peer)
            .executor(self.executor.clone())
            .world(self.world.clone())
            .registry(self.registry.clone())
            .bus(self.bus.clone())
    }
}

/// Bind `server.address` and serve until `shutdown_rx` fires.
pub async fn listen(context: ServerContext, shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
    let listener = TcpListener::bind(&context.config.server.address).await?;
    serve(listener, context, shutdown_rx).await
}

/// Accept sessions on `listener` until `shutdown_rx` fires, then close every
/// session. Each closed session saves the world as it ends.
#[instrument(skip_all, fields(address = ?listener.local_addr().ok()))]
pub async fn serve(
    listener: TcpListener,
    context: ServerContext,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    info!("Listening");
    let active = Arc::new(AtomicUsize::new(0));

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                let closed = context.registry.dispose_all(constants::REASON_SERVER_SHUTDOWN);
                info!(sessions = closed, "Shutting down server. Waiting for connections to close...");
                drain(&active, context.config.server.shutdown_timeout).await;
                crate::utils::metrics::global_metrics().log_metrics();
                return Ok(());
            }

            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                        continue;
                    }
                };
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Could not disable Nagle");
                }

                let (conn, outbound) = match context.builder(addr.to_string()).build() {
                    Ok(built) => built,
                    Err(e) => {
                        error!(peer = %addr, error = %e, "Could not create connection");
                        continue;
                    }
                };

                active.fetch_add(1, Ordering::AcqRel);
                let active = active.clone();
                tokio::spawn(async move {
                    if let Err(e) = attach(conn, stream, outbound).await {
                        debug!(peer = %addr, error = %e, "Connection ended with error");
                    }
                    active.fetch_sub(1, Ordering::AcqRel);
                });
            }
        }
    }
}

async fn drain(active: &AtomicUsize, limit: Duration) {
    let timeout = tokio::time::sleep(limit);
    tokio::pin!(timeout);

    loop {
        let connections = active.load(Ordering::Acquire);
        if connections == 0 {
            info!("All connections closed, shutting down");
            return;
        }
        tokio::select! {
            _ = &mut timeout => {
                warn!(connections, "Shutdown timeout reached, forcing exit");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
    }
}
