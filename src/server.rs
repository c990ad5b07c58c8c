use crate::session::Session;
use crate::{fingerprint, Packet, Registry, Result, Router, ServerConfig};
use slog::{debug, error, info, warn, Logger};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task;

/// Accepts connections and runs one task per session.
pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    router: Arc<Router>,
    logger: Logger,
}

impl Server {
    pub async fn bind(config: &ServerConfig, logger: &Logger) -> Result<Self> {
        crate::init()?;
        let listener = TcpListener::bind(config.address).await?;
        let registry = Arc::new(Registry::new(config.max_sessions, logger));
        let router = Arc::new(Router::new(registry.clone(), logger));
        info!(logger, "listening";
            "address" => %listener.local_addr()?, "max_sessions" => registry.capacity());

        Ok(Self {
            listener,
            registry,
            router,
            logger: logger.clone(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            self.accept(stream, peer).await;
        }
    }

    async fn accept(&self, stream: TcpStream, peer: SocketAddr) {
        // Over capacity: hang up without a word.
        if self.registry.is_full().await {
            warn!(self.logger, "rejecting connection, server full"; "peer" => %peer);
            return;
        }

        let session = Arc::new(Session::new(
            self.registry.allocate_id(),
            stream,
            &self.logger,
        ));
        if let Err(error) = self.registry.insert(session.clone()).await {
            warn!(self.logger, "rejecting connection"; "peer" => %peer, "error" => %error);
            session.close().await;
            return;
        }
        info!(session.logger(), "connection accepted";
            "peer" => %peer, "key" => fingerprint(session.public_key()));

        // Onboarding finishes before the next connection is accepted, so
        // every roster a newcomer sees is complete and free of repeats.
        if let Err(error) = onboard(&self.registry, &session).await {
            warn!(session.logger(), "onboarding failed"; "error" => %error);
            teardown(&self.registry, &session).await;
            return;
        }

        spawn_and_log_error(
            serve(self.router.clone(), session.clone()),
            session.logger().clone(),
        );
    }
}

fn spawn_and_log_error<F>(fut: F, logger: Logger) -> task::JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    task::spawn(async move {
        if let Err(e) = fut.await {
            error!(logger, "session task failed"; "error" => %e)
        }
    })
}

/// Receive loop for an onboarded session, ending in teardown.
async fn serve(router: Arc<Router>, session: Arc<Session>) -> Result<()> {
    while let Some(packet) = session.receive().await {
        let kind = packet.kind();
        if let Err(error) = router.dispatch(&session, packet).await {
            warn!(session.logger(), "packet dropped"; "kind" => kind, "error" => %error);
        }
    }

    teardown(router.registry(), &session).await;
    Ok(())
}

/// Announce the newcomer, give it the server's key, then tell it who else is
/// here.
async fn onboard(registry: &Registry, session: &Session) -> Result<()> {
    registry
        .broadcast(&Packet::ClientJoin {
            name: session.name().await,
        })
        .await;

    session
        .send(Packet::ServerKey {
            key: *session.public_key(),
        })
        .await?;

    for other in registry.sessions().await {
        if other.id() != session.id() {
            session
                .send(Packet::ClientJoin {
                    name: other.name().await,
                })
                .await?;
        }
    }
    Ok(())
}

async fn teardown(registry: &Registry, session: &Session) {
    registry.remove(session.id()).await;
    session.close().await;

    let name = session.name().await;
    info!(session.logger(), "session closed"; "name" => &name);
    registry.broadcast(&Packet::ClientLeave { name }).await;
    if registry.is_empty().await {
        debug!(session.logger(), "no sessions left");
    }
}
