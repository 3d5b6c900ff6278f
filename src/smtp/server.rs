use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};

use super::state::SessionState;
use super::state_machine::StateMachine;

/// Receives every session that ended with `QUIT`.
pub type Consumer = Arc<dyn Fn(SessionState) -> Result<()> + Send + Sync>;

/// SMTP server
///
/// Accepts connections and runs one session task per client. Finished
/// sessions are handed to the consumer.
pub struct Server {
    listener: TcpListener,
    hostname: Arc<str>,
    consumer: Consumer,
}

impl Server {
    /// Bind a listener on `addr`.
    pub async fn bind<F>(addr: SocketAddr, hostname: impl AsRef<str>, consumer: F) -> Result<Self>
    where
        F: Fn(SessionState) -> Result<()> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;

        Ok(Self {
            listener,
            hostname: hostname.as_ref().into(),
            consumer: Arc::new(consumer),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop
    ///
    /// Only returns when accepting fails.
    pub async fn serve(self) -> Result<()> {
        tracing::info!("Listening on {}", self.local_addr()?);

        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .context("failed to accept connection")?;

            let hostname = self.hostname.clone();
            let consumer = self.consumer.clone();
            tokio::spawn(async move {
                handle(stream, peer, &hostname, consumer).await;
            });
        }
    }
}

async fn handle(stream: TcpStream, peer: SocketAddr, hostname: &str, consumer: Consumer) {
    tracing::info!("Connection from {}", peer);

    let mut sm = StateMachine::new(hostname, stream);
    if let Err(e) = sm.run().await {
        tracing::warn!("Session with {} ended without QUIT: {:#}", peer, e);
        return;
    }

    tracing::info!("Session with {} closed", peer);
    if let Err(e) = consumer(sm.into_state()) {
        tracing::warn!("Failed to consume session from {}: {:#}", peer, e);
    }
}
