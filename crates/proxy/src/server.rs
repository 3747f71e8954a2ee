//! HTTP/1 listener with graceful shutdown

use crate::error::Result;
use crate::handler::ProxyHandler;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Create a shutdown channel pair
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

// Resolves once the flag is set or the sender is gone
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

pub struct ProxyServer {
    listener: TcpListener,
    handler: Arc<ProxyHandler>,
    grace_period: Duration,
    header_read_timeout: Duration,
}

impl ProxyServer {
    pub async fn bind(address: &str, handler: Arc<ProxyHandler>) -> Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self {
            listener,
            handler,
            grace_period: Duration::from_secs(30),
            header_read_timeout: Duration::from_secs(30),
        })
    }

    /// How long in-flight connections may run after shutdown is requested
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Close connections that don't finish sending request headers in time
    pub fn with_header_read_timeout(mut self, timeout: Duration) -> Self {
        self.header_read_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires, then drain in-flight
    /// connections for up to the grace period.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let graceful = GracefulShutdown::new();
        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .header_read_timeout(self.header_read_timeout);

        let stop = wait_for_shutdown(&mut shutdown);
        tokio::pin!(stop);

        info!(address = %self.local_addr()?, "Proxy listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            continue;
                        }
                    };

                    let handler = Arc::clone(&self.handler);
                    let service = service_fn(move |req: Request<Incoming>| {
                        let handler = Arc::clone(&handler);
                        async move { Ok::<_, Infallible>(handler.handle(req).await) }
                    });

                    let conn = builder.serve_connection(TokioIo::new(stream), service);
                    let conn = graceful.watch(conn);

                    tokio::spawn(async move {
                        if let Err(e) = conn.await {
                            debug!(peer = %peer, error = %e, "Connection error");
                        }
                    });
                }
                _ = &mut stop => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
            }
        }

        drop(self.listener);

        match tokio::time::timeout(self.grace_period, graceful.shutdown()).await {
            Ok(()) => info!("All connections drained"),
            Err(_) => warn!(
                grace_period = ?self.grace_period,
                "Grace period expired with active connections"
            ),
        }

        Ok(())
    }
}
