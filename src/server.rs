//! TCP acceptor for the library server.
//!
//! Binds the configured address, accepts exactly one client, runs its session
//! to completion and then releases both the connection and the listener. A
//! second client is never accepted.

#[cfg(test)]
use std::net::SocketAddr;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::persistence::CatalogStore;
use crate::session::Session;

/// Server instance
pub struct Server {
    listener: TcpListener,
    catalog: Catalog,
    store: CatalogStore,
}

impl Server {
    /// Bind the listening socket. The catalog is handed to the session once a
    /// client connects.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        catalog: Catalog,
        store: CatalogStore,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(address = %listener.local_addr()?, "Server listening");

        Ok(Server {
            listener,
            catalog,
            store,
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Wait for one client and serve it until its session ends.
    ///
    /// Session failures are logged, not returned. Returns the catalog as the
    /// session left it.
    pub async fn serve(self) -> std::io::Result<Catalog> {
        let Server {
            listener,
            catalog,
            store,
        } = self;

        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                return Err(e);
            }
        };
        info!(peer = %peer, "Client connected");

        let mut session = Session::new(stream, peer.ip(), catalog, store);
        if let Err(e) = session.run().await {
            warn!(peer = %peer, error = %e, "Session ended with connection error");
        }

        info!(peer = %peer, "Shutdown requested, closing connection and listener");
        let catalog = session.into_catalog();
        drop(listener);

        Ok(catalog)
    }
}
