//! biblioteca-server: a single-client library inventory server
//!
//! Holds an ordered catalog of books in memory and serves one connected
//! client over a binary request protocol:
//! - List the catalog
//! - Rent and return copies by catalog index
//! - Register new books
//!
//! The catalog is loaded from a JSON file at startup and the whole file is
//! rewritten after every change.

mod catalog;
mod config;
mod persistence;
mod protocol;
mod server;
mod session;

#[cfg(test)]
mod test_support;

use config::Config;
use persistence::CatalogStore;
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen_addr(),
        data_file = %config.data_file.display(),
        "Starting biblioteca server"
    );

    // A catalog that cannot be loaded is fatal before any client is accepted
    let store = CatalogStore::new(&config.data_file);
    let catalog = store.load()?;
    info!(books = catalog.len(), "Catalog loaded");

    let server = Server::bind(config.listen_addr(), catalog, store).await?;
    server.serve().await?;

    info!("Server stopped");
    Ok(())
}
