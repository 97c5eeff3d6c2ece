//! Request/response loop for one accepted connection.
//!
//! The session owns the catalog for its whole lifetime. Each cycle reads one
//! complete request, applies it, persists the catalog if it changed and writes
//! exactly one response string back. The loop ends when the client sends the
//! terminate opcode, or on the first connection or framing failure.
//!
//! ```text
//! AwaitingOpcode ──request──▶ Dispatching ──response──▶ AwaitingOpcode
//!       │
//!       └──terminate / error──▶ Terminated
//! ```

use bytes::{Buf, BytesMut};
use std::fmt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, trace, warn};

use crate::catalog::{Catalog, CatalogError};
use crate::persistence::CatalogStore;
use crate::protocol::{self, ParseError, ParseResult, Request, Response, StringTooLong};

/// Read buffer size
const BUFFER_SIZE: usize = 4 * 1024;

/// Where the session is in its request cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingOpcode,
    Dispatching,
    Terminated,
}

/// Connection failures; each one ends the session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connection I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection closed by client without terminating the session")]
    Closed,
    #[error("Malformed request: {0}")]
    Protocol(#[from] ParseError),
    #[error("Response cannot be framed: {0}")]
    ResponseTooLong(#[from] StringTooLong),
}

/// One client session over a byte stream
pub struct Session<S> {
    stream: S,
    peer: String,
    catalog: Catalog,
    store: CatalogStore,
    buffer: BytesMut,
    state: SessionState,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: impl fmt::Display, catalog: Catalog, store: CatalogStore) -> Self {
        Self {
            stream,
            peer: peer.to_string(),
            catalog,
            store,
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
            state: SessionState::AwaitingOpcode,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[cfg(test)]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Give the catalog back once the session is over.
    pub fn into_catalog(self) -> Catalog {
        self.catalog
    }

    /// Serve requests until the client terminates or the connection fails.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        let result = self.serve_requests().await;
        self.state = SessionState::Terminated;
        result
    }

    async fn serve_requests(&mut self) -> Result<(), SessionError> {
        loop {
            self.state = SessionState::AwaitingOpcode;
            let request = self.next_request().await?;
            trace!(peer = %self.peer, op = request.name(), ?request, "Processing request");

            self.state = SessionState::Dispatching;
            let Some(response) = self.execute(request).await else {
                info!(peer = %self.peer, "Client ended the session");
                return Ok(());
            };

            let frame = protocol::encode_string(&response)?;
            self.stream.write_all(&frame).await?;
            self.stream.flush().await?;
        }
    }

    /// Read until one whole request is buffered.
    async fn next_request(&mut self) -> Result<Request, SessionError> {
        loop {
            match protocol::parse(&self.buffer) {
                ParseResult::Complete(request, consumed) => {
                    self.buffer.advance(consumed);
                    return Ok(request);
                }
                ParseResult::Incomplete => {
                    let n = self.stream.read_buf(&mut self.buffer).await?;
                    if n == 0 {
                        return Err(SessionError::Closed);
                    }
                }
                ParseResult::Error(e) => return Err(e.into()),
            }
        }
    }

    /// Apply a request to the catalog and build its response text.
    ///
    /// Returns `None` for the terminate request, which gets no response.
    pub async fn execute(&mut self, request: Request) -> Option<String> {
        let response = match request {
            Request::List => {
                info!(peer = %self.peer, "Listing requested");
                Response::listing(&self.catalog)
            }

            Request::Rent { index } => {
                info!(peer = %self.peer, index, "Rent requested");
                match self.catalog.rent(index).map(|book| book.copies) {
                    Ok(copies) => {
                        debug!(index, copies, "Book rented");
                        self.persist().await;
                        Response::rented().to_string()
                    }
                    Err(CatalogError::InvalidIndex(_)) => Response::invalid_index().to_string(),
                    Err(_) => Response::unavailable().to_string(),
                }
            }

            Request::Return { index } => {
                info!(peer = %self.peer, index, "Return requested");
                match self.catalog.give_back(index).map(|book| book.copies) {
                    Ok(copies) => {
                        debug!(index, copies, "Book returned");
                        self.persist().await;
                        Response::returned().to_string()
                    }
                    Err(CatalogError::CountOverflow(_)) => {
                        warn!(peer = %self.peer, index, "Copy count at maximum, return refused");
                        Response::unknown().to_string()
                    }
                    Err(_) => Response::invalid_index().to_string(),
                }
            }

            Request::Register {
                genre,
                title,
                copies,
                author,
            } => {
                info!(peer = %self.peer, %title, "Registration requested");
                let index = self.catalog.register(author, title, genre, i64::from(copies));
                debug!(index, copies, "Book registered");
                self.persist().await;
                Response::registered().to_string()
            }

            Request::Terminate => return None,

            Request::Unknown(opcode) => {
                debug!(peer = %self.peer, opcode, "Unknown opcode");
                Response::unknown().to_string()
            }
        };

        Some(response)
    }

    /// Write-through after a mutation. A failed write is logged and the
    /// in-memory change stands.
    async fn persist(&self) {
        if let Err(e) = self.store.persist(&self.catalog).await {
            error!(peer = %self.peer, error = %e, "Failed to persist catalog");
        }
    }
}
