//! Chunk-by-chunk relay of streamed provider responses

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How a relay ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// Upstream finished and every chunk was delivered
    Completed,
    /// The client receiver went away; upstream reading stopped
    ClientGone,
    UpstreamError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub chunks: u64,
    pub bytes: u64,
    pub end: RelayEnd,
}

/// Forward upstream chunks to the client as they arrive
///
/// The bounded channel applies backpressure to the upstream read. A closed
/// receiver is noticed on the next send, at which point the upstream stream
/// is dropped instead of being drained into memory.
pub async fn relay_stream<S, E>(upstream: S, client: mpsc::Sender<Bytes>) -> RelayReport
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    futures_util::pin_mut!(upstream);
    let mut chunks = 0u64;
    let mut bytes = 0u64;

    while let Some(item) = upstream.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(error) => {
                warn!(error = %error, chunks, "Upstream stream failed mid-response");
                return RelayReport {
                    chunks,
                    bytes,
                    end: RelayEnd::UpstreamError,
                };
            }
        };

        let len = chunk.len() as u64;
        if client.send(chunk).await.is_err() {
            debug!(chunks, bytes, "Client disconnected, stopping relay");
            return RelayReport {
                chunks,
                bytes,
                end: RelayEnd::ClientGone,
            };
        }
        chunks += 1;
        bytes += len;
    }

    RelayReport {
        chunks,
        bytes,
        end: RelayEnd::Completed,
    }
}
