//! Collapses identical in-flight requests into a single upstream call
//!
//! The first caller for a [`Fingerprint`] becomes the leader and performs the
//! work; every later caller with the same fingerprint waits for the leader's
//! outcome and receives a clone of it, failures included.

use crate::domain::{ApiKey, ModelName, ProviderName};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

/// SHA-256 identity of a request: api key, model and a digest of the content
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn compute(api_key: &ApiKey, model: &ModelName, content: &[u8]) -> Self {
        let key: &str = api_key.as_ref();
        let model: &str = model.as_ref();

        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(Sha256::digest(content));
        Self(hasher.finalize().into())
    }

    /// Narrow the fingerprint to one upstream route
    ///
    /// Requests only collapse when they would try the same providers in the
    /// same order, so a follower is never served by a provider its own route
    /// excludes.
    pub fn scoped_to<'a>(self, providers: impl IntoIterator<Item = &'a ProviderName>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(self.0);
        for provider in providers {
            let name: &str = provider.as_ref();
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
        }
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &hex::encode(self.0)[..12])
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DedupError {
    #[error("leading request was dropped before producing an outcome")]
    Abandoned,
}

type Published<O> = Option<Result<O, DedupError>>;
type InFlight<O> = Arc<Mutex<HashMap<Fingerprint, watch::Receiver<Published<O>>>>>;

pub struct Deduplicator<O> {
    in_flight: InFlight<O>,
}

impl<O> Default for Deduplicator<O> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<O> fmt::Debug for Deduplicator<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deduplicator")
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

/// Role assigned to a caller by [`Deduplicator::try_start`]
#[derive(Debug)]
pub enum DedupEntry<O> {
    Leader(DedupTicket<O>),
    Follower(DedupWaiter<O>),
}

impl<O: Clone> Deduplicator<O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_start(&self, fingerprint: Fingerprint) -> DedupEntry<O> {
        let mut in_flight = self.in_flight.lock();
        if let Some(receiver) = in_flight.get(&fingerprint) {
            debug!(fingerprint = %fingerprint, "Joining in-flight request");
            return DedupEntry::Follower(DedupWaiter {
                receiver: receiver.clone(),
            });
        }

        let (sender, receiver) = watch::channel(None);
        in_flight.insert(fingerprint, receiver);
        DedupEntry::Leader(DedupTicket {
            fingerprint,
            sender: Some(sender),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

/// Obligation of the leader to publish an outcome
///
/// Dropping the ticket without calling [`DedupTicket::complete`] wakes all
/// followers with [`DedupError::Abandoned`].
pub struct DedupTicket<O> {
    fingerprint: Fingerprint,
    sender: Option<watch::Sender<Published<O>>>,
    in_flight: InFlight<O>,
}

impl<O> DedupTicket<O> {
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Publish the outcome to every follower and retire the fingerprint
    pub fn complete(mut self, outcome: O) {
        self.publish(Ok(outcome));
    }

    fn publish(&mut self, outcome: Result<O, DedupError>) {
        if let Some(sender) = self.sender.take() {
            // Retire the entry first so no new follower joins a finished call.
            self.in_flight.lock().remove(&self.fingerprint);
            let followers = sender.receiver_count();
            sender.send_replace(Some(outcome));
            debug!(fingerprint = %self.fingerprint, followers, "Published deduplicated outcome");
        }
    }
}

impl<O> Drop for DedupTicket<O> {
    fn drop(&mut self) {
        self.publish(Err(DedupError::Abandoned));
    }
}

impl<O> fmt::Debug for DedupTicket<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedupTicket")
            .field("fingerprint", &self.fingerprint)
            .field("completed", &self.sender.is_none())
            .finish()
    }
}

/// Follower's handle on the leader's eventual outcome
pub struct DedupWaiter<O> {
    receiver: watch::Receiver<Published<O>>,
}

impl<O: Clone> DedupWaiter<O> {
    pub async fn wait(mut self) -> Result<O, DedupError> {
        let published = match self.receiver.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        published.unwrap_or(Err(DedupError::Abandoned))
    }
}

impl<O> fmt::Debug for DedupWaiter<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedupWaiter").finish_non_exhaustive()
    }
}
