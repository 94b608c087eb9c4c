//! Single-flight coordination of access token refreshes.
//!
//! A `RefreshCoordinator` owns one slot. The first caller to `begin` on an
//! idle coordinator becomes the initiator and receives a `RefreshTicket`;
//! every other caller receives a `PendingRefresh` for the same attempt. The
//! slot is cleared before the outcome is published, so a released waiter can
//! never observe its own refresh still in flight.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::warn;

/// Obtains a new access token for a refresh token.
///
/// Closures `Fn(String) -> impl Future<Output = anyhow::Result<String>>`
/// implement this trait. The handler must not send its request through the
/// client it refreshes for: that request would wait on its own refresh.
#[async_trait]
pub trait RefreshHandler: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> anyhow::Result<String>;
}

#[async_trait]
impl<F, Fut> RefreshHandler for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    async fn refresh(&self, refresh_token: &str) -> anyhow::Result<String> {
        self(refresh_token.to_string()).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new access token is in the session store; retry
    Refreshed,
    /// The refresh failed and the session was logged out
    Terminated,
    /// The initiator was dropped before finishing; the session is untouched
    Abandoned,
}

type OutcomeSlot = Option<RefreshOutcome>;

pub(crate) enum Begin<'a> {
    Initiator(RefreshTicket<'a>),
    Waiter(PendingRefresh),
}

#[derive(Default)]
pub(crate) struct RefreshCoordinator {
    /// Present iff a refresh is in flight
    pending: Mutex<Option<watch::Receiver<OutcomeSlot>>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot if idle, otherwise join the refresh already in flight.
    pub fn begin(&self) -> Begin<'_> {
        let mut pending = self.lock();
        if let Some(ref rx) = *pending {
            return Begin::Waiter(PendingRefresh { rx: rx.clone() });
        }

        let (tx, rx) = watch::channel(None);
        *pending = Some(rx);
        Begin::Initiator(RefreshTicket {
            coordinator: self,
            tx: Some(tx),
        })
    }

    /// The refresh in flight, if any
    pub fn current(&self) -> Option<PendingRefresh> {
        self.lock()
            .as_ref()
            .map(|rx| PendingRefresh { rx: rx.clone() })
    }

    pub fn is_in_flight(&self) -> bool {
        self.lock().is_some()
    }

    fn finish(&self, tx: watch::Sender<OutcomeSlot>, outcome: RefreshOutcome) {
        self.lock().take();
        tx.send_replace(Some(outcome));
    }

    fn lock(&self) -> MutexGuard<'_, Option<watch::Receiver<OutcomeSlot>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held by the initiator; publishing an outcome consumes it.
///
/// Dropping an unresolved ticket (the initiator was cancelled) publishes
/// `Abandoned` so waiters are never stranded.
pub(crate) struct RefreshTicket<'a> {
    coordinator: &'a RefreshCoordinator,
    tx: Option<watch::Sender<OutcomeSlot>>,
}

impl RefreshTicket<'_> {
    pub fn resolve(mut self) {
        self.finish(RefreshOutcome::Refreshed);
    }

    pub fn reject(mut self) {
        self.finish(RefreshOutcome::Terminated);
    }

    fn finish(&mut self, outcome: RefreshOutcome) {
        if let Some(tx) = self.tx.take() {
            self.coordinator.finish(tx, outcome);
        }
    }
}

impl Drop for RefreshTicket<'_> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!("Token refresh abandoned before completion");
            self.finish(RefreshOutcome::Abandoned);
        }
    }
}

/// Shared view of a refresh in flight
#[derive(Clone)]
pub(crate) struct PendingRefresh {
    rx: watch::Receiver<OutcomeSlot>,
}

impl PendingRefresh {
    pub async fn wait(mut self) -> RefreshOutcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).unwrap_or(RefreshOutcome::Abandoned),
            Err(_) => RefreshOutcome::Abandoned,
        }
    }
}
