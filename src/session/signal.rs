//! Completion signals.
//!
//! A [`Signal`] settles once, to a value or a rejection, and can be awaited
//! any number of times from any number of clones.

use tokio::sync::watch;

use crate::error::{PeerFetchError, Result};

type Slot<T> = Option<std::result::Result<T, String>>;

/// Awaitable, cloneable, settle-once outcome.
#[derive(Debug, Clone)]
pub struct Signal<T> {
    rx: watch::Receiver<Slot<T>>,
}

/// Settling half of a [`Signal`].
#[derive(Debug)]
pub struct Resolver<T> {
    tx: watch::Sender<Slot<T>>,
}

/// Create an unsettled signal and its resolver.
pub fn signal<T>() -> (Resolver<T>, Signal<T>) {
    let (tx, rx) = watch::channel(None);
    (Resolver { tx }, Signal { rx })
}

impl<T: Clone> Signal<T> {
    /// Wait for the outcome. Rejections surface as
    /// [`PeerFetchError::Negotiation`].
    pub async fn wait(&self) -> Result<T> {
        let mut rx = self.rx.clone();
        let settled = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| PeerFetchError::Negotiation("negotiation abandoned".into()))?;
        match &*settled {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(reason)) => Err(PeerFetchError::Negotiation(reason.clone())),
            None => Err(PeerFetchError::Negotiation("negotiation abandoned".into())),
        }
    }

    /// Outcome if already settled.
    pub fn peek(&self) -> Option<Result<T>> {
        self.rx.borrow().as_ref().map(|slot| match slot {
            Ok(value) => Ok(value.clone()),
            Err(reason) => Err(PeerFetchError::Negotiation(reason.clone())),
        })
    }

    /// Whether the signal has settled
    pub fn is_settled(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

impl<T> Resolver<T> {
    /// Settle with a value. Returns `false` if already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Settle with a rejection. Returns `false` if already settled.
    pub fn reject(&self, reason: impl Into<String>) -> bool {
        self.settle(Err(reason.into()))
    }

    /// Whether the signal has settled
    pub fn is_settled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    fn settle(&self, outcome: std::result::Result<T, String>) -> bool {
        let mut outcome = Some(outcome);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }
}
