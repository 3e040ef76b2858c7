//! Channel epochs: CancellationToken + stale-response guard.
//! Re-enabling a channel advances its epoch and cancels everything issued
//! under the previous one, so a network/media result that resolves after a
//! disable can never mutate shared state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Per-channel epoch tracker. Each enable advances the epoch, cancels all
/// prior work, and issues a fresh root token.
pub struct ChannelEpoch {
    token: RwLock<CancellationToken>,
    epoch: Arc<AtomicU64>,
}

impl ChannelEpoch {
    pub fn new() -> Self {
        Self {
            token: RwLock::new(CancellationToken::new()),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cancel everything from the current epoch and start a new one.
    /// Returns a guard for the new epoch.
    pub fn advance(&self) -> EpochGuard {
        let mut token = self.token.write();
        token.cancel();
        *token = CancellationToken::new();
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        EpochGuard {
            shared: Arc::clone(&self.epoch),
            epoch,
            token: token.child_token(),
        }
    }

    /// Guard for the current epoch without advancing it.
    pub fn guard(&self) -> EpochGuard {
        let token = self.token.read();
        EpochGuard {
            shared: Arc::clone(&self.epoch),
            epoch: self.epoch.load(Ordering::SeqCst),
            token: token.child_token(),
        }
    }

    /// Cancel all work in the current epoch without starting a new one.
    /// Used on disable: outstanding guards turn stale immediately.
    pub fn cancel(&self) {
        self.token.read().cancel();
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

impl Default for ChannelEpoch {
    fn default() -> Self {
        Self::new()
    }
}

/// Checked by a task before acting on the result of any await: if the epoch
/// has advanced past the guard's, the result is stale and must be dropped.
#[derive(Clone)]
pub struct EpochGuard {
    shared: Arc<AtomicU64>,
    epoch: u64,
    token: CancellationToken,
}

impl EpochGuard {
    #[inline]
    pub fn is_current(&self) -> bool {
        self.shared.load(Ordering::SeqCst) == self.epoch
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// True when the owning channel is still on this epoch and not cancelled.
    #[inline]
    pub fn should_continue(&self) -> bool {
        !self.is_cancelled() && self.is_current()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}
