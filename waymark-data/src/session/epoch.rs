//! Connection generation counter.
//!
//! Each asynchronous operation captures an [`EpochToken`] when it starts and
//! checks it before touching session state. A reset advances the epoch, so
//! work started before the reset fails the check and leaves the new caches
//! alone without anyone tracking individual requests.

use std::cell::Cell;

use crate::OsmError;

/// Monotonic counter identifying the current connection.
#[derive(Debug, Default)]
pub struct ConnectionEpoch(Cell<u64>);

impl ConnectionEpoch {
    /// Current generation.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.0.get()
    }

    /// Start a new generation, invalidating every outstanding token.
    pub fn advance(&self) -> u64 {
        let next = self.0.get().wrapping_add(1);
        self.0.set(next);
        next
    }

    /// Capture the current generation.
    #[must_use]
    pub fn token(&self) -> EpochToken {
        EpochToken(self.current())
    }
}

/// Generation captured at the start of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochToken(u64);

impl EpochToken {
    /// Whether no reset happened since the token was taken.
    #[must_use]
    pub fn is_current(self, epoch: &ConnectionEpoch) -> bool {
        self.0 == epoch.current()
    }

    /// Fail with [`OsmError::ConnectionSwitched`] if the epoch moved on.
    ///
    /// # Errors
    ///
    /// Returns [`OsmError::ConnectionSwitched`] after a reset.
    pub fn check(self, epoch: &ConnectionEpoch) -> Result<(), OsmError> {
        if self.is_current(epoch) {
            Ok(())
        } else {
            Err(OsmError::ConnectionSwitched)
        }
    }
}
