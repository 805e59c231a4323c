//! Subscription cursor.

use serde::Serialize;

/// Last event index whose delivery attempt has resolved.
///
/// The index is monotone within one connection epoch. A new epoch (the
/// source reconnected) may legitimately restart below the previous value,
/// e.g. after the server lost its event buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionCursor {
    pub index: u64,
    pub epoch: u64,
}

impl SubscriptionCursor {
    /// Move the cursor to `index` observed in `epoch`.
    ///
    /// Returns `false` and leaves the cursor untouched when the update would
    /// move backwards inside the same epoch or comes from an older epoch.
    pub fn advance(&mut self, index: u64, epoch: u64) -> bool {
        if epoch < self.epoch || (epoch == self.epoch && index < self.index) {
            return false;
        }
        self.index = index;
        self.epoch = epoch;
        true
    }
}
