//! Per-user single-flight lock for sync passes.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use crate::models::UserId;

#[derive(Debug, Default)]
pub(super) struct InFlight {
    users: Mutex<HashSet<UserId>>,
}

impl InFlight {
    /// Claim the user's slot; `None` if a pass is already running for them.
    pub(super) fn try_acquire(&self, user_id: &UserId) -> Option<InFlightGuard<'_>> {
        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        if !users.insert(user_id.clone()) {
            return None;
        }
        Some(InFlightGuard {
            owner: self,
            user_id: user_id.clone(),
        })
    }
}

/// Releases the slot when dropped, including on early return or cancellation.
pub(super) struct InFlightGuard<'a> {
    owner: &'a InFlight,
    user_id: UserId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut users = self
            .owner
            .users
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        users.remove(&self.user_id);
    }
}
