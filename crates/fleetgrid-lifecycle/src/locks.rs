//! Per-member exclusive locks.
//!
//! A controller operation holds its member's lock from the first read to
//! the last write, so read-decide-write on one member never interleaves.
//! Different members never contend.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use fleetgrid_state::MemberId;

#[derive(Default)]
pub struct MemberLocks {
    locks: Mutex<HashMap<MemberId, Arc<Mutex<()>>>>,
}

impl MemberLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one member.
    pub async fn acquire(&self, id: MemberId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop entries nobody holds or waits on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }
}
