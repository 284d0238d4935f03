// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The state container owned by one [`super::StakeSync`].
//!
//! Writers never lock across an await: each write is one `send_modify` on
//! a watch channel. Once the store is shut down every write is refused, so
//! flows that outlive their sync instance cannot publish anything.

use crate::adapter::RefreshReads;
use crate::types::{AccountContext, ChainCursor, SyncSnapshot};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug)]
pub struct SnapshotStore {
    sender: watch::Sender<SyncSnapshot>,
    alive: AtomicBool,
    actions_in_flight: AtomicUsize,
    writes: AtomicU64,
}

impl SnapshotStore {
    pub fn new(account: AccountContext) -> Self {
        let (sender, _) = watch::channel(SyncSnapshot::empty(account));
        Self {
            sender,
            alive: AtomicBool::new(true),
            actions_in_flight: AtomicUsize::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.sender.subscribe()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.sender.borrow().clone()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Refuses all further writes. Returns false if already shut down.
    pub fn shut_down(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }

    /// Number of writes that reached the channel
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Replaces pool, position, withdrawal and cursor in one write.
    ///
    /// No sequence numbers: when a poll refresh and an action refresh race,
    /// whichever finishes last is what subscribers see.
    pub fn publish(&self, reads: RefreshReads) -> bool {
        if !self.is_alive() {
            return false;
        }
        let RefreshReads {
            pool,
            position,
            withdrawal,
            block_height,
        } = reads;
        self.sender.send_modify(|snapshot| {
            snapshot.pool = Some(pool);
            snapshot.position = position;
            snapshot.withdrawal = withdrawal;
            // The cursor only moves forward
            snapshot.cursor = ChainCursor {
                current_block_height: block_height.max(snapshot.cursor.current_block_height),
            };
        });
        self.writes.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Marks one action in flight; `loading` stays true until every guard drops.
    pub fn begin_action(self: &Arc<Self>) -> ActionGuard {
        self.actions_in_flight.fetch_add(1, Ordering::SeqCst);
        self.set_loading();
        ActionGuard {
            store: self.clone(),
        }
    }

    fn set_loading(&self) {
        if !self.is_alive() {
            return;
        }
        let loading = self.actions_in_flight.load(Ordering::SeqCst) > 0;
        let changed = self.sender.send_if_modified(|snapshot| {
            if snapshot.loading == loading {
                return false;
            }
            snapshot.loading = loading;
            true
        });
        if changed {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct ActionGuard {
    store: Arc<SnapshotStore>,
}

impl Drop for ActionGuard {
    fn drop(&mut self) {
        self.store.actions_in_flight.fetch_sub(1, Ordering::SeqCst);
        self.store.set_loading();
    }
}
