// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Duplicate-message suppression for gossip forwarding.
//!
//! A concurrent map of `MessageId -> seen_at`; a periodic sweep evicts entries
//! older than the dedup window. Every seen `MessageId` is guaranteed to read
//! back as a duplicate for at least that long after first sight.

use crate::codec::MessageId;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Default window a seen `MessageId` is remembered for (10 minutes).
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Default interval between GC sweeps (5 minutes).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub struct DuplicateTable {
    seen: DashMap<MessageId, Instant>,
    window: Duration,
}

impl DuplicateTable {
    pub fn new(window: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            window,
        }
    }

    /// Returns `true` if `id` was already seen within the window (the caller
    /// should drop the message); otherwise records it and returns `false`.
    pub fn check_and_record(&self, id: &MessageId) -> bool {
        if let Some(seen_at) = self.seen.get(id) {
            if seen_at.elapsed() < self.window {
                return true;
            }
        }
        self.seen.insert(id.clone(), Instant::now());
        false
    }

    /// Evicts entries older than the dedup window.
    pub fn sweep(&self) {
        self.seen.retain(|_, seen_at| seen_at.elapsed() < self.window);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Spawns a background task that sweeps every `interval` until the
    /// returned handle is dropped/aborted.
    pub fn spawn_gc(self: std::sync::Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }
}
