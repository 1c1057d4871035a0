//! Client-side notification cache and unread counter.
//!
//! The store is the only owner of the client's copy of the records. It takes
//! three kinds of input: full-list loads from REST, single records pushed on
//! the live channel, and local read-state mutations. The unread counter is
//! maintained incrementally but must always equal
//! `records.iter().filter(|r| !r.is_read).count()`.

use std::collections::HashMap;
use std::sync::Arc;

use notify_common::NotificationRecord;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::api::NotificationApi;
use crate::error::ClientError;

struct StoreState {
    /// Most recent first.
    records: Vec<NotificationRecord>,
    unread: usize,
    /// Bumped on every server-originated change.
    revision: u64,
    /// Revision at which the server last supplied each id.
    touched: HashMap<i64, u64>,
    /// Revision of the last full-list load.
    loaded_at: u64,
}

impl StoreState {
    fn recount(&mut self) {
        self.unread = count_unread(&self.records);
    }

    fn touch(&mut self, id: i64) {
        self.revision += 1;
        self.touched.insert(id, self.revision);
    }

    /// Whether the server has said anything about `id` since `revision`.
    fn superseded(&self, id: i64, revision: u64) -> bool {
        self.loaded_at > revision || self.touched.get(&id).is_some_and(|&r| r > revision)
    }
}

fn count_unread(records: &[NotificationRecord]) -> usize {
    records.iter().filter(|r| !r.is_read).count()
}

pub struct NotificationStore {
    api: Arc<dyn NotificationApi>,
    state: Mutex<StoreState>,
    unread_tx: watch::Sender<usize>,
}

impl NotificationStore {
    pub fn new(api: Arc<dyn NotificationApi>) -> Self {
        let (unread_tx, _) = watch::channel(0);
        Self {
            api,
            state: Mutex::new(StoreState {
                records: Vec::new(),
                unread: 0,
                revision: 0,
                touched: HashMap::new(),
                loaded_at: 0,
            }),
            unread_tx,
        }
    }

    // -----------------------------------------------------------------------
    // Full-list loads
    // -----------------------------------------------------------------------

    /// Replace the cache with the server's latest notifications.
    pub async fn load_latest(&self) -> Result<usize, ClientError> {
        let records = self.api.fetch_new().await.inspect_err(|e| {
            tracing::warn!(error = %e, "failed to load latest notifications");
        })?;
        Ok(self.replace_all(records))
    }

    /// Replace the cache with up to `limit` records from history.
    pub async fn load_history(&self, limit: u32) -> Result<usize, ClientError> {
        let records = self.api.fetch_history(limit).await.inspect_err(|e| {
            tracing::warn!(error = %e, limit, "failed to load notification history");
        })?;
        Ok(self.replace_all(records))
    }

    fn replace_all(&self, records: Vec<NotificationRecord>) -> usize {
        let mut state = self.state.lock();
        state.records = records;
        state.revision += 1;
        state.loaded_at = state.revision;
        state.touched.clear();
        state.recount();
        tracing::debug!(
            count = state.records.len(),
            unread = state.unread,
            "notification list replaced"
        );
        self.publish(&state);
        state.unread
    }

    // -----------------------------------------------------------------------
    // Pushed records
    // -----------------------------------------------------------------------

    /// Reconcile one record pushed on the live channel.
    ///
    /// A known id is replaced in place; an unknown one is prepended.
    pub fn apply_pushed(&self, record: NotificationRecord) {
        let mut state = self.state.lock();
        state.touch(record.id);
        match state.records.iter().position(|r| r.id == record.id) {
            Some(index) => {
                let was_read = state.records[index].is_read;
                match (was_read, record.is_read) {
                    (false, true) => state.unread = state.unread.saturating_sub(1),
                    (true, false) => state.unread += 1,
                    _ => {}
                }
                tracing::debug!(notification_id = record.id, "pushed notification replaced");
                state.records[index] = record;
            }
            None => {
                if !record.is_read {
                    state.unread += 1;
                }
                tracing::debug!(notification_id = record.id, "pushed notification added");
                state.records.insert(0, record);
            }
        }
        self.publish(&state);
    }

    // -----------------------------------------------------------------------
    // Local mutations
    // -----------------------------------------------------------------------

    /// Mark one notification read, optimistically.
    ///
    /// If the server rejects the change the local flip is undone and the
    /// error is returned. A record the server pushed in the meantime keeps
    /// the pushed state.
    pub async fn mark_read(&self, id: i64) -> Result<(), ClientError> {
        let (flipped, revision) = {
            let mut state = self.state.lock();
            let flipped = match state.records.iter_mut().find(|r| r.id == id) {
                Some(record) if !record.is_read => {
                    record.is_read = true;
                    true
                }
                _ => false,
            };
            if flipped {
                state.unread = state.unread.saturating_sub(1);
            }
            self.publish(&state);
            (flipped, state.revision)
        };

        if let Err(e) = self.api.mark_read(id).await {
            tracing::warn!(error = %e, notification_id = id, "mark read failed, rolling back");
            if flipped {
                self.roll_back(&[id], revision);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Mark every cached notification read, optimistically.
    ///
    /// On failure only the records this call flipped are restored.
    pub async fn mark_all_read(&self) -> Result<(), ClientError> {
        let (flipped, revision) = {
            let mut state = self.state.lock();
            let flipped: Vec<i64> = state
                .records
                .iter_mut()
                .filter(|r| !r.is_read)
                .map(|r| {
                    r.is_read = true;
                    r.id
                })
                .collect();
            state.unread = 0;
            self.publish(&state);
            (flipped, state.revision)
        };

        if let Err(e) = self.api.mark_all_read().await {
            tracing::warn!(
                error = %e,
                restored = flipped.len(),
                "mark all read failed, rolling back"
            );
            self.roll_back(&flipped, revision);
            return Err(e);
        }
        Ok(())
    }

    /// Undo optimistic flips made at `revision`, skipping any record the
    /// server has supplied since.
    fn roll_back(&self, ids: &[i64], revision: u64) {
        let mut state = self.state.lock();
        let stale: Vec<i64> = ids
            .iter()
            .copied()
            .filter(|&id| !state.superseded(id, revision))
            .collect();
        if stale.len() < ids.len() {
            tracing::debug!(
                kept = ids.len() - stale.len(),
                "server state arrived during mutation, keeping it"
            );
        }
        for record in state.records.iter_mut().filter(|r| stale.contains(&r.id)) {
            record.is_read = false;
        }
        state.recount();
        self.publish(&state);
    }

    // -----------------------------------------------------------------------
    // Readers
    // -----------------------------------------------------------------------

    /// Snapshot of the cached records, most recent first.
    pub fn records(&self) -> Vec<NotificationRecord> {
        self.state.lock().records.clone()
    }

    pub fn unread_count(&self) -> usize {
        self.state.lock().unread
    }

    /// Unread count computed from scratch over the cached records.
    pub fn recomputed_unread(&self) -> usize {
        count_unread(&self.state.lock().records)
    }

    /// Receiver notified whenever the unread count changes.
    pub fn watch_unread(&self) -> watch::Receiver<usize> {
        self.unread_tx.subscribe()
    }

    /// Must be called with the state lock held so sends stay in order.
    fn publish(&self, state: &StoreState) {
        let unread = state.unread;
        self.unread_tx.send_if_modified(|current| {
            if *current == unread {
                return false;
            }
            *current = unread;
            true
        });
    }
}
