//! Connection table
//!
//! Records connections made outside the indexed-method path, keyed by
//! `(sender, signal index, callable identity)`. Removal never runs native
//! or runtime code while the table lock is held: removed records are handed
//! back to the caller, which disconnects and drops them afterwards.

use metabridge_sdk::ObjectId;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::callable::CallableIdentity;
use crate::native::ConnectionHandle;
use crate::weak::WeakNotifier;

/// Key of a recorded connection
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    /// Signal sender
    pub sender: ObjectId,
    /// Absolute signal index on the sender
    pub signal_index: usize,
    /// Connected callable
    pub callable: CallableIdentity,
}

impl ConnectionKey {
    /// Create a new connection key
    pub fn new(sender: ObjectId, signal_index: usize, callable: CallableIdentity) -> Self {
        Self {
            sender,
            signal_index,
            callable,
        }
    }
}

/// A recorded connection
#[derive(Debug)]
pub struct ConnectionRecord {
    /// Native connection handle
    pub handle: ConnectionHandle,
    /// Watch on the callable's bound receiver, if it has one
    pub watcher: Option<WeakNotifier>,
}

/// At most one record per key
#[derive(Debug, Default)]
pub struct ConnectionTable {
    records: Mutex<FxHashMap<ConnectionKey, ConnectionRecord>>,
}

impl ConnectionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, returning the one it replaced
    pub fn insert(&self, key: ConnectionKey, record: ConnectionRecord) -> Option<ConnectionRecord> {
        self.records.lock().insert(key, record)
    }

    /// Remove one record
    pub fn remove(&self, key: &ConnectionKey) -> Option<ConnectionRecord> {
        self.records.lock().remove(key)
    }

    /// Handle recorded under `key`
    pub fn handle(&self, key: &ConnectionKey) -> Option<ConnectionHandle> {
        self.records.lock().get(key).map(|r| r.handle)
    }

    /// True if a record exists for `key`
    pub fn contains(&self, key: &ConnectionKey) -> bool {
        self.records.lock().contains_key(key)
    }

    /// Snapshot of the keys recorded for one callable
    pub fn keys_for_callable(&self, callable: CallableIdentity) -> Vec<ConnectionKey> {
        self.records
            .lock()
            .keys()
            .filter(|k| k.callable == callable)
            .copied()
            .collect()
    }

    /// Remove every record of `sender`
    pub fn take_sender(&self, sender: ObjectId) -> Vec<(ConnectionKey, ConnectionRecord)> {
        let mut records = self.records.lock();
        let keys: Vec<ConnectionKey> = records.keys().filter(|k| k.sender == sender).copied().collect();
        keys.into_iter()
            .filter_map(|k| records.remove(&k).map(|r| (k, r)))
            .collect()
    }

    /// Remove every record
    pub fn take_all(&self) -> Vec<(ConnectionKey, ConnectionRecord)> {
        self.records.lock().drain().collect()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True if the table is empty
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
