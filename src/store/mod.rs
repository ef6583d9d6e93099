//! Entry store - the client's copy of the server table.
//!
//! The store keeps every live [`Entry`] indexed by server id and by name,
//! plus a path tree for presentation. It is driven by one mutator (the
//! session task) in message arrival order.
//!
//! # Reconnects
//!
//! On disconnect the live entries move to a backup map keyed by name. While
//! the next session syncs, an assignment for a backed-up name reclaims that
//! entry (same [`EntryKey`], new id). Anything still in the backup when sync
//! completes is gone upstream and is dropped.

mod entry;
mod tree;

pub use entry::{Entry, EntryKey};
pub use tree::{EntryTree, TreeNode};

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::{Nt3Error, Result};
use crate::protocol::{EntryAssignment, EntryUpdate, Message, CLEAR_ALL_MAGIC};

/// Entry table with id/name indexes, path tree and reconnect backup.
#[derive(Debug, Default)]
pub struct EntryStore {
    /// Live entries by stable key.
    entries: HashMap<EntryKey, Entry>,
    /// Server id index.
    by_id: HashMap<u16, EntryKey>,
    /// Name index.
    by_name: HashMap<String, EntryKey>,
    /// Entries from the previous session awaiting reclaim.
    backup: HashMap<String, Entry>,
    /// Path tree; shared with snapshots, copied on write.
    tree: Arc<EntryTree>,
    /// Next key to hand out.
    next_key: u64,
    /// Whether a session is past the server hello.
    connected: bool,
}

impl EntryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one decoded message.
    ///
    /// Control messages and RPC responses leave the table untouched.
    ///
    /// # Errors
    ///
    /// [`Nt3Error::Inconsistent`] if the id and name indexes diverged after a
    /// delete. The session must be torn down and resynchronized.
    pub fn apply(&mut self, message: &Message) -> Result<()> {
        match message {
            Message::EntryAssignment(assignment) => self.assign(assignment),
            Message::EntryUpdate(update) => self.update(update),
            Message::EntryFlagsUpdate { id, flags } => self.update_flags(*id, *flags),
            Message::EntryDelete { id } => return self.delete(*id),
            Message::ClearAllEntries { magic } => self.clear_all(*magic),
            Message::RpcResponse { id, uid, result } => {
                trace!(id, uid, len = result.len(), "Ignoring RPC response");
            }
            Message::KeepAlive | Message::ServerHello { .. } | Message::ServerHelloComplete => {}
        }
        Ok(())
    }

    /// Server hello received: a sync is starting.
    pub fn on_connected(&mut self) {
        self.connected = true;
    }

    /// Server hello complete: drop whatever the sync did not reclaim.
    pub fn on_sync_complete(&mut self) {
        if !self.backup.is_empty() {
            debug!(stale = self.backup.len(), "Discarding unclaimed entries");
        }
        self.backup.clear();
    }

    /// Session ended: move live entries to the backup.
    ///
    /// Any backup left from an earlier session is replaced.
    pub fn on_disconnected(&mut self) {
        let by_name = std::mem::take(&mut self.by_name);
        self.backup = by_name
            .into_iter()
            .filter_map(|(name, key)| self.entries.remove(&key).map(|entry| (name, entry)))
            .collect();
        self.entries.clear();
        self.by_id.clear();
        self.tree = Arc::new(EntryTree::new());
        self.connected = false;
        debug!(backed_up = self.backup.len(), "Entry table moved to backup");
    }

    fn assign(&mut self, assignment: &EntryAssignment) {
        let name = assignment.name.as_str();
        if !name.starts_with('/') {
            warn!(name, "Ignoring assignment for unrooted name");
            return;
        }
        if tree::segments(name).next().is_none() {
            warn!(name, "Ignoring assignment without path segments");
            return;
        }

        let entry = match self.backup.remove(name) {
            Some(mut entry) => {
                trace!(name, id = assignment.id, "Reclaimed entry from backup");
                entry.reassign(assignment);
                entry
            }
            None => {
                let key = EntryKey::new(self.next_key);
                self.next_key += 1;
                Entry::from_assignment(key, assignment)
            }
        };

        // Whatever currently holds this name or this id is superseded.
        if let Some(old) = self.by_name.get(name).copied() {
            self.evict(old);
        }
        if let Some(old) = self.by_id.get(&assignment.id).copied() {
            self.evict(old);
        }

        self.by_id.insert(entry.id(), entry.key());
        self.by_name.insert(entry.name().to_string(), entry.key());
        self.entries.insert(entry.key(), entry);
        self.rebuild_tree();
    }

    fn update(&mut self, update: &EntryUpdate) {
        let Some(entry) = self
            .by_id
            .get(&update.id)
            .and_then(|key| self.entries.get_mut(key))
        else {
            trace!(id = update.id, "Update for unknown id");
            return;
        };

        if entry.entry_type() != update.entry_type() {
            warn!(
                id = update.id,
                expected = ?entry.entry_type(),
                received = ?update.entry_type(),
                "Dropping update with mismatched type"
            );
            return;
        }

        entry.set_value(update.seq, update.value.clone());
        let entry = entry.clone();
        self.refresh_tree(&entry);
    }

    fn update_flags(&mut self, id: u16, flags: u8) {
        let Some(entry) = self.by_id.get(&id).and_then(|key| self.entries.get_mut(key)) else {
            trace!(id, "Flags update for unknown id");
            return;
        };

        entry.set_flags(flags);
        let entry = entry.clone();
        self.refresh_tree(&entry);
    }

    fn delete(&mut self, id: u16) -> Result<()> {
        match self.by_id.remove(&id) {
            Some(key) => {
                if let Some(entry) = self.entries.remove(&key) {
                    if self.by_name.get(entry.name()) == Some(&key) {
                        self.by_name.remove(entry.name());
                    }
                }
            }
            None => trace!(id, "Delete for unknown id"),
        }

        self.check_consistency()?;
        self.rebuild_tree();
        Ok(())
    }

    fn clear_all(&mut self, magic: u32) {
        if magic != CLEAR_ALL_MAGIC {
            warn!("Ignoring clear with bad magic 0x{:08x}", magic);
            return;
        }
        self.entries.clear();
        self.by_id.clear();
        self.by_name.clear();
        self.tree = Arc::new(EntryTree::new());
        debug!("Entry table cleared");
    }

    /// Remove `key` from both indexes.
    fn evict(&mut self, key: EntryKey) {
        if let Some(entry) = self.entries.remove(&key) {
            if self.by_id.get(&entry.id()) == Some(&key) {
                self.by_id.remove(&entry.id());
            }
            if self.by_name.get(entry.name()) == Some(&key) {
                self.by_name.remove(entry.name());
            }
        }
    }

    fn rebuild_tree(&mut self) {
        self.tree = Arc::new(EntryTree::build(self.entries.values()));
    }

    fn refresh_tree(&mut self, entry: &Entry) {
        if !Arc::make_mut(&mut self.tree).refresh(entry) {
            self.rebuild_tree();
        }
    }

    /// Verify the id and name indexes cover the same entries.
    pub fn check_consistency(&self) -> Result<()> {
        if self.by_id.len() != self.by_name.len() {
            return Err(Nt3Error::Inconsistent {
                ids: self.by_id.len(),
                names: self.by_name.len(),
            });
        }
        Ok(())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Size of the id index.
    pub fn id_count(&self) -> usize {
        self.by_id.len()
    }

    /// Size of the name index.
    pub fn name_count(&self) -> usize {
        self.by_name.len()
    }

    /// Entries awaiting reclaim.
    pub fn backup_len(&self) -> usize {
        self.backup.len()
    }

    /// Whether a session is past the server hello.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Entry by server id.
    pub fn get_by_id(&self, id: u16) -> Option<&Entry> {
        self.by_id.get(&id).and_then(|key| self.entries.get(key))
    }

    /// Entry by full name.
    pub fn get_by_name(&self, name: &str) -> Option<&Entry> {
        self.by_name.get(name).and_then(|key| self.entries.get(key))
    }

    /// Iterate over live entries in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Current path tree. Cheap; later mutations do not affect it.
    pub fn tree(&self) -> Arc<EntryTree> {
        Arc::clone(&self.tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EntryType, EntryValue};

    fn assign(name: &str, id: u16, value: EntryValue) -> Message {
        Message::EntryAssignment(EntryAssignment {
            name: name.into(),
            id,
            seq: 1,
            flags: 0,
            value,
        })
    }

    fn update(id: u16, seq: u16, value: EntryValue) -> Message {
        Message::EntryUpdate(EntryUpdate { id, seq, value })
    }

    fn store_with(messages: &[Message]) -> EntryStore {
        let mut store = EntryStore::new();
        store.on_connected();
        for message in messages {
            store.apply(message).unwrap();
        }
        store
    }

    #[test]
    fn test_assignment_indexes_and_tree() {
        let store = store_with(&[
            assign("/a/b", 1, EntryValue::Bool(true)),
            assign("/a/c", 2, EntryValue::Double(1.0)),
            assign("/x", 3, EntryValue::String("s".into())),
        ]);

        assert_eq!(store.len(), 3);
        assert_eq!(store.id_count(), store.name_count());
        assert_eq!(store.get_by_id(2).unwrap().name(), "/a/c");
        assert_eq!(store.get_by_name("/x").unwrap().id(), 3);

        let tree = store.tree();
        let top: Vec<_> = tree.root().children().map(TreeNode::segment).collect();
        assert_eq!(top, ["a", "x"]);
        for entry in store.entries() {
            assert_eq!(tree.get(entry.name()).unwrap().entry(), Some(entry));
        }
    }

    #[test]
    fn test_unrooted_and_empty_names_ignored() {
        let store = store_with(&[
            assign("no/slash", 1, EntryValue::Bool(true)),
            assign("/", 2, EntryValue::Bool(true)),
        ]);
        assert!(store.is_empty());
        assert!(store.tree().is_empty());
    }

    #[test]
    fn test_update_then_mismatched_update() {
        let mut store = store_with(&[assign("/foo/bar", 5, EntryValue::Double(3.14))]);

        store.apply(&update(5, 2, EntryValue::Double(2.71))).unwrap();
        let leaf = store.tree().get("foo/bar").unwrap().entry().cloned().unwrap();
        assert_eq!(leaf.value(), &EntryValue::Double(2.71));
        assert_eq!(leaf.seq(), 2);

        store.apply(&update(5, 3, EntryValue::Bool(true))).unwrap();
        let entry = store.get_by_id(5).unwrap();
        assert_eq!(entry.value(), &EntryValue::Double(2.71));
        assert_eq!(entry.seq(), 2);
        assert_eq!(
            store.tree().get("foo/bar").unwrap().entry_type(),
            EntryType::Double
        );
    }

    #[test]
    fn test_snapshot_unaffected_by_later_update() {
        let mut store = store_with(&[assign("/v", 1, EntryValue::Double(1.0))]);
        let before = store.tree();

        store.apply(&update(1, 2, EntryValue::Double(2.0))).unwrap();

        assert_eq!(
            before.get("v").unwrap().entry().unwrap().value(),
            &EntryValue::Double(1.0)
        );
        assert_eq!(
            store.tree().get("v").unwrap().entry().unwrap().value(),
            &EntryValue::Double(2.0)
        );
    }

    #[test]
    fn test_flags_update() {
        let mut store = store_with(&[assign("/p", 1, EntryValue::Bool(false))]);

        store
            .apply(&Message::EntryFlagsUpdate { id: 1, flags: 1 })
            .unwrap();
        assert!(store.get_by_id(1).unwrap().is_persistent());
        assert!(store.tree().get("p").unwrap().entry().unwrap().is_persistent());

        // Unknown id is a no-op.
        store
            .apply(&Message::EntryFlagsUpdate { id: 99, flags: 1 })
            .unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete() {
        let mut store = store_with(&[
            assign("/a/b", 1, EntryValue::Bool(true)),
            assign("/a/c", 2, EntryValue::Bool(true)),
        ]);

        store.apply(&Message::EntryDelete { id: 1 }).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.get_by_name("/a/b").is_none());
        assert!(store.tree().get("a/b").is_none());
        assert!(store.tree().get("a/c").is_some());

        // Unknown id leaves the table alone.
        store.apply(&Message::EntryDelete { id: 42 }).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete_detects_divergence() {
        let mut store = store_with(&[assign("/a", 1, EntryValue::Bool(true))]);
        // Corrupt the name index behind the store's back.
        store.by_name.insert("/ghost".into(), EntryKey::new(999));

        let err = store.apply(&Message::EntryDelete { id: 1 }).unwrap_err();
        assert!(matches!(err, Nt3Error::Inconsistent { ids: 0, names: 1 }));
    }

    #[test]
    fn test_clear_all_magic() {
        let mut store = store_with(&[
            assign("/a", 1, EntryValue::Bool(true)),
            assign("/b", 2, EntryValue::Bool(true)),
        ]);

        store
            .apply(&Message::ClearAllEntries { magic: 0xAABB_CCDD })
            .unwrap();
        assert_eq!(store.len(), 2);
        assert!(!store.tree().is_empty());

        store.apply(&Message::clear_all()).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.id_count(), 0);
        assert_eq!(store.name_count(), 0);
        assert!(store.tree().is_empty());
    }

    #[test]
    fn test_reassign_same_name_live_replaces() {
        let mut store = store_with(&[assign("/a", 1, EntryValue::Bool(true))]);
        let first = store.get_by_name("/a").unwrap().key();

        store.apply(&assign("/a", 2, EntryValue::Double(1.0))).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.get_by_id(1).is_none());
        assert_ne!(store.get_by_id(2).unwrap().key(), first);
    }

    #[test]
    fn test_reused_id_evicts_previous_holder() {
        let mut store = store_with(&[assign("/old", 7, EntryValue::Bool(true))]);

        store.apply(&assign("/new", 7, EntryValue::Bool(false))).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.id_count(), store.name_count());
        assert!(store.get_by_name("/old").is_none());
        assert_eq!(store.get_by_id(7).unwrap().name(), "/new");
    }

    #[test]
    fn test_reconciliation_preserves_identity() {
        let mut store = store_with(&[
            assign("/a/b", 1, EntryValue::Double(1.0)),
            assign("/gone", 2, EntryValue::Double(2.0)),
        ]);
        let original = store.get_by_name("/a/b").unwrap().key();

        store.on_disconnected();
        assert!(!store.is_connected());
        assert!(store.is_empty());
        assert!(store.tree().is_empty());
        assert_eq!(store.backup_len(), 2);

        store.on_connected();
        store
            .apply(&Message::EntryAssignment(EntryAssignment {
                name: "/a/b".into(),
                id: 40,
                seq: 7,
                flags: 1,
                value: EntryValue::Bool(true),
            }))
            .unwrap();
        store.on_sync_complete();

        let entry = store.get_by_name("/a/b").unwrap();
        assert_eq!(entry.key(), original);
        assert_eq!(entry.id(), 40);
        assert_eq!(entry.seq(), 7);
        assert_eq!(entry.flags(), 1);
        assert_eq!(entry.entry_type(), EntryType::Bool);
        assert_eq!(store.backup_len(), 0);
        assert!(store.get_by_name("/gone").is_none());
    }

    #[test]
    fn test_disconnect_replaces_previous_backup() {
        let mut store = store_with(&[assign("/first", 1, EntryValue::Bool(true))]);
        store.on_disconnected();

        store.on_connected();
        store.apply(&assign("/second", 1, EntryValue::Bool(true))).unwrap();
        store.on_disconnected();

        assert_eq!(store.backup_len(), 1);
        store.on_connected();
        store.apply(&assign("/first", 3, EntryValue::Bool(true))).unwrap();
        assert_eq!(store.backup_len(), 1);
    }
}
