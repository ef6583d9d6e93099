//! Live table entries.

use serde::Serialize;

use crate::protocol::{EntryAssignment, EntryType, EntryValue, FLAG_PERSISTENT};

/// Stable identity of an entry.
///
/// Server ids are reused after deletes and change across reconnects; the key
/// does neither. An entry reclaimed from the backup map during resync keeps
/// its key, so observers can tell "same entry, new id" from "new entry".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntryKey(u64);

impl EntryKey {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw key value.
    pub fn get(self) -> u64 {
        self.0
    }
}

/// A named, typed value in the table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    key: EntryKey,
    id: u16,
    name: String,
    flags: u8,
    seq: u16,
    value: EntryValue,
}

impl Entry {
    pub(crate) fn from_assignment(key: EntryKey, assignment: &EntryAssignment) -> Self {
        Self {
            key,
            id: assignment.id,
            name: assignment.name.clone(),
            flags: assignment.flags,
            seq: assignment.seq,
            value: assignment.value.clone(),
        }
    }

    /// Take over id, flags, sequence number and value from a re-announcement
    /// of the same name.
    pub(crate) fn reassign(&mut self, assignment: &EntryAssignment) {
        self.id = assignment.id;
        self.flags = assignment.flags;
        self.seq = assignment.seq;
        self.value = assignment.value.clone();
    }

    pub(crate) fn set_value(&mut self, seq: u16, value: EntryValue) {
        self.seq = seq;
        self.value = value;
    }

    pub(crate) fn set_flags(&mut self, flags: u8) {
        self.flags = flags;
    }

    /// Stable identity.
    #[inline]
    pub fn key(&self) -> EntryKey {
        self.key
    }

    /// Server-assigned id.
    #[inline]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Full path, starting with `/`.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last path segment.
    pub fn display_name(&self) -> &str {
        self.name
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("")
    }

    /// Flag bits.
    #[inline]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Whether the server keeps this value across restarts.
    #[inline]
    pub fn is_persistent(&self) -> bool {
        self.flags & FLAG_PERSISTENT != 0
    }

    /// Sequence number of the current value. Advisory only.
    #[inline]
    pub fn seq(&self) -> u16 {
        self.seq
    }

    /// Current value.
    #[inline]
    pub fn value(&self) -> &EntryValue {
        &self.value
    }

    /// Type of the current value.
    #[inline]
    pub fn entry_type(&self) -> EntryType {
        self.value.entry_type()
    }
}
