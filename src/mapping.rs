//! Ordered, deduplicated table of mapping records.

use core::ops::Index;
use std::collections::{HashMap, VecDeque};

use crate::sid::SecurityIdentifier;

/// Handle to a record of a [`MappingTable`].
///
/// Only meaningful for the table that issued it. Handles stay valid when a
/// record is moved to the front of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(usize);

/// Correspondence between one account SID and its Unix identifiers.
///
/// An empty owner (resp. group) string means the record does not map a
/// Unix user (resp. group).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRecord {
    identifier: SecurityIdentifier,
    owner: String,
    group: String,
    account: Option<String>,
    defined: bool,
}

impl MappingRecord {
    fn pending(identifier: SecurityIdentifier, account: Option<&str>) -> Self {
        Self {
            identifier,
            owner: String::new(),
            group: String::new(),
            account: account.map(str::to_owned),
            defined: false,
        }
    }

    /// A resolved record, as synthesized by the sanitizer.
    #[inline]
    #[must_use]
    pub fn defined(
        identifier: SecurityIdentifier,
        owner: impl Into<String>,
        group: impl Into<String>,
        account: Option<String>,
    ) -> Self {
        let mut record = Self {
            identifier,
            owner: String::new(),
            group: String::new(),
            account,
            defined: false,
        };
        record.set(owner.into(), group.into());
        record
    }

    fn set(&mut self, owner: String, group: String) {
        self.defined = !owner.is_empty() || !group.is_empty();
        self.owner = owner;
        self.group = group;
    }

    /// Canonical text of the identifier, the key of the record.
    #[inline]
    #[must_use]
    pub fn sid(&self) -> &str {
        self.identifier.as_str()
    }

    /// The identifier itself.
    #[inline]
    #[must_use]
    pub const fn identifier(&self) -> &SecurityIdentifier {
        &self.identifier
    }

    /// Unix user id, empty when the record is not an owner mapping.
    #[inline]
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Unix group id, empty when the record is not a group mapping.
    #[inline]
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Account (or profile directory) name the identifier was last seen under.
    #[inline]
    #[must_use]
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    /// Whether an answer was recorded.
    #[inline]
    #[must_use]
    pub const fn is_defined(&self) -> bool {
        self.defined
    }

    /// Whether the identifier is the standard users group of its domain.
    #[inline]
    #[must_use]
    pub fn is_generic_group(&self) -> bool {
        self.identifier.is_generic_group()
    }
}

/// Mapping records keyed by canonical SID text, in output order.
#[derive(Debug, Default, Clone)]
pub struct MappingTable {
    records: Vec<MappingRecord>,
    order: VecDeque<RecordId>,
    index: HashMap<String, RecordId>,
}

impl MappingTable {
    /// An empty table.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table has no record.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Looks a record up by the canonical text of its identifier.
    #[inline]
    #[must_use]
    pub fn find(&self, sid: &str) -> Option<RecordId> {
        self.index.get(sid).copied()
    }

    /// The record behind `id`, if the handle belongs to this table.
    #[inline]
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<&MappingRecord> {
        self.records.get(id.0)
    }

    /// Returns the record for `identifier`, appending a pending one if the
    /// identifier was never seen. The boolean tells whether it was created.
    ///
    /// An existing record is returned untouched.
    pub fn find_or_create_pending(
        &mut self,
        identifier: &SecurityIdentifier,
        account: Option<&str>,
    ) -> (RecordId, bool) {
        if let Some(id) = self.find(identifier.as_str()) {
            return (id, false);
        }
        let id = self.push(MappingRecord::pending(identifier.clone(), account));
        self.order.push_back(id);
        (id, true)
    }

    /// Records an answer. The record becomes defined unless both ids are
    /// empty.
    pub fn resolve(&mut self, id: RecordId, owner: impl Into<String>, group: impl Into<String>) {
        if let Some(record) = self.records.get_mut(id.0) {
            record.set(owner.into(), group.into());
        }
    }

    /// Remembers the account name the identifier was prompted under.
    pub fn note_account(&mut self, id: RecordId, account: Option<&str>) {
        if let Some(record) = self.records.get_mut(id.0) {
            record.account = account.map(str::to_owned);
        }
    }

    /// Puts `record` first in output order.
    ///
    /// When its identifier is already known the existing record is replaced in
    /// place and moved to the front, so the table never holds two records for
    /// one identifier.
    pub fn prepend(&mut self, record: MappingRecord) -> RecordId {
        let id = if let Some(id) = self.find(record.sid()) {
            self.order.retain(|&other| other != id);
            if let Some(slot) = self.records.get_mut(id.0) {
                *slot = record;
            }
            id
        } else {
            self.push(record)
        };
        self.order.push_front(id);
        id
    }

    fn push(&mut self, record: MappingRecord) -> RecordId {
        let id = RecordId(self.records.len());
        self.index.insert(record.sid().to_owned(), id);
        self.records.push(record);
        id
    }

    /// Records in output order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &MappingRecord> + '_ {
        self.entries().map(|(_, record)| record)
    }

    /// Records with their handles, in output order.
    #[inline]
    pub fn entries(&self) -> impl Iterator<Item = (RecordId, &MappingRecord)> + '_ {
        self.order
            .iter()
            .filter_map(|&id| self.records.get(id.0).map(|record| (id, record)))
    }

    /// Records still waiting for an answer, in output order.
    #[inline]
    pub fn undecided(&self) -> impl Iterator<Item = &MappingRecord> + '_ {
        self.iter().filter(|record| !record.is_defined())
    }
}

impl Index<RecordId> for MappingTable {
    type Output = MappingRecord;

    #[inline]
    #[expect(
        clippy::indexing_slicing,
        reason = "handles are only issued by the table they index"
    )]
    fn index(&self, id: RecordId) -> &Self::Output {
        &self.records[id.0]
    }
}

impl<'a> IntoIterator for &'a MappingTable {
    type Item = &'a MappingRecord;
    type IntoIter = Box<dyn Iterator<Item = &'a MappingRecord> + 'a>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
