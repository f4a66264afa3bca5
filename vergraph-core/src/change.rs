//! Change nodes of the versioning DAG.
//!
//! A `PendingChange` is an edit in progress: fields are set, a parent is
//! chosen, merge conflicts are resolved. `freeze` is the one-way transition
//! into a `Change`: the content id is computed over the canonical bytes,
//! the node registers in its history, and the field changes are applied to
//! the live object. A frozen change is permanently immutable and compares
//! by content id alone.

use crate::accessor::FieldAccessor;
use crate::error::{Result, VersionError};
use crate::field::{FieldChange, SetChange, ValueChange};
use crate::history::History;
use crate::value::{write_len_prefixed, ChangeId, ObjectId, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An immutable, content-addressed node in an object's edit history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    id: ChangeId,
    target: ObjectId,
    parent: Option<ChangeId>,
    merge_parent: Option<ChangeId>,
    fields: BTreeMap<String, FieldChange>,
}

impl Change {
    pub(crate) fn new(
        id: ChangeId,
        target: ObjectId,
        parent: Option<ChangeId>,
        merge_parent: Option<ChangeId>,
        fields: BTreeMap<String, FieldChange>,
    ) -> Self {
        Self {
            id,
            target,
            parent,
            merge_parent,
            fields,
        }
    }

    pub fn id(&self) -> ChangeId {
        self.id
    }

    pub fn target(&self) -> ObjectId {
        self.target
    }

    /// First parent (the chain link ancestor walks follow)
    pub fn parent(&self) -> Option<ChangeId> {
        self.parent
    }

    /// Second parent, present only on merge changes
    pub fn merge_parent(&self) -> Option<ChangeId> {
        self.merge_parent
    }

    pub fn parents(&self) -> impl Iterator<Item = ChangeId> + '_ {
        [self.parent, self.merge_parent].into_iter().flatten()
    }

    pub fn is_merge(&self) -> bool {
        self.merge_parent.is_some()
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldChange> {
        &self.fields
    }
}

/// Frozen changes compare by content id alone
impl PartialEq for Change {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Change {}

impl std::hash::Hash for Change {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Canonical byte sequence a change's content id is computed over: target
/// id, two parent slots (sorted, nil sentinel when absent, so the hash is
/// independent of merge argument order and recomputable from a DTO's sorted
/// parent list), then the sorted `(field, change)` pairs. The change's own
/// id is never part of these bytes.
pub(crate) fn identity_bytes<'a>(
    target: ObjectId,
    parents: &[ChangeId],
    fields: impl ExactSizeIterator<Item = (&'a String, &'a FieldChange)>,
) -> Vec<u8> {
    let mut sorted: Vec<ChangeId> = parents.to_vec();
    sorted.sort();
    let mut slots = [ChangeId::NIL, ChangeId::NIL];
    for (slot, parent) in slots.iter_mut().zip(sorted.iter()) {
        *slot = *parent;
    }

    let mut buf = Vec::new();
    buf.extend_from_slice(target.as_bytes());
    buf.extend_from_slice(slots[0].as_bytes());
    buf.extend_from_slice(slots[1].as_bytes());
    buf.extend_from_slice(&(fields.len() as u32).to_le_bytes());
    for (name, fc) in fields {
        write_len_prefixed(&mut buf, name.as_bytes());
        fc.write_canonical(&mut buf);
    }
    buf
}

/// Which side of a conflict to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictSide {
    Ours,
    Theirs,
}

/// A field both branches changed differently since their common base.
///
/// Not an error: conflicts are expected merge outcomes, surfaced on the
/// merge change and resolved before it can freeze.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldConflict {
    field: String,
    /// The change in which the field was last modified on our branch
    ours: (ChangeId, FieldChange),
    /// Same, for their branch
    theirs: (ChangeId, FieldChange),
}

impl FieldConflict {
    pub(crate) fn new(
        field: &str,
        ours: (ChangeId, FieldChange),
        theirs: (ChangeId, FieldChange),
    ) -> Self {
        Self {
            field: field.to_string(),
            ours,
            theirs,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn ours(&self) -> (&ChangeId, &FieldChange) {
        (&self.ours.0, &self.ours.1)
    }

    pub fn theirs(&self) -> (&ChangeId, &FieldChange) {
        (&self.theirs.0, &self.theirs.1)
    }
}

/// An unfrozen change: mutable, identity not yet determined
#[derive(Debug, Clone)]
pub struct PendingChange {
    target: ObjectId,
    parent: Option<ChangeId>,
    merge_parent: Option<ChangeId>,
    fields: BTreeMap<String, FieldChange>,
    conflicts: BTreeMap<String, FieldConflict>,
}

impl PendingChange {
    pub(crate) fn new(target: ObjectId) -> Self {
        Self {
            target,
            parent: None,
            merge_parent: None,
            fields: BTreeMap::new(),
            conflicts: BTreeMap::new(),
        }
    }

    pub(crate) fn new_merge(target: ObjectId, ours: ChangeId, theirs: ChangeId) -> Self {
        Self {
            target,
            parent: Some(ours),
            merge_parent: Some(theirs),
            fields: BTreeMap::new(),
            conflicts: BTreeMap::new(),
        }
    }

    pub fn target(&self) -> ObjectId {
        self.target
    }

    pub fn parent(&self) -> Option<ChangeId> {
        self.parent
    }

    pub fn merge_parent(&self) -> Option<ChangeId> {
        self.merge_parent
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldChange> {
        &self.fields
    }

    /// Record a field assignment. A dotted name (`"loc.city"`) records a
    /// sub-property override on its root field. Setting a conflicted field
    /// resolves the conflict with the explicit value.
    pub fn set_field(&mut self, field: &str, value: Value) -> Result<()> {
        let (root, fc) = match field.split_once('.') {
            Some((root, path)) => (root, FieldChange::Value(ValueChange::assign_sub(path, value))),
            None => (field, FieldChange::Value(ValueChange::assign(value))),
        };
        self.put_delta(root, fc)
    }

    /// Record a set-item addition on a set-valued field
    pub fn add_item(&mut self, field: &str, item: Value) -> Result<()> {
        let mut sc = SetChange::new();
        sc.add_item(item);
        self.put_delta(field, FieldChange::Set(sc))
    }

    /// Record a set-item removal on a set-valued field
    pub fn remove_item(&mut self, field: &str, item: Value) -> Result<()> {
        let mut sc = SetChange::new();
        sc.remove_item(item);
        self.put_delta(field, FieldChange::Set(sc))
    }

    fn put_delta(&mut self, field: &str, fc: FieldChange) -> Result<()> {
        self.conflicts.remove(field);
        match self.fields.get_mut(field) {
            Some(existing) => existing.add_change(&fc)?,
            None => {
                self.fields.insert(field.to_string(), fc);
            }
        }
        Ok(())
    }

    pub(crate) fn put_field(&mut self, field: &str, fc: FieldChange) {
        self.fields.insert(field.to_string(), fc);
    }

    pub(crate) fn put_conflict(&mut self, conflict: FieldConflict) {
        self.conflicts.insert(conflict.field.clone(), conflict);
    }

    /// Choose the parent this change builds on; it must be a known change
    /// of the same history.
    pub fn set_parent(&mut self, history: &History, parent: ChangeId) -> Result<()> {
        if history.global_id() != self.target {
            return Err(VersionError::ForeignParent {
                expected: self.target,
                found: history.global_id(),
            });
        }
        history.get(parent)?;
        self.parent = Some(parent);
        Ok(())
    }

    /// Unresolved merge conflicts, keyed by field name
    pub fn conflicts(&self) -> &BTreeMap<String, FieldConflict> {
        &self.conflicts
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Resolve a conflict by keeping one side's change
    pub fn resolve(&mut self, field: &str, side: ConflictSide) -> Result<()> {
        let conflict = self
            .conflicts
            .remove(field)
            .ok_or_else(|| VersionError::UnknownField(field.to_string()))?;
        let (_, fc) = match side {
            ConflictSide::Ours => conflict.ours,
            ConflictSide::Theirs => conflict.theirs,
        };
        self.fields.insert(field.to_string(), fc);
        Ok(())
    }

    /// The value a (possibly dotted) field would hold after this change:
    /// the locally recorded delta folded over the parent chain.
    pub fn get_field(&self, history: &History, field: &str) -> Result<Option<Value>> {
        let (root, sub) = match field.split_once('.') {
            Some((root, sub)) => (root, Some(sub)),
            None => (field, None),
        };
        let mut folded = self.fields.get(root).cloned();
        let complete = matches!(
            &folded,
            Some(FieldChange::Value(vc)) if vc.value.is_some()
        );
        if !complete {
            if let Some(parent) = self.parent.or(history.version()) {
                if let Some(earlier) = history.effective_field_change(parent, root)? {
                    match &mut folded {
                        None => folded = Some(earlier),
                        Some(f) => f.add_earlier(&earlier)?,
                    }
                }
            }
        }
        Ok(folded.and_then(|fc| fc.materialized_value(sub)))
    }

    /// Freeze this change: the terminal, one-way transition.
    ///
    /// Defaults the parent to the history's current version; a change on an
    /// empty history becomes the initial change and records every accessor
    /// field's current value. Fails while conflicts are unresolved.
    /// Computes the content id, registers the node (updating heads), and
    /// applies the field changes to the live object.
    pub fn freeze<T>(
        mut self,
        history: &mut History,
        target: &mut T,
        accessor: &dyn FieldAccessor<T>,
    ) -> Result<ChangeId> {
        if !self.conflicts.is_empty() {
            return Err(VersionError::UnresolvedConflicts(self.conflicts.len()));
        }
        if history.global_id() != self.target {
            return Err(VersionError::ForeignParent {
                expected: self.target,
                found: history.global_id(),
            });
        }
        if self.parent.is_none() {
            match history.version() {
                Some(version) => self.parent = Some(version),
                None if history.is_empty() => {
                    // initial change: capture the object's full default state
                    // so remote replicas can bootstrap from it
                    for field in accessor.fields() {
                        if !self.fields.contains_key(field) {
                            let value = accessor.get(target, field)?;
                            self.fields
                                .insert(field.clone(), FieldChange::Value(ValueChange::assign(value)));
                        }
                    }
                }
                None => {
                    return Err(VersionError::UnrelatedVersion {
                        parent: None,
                        version: None,
                    })
                }
            }
        }

        let parents: Vec<ChangeId> =
            [self.parent, self.merge_parent].into_iter().flatten().collect();
        let id = ChangeId::from_content(&identity_bytes(
            self.target,
            &parents,
            self.fields.iter(),
        ));
        let change = Change::new(id, self.target, self.parent, self.merge_parent, self.fields);
        let fields = change.fields().clone();
        history.install(change)?;
        for (name, fc) in &fields {
            fc.apply(name, target, accessor)?;
        }
        tracing::debug!(
            change = %id.short(),
            target = %self.target.short(),
            fields = fields.len(),
            "froze change"
        );
        Ok(id)
    }
}
