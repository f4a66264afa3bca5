//! Per-object change history.
//!
//! A `History` is the aggregate of all known changes for one versioned
//! object: an arena of frozen changes keyed by content id, the set of heads
//! (unmerged branch tips), child back-links, and the pointer to the change
//! currently materialized into the live object. Changes reference each
//! other by id only; there are no object cycles.

use crate::change::{Change, FieldConflict, PendingChange};
use crate::error::{Result, VersionError};
use crate::field::{FieldChange, FieldMerge};
use crate::value::{ChangeId, ObjectId, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Bound on parent-chain walks; exceeding it means the arena holds a
/// cyclic parent chain, which is a representation-integrity violation.
pub const MAX_CHAIN_DEPTH: usize = 100_000;

/// All known changes of one versioned object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    global_id: ObjectId,
    /// Arena of frozen changes, keyed by content id
    changes: BTreeMap<ChangeId, Change>,
    /// Changes with no recorded child
    heads: BTreeSet<ChangeId>,
    /// Child back-links, for head tracking
    children: BTreeMap<ChangeId, BTreeSet<ChangeId>>,
    /// The change currently applied to the live object
    version: Option<ChangeId>,
}

impl History {
    pub fn new(global_id: ObjectId) -> Self {
        Self {
            global_id,
            changes: BTreeMap::new(),
            heads: BTreeSet::new(),
            children: BTreeMap::new(),
            version: None,
        }
    }

    pub fn global_id(&self) -> ObjectId {
        self.global_id
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn contains(&self, id: ChangeId) -> bool {
        self.changes.contains_key(&id)
    }

    pub fn lookup(&self, id: ChangeId) -> Option<&Change> {
        self.changes.get(&id)
    }

    pub fn get(&self, id: ChangeId) -> Result<&Change> {
        self.changes
            .get(&id)
            .ok_or(VersionError::UnknownChange(id))
    }

    /// Unmerged branch tips
    pub fn heads(&self) -> &BTreeSet<ChangeId> {
        &self.heads
    }

    pub fn children_of(&self, id: ChangeId) -> Option<&BTreeSet<ChangeId>> {
        self.children.get(&id)
    }

    pub fn version(&self) -> Option<ChangeId> {
        self.version
    }

    /// Move the current-version pointer; the change must be known
    pub fn set_version(&mut self, version: Option<ChangeId>) -> Result<()> {
        if let Some(id) = version {
            if !self.contains(id) {
                return Err(VersionError::UnknownChange(id));
            }
        }
        self.version = version;
        Ok(())
    }

    /// Start a new unfrozen change bound to this history
    pub fn create_change(&self) -> PendingChange {
        PendingChange::new(self.global_id)
    }

    /// Register a frozen change: parents leave the head set, the change
    /// joins it. Idempotent for an already-known id.
    pub(crate) fn install(&mut self, change: Change) -> Result<ChangeId> {
        let id = change.id();
        if self.changes.contains_key(&id) {
            return Ok(id);
        }
        if change.target() != self.global_id {
            return Err(VersionError::ForeignParent {
                expected: self.global_id,
                found: change.target(),
            });
        }
        for parent in change.parents() {
            if !self.contains(parent) {
                return Err(VersionError::MissingParent(parent));
            }
        }
        for parent in change.parents() {
            self.heads.remove(&parent);
            self.children.entry(parent).or_default().insert(id);
        }
        self.changes.insert(id, change);
        self.heads.insert(id);
        Ok(id)
    }

    /// Install an imported change as the genesis state of a fresh replica,
    /// skipping parent resolution. The history must be empty.
    pub(crate) fn install_genesis(&mut self, change: Change) -> Result<ChangeId> {
        if !self.is_empty() {
            return Err(VersionError::Unsupported(
                "genesis install into a non-empty history",
            ));
        }
        if change.target() != self.global_id {
            return Err(VersionError::ForeignParent {
                expected: self.global_id,
                found: change.target(),
            });
        }
        let id = change.id();
        self.changes.insert(id, change);
        self.heads.insert(id);
        Ok(id)
    }

    /// Walk first-parent links from `from` to the root, latest first
    pub fn ancestor_chain(&self, from: ChangeId) -> Result<Vec<ChangeId>> {
        let mut chain = Vec::new();
        let mut cur = Some(from);
        while let Some(id) = cur {
            if chain.len() >= MAX_CHAIN_DEPTH {
                return Err(VersionError::CyclicHistory(self.global_id));
            }
            chain.push(id);
            cur = self.get(id)?.parent();
        }
        Ok(chain)
    }

    /// Nearest shared ancestor of two changes, by first-parent chain
    /// intersection
    pub fn common_base(&self, a: ChangeId, b: ChangeId) -> Result<Option<ChangeId>> {
        let ours: BTreeSet<ChangeId> = self.ancestor_chain(a)?.into_iter().collect();
        let mut cur = Some(b);
        let mut depth = 0;
        while let Some(id) = cur {
            depth += 1;
            if depth > MAX_CHAIN_DEPTH {
                return Err(VersionError::CyclicHistory(self.global_id));
            }
            if ours.contains(&id) {
                return Ok(Some(id));
            }
            cur = self.get(id)?.parent();
        }
        Ok(None)
    }

    /// Fold the chain's changes to one field into a single change, walking
    /// from `from` back toward the root (latest wins per path/item). Stops
    /// early once a whole-field assignment makes earlier changes
    /// unobservable. A fold that reaches the root is absolute.
    pub fn effective_field_change(
        &self,
        from: ChangeId,
        field: &str,
    ) -> Result<Option<FieldChange>> {
        let mut folded: Option<FieldChange> = None;
        let mut cur = Some(from);
        let mut depth = 0;
        while let Some(id) = cur {
            depth += 1;
            if depth > MAX_CHAIN_DEPTH {
                return Err(VersionError::CyclicHistory(self.global_id));
            }
            let change = self.get(id)?;
            if let Some(fc) = change.fields().get(field) {
                match &mut folded {
                    None => folded = Some(fc.clone()),
                    Some(f) => f.add_earlier(fc)?,
                }
                if let Some(FieldChange::Value(vc)) = &folded {
                    if vc.value.is_some() {
                        return Ok(folded);
                    }
                }
            }
            cur = change.parent();
        }
        Ok(folded)
    }

    /// The value a (possibly dotted) field holds as of `from`; `None` at
    /// the DAG root or if the chain never touched the field.
    pub fn field_value_at(&self, from: Option<ChangeId>, field: &str) -> Result<Option<Value>> {
        let Some(from) = from else {
            return Ok(None);
        };
        let (root, sub) = match field.split_once('.') {
            Some((root, sub)) => (root, Some(sub)),
            None => (field, None),
        };
        let Some(folded) = self.effective_field_change(from, root)? else {
            return Ok(None);
        };
        Ok(folded.materialized_value(sub))
    }

    /// A change restoring `field` to the last value it held before
    /// `change` took effect (walks the baseline chain parent-first).
    pub fn reverse_field(&self, change: ChangeId, field: &str) -> Result<FieldChange> {
        let node = self.get(change)?;
        let fc = node
            .fields()
            .get(field)
            .ok_or_else(|| VersionError::UnknownField(field.to_string()))?;
        let prior = self.field_value_at(node.parent(), field)?;
        fc.reverse_from(prior.as_ref())
    }

    /// Three-way merge of two frozen changes of this history.
    ///
    /// Finds the common base by first-parent chain intersection, then
    /// accumulates the most recent change per field on each side down to
    /// the base. Fields touched on one side carry over unconditionally;
    /// fields touched on both sides merge where they agree and surface a
    /// `FieldConflict` where they do not. The returned change is unfrozen,
    /// parented on both inputs, and freezable only once every conflict is
    /// resolved.
    pub fn merge(&self, ours: ChangeId, theirs: ChangeId) -> Result<PendingChange> {
        let our_ancestors: BTreeSet<ChangeId> =
            self.ancestor_chain(ours)?.into_iter().collect();

        // walk theirs toward the root; the first node already known on our
        // side is the common base
        let mut base = None;
        let mut their_side: BTreeMap<String, (ChangeId, FieldChange)> = BTreeMap::new();
        let mut cur = Some(theirs);
        let mut depth = 0;
        while let Some(id) = cur {
            depth += 1;
            if depth > MAX_CHAIN_DEPTH {
                return Err(VersionError::CyclicHistory(self.global_id));
            }
            if our_ancestors.contains(&id) {
                base = Some(id);
                break;
            }
            let change = self.get(id)?;
            Self::accumulate_side(&mut their_side, id, change)?;
            cur = change.parent();
        }
        let base = base.ok_or(VersionError::UnrelatedVersion {
            parent: Some(ours),
            version: Some(theirs),
        })?;

        // symmetric accumulation on our side, down to (excluding) the base
        let mut our_side: BTreeMap<String, (ChangeId, FieldChange)> = BTreeMap::new();
        let mut cur = Some(ours);
        while let Some(id) = cur {
            if id == base {
                break;
            }
            let change = self.get(id)?;
            Self::accumulate_side(&mut our_side, id, change)?;
            cur = change.parent();
        }

        let mut merged = PendingChange::new_merge(self.global_id, ours, theirs);
        let field_names: BTreeSet<&String> =
            our_side.keys().chain(their_side.keys()).collect();
        for name in field_names {
            match (our_side.get(name), their_side.get(name)) {
                (Some((_, fc)), None) | (None, Some((_, fc))) => {
                    merged.put_field(name, fc.clone());
                }
                (Some((our_id, our_fc)), Some((their_id, their_fc))) => {
                    match our_fc.merge(their_fc) {
                        FieldMerge::Merged(fc) => merged.put_field(name, fc),
                        FieldMerge::Conflict => merged.put_conflict(FieldConflict::new(
                            name,
                            (*our_id, our_fc.clone()),
                            (*their_id, their_fc.clone()),
                        )),
                    }
                }
                (None, None) => unreachable!(),
            }
        }

        tracing::debug!(
            ours = %ours.short(),
            theirs = %theirs.short(),
            base = %base.short(),
            conflicts = merged.conflicts().len(),
            "merged branches"
        );
        Ok(merged)
    }

    /// Record one branch-side change per field, latest occurrence winning;
    /// earlier occurrences are absorbed so sub-property and set state stays
    /// complete.
    fn accumulate_side(
        side: &mut BTreeMap<String, (ChangeId, FieldChange)>,
        id: ChangeId,
        change: &Change,
    ) -> Result<()> {
        for (name, fc) in change.fields() {
            match side.get_mut(name) {
                None => {
                    side.insert(name.clone(), (id, fc.clone()));
                }
                Some((_, recorded)) => recorded.add_earlier(fc)?,
            }
        }
        Ok(())
    }
}
