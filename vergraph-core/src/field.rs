//! Field-level change model.
//!
//! A `FieldChange` describes how one field of a versioned object mutated:
//! either a value assignment (whole field and/or dotted sub-properties) or
//! a set delta (items added and removed). Field changes know how to detect
//! conflicts with each other, fold chronologically (later wins), merge
//! across branches, and reverse against a prior value.

use crate::accessor::FieldAccessor;
use crate::error::{Result, VersionError};
use crate::value::{write_len_prefixed, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of merging two field changes from diverged branches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldMerge {
    /// Both sides agree (or touch disjoint sub-properties); the combined change
    Merged(FieldChange),
    /// The sides disagree on at least one concrete path or set item
    Conflict,
}

/// One field's mutation, as recorded in a change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldChange {
    Value(ValueChange),
    Set(SetChange),
}

impl FieldChange {
    /// True if the two changes cannot coexist without a conflict.
    ///
    /// Value-vs-set on the same field always conflicts.
    pub fn conflicts_with(&self, other: &FieldChange) -> bool {
        match (self, other) {
            (FieldChange::Value(a), FieldChange::Value(b)) => a.conflicts_with(b),
            (FieldChange::Set(a), FieldChange::Set(b)) => a.conflicts_with(b),
            _ => true,
        }
    }

    /// Fold `later` on top of this change (later wins per path/item)
    pub fn add_change(&mut self, later: &FieldChange) -> Result<()> {
        match (self, later) {
            (FieldChange::Value(a), FieldChange::Value(b)) => {
                a.add_change(b);
                Ok(())
            }
            (FieldChange::Set(a), FieldChange::Set(b)) => {
                a.add_change(b);
                Ok(())
            }
            _ => Err(VersionError::FieldKindMismatch),
        }
    }

    /// Absorb an `earlier` change under this one: anything this change has
    /// not itself touched keeps the earlier state.
    ///
    /// A set delta over an earlier materialized set (or an unset field)
    /// collapses into the materialized result, so a fold that walks a chain
    /// back to its root always ends in an absolute value.
    pub fn add_earlier(&mut self, earlier: &FieldChange) -> Result<()> {
        match (&mut *self, earlier) {
            (FieldChange::Value(a), FieldChange::Value(b)) => {
                a.add_earlier(b);
                Ok(())
            }
            (FieldChange::Set(a), FieldChange::Set(b)) => {
                a.add_earlier(b);
                Ok(())
            }
            (FieldChange::Set(sc), FieldChange::Value(vc)) => {
                let base = match &vc.value {
                    Some(Value::Set(items)) => items.clone(),
                    Some(Value::Null) | None => BTreeSet::new(),
                    Some(_) => return Err(VersionError::FieldKindMismatch),
                };
                let materialized = sc.apply_to(&base);
                *self = FieldChange::Value(ValueChange::assign(Value::Set(materialized)));
                Ok(())
            }
            (FieldChange::Value(vc), FieldChange::Set(_)) => {
                if vc.value.is_some() {
                    // whole-field assignment already wins over any earlier delta
                    Ok(())
                } else {
                    Err(VersionError::FieldKindMismatch)
                }
            }
        }
    }

    /// Merge two branch-side changes to the same field
    pub fn merge(&self, other: &FieldChange) -> FieldMerge {
        match (self, other) {
            (FieldChange::Value(a), FieldChange::Value(b)) => a.merge(b),
            (FieldChange::Set(a), FieldChange::Set(b)) => a.merge(b),
            _ => FieldMerge::Conflict,
        }
    }

    /// Build a change that restores `prior`, the value the field held
    /// before this change took effect.
    pub fn reverse_from(&self, prior: Option<&Value>) -> Result<FieldChange> {
        match self {
            FieldChange::Value(_) => Ok(FieldChange::Value(ValueChange::assign(
                prior.cloned().unwrap_or(Value::Null),
            ))),
            FieldChange::Set(_) => Err(VersionError::Unsupported("reverse of a set change")),
        }
    }

    /// Apply this change as a delta to the live object
    pub fn apply<T>(
        &self,
        field: &str,
        target: &mut T,
        accessor: &dyn FieldAccessor<T>,
    ) -> Result<()> {
        match self {
            FieldChange::Value(vc) => {
                if let Some(v) = &vc.value {
                    accessor.set(target, field, v.clone())?;
                }
                for (path, v) in &vc.sub_values {
                    accessor.set(target, &format!("{}.{}", field, path), v.clone())?;
                }
                Ok(())
            }
            FieldChange::Set(sc) => {
                let base = match accessor.get(target, field)? {
                    Value::Set(items) => items,
                    Value::Null => BTreeSet::new(),
                    _ => return Err(VersionError::FieldKindMismatch),
                };
                accessor.set(target, field, Value::Set(sc.apply_to(&base)))
            }
        }
    }

    /// Write the field to the live object as an absolute state (used by
    /// checkout, where the live object may sit on a diverged branch).
    ///
    /// Only meaningful for a change folded back to the chain root.
    pub fn apply_absolute<T>(
        &self,
        field: &str,
        target: &mut T,
        accessor: &dyn FieldAccessor<T>,
    ) -> Result<()> {
        match self {
            FieldChange::Value(vc) => {
                if let Some(v) = &vc.value {
                    accessor.set(target, field, v.clone())?;
                }
                for (path, v) in &vc.sub_values {
                    accessor.set(target, &format!("{}.{}", field, path), v.clone())?;
                }
                Ok(())
            }
            // a set delta with no root assignment below it: base is empty
            FieldChange::Set(sc) => accessor.set(target, field, Value::Set(sc.added.clone())),
        }
    }

    /// The absolute value this change yields once folded back to the chain
    /// root: the whole value (or one sub-property of it), or the
    /// materialized set.
    pub fn materialized_value(&self, sub: Option<&str>) -> Option<Value> {
        match self {
            FieldChange::Value(vc) => match sub {
                Some(path) => vc.sub_values.get(path).cloned(),
                None => vc.value.clone(),
            },
            FieldChange::Set(sc) => {
                if sub.is_some() {
                    return None;
                }
                Some(Value::Set(sc.added.clone()))
            }
        }
    }

    /// True if the change records no delta at all
    pub fn is_empty(&self) -> bool {
        match self {
            FieldChange::Value(vc) => vc.value.is_none() && vc.sub_values.is_empty(),
            FieldChange::Set(sc) => sc.added.is_empty() && sc.removed.is_empty(),
        }
    }

    /// Canonical byte encoding: discriminant tag, then the variant payload
    pub fn write_canonical(&self, buf: &mut Vec<u8>) {
        match self {
            FieldChange::Value(vc) => {
                buf.push(0x01);
                match &vc.value {
                    Some(v) => {
                        buf.push(1);
                        v.write_canonical(buf);
                    }
                    None => buf.push(0),
                }
                buf.extend_from_slice(&(vc.sub_values.len() as u32).to_le_bytes());
                for (path, v) in &vc.sub_values {
                    write_len_prefixed(buf, path.as_bytes());
                    v.write_canonical(buf);
                }
            }
            FieldChange::Set(sc) => {
                buf.push(0x02);
                buf.extend_from_slice(&(sc.added.len() as u32).to_le_bytes());
                for item in &sc.added {
                    item.write_canonical(buf);
                }
                buf.extend_from_slice(&(sc.removed.len() as u32).to_le_bytes());
                for item in &sc.removed {
                    item.write_canonical(buf);
                }
            }
        }
    }
}

/// A value assignment: the whole field, dotted sub-properties, or both.
///
/// Two changes to disjoint sub-properties of one field do not conflict; a
/// bare whole-field assignment conflicts with any sub-property change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueChange {
    /// Whole-field assignment, if any
    pub value: Option<Value>,
    /// Sub-property overrides keyed by dotted path below the field
    pub sub_values: BTreeMap<String, Value>,
}

impl ValueChange {
    /// Assign the whole field
    pub fn assign(value: Value) -> Self {
        Self {
            value: Some(value),
            sub_values: BTreeMap::new(),
        }
    }

    /// Assign a single sub-property
    pub fn assign_sub(path: &str, value: Value) -> Self {
        let mut sub_values = BTreeMap::new();
        sub_values.insert(path.to_string(), value);
        Self {
            value: None,
            sub_values,
        }
    }

    /// True unless the other change has an equal top-level value or the two
    /// touch disjoint sub-property paths.
    pub fn conflicts_with(&self, other: &ValueChange) -> bool {
        match (&self.value, &other.value) {
            (Some(a), Some(b)) if a != b => return true,
            // a bare whole-field assignment overlaps every sub-property
            (Some(_), None) if !other.sub_values.is_empty() => return true,
            (None, Some(_)) if !self.sub_values.is_empty() => return true,
            _ => {}
        }
        self.sub_values
            .iter()
            .any(|(path, v)| other.sub_values.get(path).is_some_and(|w| w != v))
    }

    /// Fold `later` on top: a later whole-field assignment clears all
    /// recorded sub-property overrides; a later sub-property assignment
    /// overrides only that path.
    pub fn add_change(&mut self, later: &ValueChange) {
        if later.value.is_some() {
            self.value = later.value.clone();
            self.sub_values.clear();
        }
        for (path, v) in &later.sub_values {
            self.sub_values.insert(path.clone(), v.clone());
        }
    }

    /// Absorb `earlier`: a whole-field assignment here already wins;
    /// otherwise keep the earlier field value and any earlier sub-property
    /// this change has not touched.
    pub fn add_earlier(&mut self, earlier: &ValueChange) {
        if self.value.is_some() {
            return;
        }
        self.value = earlier.value.clone();
        for (path, v) in &earlier.sub_values {
            self.sub_values
                .entry(path.clone())
                .or_insert_with(|| v.clone());
        }
    }

    fn merge(&self, other: &ValueChange) -> FieldMerge {
        if self.conflicts_with(other) {
            return FieldMerge::Conflict;
        }
        let mut combined = self.clone();
        if combined.value.is_none() {
            combined.value = other.value.clone();
        }
        for (path, v) in &other.sub_values {
            combined
                .sub_values
                .entry(path.clone())
                .or_insert_with(|| v.clone());
        }
        FieldMerge::Merged(FieldChange::Value(combined))
    }
}

/// A set delta: items added and items removed.
///
/// An item never appears in both sets; adding cancels a pending removal and
/// vice versa, so add-then-remove of the same item within one change leaves
/// no recorded delta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetChange {
    pub added: BTreeSet<Value>,
    pub removed: BTreeSet<Value>,
}

impl SetChange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&mut self, item: Value) {
        if !self.removed.remove(&item) {
            self.added.insert(item);
        }
    }

    pub fn remove_item(&mut self, item: Value) {
        if !self.added.remove(&item) {
            self.removed.insert(item);
        }
    }

    /// Conflicts iff an item removed by one side was added by the other
    pub fn conflicts_with(&self, other: &SetChange) -> bool {
        !self.added.is_disjoint(&other.removed) || !self.removed.is_disjoint(&other.added)
    }

    /// Fold `later` on top, later wins per item
    pub fn add_change(&mut self, later: &SetChange) {
        for item in &later.added {
            self.add_item(item.clone());
        }
        for item in &later.removed {
            self.remove_item(item.clone());
        }
    }

    /// Absorb `earlier`: keep earlier adds/removes for items this change
    /// has not itself decided.
    pub fn add_earlier(&mut self, earlier: &SetChange) {
        for item in &earlier.added {
            if !self.added.contains(item) && !self.removed.contains(item) {
                self.added.insert(item.clone());
            }
        }
        for item in &earlier.removed {
            if !self.added.contains(item) && !self.removed.contains(item) {
                self.removed.insert(item.clone());
            }
        }
    }

    fn merge(&self, other: &SetChange) -> FieldMerge {
        if self.conflicts_with(other) {
            return FieldMerge::Conflict;
        }
        let mut combined = self.clone();
        combined.added.extend(other.added.iter().cloned());
        combined.removed.extend(other.removed.iter().cloned());
        FieldMerge::Merged(FieldChange::Set(combined))
    }

    /// Materialize the delta against a base set
    pub fn apply_to(&self, base: &BTreeSet<Value>) -> BTreeSet<Value> {
        let mut result: BTreeSet<Value> = base
            .iter()
            .filter(|item| !self.removed.contains(*item))
            .cloned()
            .collect();
        result.extend(self.added.iter().cloned());
        result
    }
}
