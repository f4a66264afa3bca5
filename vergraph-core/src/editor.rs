//! Live-object editing and checkout.
//!
//! `VersionedObjectEditor` is the host's entry point for mutating a
//! versioned object: it accumulates an edit session into a pending change,
//! applies it (freeze + version-pointer move), adopts merge results, and
//! checks the live object out to an arbitrary node of the DAG with the
//! minimal correct set of field writes.

use crate::accessor::FieldAccessor;
use crate::change::PendingChange;
use crate::error::{Result, VersionError};
use crate::field::FieldChange;
use crate::history::{History, MAX_CHAIN_DEPTH};
use crate::value::{ChangeId, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Edit session over one live object and its history
pub struct VersionedObjectEditor<'a, T> {
    history: &'a mut History,
    target: &'a mut T,
    accessor: &'a dyn FieldAccessor<T>,
    pending: Option<PendingChange>,
}

impl<'a, T> VersionedObjectEditor<'a, T> {
    pub fn new(
        history: &'a mut History,
        target: &'a mut T,
        accessor: &'a dyn FieldAccessor<T>,
    ) -> Self {
        Self {
            history,
            target,
            accessor,
            pending: None,
        }
    }

    pub fn history(&self) -> &History {
        self.history
    }

    pub fn target(&self) -> &T {
        self.target
    }

    fn pending(&mut self) -> &mut PendingChange {
        if self.pending.is_none() {
            self.pending = Some(self.history.create_change());
        }
        self.pending.as_mut().unwrap()
    }

    pub fn has_pending_edit(&self) -> bool {
        self.pending.is_some()
    }

    /// Record a field assignment in the current edit session
    pub fn set_field(&mut self, field: &str, value: Value) -> Result<()> {
        self.pending().set_field(field, value)
    }

    pub fn add_item(&mut self, field: &str, item: Value) -> Result<()> {
        self.pending().add_item(field, item)
    }

    pub fn remove_item(&mut self, field: &str, item: Value) -> Result<()> {
        self.pending().remove_item(field, item)
    }

    /// The value a field would hold after the current edit session
    pub fn get_field(&self, field: &str) -> Result<Option<Value>> {
        match &self.pending {
            Some(p) => p.get_field(self.history, field),
            None => self.history.field_value_at(self.history.version(), field),
        }
    }

    /// Freeze the current edit session and materialize it.
    pub fn apply(&mut self) -> Result<ChangeId> {
        let pending = self
            .pending
            .take()
            .ok_or(VersionError::Unsupported("apply without a pending edit"))?;
        self.apply_change(pending)
    }

    /// Freeze an externally built change (typically a merge result) on top
    /// of the object's current version.
    ///
    /// The change's parent must equal the current version, or the current
    /// version must be unset if this is the DAG root; anything else is
    /// "applying on top of unrelated change".
    pub fn apply_change(&mut self, change: PendingChange) -> Result<ChangeId> {
        let version = self.history.version();
        if let Some(parent) = change.parent() {
            if Some(parent) != version {
                return Err(VersionError::UnrelatedVersion {
                    parent: Some(parent),
                    version,
                });
            }
        }
        // freeze defaults an unset parent to the current version, writes
        // every changed field through the accessor, and registers the node
        let id = change.freeze(self.history, self.target, self.accessor)?;
        self.history.set_version(Some(id))?;
        Ok(id)
    }

    /// Move the live object from its current version to an arbitrary other
    /// node of the DAG (ancestor, descendant, or diverged branch).
    ///
    /// Fields are rewritten only where necessary: a field encountered on
    /// the new version's chain is written if the walk has not yet passed
    /// the common base, or if the old branch diverged on it since the base.
    pub fn change_to_version(&mut self, new_version: ChangeId) -> Result<()> {
        if self.pending.is_some() {
            return Err(VersionError::Unsupported("checkout with a pending edit"));
        }
        self.history.get(new_version)?;
        let old_version = self.history.version();
        if old_version == Some(new_version) {
            return Ok(());
        }

        let base = match old_version {
            Some(old) => self.history.common_base(old, new_version)?,
            None => None,
        };

        // fields the old branch touched since the base: these must be
        // restored even below the base. Dotted sub-property overrides are
        // tracked per root field so stale overrides get cleared too.
        let mut divergent: BTreeSet<String> = BTreeSet::new();
        let mut divergent_subs: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        if let Some(old) = old_version {
            let mut cur = Some(old);
            let mut depth = 0;
            while let Some(id) = cur {
                if Some(id) == base {
                    break;
                }
                depth += 1;
                if depth > MAX_CHAIN_DEPTH {
                    return Err(VersionError::CyclicHistory(self.history.global_id()));
                }
                let change = self.history.get(id)?;
                for (field, fc) in change.fields() {
                    divergent.insert(field.clone());
                    if let FieldChange::Value(vc) = fc {
                        if !vc.sub_values.is_empty() {
                            divergent_subs
                                .entry(field.clone())
                                .or_default()
                                .extend(vc.sub_values.keys().cloned());
                        }
                    }
                }
                cur = change.parent();
            }
        }

        // walk the new version's chain to the root; each field's first
        // occurrence decides whether it gets written
        let mut passed_base = false;
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut to_write: BTreeSet<String> = BTreeSet::new();
        let mut cur = Some(new_version);
        let mut depth = 0;
        while let Some(id) = cur {
            depth += 1;
            if depth > MAX_CHAIN_DEPTH {
                return Err(VersionError::CyclicHistory(self.history.global_id()));
            }
            if Some(id) == base {
                passed_base = true;
            }
            let change = self.history.get(id)?;
            for field in change.fields().keys() {
                if seen.insert(field.clone()) && (!passed_base || divergent.contains(field)) {
                    to_write.insert(field.clone());
                }
            }
            cur = change.parent();
        }

        for field in &to_write {
            // absolute state as of the new version, folded to the root
            if let Some(fc) = self.history.effective_field_change(new_version, field)? {
                fc.apply_absolute(field, self.target, self.accessor)?;
            }
            // sub-paths the old branch overrode revert to their state as of
            // the new version; Null clears an override its chain never set
            if let Some(paths) = divergent_subs.get(field) {
                for path in paths {
                    let dotted = format!("{}.{}", field, path);
                    let value = self
                        .history
                        .field_value_at(Some(new_version), &dotted)?
                        .unwrap_or(Value::Null);
                    self.accessor.set(self.target, &dotted, value)?;
                }
            }
        }

        self.history.set_version(Some(new_version))?;
        tracing::debug!(
            version = %new_version.short(),
            writes = to_write.len(),
            "checked out version"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::{FieldAccessor, MapAccessor, MapObject};
    use crate::value::ObjectId;

    fn setup() -> (History, MapObject, MapAccessor) {
        let id = ObjectId::generate();
        let accessor = MapAccessor::new("image", &["f1", "f2", "tags"]);
        let mut target = accessor.create_default(id);
        target.values.insert("f1".into(), Value::Int(1));
        target.values.insert("f2".into(), Value::Int(2));
        (History::new(id), target, accessor)
    }

    #[test]
    fn test_apply_creates_and_materializes_change() {
        let (mut history, mut target, accessor) = setup();
        let mut editor = VersionedObjectEditor::new(&mut history, &mut target, &accessor);
        editor.set_field("f1", Value::Int(5)).unwrap();
        let id = editor.apply().unwrap();

        assert_eq!(history.version(), Some(id));
        assert_eq!(target.get("f1"), Value::Int(5));
    }

    #[test]
    fn test_apply_without_edit_fails() {
        let (mut history, mut target, accessor) = setup();
        let mut editor = VersionedObjectEditor::new(&mut history, &mut target, &accessor);
        assert!(matches!(
            editor.apply(),
            Err(VersionError::Unsupported(_))
        ));
    }

    #[test]
    fn test_apply_on_unrelated_version_fails() {
        let (mut history, mut target, accessor) = setup();
        let c0;
        let c1;
        {
            let mut editor = VersionedObjectEditor::new(&mut history, &mut target, &accessor);
            editor.set_field("f1", Value::Int(5)).unwrap();
            c0 = editor.apply().unwrap();
            editor.set_field("f1", Value::Int(6)).unwrap();
            c1 = editor.apply().unwrap();
        }
        assert_eq!(history.version(), Some(c1));

        // a change parented on c0 while the object sits at c1
        let mut stale = history.create_change();
        stale.set_parent(&history, c0).unwrap();
        stale.set_field("f2", Value::Int(9)).unwrap();
        let mut editor = VersionedObjectEditor::new(&mut history, &mut target, &accessor);
        assert!(matches!(
            editor.apply_change(stale),
            Err(VersionError::UnrelatedVersion { .. })
        ));
    }

    #[test]
    fn test_checkout_to_ancestor_and_back() {
        let (mut history, mut target, accessor) = setup();
        let mut editor = VersionedObjectEditor::new(&mut history, &mut target, &accessor);
        let c0 = {
            editor.set_field("f1", Value::Int(1)).unwrap();
            editor.apply().unwrap()
        };
        editor.set_field("f1", Value::Int(10)).unwrap();
        editor.set_field("f2", Value::Int(20)).unwrap();
        let c1 = editor.apply().unwrap();

        editor.change_to_version(c0).unwrap();
        assert_eq!(editor.target().get("f1"), Value::Int(1));
        assert_eq!(editor.target().get("f2"), Value::Int(2));

        editor.change_to_version(c1).unwrap();
        assert_eq!(editor.target().get("f1"), Value::Int(10));
        assert_eq!(editor.target().get("f2"), Value::Int(20));
    }

    #[test]
    fn test_checkout_across_branches() {
        let (mut history, mut target, accessor) = setup();
        let mut editor = VersionedObjectEditor::new(&mut history, &mut target, &accessor);
        let c0 = {
            editor.set_field("f1", Value::Int(0)).unwrap();
            editor.apply().unwrap()
        };

        // branch a
        editor.set_field("f1", Value::Int(1)).unwrap();
        let ca = editor.apply().unwrap();

        // branch b from c0
        editor.change_to_version(c0).unwrap();
        editor.set_field("f2", Value::Int(99)).unwrap();
        let cb = editor.apply().unwrap();
        assert_ne!(ca, cb);

        // moving b -> a must restore f2 (divergent on old branch) and
        // write f1 (changed on new branch)
        editor.change_to_version(ca).unwrap();
        assert_eq!(editor.target().get("f1"), Value::Int(1));
        assert_eq!(editor.target().get("f2"), Value::Int(2));
    }

    #[test]
    fn test_checkout_clears_sub_property_override() {
        let id = ObjectId::generate();
        let accessor = MapAccessor::new("image", &["f1", "loc"]);
        let mut target = accessor.create_default(id);
        let mut history = History::new(id);
        let mut editor = VersionedObjectEditor::new(&mut history, &mut target, &accessor);
        editor.set_field("f1", Value::Int(1)).unwrap();
        let c0 = editor.apply().unwrap();

        editor.set_field("loc.city", "berlin".into()).unwrap();
        editor.apply().unwrap();
        assert_eq!(editor.target().get("loc.city"), Value::Text("berlin".into()));

        // the abandoned branch's override must not survive the checkout
        editor.change_to_version(c0).unwrap();
        assert_eq!(editor.target().get("loc.city"), Value::Null);
    }

    #[test]
    fn test_checkout_with_pending_edit_fails() {
        let (mut history, mut target, accessor) = setup();
        let mut editor = VersionedObjectEditor::new(&mut history, &mut target, &accessor);
        editor.set_field("f1", Value::Int(5)).unwrap();
        let c0 = editor.apply().unwrap();
        editor.set_field("f1", Value::Int(6)).unwrap();
        assert!(matches!(
            editor.change_to_version(c0),
            Err(VersionError::Unsupported(_))
        ));
    }
}
