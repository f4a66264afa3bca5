//! Replication import.
//!
//! `ChangeFactory` folds received change snapshots into local state:
//! verified, deduplicated by content id, with unknown target objects
//! bootstrapped as fresh replicas. Out-of-causal-order delivery is not
//! supported; a change whose parent is locally unknown is rejected.

use crate::accessor::FieldAccessor;
use crate::dto::ChangeDto;
use crate::error::{Result, VersionError};
use crate::history::History;
use crate::store::ReplicaStore;
use crate::value::ChangeId;

/// Imports change snapshots into a local replica store
pub struct ChangeFactory<'a, S: ReplicaStore> {
    store: &'a mut S,
    accessor: &'a dyn FieldAccessor<S::Target>,
}

impl<'a, S: ReplicaStore> ChangeFactory<'a, S> {
    pub fn new(store: &'a mut S, accessor: &'a dyn FieldAccessor<S::Target>) -> Self {
        Self { store, accessor }
    }

    /// Import one verified snapshot.
    ///
    /// Idempotent: a change already known locally is returned as-is. An
    /// unknown target history is bootstrapped from a default target, with
    /// the imported change installed as the replica's genesis state and
    /// materialized into it. For a known history every parent must resolve
    /// locally.
    pub fn import(&mut self, dto: &ChangeDto) -> Result<ChangeId> {
        dto.verify()?;

        if self.store.find_change(dto.id).is_some() {
            tracing::debug!(change = %dto.id.short(), "import: change already known");
            return Ok(dto.id);
        }

        match self.store.history_mut(dto.target) {
            Some(history) => {
                for parent in &dto.parents {
                    if !history.contains(*parent) {
                        return Err(VersionError::MissingParent(*parent));
                    }
                }
                history.install(dto.to_change())?;
                tracing::debug!(
                    change = %dto.id.short(),
                    target = %dto.target.short(),
                    "import: installed change"
                );
            }
            None => {
                let mut target = self.accessor.create_default(dto.target);
                let mut history = History::new(dto.target);
                let id = history.install_genesis(dto.to_change())?;
                history.set_version(Some(id))?;
                for (name, fc) in &dto.fields {
                    fc.apply(name, &mut target, self.accessor)?;
                }
                self.store.insert_target(dto.target, target);
                self.store.insert_history(history);
                tracing::debug!(
                    change = %dto.id.short(),
                    target = %dto.target.short(),
                    type_name = %dto.target_type,
                    "import: bootstrapped replica"
                );
            }
        }
        Ok(dto.id)
    }

    /// Decode a wire record and import it
    pub fn import_encoded(&mut self, data: &[u8]) -> anyhow::Result<ChangeId> {
        let dto = ChangeDto::decode(data)?;
        Ok(self.import(&dto)?)
    }
}
