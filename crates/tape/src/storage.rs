//! Storage tiers for forward values.
//!
//! Every stored value has exactly one owning tier. A value can be held for
//! several reasons at once (an explicit recording plus one or more checkpoint
//! snapshots); it is dropped from its tier once the last reason is released.

mod disk;
mod memory;

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use spool_core::{Error, Variable, Vector};
use tracing::{debug, info};

use self::{disk::DiskTier, memory::MemoryTier};

/// A storage tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Memory,
    Disk,
}

/// Why a value is being held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Owner {
    Explicit,
    Checkpoint(usize),
}

#[derive(Debug)]
struct Record {
    tier: Tier,
    owners: BTreeSet<Owner>,
}

/// A snapshot of the values known before an equation executed.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    tier: Tier,
    variables: Vec<Variable>,
}

impl Checkpoint {
    #[must_use]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    #[must_use]
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }
}

/// Stored forward values, keyed by variable.
#[derive(Debug)]
pub struct Storage {
    records: HashMap<Variable, Record>,
    checkpoints: BTreeMap<usize, Checkpoint>,
    memory: MemoryTier,
    disk: Option<DiskTier>,
    disk_dir: Option<PathBuf>,
}

impl Storage {
    /// Creates empty storage.
    ///
    /// Disk artifacts go to `disk_dir` when given, otherwise to a temporary
    /// directory created on first use.
    #[must_use]
    pub fn new(disk_dir: Option<PathBuf>) -> Self {
        Self {
            records: HashMap::new(),
            checkpoints: BTreeMap::new(),
            memory: MemoryTier::default(),
            disk: None,
            disk_dir,
        }
    }

    /// Stores an explicitly recorded value.
    ///
    /// # Errors
    ///
    /// Returns an error if a disk write fails.
    pub(crate) fn record(
        &mut self,
        variable: &Variable,
        value: &Vector,
        tier: Tier,
    ) -> Result<(), Error> {
        self.hold(variable, value, tier, Owner::Explicit)
    }

    /// Stores a checkpoint snapshot taken before equation `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if a disk write fails.
    pub(crate) fn checkpoint(
        &mut self,
        index: usize,
        tier: Tier,
        snapshot: &[(Variable, Vector)],
    ) -> Result<(), Error> {
        for (variable, value) in snapshot {
            self.hold(variable, value, tier, Owner::Checkpoint(index))?;
        }
        let variables: Vec<Variable> = snapshot.iter().map(|(v, _)| v.clone()).collect();
        debug!(index, ?tier, values = variables.len(), "took checkpoint");
        self.checkpoints.insert(index, Checkpoint { tier, variables });
        Ok(())
    }

    fn hold(
        &mut self,
        variable: &Variable,
        value: &Vector,
        tier: Tier,
        owner: Owner,
    ) -> Result<(), Error> {
        if let Some(record) = self.records.get_mut(variable) {
            record.owners.insert(owner);
            return Ok(());
        }

        match tier {
            Tier::Memory => self.memory.insert(variable.clone(), value.clone()),
            Tier::Disk => self.disk()?.write(variable, value)?,
        }
        self.records.insert(
            variable.clone(),
            Record {
                tier,
                owners: BTreeSet::from([owner]),
            },
        );
        debug!(%variable, ?tier, ?owner, "stored value");
        Ok(())
    }

    /// Returns `true` if a value is held for `variable`.
    #[must_use]
    pub fn contains(&self, variable: &Variable) -> bool {
        self.records.contains_key(variable)
    }

    /// Returns the tier holding `variable`.
    #[must_use]
    pub fn tier(&self, variable: &Variable) -> Option<Tier> {
        self.records.get(variable).map(|record| record.tier)
    }

    /// Returns `true` if `variable` was recorded explicitly.
    #[must_use]
    pub fn is_recorded(&self, variable: &Variable) -> bool {
        self.records
            .get(variable)
            .is_some_and(|record| record.owners.contains(&Owner::Explicit))
    }

    /// Loads the stored value of `variable`.
    ///
    /// # Errors
    ///
    /// Returns an error if a disk artifact cannot be read.
    pub fn get(&self, variable: &Variable) -> Result<Option<Vector>, Error> {
        let Some(record) = self.records.get(variable) else {
            return Ok(None);
        };
        match record.tier {
            Tier::Memory => Ok(self.memory.get(variable).cloned()),
            Tier::Disk => match &self.disk {
                Some(disk) => disk.read(variable),
                None => Ok(None),
            },
        }
    }

    /// Returns the latest checkpoint taken at or before `index`.
    #[must_use]
    pub fn checkpoint_at_or_before(&self, index: usize) -> Option<(usize, &Checkpoint)> {
        self.checkpoints
            .range(..=index)
            .next_back()
            .map(|(&i, checkpoint)| (i, checkpoint))
    }

    pub fn checkpoints(&self) -> impl Iterator<Item = (usize, &Checkpoint)> {
        self.checkpoints.iter().map(|(&i, checkpoint)| (i, checkpoint))
    }

    /// Returns the number of checkpoints held in `tier`.
    #[must_use]
    pub fn checkpoint_count(&self, tier: Tier) -> usize {
        self.checkpoints.values().filter(|c| c.tier == tier).count()
    }

    /// Returns the number of values held in `tier`.
    #[must_use]
    pub fn len(&self, tier: Tier) -> usize {
        match tier {
            Tier::Memory => self.memory.len(),
            Tier::Disk => self.disk.as_ref().map_or(0, DiskTier::len),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the directory disk artifacts are written to, once the disk tier
    /// has been opened.
    #[must_use]
    pub fn disk_dir(&self) -> Option<&Path> {
        self.disk.as_ref().map(DiskTier::dir)
    }

    /// Releases an explicit recording.
    ///
    /// # Errors
    ///
    /// Returns an error if a disk artifact cannot be removed.
    pub(crate) fn forget_recorded(&mut self, variable: &Variable) -> Result<(), Error> {
        self.release(variable, Owner::Explicit)
    }

    /// Releases the checkpoint taken before equation `index`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if a disk artifact cannot be removed.
    pub(crate) fn forget_checkpoint(&mut self, index: usize) -> Result<(), Error> {
        let Some(checkpoint) = self.checkpoints.remove(&index) else {
            return Ok(());
        };
        for variable in &checkpoint.variables {
            self.release(variable, Owner::Checkpoint(index))?;
        }
        debug!(index, "released checkpoint");
        Ok(())
    }

    /// Releases every checkpoint taken at or after `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if a disk artifact cannot be removed.
    pub(crate) fn forget_checkpoints_from(&mut self, index: usize) -> Result<(), Error> {
        let indices: Vec<usize> = self.checkpoints.range(index..).map(|(&i, _)| i).collect();
        for i in indices {
            self.forget_checkpoint(i)?;
        }
        Ok(())
    }

    fn release(&mut self, variable: &Variable, owner: Owner) -> Result<(), Error> {
        let Some(record) = self.records.get_mut(variable) else {
            return Ok(());
        };
        record.owners.remove(&owner);
        if !record.owners.is_empty() {
            return Ok(());
        }

        let tier = record.tier;
        self.records.remove(variable);
        match tier {
            Tier::Memory => self.memory.remove(variable),
            Tier::Disk => {
                if let Some(disk) = &mut self.disk {
                    disk.remove(variable)?;
                }
            }
        }
        Ok(())
    }

    /// Drops every value and removes every disk artifact.
    ///
    /// # Errors
    ///
    /// Returns an error if a disk artifact cannot be removed.
    pub(crate) fn reset(&mut self) -> Result<(), Error> {
        self.records.clear();
        self.checkpoints.clear();
        self.memory.clear();
        if let Some(mut disk) = self.disk.take() {
            disk.clear()?;
        }
        Ok(())
    }

    fn disk(&mut self) -> Result<&mut DiskTier, Error> {
        if self.disk.is_none() {
            let tier = match &self.disk_dir {
                Some(dir) => DiskTier::in_dir(dir)?,
                None => DiskTier::temporary()?,
            };
            info!(dir = %tier.dir().display(), "opened disk checkpoint tier");
            self.disk = Some(tier);
        }
        self.disk
            .as_mut()
            .ok_or_else(|| Error::consistency("disk tier failed to open"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(timestep: usize) -> Variable {
        Variable::forward("u", timestep, 0)
    }

    #[test]
    fn values_are_held_until_every_owner_releases() {
        let mut storage = Storage::new(None);
        let value = Vector::from(vec![1.0]);

        storage.record(&u(0), &value, Tier::Memory).unwrap();
        storage
            .checkpoint(1, Tier::Memory, &[(u(0), value.clone())])
            .unwrap();

        storage.forget_checkpoint(1).unwrap();
        assert!(storage.contains(&u(0)));

        storage.forget_recorded(&u(0)).unwrap();
        assert!(!storage.contains(&u(0)));
        assert_eq!(storage.len(Tier::Memory), 0);
    }

    #[test]
    fn first_tier_owns_the_value() {
        let mut storage = Storage::new(None);
        storage.record(&u(0), &Vector::zeros(2), Tier::Memory).unwrap();
        storage
            .checkpoint(3, Tier::Disk, &[(u(0), Vector::zeros(2))])
            .unwrap();

        assert_eq!(storage.tier(&u(0)), Some(Tier::Memory));
        assert!(storage.disk_dir().is_none());
    }

    #[test]
    fn finds_nearest_checkpoint() {
        let mut storage = Storage::new(None);
        storage.checkpoint(2, Tier::Memory, &[]).unwrap();
        storage.checkpoint(5, Tier::Memory, &[]).unwrap();

        assert_eq!(storage.checkpoint_at_or_before(1).map(|(i, _)| i), None);
        assert_eq!(storage.checkpoint_at_or_before(4).map(|(i, _)| i), Some(2));
        assert_eq!(storage.checkpoint_at_or_before(5).map(|(i, _)| i), Some(5));

        storage.forget_checkpoints_from(3).unwrap();
        assert_eq!(storage.checkpoint_at_or_before(9).map(|(i, _)| i), Some(2));
    }

    #[test]
    fn disk_values_round_trip_and_reset_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = Storage::new(Some(dir.path().to_path_buf()));
        storage
            .checkpoint(1, Tier::Disk, &[(u(0), Vector::from(vec![4.0, 5.0]))])
            .unwrap();

        assert_eq!(storage.checkpoint_count(Tier::Disk), 1);
        assert_eq!(storage.get(&u(0)).unwrap().unwrap().to_vec(), vec![4.0, 5.0]);
        assert!(dir.path().join("u-0-0.json").exists());

        storage.reset().unwrap();
        assert!(storage.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn similar_names_get_separate_disk_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = Storage::new(Some(dir.path().to_path_buf()));
        let dotted = Variable::forward("a.b", 0, 0);
        let underscored = Variable::forward("a_b", 0, 0);
        storage
            .record(&dotted, &Vector::from(vec![1.0]), Tier::Disk)
            .unwrap();
        storage
            .record(&underscored, &Vector::from(vec![2.0]), Tier::Disk)
            .unwrap();

        assert_eq!(storage.get(&dotted).unwrap().unwrap().to_vec(), vec![1.0]);
        assert_eq!(storage.get(&underscored).unwrap().unwrap().to_vec(), vec![2.0]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
    }
}
