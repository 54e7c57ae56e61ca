//! The fleet registry: every configured machine, keyed and ordered by
//! identifier, plus the scheduler that picks a machine for a job.

use std::{
    collections::{btree_map::Entry, BTreeMap},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    slicer::{SlicedMetadata, SlicingOptions},
    AnyMachine, Error, Filament, FilamentLocation, Machine, MachineSnapshot, MachineState, MachineTechnology,
    OperationError, Result, ValidationError,
};

/// Where a print was sent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispatched {
    /// The machine printing the job.
    pub identifier: String,
    /// The filament location the job prints from.
    pub location: FilamentLocation,
}

/// Every machine the process manages.
#[derive(Clone, Default)]
pub struct Fleet {
    machines: BTreeMap<String, AnyMachine>,
}

impl Fleet {
    /// Build a fleet. Identifiers must be unique.
    pub fn new(machines: impl IntoIterator<Item = AnyMachine>) -> Result<Self, ValidationError> {
        let mut fleet = Self::default();
        for machine in machines {
            fleet.insert(machine)?;
        }
        Ok(fleet)
    }

    /// Add one machine.
    pub fn insert(&mut self, machine: AnyMachine) -> Result<(), ValidationError> {
        match self.machines.entry(machine.identifier().to_string()) {
            Entry::Occupied(entry) => Err(ValidationError::DuplicateIdentifier(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(machine);
                Ok(())
            }
        }
    }

    /// Look up a machine.
    pub fn get(&self, identifier: &str) -> Option<&AnyMachine> {
        self.machines.get(identifier)
    }

    fn require(&self, identifier: &str) -> Result<&AnyMachine> {
        self.get(identifier)
            .ok_or_else(|| OperationError::UnknownMachine(identifier.to_string()).into())
    }

    /// All machines, in identifier order.
    pub fn machines(&self) -> impl Iterator<Item = &AnyMachine> {
        self.machines.values()
    }

    /// How many machines there are.
    pub fn len(&self) -> usize {
        self.machines.len()
    }

    /// Whether the fleet is empty.
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// A snapshot of every machine, in identifier order.
    pub fn snapshots(&self) -> Vec<MachineSnapshot> {
        self.machines().map(Machine::snapshot).collect()
    }

    /// Ask every machine to refresh. A failing machine does not stop the
    /// others; its error is returned under its identifier.
    pub async fn update_all(&self) -> BTreeMap<String, Error> {
        let updates = self.machines().map(|machine| async move {
            let result = machine.update().await;
            (machine.identifier().to_string(), result)
        });

        futures::future::join_all(updates)
            .await
            .into_iter()
            .filter_map(|(identifier, result)| match result {
                Ok(()) => None,
                Err(err) => {
                    tracing::warn!(identifier = %identifier, error = %err, "failed to update machine");
                    Some((identifier, err))
                }
            })
            .collect()
    }

    /// Slice `model` for the identified machine and report what the job
    /// would take.
    pub async fn sliced_metadata(
        &self,
        identifier: &str,
        model: &Path,
        file_name: &str,
        options: &SlicingOptions,
    ) -> Result<SlicedMetadata> {
        let machine = self.require(identifier)?;
        let sliced = machine.slice(model, file_name, options).await?;
        machine.read_metadata(sliced.path()).await
    }

    /// Mark the identified machine's bed as cleared.
    pub async fn mark_as_bed_cleared(&self, identifier: &str) -> Result<()> {
        self.require(identifier)?.mark_as_bed_cleared().await
    }

    /// Pick a machine for the job and print on it. `None` when no machine
    /// is available.
    pub async fn print(
        &self,
        technology: MachineTechnology,
        filament: &Filament,
        model: &Path,
        file_name: &str,
        options: &SlicingOptions,
    ) -> Result<Option<Dispatched>> {
        let Some((machine, location)) = self.find_available_machine(technology, filament) else {
            tracing::info!(%technology, %filament, "no machine available");
            return Ok(None);
        };

        dispatch(machine, location, model, file_name, options).await.map(Some)
    }

    /// Print on the identified machine, from the first location holding
    /// `filament`.
    pub async fn print_on(
        &self,
        identifier: &str,
        filament: &Filament,
        model: &Path,
        file_name: &str,
        options: &SlicingOptions,
    ) -> Result<Dispatched> {
        let machine = self.require(identifier)?;
        let location = machine
            .locate_matching_filament(filament)
            .into_iter()
            .next()
            .ok_or_else(|| OperationError::FilamentNotLoaded {
                identifier: identifier.to_string(),
                filament: filament.to_string(),
            })?;

        dispatch(machine, location, model, file_name, options).await
    }

    /// Set or clear the filament on a machine that is told what it holds.
    pub fn set_filament(&self, identifier: &str, filament: Option<Filament>) -> Result<()> {
        self.require(identifier)?.set_filament(filament)
    }

    /// Machines using `technology`.
    pub fn by_technology(&self, technology: MachineTechnology) -> Vec<&AnyMachine> {
        self.machines()
            .filter(|machine| machine.technology() == technology)
            .collect()
    }

    /// Machines whose current or last job is `file_name`.
    pub fn by_filename(&self, file_name: &str) -> Vec<&AnyMachine> {
        self.machines()
            .filter(|machine| machine.state().filename.as_deref() == Some(file_name))
            .collect()
    }

    /// Machines using `technology` with `filament` loaded somewhere.
    pub fn available_with_filament(&self, technology: MachineTechnology, filament: &Filament) -> Vec<&AnyMachine> {
        self.by_technology(technology)
            .into_iter()
            .filter(|machine| !machine.locate_matching_filament(filament).is_empty())
            .collect()
    }

    /// The first machine, by identifier, that is healthy, idle, uses
    /// `technology`, can slice and print, and holds `filament`; with the
    /// lowest location holding it.
    pub fn find_available_machine(
        &self,
        technology: MachineTechnology,
        filament: &Filament,
    ) -> Option<(&AnyMachine, FilamentLocation)> {
        self.machines().find_map(|machine| {
            let capabilities = machine.capabilities();
            if !machine.is_healthy()
                || machine.technology() != technology
                || machine.state().status != MachineState::Idle
                || !(capabilities.printable && capabilities.sliceable)
            {
                return None;
            }

            machine
                .locate_matching_filament(filament)
                .into_iter()
                .next()
                .map(|location| (machine, location))
        })
    }
}

async fn dispatch(
    machine: &AnyMachine,
    location: FilamentLocation,
    model: &Path,
    file_name: &str,
    options: &SlicingOptions,
) -> Result<Dispatched> {
    let identifier = machine.identifier().to_string();
    tracing::info!(identifier = %identifier, %location, file_name, "dispatching print");

    let sliced = machine.slice(model, file_name, options).await?;
    machine.print(sliced.path(), file_name, location).await?;

    Ok(Dispatched { identifier, location })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    use super::*;
    use crate::{
        noop::{self, Noop},
        slicer::{self, FdmOptions},
        LiveState,
    };

    fn noop(nickname: &str, technology: MachineTechnology) -> Noop {
        Noop::new(
            &noop::Config {
                nickname: nickname.to_string(),
                technology,
                filament: None,
                volume: None,
            },
            slicer::noop::Slicer::default().into(),
        )
    }

    fn red_pla() -> Filament {
        Filament::new("PLA", "FF0000").unwrap()
    }

    fn options() -> SlicingOptions {
        SlicingOptions::Fdm(FdmOptions {
            material: "PLA".to_string(),
            quantity: 1,
            layer_height: 0.2,
            wall_loops: None,
            use_supports: None,
            support_style: None,
        })
    }

    #[test]
    fn test_duplicate_identifier() {
        let result = Fleet::new([
            noop("a", MachineTechnology::Fdm).into(),
            noop("a", MachineTechnology::Sla).into(),
        ]);
        assert_eq!(
            result.err(),
            Some(ValidationError::DuplicateIdentifier("a".to_string()))
        );
    }

    #[test]
    fn test_find_available_machine_is_deterministic() -> TestResult {
        let second = noop("b-printer", MachineTechnology::Fdm);
        second.load(FilamentLocation::in_ams(0, 0), red_pla());
        let first = noop("a-printer", MachineTechnology::Fdm);
        first.load(FilamentLocation::in_ams(1, 2), red_pla());
        first.load(FilamentLocation::in_ams(0, 3), red_pla());

        let fleet = Fleet::new([second.into(), first.into()])?;

        for _ in 0..3 {
            let (machine, location) = fleet
                .find_available_machine(MachineTechnology::Fdm, &red_pla())
                .ok_or("no candidate")?;
            assert_eq!(machine.identifier(), "a-printer");
            assert_eq!(location, FilamentLocation::in_ams(0, 3));
        }
        Ok(())
    }

    #[test]
    fn test_find_available_machine_skips_busy_and_stale() -> TestResult {
        let busy = noop("a", MachineTechnology::Fdm);
        busy.load(FilamentLocation::external(), red_pla());
        busy.set_state(LiveState {
            status: MachineState::Printing,
            ..busy.state()
        });

        let stale = noop("b", MachineTechnology::Fdm);
        stale.load(FilamentLocation::external(), red_pla());
        stale.set_state(LiveState {
            last_updated: Some(Utc::now() - Duration::minutes(6)),
            ..stale.state()
        });

        let resin = noop("c", MachineTechnology::Sla);
        resin.load(FilamentLocation::external(), red_pla());

        let empty = noop("d", MachineTechnology::Fdm);

        let fleet = Fleet::new([busy.into(), stale.into(), resin.into(), empty.into()])?;
        assert!(fleet
            .find_available_machine(MachineTechnology::Fdm, &red_pla())
            .is_none());
        assert_eq!(fleet.available_with_filament(MachineTechnology::Fdm, &red_pla()).len(), 2);
        assert_eq!(fleet.by_technology(MachineTechnology::Sla).len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_print_schedules_then_reports_no_candidate() -> TestResult {
        let machine = noop("bench", MachineTechnology::Fdm);
        machine.load(FilamentLocation::external(), red_pla());
        let fleet = Fleet::new([machine.clone().into()])?;

        let dispatched = fleet
            .print(MachineTechnology::Fdm, &red_pla(), Path::new("cube.stl"), "cube", &options())
            .await?;
        assert_eq!(
            dispatched,
            Some(Dispatched {
                identifier: "bench".to_string(),
                location: FilamentLocation::external(),
            })
        );
        assert_eq!(machine.printed().await, vec!["cube".to_string()]);
        assert_eq!(fleet.by_filename("cube").len(), 1);

        let again = fleet
            .print(MachineTechnology::Fdm, &red_pla(), Path::new("cube.stl"), "cube", &options())
            .await?;
        assert_eq!(again, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_print_on_requires_loaded_filament() -> TestResult {
        let fleet = Fleet::new([noop("bench", MachineTechnology::Fdm).into()])?;
        let err = fleet
            .print_on("bench", &red_pla(), Path::new("cube.stl"), "cube", &options())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Operation(OperationError::FilamentNotLoaded { .. })
        ));

        fleet.set_filament("bench", Some(red_pla()))?;
        let dispatched = fleet
            .print_on("bench", &red_pla(), Path::new("cube.stl"), "cube", &options())
            .await?;
        assert_eq!(dispatched.location, FilamentLocation::external());
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_machine() {
        let fleet = Fleet::default();
        assert!(matches!(
            fleet.mark_as_bed_cleared("nope").await,
            Err(Error::Operation(OperationError::UnknownMachine(_)))
        ));
        assert!(fleet.set_filament("nope", None).is_err());
    }

    #[tokio::test]
    async fn test_update_all_and_metadata() -> TestResult {
        let fleet = Fleet::new([
            noop("a", MachineTechnology::Fdm).into(),
            noop("b", MachineTechnology::Sla).into(),
        ])?;
        assert!(fleet.update_all().await.is_empty());
        assert_eq!(fleet.snapshots().len(), 2);
        assert_eq!(fleet.snapshots()[0].identifier, "a");

        let metadata = fleet
            .sliced_metadata("a", Path::new("cube.stl"), "cube", &options())
            .await?;
        assert_eq!(metadata, SlicedMetadata::default());
        Ok(())
    }
}
