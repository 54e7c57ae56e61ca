use std::{collections::BTreeMap, path::Path, time::Duration};

use crate::{
    slicer::{SlicedMetadata, SlicingOptions},
    Capabilities, Capability, Controllable, Filament, FilamentLocation, FilamentMutable, LiveState, Machine,
    MachineTechnology, OperationError, Printable, Result, Sliceable, TemporaryFile, Volume,
};

/// AnyMachine is any supported machine.
#[derive(Clone)]
pub enum AnyMachine {
    /// Bambu Lab printer reached through the cloud broker.
    #[cfg(feature = "bambu")]
    Bambu(crate::bambu::Bambu),

    /// ELEGOO resin printer polled on the LAN.
    #[cfg(feature = "elegoo")]
    Elegoo(crate::elegoo::Elegoo),

    /// No-op Machine
    Noop(crate::noop::Noop),
}

macro_rules! def_machine_stubs {
    (if $feature:expr, $name:ident($machine:path)) => {
        #[cfg(feature = $feature)]
        impl From<$machine> for AnyMachine {
            fn from(machine: $machine) -> Self {
                Self::$name(machine)
            }
        }
    };
    ($name:ident($machine:path)) => {
        impl From<$machine> for AnyMachine {
            fn from(machine: $machine) -> Self {
                Self::$name(machine)
            }
        }
    };
}

def_machine_stubs!(if "bambu",  Bambu(crate::bambu::Bambu));
def_machine_stubs!(if "elegoo", Elegoo(crate::elegoo::Elegoo));

def_machine_stubs!(Noop(crate::noop::Noop));

macro_rules! for_all {
    (|$slf:ident, $machine:ident| $body:block) => {
        match $slf {
            #[cfg(feature = "bambu")]
            Self::Bambu($machine) => $body,

            #[cfg(feature = "elegoo")]
            Self::Elegoo($machine) => $body,

            Self::Noop($machine) => $body,
        }
    };
}

impl Machine for AnyMachine {
    fn identifier(&self) -> &str {
        for_all!(|self, machine| { machine.identifier() })
    }

    fn brand(&self) -> &str {
        for_all!(|self, machine| { machine.brand() })
    }

    fn model(&self) -> &str {
        for_all!(|self, machine| { machine.model() })
    }

    fn technology(&self) -> MachineTechnology {
        for_all!(|self, machine| { machine.technology() })
    }

    fn volume(&self) -> Volume {
        for_all!(|self, machine| { machine.volume() })
    }

    fn capabilities(&self) -> Capabilities {
        for_all!(|self, machine| { machine.capabilities() })
    }

    fn state(&self) -> LiveState {
        for_all!(|self, machine| { machine.state() })
    }

    fn filaments(&self) -> BTreeMap<FilamentLocation, Filament> {
        for_all!(|self, machine| { machine.filaments() })
    }

    fn health_timeout(&self) -> Duration {
        for_all!(|self, machine| { machine.health_timeout() })
    }

    async fn update(&self) -> Result<()> {
        for_all!(|self, machine| { machine.update().await })
    }

    async fn mark_as_bed_cleared(&self) -> Result<()> {
        for_all!(|self, machine| { machine.mark_as_bed_cleared().await })
    }
}

// Capability dispatch. A kind without the capability answers with
// OperationError::Unsupported; which arms are unreachable depends on the
// enabled features.
impl AnyMachine {
    fn unsupported(&self, capability: Capability) -> crate::Error {
        OperationError::Unsupported {
            identifier: self.identifier().to_string(),
            capability,
        }
        .into()
    }

    /// See [Printable::print].
    #[allow(unreachable_patterns)]
    pub async fn print(&self, sliced: &Path, file_name: &str, location: FilamentLocation) -> Result<()> {
        match self {
            #[cfg(feature = "bambu")]
            Self::Bambu(machine) => machine.print(sliced, file_name, location).await,
            Self::Noop(machine) => machine.print(sliced, file_name, location).await,
            _ => Err(self.unsupported(Capability::Printable)),
        }
    }

    /// See [Sliceable::slice].
    #[allow(unreachable_patterns)]
    pub async fn slice(&self, model: &Path, file_name: &str, options: &SlicingOptions) -> Result<TemporaryFile> {
        match self {
            #[cfg(feature = "bambu")]
            Self::Bambu(machine) => machine.slice(model, file_name, options).await,
            Self::Noop(machine) => machine.slice(model, file_name, options).await,
            _ => Err(self.unsupported(Capability::Sliceable)),
        }
    }

    /// See [Sliceable::read_metadata].
    #[allow(unreachable_patterns)]
    pub async fn read_metadata(&self, sliced: &Path) -> Result<SlicedMetadata> {
        match self {
            #[cfg(feature = "bambu")]
            Self::Bambu(machine) => machine.read_metadata(sliced).await,
            Self::Noop(machine) => machine.read_metadata(sliced).await,
            _ => Err(self.unsupported(Capability::Sliceable)),
        }
    }

    /// See [Controllable::pause].
    #[allow(unreachable_patterns)]
    pub async fn pause(&self) -> Result<()> {
        match self {
            #[cfg(feature = "bambu")]
            Self::Bambu(machine) => machine.pause().await,
            Self::Noop(machine) => machine.pause().await,
            _ => Err(self.unsupported(Capability::Controllable)),
        }
    }

    /// See [Controllable::resume].
    #[allow(unreachable_patterns)]
    pub async fn resume(&self) -> Result<()> {
        match self {
            #[cfg(feature = "bambu")]
            Self::Bambu(machine) => machine.resume().await,
            Self::Noop(machine) => machine.resume().await,
            _ => Err(self.unsupported(Capability::Controllable)),
        }
    }

    /// See [Controllable::stop].
    #[allow(unreachable_patterns)]
    pub async fn stop(&self) -> Result<()> {
        match self {
            #[cfg(feature = "bambu")]
            Self::Bambu(machine) => machine.stop().await,
            Self::Noop(machine) => machine.stop().await,
            _ => Err(self.unsupported(Capability::Controllable)),
        }
    }

    /// See [FilamentMutable::set_filament].
    #[allow(unreachable_patterns)]
    pub fn set_filament(&self, filament: Option<Filament>) -> Result<()> {
        match self {
            #[cfg(feature = "elegoo")]
            Self::Elegoo(machine) => machine.set_filament(filament),
            Self::Noop(machine) => machine.set_filament(filament),
            _ => Err(self.unsupported(Capability::FilamentMutable)),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    use super::*;
    use crate::{noop, slicer, Error, MachineState};

    fn noop_machine() -> AnyMachine {
        noop::Noop::new(
            &noop::Config {
                nickname: "bench".to_string(),
                technology: MachineTechnology::Fdm,
                filament: None,
                volume: None,
            },
            slicer::noop::Slicer::default().into(),
        )
        .into()
    }

    #[tokio::test]
    async fn test_dispatch_to_noop() -> TestResult {
        let machine = noop_machine();
        assert_eq!(machine.identifier(), "bench");
        assert_eq!(machine.brand(), "noop");
        assert!(machine.capabilities().has(Capability::Printable));

        machine.print(Path::new("x.3mf"), "x.3mf", FilamentLocation::external()).await?;
        machine.pause().await?;
        assert_eq!(machine.state().status, MachineState::Paused);
        machine.stop().await?;
        assert_eq!(machine.snapshot().status, MachineState::Idle);
        Ok(())
    }

    #[cfg(feature = "elegoo")]
    #[tokio::test]
    async fn test_unsupported_capability() -> TestResult {
        let machine: AnyMachine = crate::elegoo::Elegoo::new(&crate::elegoo::Config {
            ip: "127.0.0.1".to_string(),
            model: "Mars 4 Ultra".to_string(),
            nickname: None,
            health_timeout_secs: None,
        })
        .await?
        .into();

        let err = machine
            .print(Path::new("x.goo"), "x.goo", FilamentLocation::external())
            .await
            .unwrap_err();
        match err {
            Error::Operation(OperationError::Unsupported { identifier, capability }) => {
                assert_eq!(identifier, "Mars 4 Ultra");
                assert_eq!(capability, Capability::Printable);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(machine.pause().await.is_err());
        Ok(())
    }
}
