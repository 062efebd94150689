//! Domain model (IDs, run records, outcomes, reports, events).

pub mod errors;
pub mod events;
pub mod identity;
pub mod ids;
pub mod outcome;
pub mod report;
pub mod run;
pub mod state;

pub use self::errors::{RegistryError, WardenError};
pub use self::events::ReaperEvent;
pub use self::identity::WatchdogIdentity;
pub use self::ids::{FlowId, Id, IdMarker, ParseIdError, RunId};
pub use self::outcome::{CancellationOutcome, Disposition};
pub use self::report::{InvocationOutcome, InvocationReport, Phase, ScanReport};
pub use self::run::{
    MAX_THRESHOLD_HOURS, RunFilter, RunRecord, ScanKind, ThresholdWindow, TimeField,
    hours_to_duration,
};
pub use self::state::{LogLevel, RunState};
