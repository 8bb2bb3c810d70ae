//! Turning fetched fragments into one packed part
//!
//! Each queue message is gathered as one part:
//!
//! ```text
//! Init ──► Enumerate ──► Collecting ──► Complete
//!   │          │             │
//!   ▼          └─────────────┴────────► Failed
//! dropped
//! ```
//!
//! A completed part appends `{part: packed}` to the process log; a failed
//! part appends exactly one `{error: message}` entry, so a process whose
//! parts have all run always holds `Ntasks` entries.

mod process;
mod reassembly;

pub use process::Gatherer;
pub use reassembly::{
    BundleReassembly, KindRegistry, Reassembly, ReassemblyError, ReassemblyFactory,
    ReassemblyHandle,
};

use thiserror::Error;

use crate::message::PartLabel;

/// How a part ended
#[derive(Debug, Clone, PartialEq)]
pub enum PartOutcome {
    /// The packed part was written
    Completed,
    /// An error entry was written for the part
    Failed(String),
    /// The task could not be initialised; nothing was written
    Dropped(String),
}

/// Failures that must stop the worker
#[derive(Debug, Error)]
pub enum GatherError {
    #[error("pid={pid} part={part}: {source}")]
    Pack {
        pid: String,
        part: PartLabel,
        #[source]
        source: ReassemblyError,
    },
}
