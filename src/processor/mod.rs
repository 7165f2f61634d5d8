//! Task processors.
//!
//! A `TaskProcessor` turns one `TaskRecord` into the `output` value of a
//! successful result, or a classified `ProcessError`. Processors are pure
//! with respect to the run: they never write completion records and never
//! retry; the scheduler owns both.
//!
//! | kind        | tools | output directory            |
//! |-------------|-------|-----------------------------|
//! | `chart`     | yes   | `pictures/<id>` (`/mnt/result`) |
//! | `numerical` | yes   | `generated_files/<id>` (`/mnt/output`) |
//! | `editing`   | yes   | `generated_files/<id>` (`/mnt/output`) |
//! | `generic`   | no    | none                         |

pub mod agent;
pub mod chart;
pub mod context;
pub mod editing;
pub mod files;
pub mod generic;
pub mod numerical;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProcessError;
use crate::task::{TaskKind, TaskRecord};

pub use agent::{AgentLoop, AgentOutcome, PathMapping};
pub use chart::ChartProcessor;
pub use context::{AgentSettings, ProcessContext};
pub use editing::EditingProcessor;
pub use generic::GenericProcessor;
pub use numerical::NumericalProcessor;
pub use registry::ProcessorRegistry;

/// Handles every record of one task kind.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// The kind this processor is registered for by default.
    fn kind(&self) -> TaskKind;

    /// Processes one record. Must not persist anything itself.
    async fn process(&self, record: &TaskRecord, ctx: &ProcessContext) -> Result<Value, ProcessError>;
}
