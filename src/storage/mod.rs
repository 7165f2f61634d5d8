//! File-backed completion records.
//!
//! Every finished task leaves exactly one JSON file under the run's `conv/`
//! directory. Its presence and validity is the only resume signal: there is
//! no separate journal.
//!
//! - **OutputLayout**: deterministic paths derived from (model, dataset, id)
//! - **ResultWriter**: atomic temp-file + rename commits
//! - **ResumeIndex**: side-effect-free scan of committed records
//! - **prune**: operator cleanup of failed or malformed records

pub mod clean;
pub mod layout;
pub mod record;
pub mod resume;
pub mod writer;

pub use clean::{prune, PruneFilter, PruneReport};
pub use layout::{record_file_stem, sanitize_segment, OutputLayout};
pub use record::{CompletionRecord, RECORD_VERSION};
pub use resume::{RecordEntry, ResumeIndex};
pub use writer::ResultWriter;
