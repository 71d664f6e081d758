//! Diff and patch reconciliation for a sectioned table view.
//!
//! A [`Table`] is an immutable snapshot of sections of rows. [`diff`] computes
//! the [`Patch`] between two snapshots, [`apply`] plays a patch onto a
//! [`TableView`] in one ordered batch and returns the matching snapshot, and
//! [`TableSource`] ties the two together behind a FIFO update queue.
pub mod applier;
pub mod config;
pub mod diff_engine;
pub mod errors;
pub mod source;
pub mod types;
pub mod view;

#[cfg(feature = "python")]
mod bindings;
#[cfg(feature = "python")]
mod converters;

pub use applier::{apply, fold};
pub use config::DiffConfig;
pub use diff_engine::{diff, diff_with_config, DiffEngine};
pub use errors::{IndexTarget, Side, TableError};
pub use source::{TableSource, TableUpdates};
pub use types::{Changes, Patch, Row, RowChanges, RowIndex, Section, SectionChanges, Table, DEFAULT_ROW_HEIGHT};
pub use view::{DataSource, RecordingView, TableView, ViewOp};
