//! Package model: queue entries, control metadata and version ordering.

mod control;
mod entry;
pub mod version;

pub use control::PackageMetadata;
pub use entry::{
    DependencyVerdict, EntryId, EntrySnapshot, EntryState, EntryStatus, InstalledComparison,
    Operation, PackageEntry,
};
pub use version::{DebVersion, compare_versions};
