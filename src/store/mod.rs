pub mod cache;
pub mod metadata;
pub mod snapshot;

pub use cache::{ContentCache, MergeSummary};
pub use metadata::{IndexMetadata, MetadataStore};
pub use snapshot::{SnapshotHandle, SnapshotLoad, SnapshotWriter};
