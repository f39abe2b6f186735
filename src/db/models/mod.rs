pub mod metadata;
pub mod record;

pub use metadata::{CacheMetadata, DATA_VERSION};
pub use record::{Record, RecordStatus};
