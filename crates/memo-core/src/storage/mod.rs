//! Blob store abstraction for note storage.

mod fs;
mod memory;
mod traits;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;
pub use traits::{BlobError, BlobStore, Metadata, Object, ObjectHead};
