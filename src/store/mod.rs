//! Ephemeral blob storage
//!
//! Blobs live as files in one directory; an in-memory index tracks when each
//! was last accessed so idle blobs can be evicted by the background sweeper.

pub mod blob_store;
pub mod errors;
pub mod sweeper;

pub use blob_store::{BlobStore, StoreConfig, StoreStats};
pub use errors::StoreError;
pub use sweeper::Sweeper;
