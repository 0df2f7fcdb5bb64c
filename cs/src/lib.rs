//! CheckpointStore - scoped JSON document store
//!
//! Persists serializable documents keyed by `(collection, scope, id)`. Every
//! write is a full-document overwrite performed atomically (temp file +
//! rename) under an advisory lock, so saving the same document twice is
//! always safe.
//!
//! # Architecture
//!
//! ```text
//! {base}/
//! └── {collection}/
//!     └── {scope}/
//!         ├── .lock
//!         ├── {id}.json
//!         └── ...
//! ```
//!
//! # Example
//!
//! ```ignore
//! use checkpointstore::Store;
//!
//! let store = Store::open("/var/lib/stepwise/checkpoints")?;
//! store.put(&plan)?;
//! let restored: Option<Plan> = store.get("project-1", "task-1")?;
//! ```

mod error;
mod store;

pub use error::StoreError;
pub use store::{Document, Store};

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
