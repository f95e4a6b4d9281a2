//! Cache storage layer
//!
//! Persistent named stores of HTTP responses keyed by request URL, plus the
//! response type and size measurement shared by the policy, the size
//! governor and invalidation.

mod entry;
pub mod size;
mod store;

pub use entry::{is_fresh, now_millis, CacheSource, Intercepted, Response};
pub use store::{Debris, EntryInfo, EntryWriter, StorageRoot, Store, STORE_MARKER};
