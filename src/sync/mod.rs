//! Cross-device counter synchronization.
//!
//! - [model] is the content of the shared file.
//! - [merge] and [prune] are the pure operations applied to it.
//! - [store::SharedStore] coordinates writes of the shared file.
//! - [local::LocalCache] is this device's running count.
//! - [reconcile::Reconciler] ties the local count to the shared file.
//! - [aggregate] answers read-only questions for display.

pub mod aggregate;
pub mod identity;
pub mod local;
pub mod merge;
pub mod model;
pub mod prune;
pub mod reconcile;
pub mod store;
pub mod watcher;
