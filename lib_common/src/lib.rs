// Declare the modules to re-export
pub mod core; // Parent module for heap and workqueue
pub mod sync; // Parent module for the controller sync client

// Re-export the common entry points
pub use crate::core::heap::HeapBy;
pub use crate::core::workqueue::{WorkQueue, Workunit};
pub use crate::sync::client::{SyncClient, SyncConfig};
