//! Collection adapters for behavioral records.
//!
//! - [`CollectionAdapter`]: the boundary the orchestrator calls
//! - [`JsonDirCollector`]: reads per-user JSON exports from disk
//! - [`InMemoryCollector`]: scripted records, failures and latency

pub mod json_dir;
pub mod memory;
pub mod types;

pub use json_dir::JsonDirCollector;
pub use memory::InMemoryCollector;
pub use types::*;
