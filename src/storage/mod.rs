//! Progress document storage for Waypoint.
//!
//! This module provides the document store collaborator, with file-based and
//! in-memory backends.

pub mod file;
pub mod memory;
pub mod traits;

pub use file::FileDocumentStore;
pub use memory::MemoryDocumentStore;
pub use traits::DocumentStore;
