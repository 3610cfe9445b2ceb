//! Session storage for cogcycle.
//!
//! Persists session records, supporting file-based and in-memory backends.

pub mod file;
pub mod memory;
pub mod traits;

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;
pub use traits::SessionStore;
