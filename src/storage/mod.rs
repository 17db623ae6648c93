//! Storage module for persisting crawl data
//!
//! Workers hand every extracted page, every structured item that passes the
//! quality filter, and every session snapshot to a [`Persistence`] backend.
//! [`MemoryStorage`] is the built-in backend; other backends implement the
//! same trait.

mod memory;
mod traits;

pub use memory::MemoryStorage;
pub use traits::{Page, Persistence, StorageError, StorageResult};
