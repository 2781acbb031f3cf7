//! Persistence layer — the gateway trait plus in-memory and file-backed stores.

pub mod file;
pub mod memory;
pub mod traits;

pub use file::FileStore;
pub use memory::InMemoryStore;
pub use traits::PersistenceGateway;
