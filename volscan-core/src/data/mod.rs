//! Bar storage, universe and data seeding.

pub mod import;
pub mod memory;
pub mod parquet;
pub mod sqlite;
pub mod store;
pub mod synthetic;
pub mod universe;

pub use import::{import_csv, ImportError, ImportSummary};
pub use memory::MemoryStore;
pub use parquet::ParquetStore;
pub use sqlite::SqliteStore;
pub use store::{BarReader, BarStore, StoreError, SymbolCoverage, UniverseQuery};
pub use universe::Universe;
