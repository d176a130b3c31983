//! Repository traits for metadata operations.

pub mod entries;

pub use entries::{CatalogStats, DecrementOutcome, EntryFilter, EntryRepo, Pagination};
