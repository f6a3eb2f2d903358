//! Submission/attempt ledger and its persistence collaborators.

pub mod journal;
#[allow(clippy::module_inception)]
pub mod ledger;
pub mod store;

pub use journal::JournalStore;
pub use ledger::{Ledger, LedgerUpdate, Persistence};
pub use store::{LedgerEntry, MemoryStore, PersistenceStore};
