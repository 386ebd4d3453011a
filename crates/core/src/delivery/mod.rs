//! Product delivery: primary data-center submission with a pending-queue
//! fallback and a persistent submission ledger. Every file handed to the
//! engine ends either confirmed uploaded or queued as pending, never dropped.

mod engine;
mod ledger;
mod sqlite;

pub use engine::*;
pub use ledger::*;
pub use sqlite::*;
