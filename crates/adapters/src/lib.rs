//! linkreply adapters crate
//!
//! Infrastructure adapters implementing the domain ports:
//! - `rules`: TOML file, SQLite and in-memory rule stores
//! - `log`: SQLite and in-memory execution logs
//! - `queue`: in-process dispatch queue
//! - `platforms`: Meta Graph API messaging, JSONL outbox and stub adapters

pub mod graph;
pub mod outbox;
mod queue_mpsc;
mod rules_file;
mod store_memory;
mod store_sqlite;

/// Re-exports for rule store adapters
pub mod rules {
    pub use crate::rules_file::{FileRuleStore, RulesFileError};
    pub use crate::store_memory::InMemoryRuleStore;
    pub use crate::store_sqlite::SqliteStore;
}

/// Re-exports for execution log adapters
pub mod log {
    pub use crate::store_memory::InMemoryExecutionLog;
    pub use crate::store_sqlite::SqliteStore;
}

/// Re-exports for dispatch queue adapters
pub mod queue {
    pub use crate::queue_mpsc::MpscDispatchQueue;
}

/// Re-exports for platform adapters
pub mod platforms {
    pub use crate::graph::{GraphMessagingAdapter, StubAdapter};
    pub use crate::outbox::{OutboxAdapter, OutboxWriter};
}
