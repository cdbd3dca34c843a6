//! Index resources: the pool of named indexes, per-submission transactions
//! and the indexing work-queue.

pub mod pool;
pub mod tasks;
pub mod txn;

pub use pool::{IndexPool, ReaderSnapshot, SharedPool};
pub use tasks::IndexingQueue;
pub use txn::IndexTransactionManager;
