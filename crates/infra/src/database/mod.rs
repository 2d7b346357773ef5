//! Database implementations

pub mod job_repository;
pub mod mailbox_repository;
pub mod manager;
pub mod pool;
mod sql_util;
pub mod watch_repository;

pub use job_repository::SqliteJobRepository;
pub use mailbox_repository::SqliteMailboxRepository;
pub use manager::DbManager;
pub use pool::{create_pool, PoolConfig, SqliteConnection, SqlitePool};
pub use watch_repository::SqliteWatchRepository;
