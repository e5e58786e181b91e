//! SQLite persistence: connection pooling, migrations, the durable
//! quota counter, the usage-event outbox, and tenant repositories.

mod connection;
pub mod migrations;
pub mod outbox;
pub mod quota;
pub mod repositories;

pub use connection::{connect, connect_with_settings, ping, DbPool};
pub use outbox::SqlUsageEventSink;
pub use quota::SqlQuotaStore;
