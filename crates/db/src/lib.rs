pub mod connection;
pub mod lease;
pub mod migrations;
pub mod record_store;

pub use connection::{Db, DbError, Result};
pub use lease::LeaseOutcome;
pub use migrations::{CURRENT_SCHEMA_VERSION, MIGRATIONS, Migration};
