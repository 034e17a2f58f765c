//! PostgreSQL persistence for the xavyo directory query engine
//!
//! - [`PgHistorySink`]: execution history in `directory_query_history`
//! - [`PgCredentialStore`]: encrypted per-user credentials in
//!   `user_directory_credentials`
//!
//! Run [`run_migrations`] once at startup to create both tables.

mod credentials;
mod error;
mod history;
mod pool;

pub use credentials::{CredentialRecord, NewCredential, PgCredentialStore};
pub use error::DbError;
pub use history::{HistoryRecord, PgHistorySink};
pub use pool::{connect, run_migrations};
