//! Connection registry for dbstudio
//!
//! [`ConnectionRegistry`] owns every live driver, keyed by connection id.
//! Connections marked for persistence are saved to the `connections` table
//! of the system SQLite database and restored at startup.

pub mod migrations;
pub mod registry;
pub mod store;

pub use migrations::{run_system_migrations, seed_sample_data};
pub use registry::{ConnectionRegistry, ConnectionState, ConnectionSummary, ConnectionTestResult};
pub use store::{SavedConnection, SystemStore};
