//! SQLite clinical store.
//!
//! Supports in-memory databases (for tests) and file-based databases. Each
//! [`read`](crate::core::SearchRepository::read) scope runs in one
//! transaction, so the count, id and hydration queries of a page all see the
//! same snapshot.
//!
//! # Example
//!
//! ```no_run
//! use helios_search::backends::sqlite::SqliteBackend;
//! use helios_search::core::SearchRepository;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::in_memory()?;
//! backend.init_schema()?;
//! assert_eq!(backend.preferred_page_size(), 20);
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! Every clinical table carries an integer primary key, a `uuid`, a
//! `voided` (or `retired`) flag and `date_created`/`date_changed` audit
//! columns:
//!
//! ```sql
//! CREATE TABLE obs (
//!     obs_id INTEGER PRIMARY KEY,
//!     uuid TEXT NOT NULL UNIQUE,
//!     patient_id INTEGER NOT NULL REFERENCES patient(patient_id),
//!     encounter_id INTEGER REFERENCES encounter(encounter_id),
//!     concept_id INTEGER NOT NULL REFERENCES concept(concept_id),
//!     obs_group_id INTEGER REFERENCES obs(obs_id),
//!     value_numeric REAL,
//!     obs_datetime TEXT,
//!     voided INTEGER NOT NULL DEFAULT 0,
//!     ...
//! );
//! ```

mod backend;
mod schema;
mod session;

pub use backend::{SqliteBackend, SqliteBackendConfig};
pub use schema::SCHEMA_VERSION;
pub use session::SqliteSession;
