//! SQLite schema definitions and migrations.

use rusqlite::Connection;

use crate::error::{BackendError, StorageError, StorageResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        tracing::info!(version = SCHEMA_VERSION, "Installed clinical schema");
    } else if current_version > SCHEMA_VERSION {
        return Err(StorageError::Backend(BackendError::MigrationError {
            message: format!(
                "database schema version {} is newer than supported version {}",
                current_version, SCHEMA_VERSION
            ),
        }));
    } else {
        tracing::debug!(version = current_version, "Schema is up to date");
    }

    Ok(())
}

/// Get the current schema version.
pub fn get_schema_version(conn: &Connection) -> StorageResult<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| migration_error("Failed to create schema_version table", e))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> StorageResult<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| migration_error("Failed to clear schema_version", e))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .map_err(|e| migration_error("Failed to set schema_version", e))?;
    Ok(())
}

fn migration_error(context: &str, err: rusqlite::Error) -> StorageError {
    StorageError::Backend(BackendError::MigrationError {
        message: format!("{}: {}", context, err),
    })
}

/// Create the initial schema (version 1).
fn create_schema_v1(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS concept (
            concept_id INTEGER PRIMARY KEY,
            uuid TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            datatype TEXT,
            retired INTEGER NOT NULL DEFAULT 0,
            date_created TEXT NOT NULL DEFAULT (datetime('now')),
            date_changed TEXT
        );

        CREATE TABLE IF NOT EXISTS concept_mapping (
            concept_mapping_id INTEGER PRIMARY KEY,
            concept_id INTEGER NOT NULL REFERENCES concept(concept_id),
            source TEXT NOT NULL,
            code TEXT NOT NULL,
            date_created TEXT NOT NULL DEFAULT (datetime('now')),
            date_changed TEXT
        );

        CREATE TABLE IF NOT EXISTS patient (
            patient_id INTEGER PRIMARY KEY,
            uuid TEXT NOT NULL UNIQUE,
            gender TEXT CHECK (gender IN ('M', 'F', 'O', 'U')),
            birthdate TEXT,
            deceased INTEGER NOT NULL DEFAULT 0,
            voided INTEGER NOT NULL DEFAULT 0,
            date_created TEXT NOT NULL DEFAULT (datetime('now')),
            date_changed TEXT
        );

        CREATE TABLE IF NOT EXISTS patient_name (
            patient_name_id INTEGER PRIMARY KEY,
            patient_id INTEGER NOT NULL REFERENCES patient(patient_id),
            given_name TEXT,
            family_name TEXT,
            preferred INTEGER NOT NULL DEFAULT 0,
            voided INTEGER NOT NULL DEFAULT 0,
            date_created TEXT NOT NULL DEFAULT (datetime('now')),
            date_changed TEXT
        );

        CREATE TABLE IF NOT EXISTS patient_identifier (
            patient_identifier_id INTEGER PRIMARY KEY,
            patient_id INTEGER NOT NULL REFERENCES patient(patient_id),
            identifier TEXT NOT NULL,
            identifier_type TEXT,
            preferred INTEGER NOT NULL DEFAULT 0,
            voided INTEGER NOT NULL DEFAULT 0,
            date_created TEXT NOT NULL DEFAULT (datetime('now')),
            date_changed TEXT
        );

        CREATE TABLE IF NOT EXISTS patient_address (
            patient_address_id INTEGER PRIMARY KEY,
            patient_id INTEGER NOT NULL REFERENCES patient(patient_id),
            city TEXT,
            state TEXT,
            country TEXT,
            postal_code TEXT,
            preferred INTEGER NOT NULL DEFAULT 0,
            voided INTEGER NOT NULL DEFAULT 0,
            date_created TEXT NOT NULL DEFAULT (datetime('now')),
            date_changed TEXT
        );

        CREATE TABLE IF NOT EXISTS practitioner (
            practitioner_id INTEGER PRIMARY KEY,
            uuid TEXT NOT NULL UNIQUE,
            given_name TEXT,
            family_name TEXT,
            identifier TEXT,
            retired INTEGER NOT NULL DEFAULT 0,
            date_created TEXT NOT NULL DEFAULT (datetime('now')),
            date_changed TEXT
        );

        CREATE TABLE IF NOT EXISTS encounter (
            encounter_id INTEGER PRIMARY KEY,
            uuid TEXT NOT NULL UNIQUE,
            patient_id INTEGER NOT NULL REFERENCES patient(patient_id),
            practitioner_id INTEGER REFERENCES practitioner(practitioner_id),
            type_concept_id INTEGER REFERENCES concept(concept_id),
            encounter_datetime TEXT,
            status TEXT,
            voided INTEGER NOT NULL DEFAULT 0,
            date_created TEXT NOT NULL DEFAULT (datetime('now')),
            date_changed TEXT
        );

        CREATE TABLE IF NOT EXISTS obs (
            obs_id INTEGER PRIMARY KEY,
            uuid TEXT NOT NULL UNIQUE,
            patient_id INTEGER NOT NULL REFERENCES patient(patient_id),
            encounter_id INTEGER REFERENCES encounter(encounter_id),
            concept_id INTEGER NOT NULL REFERENCES concept(concept_id),
            obs_group_id INTEGER REFERENCES obs(obs_id),
            category TEXT,
            status TEXT,
            value_numeric REAL,
            value_unit TEXT,
            value_text TEXT,
            value_coded INTEGER REFERENCES concept(concept_id),
            obs_datetime TEXT,
            voided INTEGER NOT NULL DEFAULT 0,
            date_created TEXT NOT NULL DEFAULT (datetime('now')),
            date_changed TEXT
        );

        CREATE TABLE IF NOT EXISTS service_request (
            service_request_id INTEGER PRIMARY KEY,
            uuid TEXT NOT NULL UNIQUE,
            patient_id INTEGER NOT NULL REFERENCES patient(patient_id),
            encounter_id INTEGER REFERENCES encounter(encounter_id),
            requester_id INTEGER REFERENCES practitioner(practitioner_id),
            concept_id INTEGER NOT NULL REFERENCES concept(concept_id),
            status TEXT,
            fulfiller_status TEXT,
            date_activated TEXT,
            voided INTEGER NOT NULL DEFAULT 0,
            date_created TEXT NOT NULL DEFAULT (datetime('now')),
            date_changed TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_concept_mapping_code
            ON concept_mapping(code, source);
        CREATE INDEX IF NOT EXISTS idx_concept_mapping_concept
            ON concept_mapping(concept_id);
        CREATE INDEX IF NOT EXISTS idx_patient_name_patient
            ON patient_name(patient_id);
        CREATE INDEX IF NOT EXISTS idx_patient_identifier_patient
            ON patient_identifier(patient_id);
        CREATE INDEX IF NOT EXISTS idx_patient_identifier_value
            ON patient_identifier(identifier);
        CREATE INDEX IF NOT EXISTS idx_patient_address_patient
            ON patient_address(patient_id);
        CREATE INDEX IF NOT EXISTS idx_encounter_patient
            ON encounter(patient_id);
        CREATE INDEX IF NOT EXISTS idx_obs_patient
            ON obs(patient_id);
        CREATE INDEX IF NOT EXISTS idx_obs_encounter
            ON obs(encounter_id);
        CREATE INDEX IF NOT EXISTS idx_obs_concept
            ON obs(concept_id);
        CREATE INDEX IF NOT EXISTS idx_obs_group
            ON obs(obs_group_id);
        CREATE INDEX IF NOT EXISTS idx_service_request_patient
            ON service_request(patient_id);
        CREATE INDEX IF NOT EXISTS idx_service_request_encounter
            ON service_request(encounter_id);",
    )
    .map_err(|e| migration_error("Failed to create clinical tables", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
                 ('patient', 'obs', 'encounter', 'service_request', 'concept_mapping')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 5);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        get_schema_version(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (99)", [])
            .unwrap();
        assert!(initialize_schema(&conn).is_err());
    }
}
