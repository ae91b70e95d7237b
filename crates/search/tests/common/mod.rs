//! Shared fixtures for the search integration tests.
//!
//! Seeds a small clinic: three live patients and one voided patient, a
//! practitioner, two encounters, weight and height observations, and one
//! service request.

#![allow(dead_code)]

use helios_search::backends::sqlite::SqliteBackend;
use helios_search::config::SearchConfig;
use helios_search::core::EntityTranslator;
use helios_search::engine::SearchEngine;
use helios_search::types::{Entity, ResourceType};

/// Uuid of the weight concept.
pub const WEIGHT_UUID: &str = "5089AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

/// Patient with nine live observations.
pub const MARY: &str = "pat-mary";
/// Patient with two live observations.
pub const JOHN: &str = "pat-john";
/// Patient with no observations.
pub const ALICE: &str = "pat-alice";
/// Voided patient.
pub const VOIDED: &str = "pat-voided";

/// The seed script.
pub const SEED_SQL: &str = "
INSERT INTO concept (concept_id, uuid, name, datatype) VALUES
    (5089, '5089AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA', 'Weight (kg)', 'Numeric'),
    (5090, '5090AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA', 'Height (cm)', 'Numeric'),
    (1238, '1238AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA', 'Outpatient', 'N/A'),
    (1271, '1271AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA', 'Laboratory test', 'N/A');

INSERT INTO concept_mapping (concept_id, source, code) VALUES
    (5089, 'LOINC', '29463-7'),
    (5089, 'CIEL', '5089'),
    (5090, 'LOINC', '8302-2'),
    (5090, 'CIEL', '5090');

INSERT INTO patient (patient_id, uuid, gender, birthdate, voided, date_created) VALUES
    (1, 'pat-mary', 'F', '1976-08-25', 0, '2005-01-01 00:00:00'),
    (2, 'pat-john', 'M', '1980-02-14', 0, '2005-02-01 00:00:00'),
    (3, 'pat-alice', 'F', '1990-11-30', 0, '2005-03-01 00:00:00'),
    (4, 'pat-voided', 'F', '1950-01-01', 1, '2005-04-01 00:00:00');

INSERT INTO patient_name (patient_id, given_name, family_name, preferred) VALUES
    (1, 'Mary', 'Chebet', 1),
    (2, 'John', 'Kamau', 1),
    (3, 'Alice', 'Achieng', 1),
    (4, 'Mary', 'Chebet', 1);

INSERT INTO patient_identifier (patient_id, identifier, identifier_type, preferred) VALUES
    (1, 'MRN-1', 'OpenMRS ID', 1),
    (2, 'MRN-2', 'OpenMRS ID', 1),
    (3, 'MRN-3', 'OpenMRS ID', 1),
    (4, 'MRN-4', 'OpenMRS ID', 1);

INSERT INTO patient_address (patient_id, city, state, country, postal_code, preferred) VALUES
    (1, 'Eldoret', 'Uasin Gishu', 'Kenya', '30100', 1),
    (2, 'Kisumu', 'Kisumu', 'Kenya', '40100', 1),
    (3, 'Eldama Ravine', 'Baringo', 'Kenya', '20103', 1);

INSERT INTO practitioner (practitioner_id, uuid, given_name, family_name, identifier) VALUES
    (1, 'prac-1', 'Jane', 'Otieno', 'PROV-1');

INSERT INTO encounter (encounter_id, uuid, patient_id, practitioner_id, type_concept_id,
                       encounter_datetime, status) VALUES
    (1, 'enc-mary', 1, 1, 1238, '2008-08-18 14:00:00', 'finished'),
    (2, 'enc-john', 2, 1, 1238, '2010-01-01 08:00:00', 'finished');

INSERT INTO obs (obs_id, uuid, patient_id, encounter_id, concept_id, obs_group_id, category,
                 status, value_numeric, value_unit, obs_datetime) VALUES
    (1, 'obs-1', 1, 1, 5089, NULL, 'vital-signs', 'final', 60.0, 'kg', '2008-08-18 14:09:35'),
    (2, 'obs-2', 1, 1, 5089, 1, 'vital-signs', 'final', 61.5, 'kg', '2008-08-19 09:00:00'),
    (3, 'obs-3', 1, NULL, 5089, NULL, 'vital-signs', 'final', 62.0, 'kg', '2009-01-01 10:00:00'),
    (4, 'obs-4', 1, NULL, 5089, NULL, 'vital-signs', 'final', 63.0, 'kg', '2009-02-01 10:00:00'),
    (5, 'obs-5', 1, NULL, 5089, NULL, 'vital-signs', 'final', 64.0, 'kg', '2009-03-01 10:00:00'),
    (6, 'obs-6', 1, NULL, 5089, NULL, 'vital-signs', 'final', 65.0, 'kg', '2009-04-01 10:00:00'),
    (7, 'obs-7', 1, NULL, 5089, NULL, 'vital-signs', 'final', 66.0, 'kg', '2009-05-01 10:00:00'),
    (8, 'obs-8', 1, NULL, 5089, NULL, 'vital-signs', 'final', 67.0, 'kg', '2009-06-01 10:00:00'),
    (9, 'obs-9', 1, NULL, 5090, NULL, 'vital-signs', 'final', 170.0, 'cm', '2009-07-01 10:00:00'),
    (10, 'obs-10', 2, 2, 5089, NULL, 'vital-signs', 'final', 100.0, 'kg', '2010-01-01 08:05:00'),
    (11, 'obs-11', 2, NULL, 5089, NULL, 'vital-signs', 'preliminary', 72.0, 'kg', '2010-02-01 08:00:00');

INSERT INTO obs (obs_id, uuid, patient_id, concept_id, value_numeric, value_unit, obs_datetime,
                 voided) VALUES
    (12, 'obs-voided', 1, 5089, 99.0, 'kg', '2008-08-18 15:00:00', 1);

INSERT INTO service_request (service_request_id, uuid, patient_id, encounter_id, requester_id,
                             concept_id, status, fulfiller_status, date_activated) VALUES
    (1, 'sr-mary', 1, 1, 1, 1271, 'active', 'IN_PROGRESS', '2008-08-18 14:30:00');
";

/// Writes the seed data into `backend`, installing the schema first.
pub fn seed(backend: &SqliteBackend) {
    backend.init_schema().expect("Failed to initialize schema");
    backend.execute_batch(SEED_SQL).expect("Failed to seed data");
}

/// An in-memory backend holding the seed data.
pub fn seeded_backend() -> SqliteBackend {
    let backend = SqliteBackend::in_memory().expect("Failed to create SQLite backend");
    seed(&backend);
    backend
}

/// An engine over a freshly seeded in-memory backend.
pub fn engine() -> SearchEngine<SqliteBackend, EntityTranslator> {
    SearchEngine::new(seeded_backend(), EntityTranslator, SearchConfig::default())
        .expect("Failed to create engine")
}

/// External identities of `entities`, in order.
pub fn uuids(entities: &[Entity]) -> Vec<String> {
    entities.iter().map(|e| e.uuid().to_string()).collect()
}

/// External identities of the entities of one type, in order.
pub fn uuids_of(entities: &[Entity], resource_type: ResourceType) -> Vec<String> {
    entities
        .iter()
        .filter(|e| e.resource_type() == resource_type)
        .map(|e| e.uuid().to_string())
        .collect()
}
