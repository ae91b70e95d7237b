//! Hydrated clinical entities.
//!
//! These mirror the relational model closely. References to other entities
//! are carried by external identity (uuid) so a translator can render them
//! without further lookups.

// Entity fields mirror the columns they are read from
#![allow(missing_docs)]

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::ResourceType;

/// Internal integer identity of a stored row.
pub type EntityId = i64;

/// A coded concept with its external code mappings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    /// Internal identity.
    pub id: EntityId,
    /// External identity.
    pub uuid: String,
    /// Preferred display name.
    pub name: String,
    /// Codes in other coding systems denoting the same concept.
    #[serde(default)]
    pub mappings: Vec<ConceptMapping>,
}

/// One external code for a concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptMapping {
    /// Source name (e.g. `LOINC`).
    pub source: String,
    /// Code within the source.
    pub code: String,
}

/// A person name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonName {
    pub given: Option<String>,
    pub family: Option<String>,
    pub preferred: bool,
}

/// A patient business identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientIdentifier {
    pub identifier: String,
    pub identifier_type: Option<String>,
    pub preferred: bool,
}

/// A postal address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientAddress {
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub preferred: bool,
}

/// A patient row with its names, identifiers and addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: EntityId,
    pub uuid: String,
    /// One of `M`, `F`, `O`, `U`.
    pub gender: Option<String>,
    pub birthdate: Option<NaiveDate>,
    pub deceased: bool,
    pub names: Vec<PersonName>,
    pub identifiers: Vec<PatientIdentifier>,
    pub addresses: Vec<PatientAddress>,
    pub date_created: NaiveDateTime,
    pub date_changed: Option<NaiveDateTime>,
}

/// A care provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Practitioner {
    pub id: EntityId,
    pub uuid: String,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub identifier: Option<String>,
    pub date_created: NaiveDateTime,
    pub date_changed: Option<NaiveDateTime>,
}

/// A patient visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encounter {
    pub id: EntityId,
    pub uuid: String,
    pub patient_uuid: String,
    pub practitioner_uuid: Option<String>,
    pub encounter_type: Option<Concept>,
    pub encounter_datetime: Option<NaiveDateTime>,
    pub status: Option<String>,
    pub date_created: NaiveDateTime,
    pub date_changed: Option<NaiveDateTime>,
}

/// The value recorded by an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObsValue {
    /// A measurement.
    Numeric { value: f64, unit: Option<String> },
    /// Free text.
    Text(String),
    /// A coded answer.
    Coded(Concept),
}

/// A measurement or finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: EntityId,
    pub uuid: String,
    pub patient_uuid: String,
    pub encounter_uuid: Option<String>,
    pub concept: Concept,
    /// The group observation this one is a member of.
    pub obs_group_uuid: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub value: Option<ObsValue>,
    pub obs_datetime: Option<NaiveDateTime>,
    pub date_created: NaiveDateTime,
    pub date_changed: Option<NaiveDateTime>,
}

/// An order for a test or procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: EntityId,
    pub uuid: String,
    pub patient_uuid: String,
    pub encounter_uuid: Option<String>,
    pub requester_uuid: Option<String>,
    pub concept: Concept,
    pub status: Option<String>,
    pub fulfiller_status: Option<String>,
    pub date_activated: Option<NaiveDateTime>,
    pub date_created: NaiveDateTime,
    pub date_changed: Option<NaiveDateTime>,
}

/// Any hydrated entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resourceType")]
pub enum Entity {
    Patient(Patient),
    Practitioner(Practitioner),
    Encounter(Encounter),
    Observation(Observation),
    ServiceRequest(ServiceRequest),
}

impl Entity {
    /// The resource type this entity is exposed as.
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Entity::Patient(_) => ResourceType::Patient,
            Entity::Practitioner(_) => ResourceType::Practitioner,
            Entity::Encounter(_) => ResourceType::Encounter,
            Entity::Observation(_) => ResourceType::Observation,
            Entity::ServiceRequest(_) => ResourceType::ServiceRequest,
        }
    }

    /// Internal identity.
    pub fn id(&self) -> EntityId {
        match self {
            Entity::Patient(e) => e.id,
            Entity::Practitioner(e) => e.id,
            Entity::Encounter(e) => e.id,
            Entity::Observation(e) => e.id,
            Entity::ServiceRequest(e) => e.id,
        }
    }

    /// External identity.
    pub fn uuid(&self) -> &str {
        match self {
            Entity::Patient(e) => &e.uuid,
            Entity::Practitioner(e) => &e.uuid,
            Entity::Encounter(e) => &e.uuid,
            Entity::Observation(e) => &e.uuid,
            Entity::ServiceRequest(e) => &e.uuid,
        }
    }

    /// The last modification time, falling back to creation time.
    pub fn last_updated(&self) -> NaiveDateTime {
        let (created, changed) = match self {
            Entity::Patient(e) => (e.date_created, e.date_changed),
            Entity::Practitioner(e) => (e.date_created, e.date_changed),
            Entity::Encounter(e) => (e.date_created, e.date_changed),
            Entity::Observation(e) => (e.date_created, e.date_changed),
            Entity::ServiceRequest(e) => (e.date_created, e.date_changed),
        };
        changed.unwrap_or(created)
    }
}
