//! Read session over one SQLite transaction.
//!
//! Executes the engine's assembled SQL and hydrates entities from the
//! clinical tables. References to other entities are resolved to uuids in
//! the same query; concepts and patient child rows are loaded in batches.

use std::collections::{BTreeSet, HashMap};

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, ToSql, params_from_iter};

use crate::core::{ConceptLookup, SearchSession};
use crate::error::{BackendError, StorageError, StorageResult};
use crate::search::query_builder::placeholders;
use crate::search::{SqlFragment, SqlParam};
use crate::types::{
    Concept, ConceptMapping, Encounter, Entity, EntityId, ObsValue, Observation, Patient,
    PatientAddress, PatientIdentifier, PersonName, Practitioner, ResourceType, ServiceRequest,
};

/// Maximum number of ids bound into one hydration query.
const CHUNK_SIZE: usize = 500;

/// A [`SearchSession`] bound to one connection or transaction.
pub struct SqliteSession<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteSession<'c> {
    /// Creates a session over `conn`.
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn patients(&self, ids: &[EntityId]) -> StorageResult<Vec<Patient>> {
        let sql = format!(
            "SELECT patient_id, uuid, gender, birthdate, deceased, date_created, date_changed
             FROM patient WHERE voided = 0 AND patient_id IN ({})",
            placeholders(ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut patients = stmt
            .query_map(params_from_iter(ids), |row| {
                Ok(Patient {
                    id: row.get(0)?,
                    uuid: row.get(1)?,
                    gender: row.get(2)?,
                    birthdate: date(row, 3)?,
                    deceased: row.get(4)?,
                    names: Vec::new(),
                    identifiers: Vec::new(),
                    addresses: Vec::new(),
                    date_created: timestamp(row, 5)?,
                    date_changed: optional_timestamp(row, 6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut names = self.children(
            "SELECT patient_id, given_name, family_name, preferred FROM patient_name
             WHERE voided = 0 AND patient_id IN ({ids}) ORDER BY preferred DESC, patient_name_id",
            ids,
            |row| {
                Ok(PersonName {
                    given: row.get(1)?,
                    family: row.get(2)?,
                    preferred: row.get(3)?,
                })
            },
        )?;
        let mut identifiers = self.children(
            "SELECT patient_id, identifier, identifier_type, preferred FROM patient_identifier
             WHERE voided = 0 AND patient_id IN ({ids})
             ORDER BY preferred DESC, patient_identifier_id",
            ids,
            |row| {
                Ok(PatientIdentifier {
                    identifier: row.get(1)?,
                    identifier_type: row.get(2)?,
                    preferred: row.get(3)?,
                })
            },
        )?;
        let mut addresses = self.children(
            "SELECT patient_id, city, state, country, postal_code, preferred FROM patient_address
             WHERE voided = 0 AND patient_id IN ({ids}) ORDER BY preferred DESC, patient_address_id",
            ids,
            |row| {
                Ok(PatientAddress {
                    city: row.get(1)?,
                    state: row.get(2)?,
                    country: row.get(3)?,
                    postal_code: row.get(4)?,
                    preferred: row.get(5)?,
                })
            },
        )?;

        for patient in &mut patients {
            patient.names = names.remove(&patient.id).unwrap_or_default();
            patient.identifiers = identifiers.remove(&patient.id).unwrap_or_default();
            patient.addresses = addresses.remove(&patient.id).unwrap_or_default();
        }
        Ok(patients)
    }

    fn practitioners(&self, ids: &[EntityId]) -> StorageResult<Vec<Practitioner>> {
        let sql = format!(
            "SELECT practitioner_id, uuid, given_name, family_name, identifier, date_created,
                    date_changed
             FROM practitioner WHERE retired = 0 AND practitioner_id IN ({})",
            placeholders(ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let practitioners = stmt
            .query_map(params_from_iter(ids), |row| {
                Ok(Practitioner {
                    id: row.get(0)?,
                    uuid: row.get(1)?,
                    given_name: row.get(2)?,
                    family_name: row.get(3)?,
                    identifier: row.get(4)?,
                    date_created: timestamp(row, 5)?,
                    date_changed: optional_timestamp(row, 6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(practitioners)
    }

    fn encounters(&self, ids: &[EntityId]) -> StorageResult<Vec<Encounter>> {
        let sql = format!(
            "SELECT e.encounter_id, e.uuid, p.uuid, pr.uuid, e.type_concept_id,
                    e.encounter_datetime, e.status, e.date_created, e.date_changed
             FROM encounter e
             JOIN patient p ON p.patient_id = e.patient_id
             LEFT JOIN practitioner pr ON pr.practitioner_id = e.practitioner_id
             WHERE e.voided = 0 AND e.encounter_id IN ({})",
            placeholders(ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(ids), |row| {
                let type_concept: Option<EntityId> = row.get(4)?;
                let encounter = Encounter {
                    id: row.get(0)?,
                    uuid: row.get(1)?,
                    patient_uuid: row.get(2)?,
                    practitioner_uuid: row.get(3)?,
                    encounter_type: None,
                    encounter_datetime: optional_timestamp(row, 5)?,
                    status: row.get(6)?,
                    date_created: timestamp(row, 7)?,
                    date_changed: optional_timestamp(row, 8)?,
                };
                Ok((encounter, type_concept))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let concepts = self.concepts(rows.iter().filter_map(|(_, c)| *c))?;
        rows.into_iter()
            .map(|(mut encounter, type_concept)| -> StorageResult<Encounter> {
                encounter.encounter_type = type_concept
                    .map(|id| concept(&concepts, "encounter", id))
                    .transpose()?;
                Ok(encounter)
            })
            .collect()
    }

    fn observations(&self, ids: &[EntityId]) -> StorageResult<Vec<Observation>> {
        struct Raw {
            id: EntityId,
            uuid: String,
            patient_uuid: String,
            encounter_uuid: Option<String>,
            concept_id: EntityId,
            obs_group_uuid: Option<String>,
            category: Option<String>,
            status: Option<String>,
            numeric: Option<f64>,
            unit: Option<String>,
            text: Option<String>,
            coded: Option<EntityId>,
            obs_datetime: Option<NaiveDateTime>,
            date_created: NaiveDateTime,
            date_changed: Option<NaiveDateTime>,
        }

        let sql = format!(
            "SELECT o.obs_id, o.uuid, p.uuid, e.uuid, o.concept_id, g.uuid, o.category, o.status,
                    o.value_numeric, o.value_unit, o.value_text, o.value_coded, o.obs_datetime,
                    o.date_created, o.date_changed
             FROM obs o
             JOIN patient p ON p.patient_id = o.patient_id
             LEFT JOIN encounter e ON e.encounter_id = o.encounter_id
             LEFT JOIN obs g ON g.obs_id = o.obs_group_id
             WHERE o.voided = 0 AND o.obs_id IN ({})",
            placeholders(ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(ids), |row| {
                Ok(Raw {
                    id: row.get(0)?,
                    uuid: row.get(1)?,
                    patient_uuid: row.get(2)?,
                    encounter_uuid: row.get(3)?,
                    concept_id: row.get(4)?,
                    obs_group_uuid: row.get(5)?,
                    category: row.get(6)?,
                    status: row.get(7)?,
                    numeric: row.get(8)?,
                    unit: row.get(9)?,
                    text: row.get(10)?,
                    coded: row.get(11)?,
                    obs_datetime: optional_timestamp(row, 12)?,
                    date_created: timestamp(row, 13)?,
                    date_changed: optional_timestamp(row, 14)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let concepts = self.concepts(
            rows.iter()
                .flat_map(|r| std::iter::once(r.concept_id).chain(r.coded)),
        )?;
        rows.into_iter()
            .map(|raw| -> StorageResult<Observation> {
                let value = match (raw.coded, raw.numeric, raw.text) {
                    (Some(coded), _, _) => Some(ObsValue::Coded(concept(&concepts, "obs", coded)?)),
                    (None, Some(value), _) => Some(ObsValue::Numeric {
                        value,
                        unit: raw.unit,
                    }),
                    (None, None, Some(text)) => Some(ObsValue::Text(text)),
                    (None, None, None) => None,
                };
                Ok(Observation {
                    id: raw.id,
                    uuid: raw.uuid,
                    patient_uuid: raw.patient_uuid,
                    encounter_uuid: raw.encounter_uuid,
                    concept: concept(&concepts, "obs", raw.concept_id)?,
                    obs_group_uuid: raw.obs_group_uuid,
                    category: raw.category,
                    status: raw.status,
                    value,
                    obs_datetime: raw.obs_datetime,
                    date_created: raw.date_created,
                    date_changed: raw.date_changed,
                })
            })
            .collect()
    }

    fn service_requests(&self, ids: &[EntityId]) -> StorageResult<Vec<ServiceRequest>> {
        struct PendingRequest {
            id: EntityId,
            uuid: String,
            patient_uuid: String,
            encounter_uuid: Option<String>,
            requester_uuid: Option<String>,
            status: Option<String>,
            fulfiller_status: Option<String>,
            date_activated: Option<NaiveDateTime>,
            date_created: NaiveDateTime,
            date_changed: Option<NaiveDateTime>,
        }

        let sql = format!(
            "SELECT s.service_request_id, s.uuid, p.uuid, e.uuid, pr.uuid, s.concept_id, s.status,
                    s.fulfiller_status, s.date_activated, s.date_created, s.date_changed
             FROM service_request s
             JOIN patient p ON p.patient_id = s.patient_id
             LEFT JOIN encounter e ON e.encounter_id = s.encounter_id
             LEFT JOIN practitioner pr ON pr.practitioner_id = s.requester_id
             WHERE s.voided = 0 AND s.service_request_id IN ({})",
            placeholders(ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(ids), |row| {
                let request = PendingRequest {
                    id: row.get(0)?,
                    uuid: row.get(1)?,
                    patient_uuid: row.get(2)?,
                    encounter_uuid: row.get(3)?,
                    requester_uuid: row.get(4)?,
                    status: row.get(6)?,
                    fulfiller_status: row.get(7)?,
                    date_activated: optional_timestamp(row, 8)?,
                    date_created: timestamp(row, 9)?,
                    date_changed: optional_timestamp(row, 10)?,
                };
                Ok((request, row.get::<_, EntityId>(5)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let concepts = self.concepts(rows.iter().map(|(_, c)| *c))?;
        rows.into_iter()
            .map(|(request, concept_id)| -> StorageResult<ServiceRequest> {
                Ok(ServiceRequest {
                    id: request.id,
                    uuid: request.uuid,
                    patient_uuid: request.patient_uuid,
                    encounter_uuid: request.encounter_uuid,
                    requester_uuid: request.requester_uuid,
                    concept: concept(&concepts, "service_request", concept_id)?,
                    status: request.status,
                    fulfiller_status: request.fulfiller_status,
                    date_activated: request.date_activated,
                    date_created: request.date_created,
                    date_changed: request.date_changed,
                })
            })
            .collect()
    }

    /// Loads concepts with their mappings, retired or not.
    fn concepts(
        &self,
        ids: impl IntoIterator<Item = EntityId>,
    ) -> StorageResult<HashMap<EntityId, Concept>> {
        let ids: Vec<EntityId> = ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let mut concepts = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(CHUNK_SIZE) {
            let sql = format!(
                "SELECT concept_id, uuid, name FROM concept WHERE concept_id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk), |row| {
                Ok(Concept {
                    id: row.get(0)?,
                    uuid: row.get(1)?,
                    name: row.get(2)?,
                    mappings: Vec::new(),
                })
            })?;
            for concept in rows {
                let concept = concept?;
                concepts.insert(concept.id, concept);
            }

            let mappings = self.children(
                "SELECT concept_id, source, code FROM concept_mapping
                 WHERE concept_id IN ({ids}) ORDER BY concept_mapping_id",
                chunk,
                |row| {
                    Ok(ConceptMapping {
                        source: row.get(1)?,
                        code: row.get(2)?,
                    })
                },
            )?;
            for (id, list) in mappings {
                if let Some(concept) = concepts.get_mut(&id) {
                    concept.mappings = list;
                }
            }
        }
        Ok(concepts)
    }

    /// Runs `template` with `{ids}` replaced by placeholders for `ids` and
    /// groups the mapped rows by the id in column 0.
    fn children<T>(
        &self,
        template: &str,
        ids: &[EntityId],
        mut map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> StorageResult<HashMap<EntityId, Vec<T>>> {
        let sql = template.replace("{ids}", &placeholders(ids.len()));
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids), |row| {
            Ok((row.get::<_, EntityId>(0)?, map(row)?))
        })?;

        let mut grouped: HashMap<EntityId, Vec<T>> = HashMap::new();
        for row in rows {
            let (id, child) = row?;
            grouped.entry(id).or_default().push(child);
        }
        Ok(grouped)
    }
}

impl SearchSession for SqliteSession<'_> {
    fn count(&self, query: &SqlFragment) -> StorageResult<usize> {
        tracing::debug!(sql = %query.sql, "Executing count query");
        let params = bind(&query.params);
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let count: i64 = self
            .conn
            .query_row(&query.sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn matching_ids(&self, query: &SqlFragment) -> StorageResult<Vec<EntityId>> {
        tracing::debug!(sql = %query.sql, "Executing id query");
        let params = bind(&query.params);
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn.prepare(&query.sql)?;
        let ids = stmt
            .query_map(param_refs.as_slice(), |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<EntityId>>>()?;
        Ok(ids)
    }

    fn related_ids(&self, query: &SqlFragment) -> StorageResult<Vec<(EntityId, EntityId)>> {
        tracing::debug!(sql = %query.sql, "Executing include query");
        let params = bind(&query.params);
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn.prepare(&query.sql)?;
        let pairs = stmt
            .query_map(param_refs.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(EntityId, EntityId)>>>()?;
        Ok(pairs)
    }

    fn concept_ids(&self, lookup: &ConceptLookup) -> StorageResult<Vec<EntityId>> {
        let ids = match lookup {
            ConceptLookup::Any { code } => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT c.concept_id FROM concept c
                     WHERE c.retired = 0
                       AND (CAST(c.concept_id AS TEXT) = ?1
                            OR c.uuid = ?1
                            OR EXISTS (SELECT 1 FROM concept_mapping m
                                       WHERE m.concept_id = c.concept_id AND m.code = ?1))
                     ORDER BY c.concept_id",
                )?;
                stmt.query_map([code], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<EntityId>>>()?
            }
            ConceptLookup::Mapped { source, code } => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT DISTINCT c.concept_id FROM concept c
                     JOIN concept_mapping m ON m.concept_id = c.concept_id
                     WHERE c.retired = 0 AND m.source = ?1 COLLATE NOCASE AND m.code = ?2
                     ORDER BY c.concept_id",
                )?;
                stmt.query_map([source, code], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<EntityId>>>()?
            }
        };
        tracing::debug!(?lookup, matched = ids.len(), "Resolved concept lookup");
        Ok(ids)
    }

    fn hydrate(&self, resource_type: ResourceType, ids: &[EntityId]) -> StorageResult<Vec<Entity>> {
        let mut loaded: HashMap<EntityId, Entity> = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(CHUNK_SIZE) {
            let entities: Vec<Entity> = match resource_type {
                ResourceType::Patient => {
                    self.patients(chunk)?.into_iter().map(Entity::Patient).collect()
                }
                ResourceType::Practitioner => self
                    .practitioners(chunk)?
                    .into_iter()
                    .map(Entity::Practitioner)
                    .collect(),
                ResourceType::Encounter => {
                    self.encounters(chunk)?.into_iter().map(Entity::Encounter).collect()
                }
                ResourceType::Observation => self
                    .observations(chunk)?
                    .into_iter()
                    .map(Entity::Observation)
                    .collect(),
                ResourceType::ServiceRequest => self
                    .service_requests(chunk)?
                    .into_iter()
                    .map(Entity::ServiceRequest)
                    .collect(),
            };
            loaded.extend(entities.into_iter().map(|e| (e.id(), e)));
        }
        Ok(ids.iter().filter_map(|id| loaded.get(id).cloned()).collect())
    }
}

/// Boxes bound parameters for rusqlite.
fn bind(params: &[SqlParam]) -> Vec<Box<dyn ToSql>> {
    params
        .iter()
        .map(|param| -> Box<dyn ToSql> {
            match param {
                SqlParam::String(s) => Box::new(s.clone()),
                SqlParam::Integer(i) => Box::new(*i),
                SqlParam::Float(f) => Box::new(*f),
            }
        })
        .collect()
}

fn concept(
    concepts: &HashMap<EntityId, Concept>,
    table: &str,
    id: EntityId,
) -> StorageResult<Concept> {
    concepts.get(&id).cloned().ok_or_else(|| {
        StorageError::Backend(BackendError::MalformedRow {
            table: table.to_string(),
            message: format!("concept {} does not exist", id),
        })
    })
}

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn conversion_error(index: usize, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        Type::Text,
        format!("unparseable date {:?}", raw).into(),
    )
}

fn timestamp(row: &Row<'_>, index: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(index)?;
    parse_timestamp(&raw).ok_or_else(|| conversion_error(index, &raw))
}

fn optional_timestamp(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    match row.get::<_, Option<String>>(index)? {
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| conversion_error(index, &raw)),
        None => Ok(None),
    }
}

fn date(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<NaiveDate>> {
    match row.get::<_, Option<String>>(index)? {
        Some(raw) => parse_timestamp(&raw)
            .map(|t| Some(t.date()))
            .ok_or_else(|| conversion_error(index, &raw)),
        None => Ok(None),
    }
}
