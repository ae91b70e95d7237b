//! Data-shape translation from internal entities to external resources.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde_json::{Map, Value, json};

use crate::config::SearchConfig;
use crate::types::{Concept, Entity, ObsValue};

/// Converts hydrated entities to the representation callers receive.
///
/// Called once per primary or included entity before it is placed on a page.
pub trait ResourceTranslator: Send + Sync {
    /// The external resource type.
    type Resource;

    /// Translates one entity.
    fn to_external(&self, entity: &Entity) -> Self::Resource;
}

/// Passes entities through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityTranslator;

impl ResourceTranslator for EntityTranslator {
    type Resource = Entity;

    fn to_external(&self, entity: &Entity) -> Entity {
        entity.clone()
    }
}

/// Renders entities as FHIR-shaped JSON.
///
/// Concept mappings are rendered as codings whose system is the URI
/// configured for the mapping's source; unconfigured sources are rendered
/// verbatim.
#[derive(Debug, Clone)]
pub struct FhirJsonTranslator {
    systems: HashMap<String, String>,
}

impl FhirJsonTranslator {
    /// Creates a translator using the code systems of `config`.
    pub fn new(config: &SearchConfig) -> Self {
        let systems = config
            .code_systems
            .iter()
            .map(|m| (m.source.clone(), m.system.clone()))
            .collect();
        Self { systems }
    }

    fn codeable_concept(&self, concept: &Concept) -> Value {
        let mut coding = vec![json!({ "code": concept.uuid, "display": concept.name })];
        for mapping in &concept.mappings {
            let system = self
                .systems
                .get(&mapping.source)
                .map(String::as_str)
                .unwrap_or(&mapping.source);
            coding.push(json!({ "system": system, "code": mapping.code }));
        }
        json!({ "coding": coding, "text": concept.name })
    }
}

impl Default for FhirJsonTranslator {
    fn default() -> Self {
        Self::new(&SearchConfig::default())
    }
}

fn instant(value: NaiveDateTime) -> String {
    value.format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn reference(resource_type: &str, uuid: &str) -> Value {
    json!({ "reference": format!("{}/{}", resource_type, uuid) })
}

fn gender(code: &str) -> &'static str {
    match code {
        "M" => "male",
        "F" => "female",
        "O" => "other",
        _ => "unknown",
    }
}

/// Inserts `key` only when `value` is present.
fn put(resource: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        resource.insert(key.to_string(), value);
    }
}

impl ResourceTranslator for FhirJsonTranslator {
    type Resource = Value;

    fn to_external(&self, entity: &Entity) -> Value {
        let mut resource = Map::new();
        resource.insert(
            "resourceType".to_string(),
            json!(entity.resource_type().as_str()),
        );
        resource.insert("id".to_string(), json!(entity.uuid()));
        resource.insert(
            "meta".to_string(),
            json!({ "lastUpdated": instant(entity.last_updated()) }),
        );

        match entity {
            Entity::Patient(p) => {
                put(&mut resource, "gender", p.gender.as_deref().map(|g| json!(gender(g))));
                put(
                    &mut resource,
                    "birthDate",
                    p.birthdate.map(|d| json!(d.format("%Y-%m-%d").to_string())),
                );
                resource.insert("deceasedBoolean".to_string(), json!(p.deceased));
                let names: Vec<Value> = p
                    .names
                    .iter()
                    .map(|n| {
                        let mut name = Map::new();
                        put(&mut name, "family", n.family.as_ref().map(|f| json!(f)));
                        put(&mut name, "given", n.given.as_ref().map(|g| json!([g])));
                        if n.preferred {
                            name.insert("use".to_string(), json!("official"));
                        }
                        Value::Object(name)
                    })
                    .collect();
                resource.insert("name".to_string(), json!(names));
                let identifiers: Vec<Value> = p
                    .identifiers
                    .iter()
                    .map(|i| {
                        let mut identifier = Map::new();
                        put(
                            &mut identifier,
                            "system",
                            i.identifier_type.as_ref().map(|t| json!(t)),
                        );
                        identifier.insert("value".to_string(), json!(i.identifier));
                        Value::Object(identifier)
                    })
                    .collect();
                resource.insert("identifier".to_string(), json!(identifiers));
                let addresses: Vec<Value> = p
                    .addresses
                    .iter()
                    .map(|a| {
                        let mut address = Map::new();
                        put(&mut address, "city", a.city.as_ref().map(|v| json!(v)));
                        put(&mut address, "state", a.state.as_ref().map(|v| json!(v)));
                        put(&mut address, "country", a.country.as_ref().map(|v| json!(v)));
                        put(
                            &mut address,
                            "postalCode",
                            a.postal_code.as_ref().map(|v| json!(v)),
                        );
                        Value::Object(address)
                    })
                    .collect();
                resource.insert("address".to_string(), json!(addresses));
            }
            Entity::Practitioner(p) => {
                let mut name = Map::new();
                put(&mut name, "family", p.family_name.as_ref().map(|f| json!(f)));
                put(&mut name, "given", p.given_name.as_ref().map(|g| json!([g])));
                resource.insert("name".to_string(), json!([Value::Object(name)]));
                put(
                    &mut resource,
                    "identifier",
                    p.identifier.as_ref().map(|i| json!([{ "value": i }])),
                );
            }
            Entity::Encounter(e) => {
                resource.insert("subject".to_string(), reference("Patient", &e.patient_uuid));
                put(&mut resource, "status", e.status.as_ref().map(|s| json!(s)));
                put(
                    &mut resource,
                    "participant",
                    e.practitioner_uuid
                        .as_ref()
                        .map(|u| json!([{ "individual": reference("Practitioner", u) }])),
                );
                put(
                    &mut resource,
                    "type",
                    e.encounter_type
                        .as_ref()
                        .map(|c| json!([self.codeable_concept(c)])),
                );
                put(
                    &mut resource,
                    "period",
                    e.encounter_datetime.map(|d| json!({ "start": instant(d) })),
                );
            }
            Entity::Observation(o) => {
                resource.insert("subject".to_string(), reference("Patient", &o.patient_uuid));
                put(
                    &mut resource,
                    "encounter",
                    o.encounter_uuid.as_ref().map(|u| reference("Encounter", u)),
                );
                resource.insert("code".to_string(), self.codeable_concept(&o.concept));
                put(
                    &mut resource,
                    "category",
                    o.category
                        .as_ref()
                        .map(|c| json!([{ "coding": [{ "code": c }] }])),
                );
                put(&mut resource, "status", o.status.as_ref().map(|s| json!(s)));
                put(
                    &mut resource,
                    "effectiveDateTime",
                    o.obs_datetime.map(|d| json!(instant(d))),
                );
                put(
                    &mut resource,
                    "partOf",
                    o.obs_group_uuid
                        .as_ref()
                        .map(|u| json!([reference("Observation", u)])),
                );
                match &o.value {
                    Some(ObsValue::Numeric { value, unit }) => {
                        let mut quantity = Map::new();
                        quantity.insert("value".to_string(), json!(value));
                        put(&mut quantity, "unit", unit.as_ref().map(|u| json!(u)));
                        resource.insert("valueQuantity".to_string(), Value::Object(quantity));
                    }
                    Some(ObsValue::Text(text)) => {
                        resource.insert("valueString".to_string(), json!(text));
                    }
                    Some(ObsValue::Coded(concept)) => {
                        resource.insert(
                            "valueCodeableConcept".to_string(),
                            self.codeable_concept(concept),
                        );
                    }
                    None => {}
                }
            }
            Entity::ServiceRequest(s) => {
                resource.insert("subject".to_string(), reference("Patient", &s.patient_uuid));
                put(
                    &mut resource,
                    "encounter",
                    s.encounter_uuid.as_ref().map(|u| reference("Encounter", u)),
                );
                put(
                    &mut resource,
                    "requester",
                    s.requester_uuid
                        .as_ref()
                        .map(|u| reference("Practitioner", u)),
                );
                resource.insert("code".to_string(), self.codeable_concept(&s.concept));
                put(&mut resource, "status", s.status.as_ref().map(|v| json!(v)));
                put(
                    &mut resource,
                    "authoredOn",
                    s.date_activated.map(|d| json!(instant(d))),
                );
            }
        }

        Value::Object(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConceptMapping, Observation};
    use chrono::NaiveDate;

    fn timestamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2008, 8, 18)
            .unwrap()
            .and_hms_opt(14, 9, 35)
            .unwrap()
    }

    fn observation() -> Entity {
        Entity::Observation(Observation {
            id: 7,
            uuid: "obs-7".to_string(),
            patient_uuid: "pat-1".to_string(),
            encounter_uuid: None,
            concept: Concept {
                id: 5089,
                uuid: "5089AAAA".to_string(),
                name: "Weight (kg)".to_string(),
                mappings: vec![
                    ConceptMapping {
                        source: "LOINC".to_string(),
                        code: "29463-7".to_string(),
                    },
                    ConceptMapping {
                        source: "PIH".to_string(),
                        code: "WEIGHT".to_string(),
                    },
                ],
            },
            obs_group_uuid: None,
            category: Some("vital-signs".to_string()),
            status: Some("final".to_string()),
            value: Some(ObsValue::Numeric {
                value: 70.0,
                unit: Some("kg".to_string()),
            }),
            obs_datetime: Some(timestamp()),
            date_created: timestamp(),
            date_changed: None,
        })
    }

    #[test]
    fn test_observation_shape() {
        let resource = FhirJsonTranslator::default().to_external(&observation());
        assert_eq!(resource["resourceType"], "Observation");
        assert_eq!(resource["id"], "obs-7");
        assert_eq!(resource["subject"]["reference"], "Patient/pat-1");
        assert_eq!(resource["effectiveDateTime"], "2008-08-18T14:09:35");
        assert_eq!(resource["valueQuantity"]["value"], 70.0);
        assert!(resource.get("encounter").is_none());
    }

    #[test]
    fn test_mapping_sources_render_as_systems() {
        let resource = FhirJsonTranslator::default().to_external(&observation());
        let coding = resource["code"]["coding"].as_array().unwrap();
        assert_eq!(coding[0]["code"], "5089AAAA");
        assert_eq!(coding[1]["system"], "http://loinc.org");
        assert_eq!(coding[2]["system"], "PIH");
    }

    #[test]
    fn test_entity_translator_is_identity() {
        let entity = observation();
        assert_eq!(EntityTranslator.to_external(&entity), entity);
    }
}
