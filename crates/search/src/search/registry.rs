//! Search parameter registry.
//!
//! A static catalog of what can be searched on each resource type: the table
//! backing the type, its searchable properties (a column expression reached
//! through at most one join) and its relations to other types.
//!
//! Chained parameters and chained sort keys (`patient.family`) are resolved
//! here into a join path starting at the root entity.

use crate::types::ResourceType;

/// A table joined on the way from the root entity to a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JoinStep {
    /// Joined table.
    pub table: &'static str,
    /// Column of the joined table matched against the parent.
    pub column: &'static str,
    /// Column of the parent alias.
    pub parent_column: &'static str,
    /// Flag column that must be 0 for a joined row to count.
    pub live_column: Option<&'static str>,
    /// Whether one parent row may join many rows.
    pub many: bool,
}

/// The SQL expression a property compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnExpr {
    /// A plain column.
    Column(&'static str),
    /// `date_changed`, falling back to `date_created`.
    LastUpdated,
    /// Given and family name joined by a space.
    FullName {
        /// Given name column.
        given: &'static str,
        /// Family name column.
        family: &'static str,
    },
}

impl ColumnExpr {
    /// Renders the expression against a table alias.
    pub fn render(&self, alias: &str) -> String {
        match self {
            ColumnExpr::Column(c) => format!("{}.{}", alias, c),
            ColumnExpr::LastUpdated => {
                format!("COALESCE({a}.date_changed, {a}.date_created)", a = alias)
            }
            ColumnExpr::FullName { given, family } => format!(
                "TRIM(COALESCE({a}.{g}, '') || ' ' || COALESCE({a}.{f}, ''))",
                a = alias,
                g = given,
                f = family
            ),
        }
    }
}

/// How token codes are compared against a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRule {
    /// Case-sensitive equality.
    Exact,
    /// Case-insensitive equality.
    IgnoreCase,
    /// `male|female|other|unknown` stored as `M|F|O|U`.
    Gender,
    /// `in-progress` stored as `IN_PROGRESS`.
    UpperSnake,
    /// Exact equality; a token system must equal the type column.
    Identifier {
        /// Column holding the identifier type.
        type_column: &'static str,
    },
}

/// The kind of values a property holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Free text.
    String,
    /// A code compared by [`TokenRule`].
    Token(TokenRule),
    /// A concept id, matched through the code system resolver.
    Concept,
    /// A timestamp or date.
    Date,
    /// A number with an optional unit column.
    Quantity {
        /// Column holding the unit.
        unit_column: Option<&'static str>,
    },
}

/// A searchable property of a resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Property {
    /// Parameter name.
    pub name: &'static str,
    /// Join from the entity table to the table holding the value.
    pub join: Option<JoinStep>,
    /// The compared expression.
    pub expr: ColumnExpr,
    /// The value kind.
    pub kind: PropertyKind,
}

/// How a relation links two tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationLink {
    /// The source row holds the target's primary key.
    Forward(&'static str),
    /// The target row holds the source's primary key.
    Inverse(&'static str),
}

/// A named reference from one resource type to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    /// Relation name.
    pub name: &'static str,
    /// Type holding the relation.
    pub source: ResourceType,
    /// Referenced type.
    pub target: ResourceType,
    /// The linking column.
    pub link: RelationLink,
}

impl Relation {
    /// The join from a source alias to the target table.
    pub fn join_step(&self) -> JoinStep {
        let source = entity_table(self.source);
        let target = entity_table(self.target);
        match self.link {
            RelationLink::Forward(column) => JoinStep {
                table: target.table,
                column: target.pk,
                parent_column: column,
                live_column: target.live_column,
                many: false,
            },
            RelationLink::Inverse(column) => JoinStep {
                table: target.table,
                column,
                parent_column: source.pk,
                live_column: target.live_column,
                many: true,
            },
        }
    }
}

/// The table backing a resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityTable {
    /// Resource type.
    pub resource_type: ResourceType,
    /// Table name.
    pub table: &'static str,
    /// Integer primary key column.
    pub pk: &'static str,
    /// Flag column that must be 0 for a row to be visible.
    pub live_column: Option<&'static str>,
}

/// A property resolved to a join path from the root entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProperty {
    /// Joins from the root alias, possibly empty.
    pub path: Vec<JoinStep>,
    /// The property at the end of the path.
    pub property: Property,
}

impl ResolvedProperty {
    /// Whether one root row may reach several values.
    pub fn is_to_many(&self) -> bool {
        self.path.iter().any(|s| s.many)
    }
}

const TABLES: [EntityTable; 5] = [
    EntityTable {
        resource_type: ResourceType::Patient,
        table: "patient",
        pk: "patient_id",
        live_column: Some("voided"),
    },
    EntityTable {
        resource_type: ResourceType::Practitioner,
        table: "practitioner",
        pk: "practitioner_id",
        live_column: Some("retired"),
    },
    EntityTable {
        resource_type: ResourceType::Encounter,
        table: "encounter",
        pk: "encounter_id",
        live_column: Some("voided"),
    },
    EntityTable {
        resource_type: ResourceType::Observation,
        table: "obs",
        pk: "obs_id",
        live_column: Some("voided"),
    },
    EntityTable {
        resource_type: ResourceType::ServiceRequest,
        table: "service_request",
        pk: "service_request_id",
        live_column: Some("voided"),
    },
];

const fn child(table: &'static str) -> JoinStep {
    JoinStep {
        table,
        column: "patient_id",
        parent_column: "patient_id",
        live_column: Some("voided"),
        many: true,
    }
}

const PATIENT_NAME: JoinStep = child("patient_name");
const PATIENT_IDENTIFIER: JoinStep = child("patient_identifier");
const PATIENT_ADDRESS: JoinStep = child("patient_address");

const fn own(name: &'static str, column: &'static str, kind: PropertyKind) -> Property {
    Property {
        name,
        join: None,
        expr: ColumnExpr::Column(column),
        kind,
    }
}

const fn joined(
    name: &'static str,
    join: JoinStep,
    column: &'static str,
    kind: PropertyKind,
) -> Property {
    Property {
        name,
        join: Some(join),
        expr: ColumnExpr::Column(column),
        kind,
    }
}

const ID: Property = own("_id", "uuid", PropertyKind::Token(TokenRule::Exact));
const LAST_UPDATED: Property = Property {
    name: "_lastUpdated",
    join: None,
    expr: ColumnExpr::LastUpdated,
    kind: PropertyKind::Date,
};

static PATIENT_PROPERTIES: &[Property] = &[
    ID,
    LAST_UPDATED,
    joined("given", PATIENT_NAME, "given_name", PropertyKind::String),
    joined("family", PATIENT_NAME, "family_name", PropertyKind::String),
    Property {
        name: "name",
        join: Some(PATIENT_NAME),
        expr: ColumnExpr::FullName {
            given: "given_name",
            family: "family_name",
        },
        kind: PropertyKind::String,
    },
    joined(
        "identifier",
        PATIENT_IDENTIFIER,
        "identifier",
        PropertyKind::Token(TokenRule::Identifier {
            type_column: "identifier_type",
        }),
    ),
    own("gender", "gender", PropertyKind::Token(TokenRule::Gender)),
    own("birthdate", "birthdate", PropertyKind::Date),
    joined("address-city", PATIENT_ADDRESS, "city", PropertyKind::String),
    joined("address-state", PATIENT_ADDRESS, "state", PropertyKind::String),
    joined("address-country", PATIENT_ADDRESS, "country", PropertyKind::String),
    joined(
        "address-postalcode",
        PATIENT_ADDRESS,
        "postal_code",
        PropertyKind::String,
    ),
];

static PRACTITIONER_PROPERTIES: &[Property] = &[
    ID,
    LAST_UPDATED,
    own("given", "given_name", PropertyKind::String),
    own("family", "family_name", PropertyKind::String),
    Property {
        name: "name",
        join: None,
        expr: ColumnExpr::FullName {
            given: "given_name",
            family: "family_name",
        },
        kind: PropertyKind::String,
    },
    own("identifier", "identifier", PropertyKind::Token(TokenRule::Exact)),
];

static ENCOUNTER_PROPERTIES: &[Property] = &[
    ID,
    LAST_UPDATED,
    own("date", "encounter_datetime", PropertyKind::Date),
    own("status", "status", PropertyKind::Token(TokenRule::IgnoreCase)),
    own("type", "type_concept_id", PropertyKind::Concept),
];

static OBSERVATION_PROPERTIES: &[Property] = &[
    ID,
    LAST_UPDATED,
    own("code", "concept_id", PropertyKind::Concept),
    own("value-concept", "value_coded", PropertyKind::Concept),
    own(
        "value-quantity",
        "value_numeric",
        PropertyKind::Quantity {
            unit_column: Some("value_unit"),
        },
    ),
    own("value-string", "value_text", PropertyKind::String),
    own("date", "obs_datetime", PropertyKind::Date),
    own("category", "category", PropertyKind::Token(TokenRule::IgnoreCase)),
    own("status", "status", PropertyKind::Token(TokenRule::IgnoreCase)),
];

static SERVICE_REQUEST_PROPERTIES: &[Property] = &[
    ID,
    LAST_UPDATED,
    own("code", "concept_id", PropertyKind::Concept),
    own("status", "status", PropertyKind::Token(TokenRule::IgnoreCase)),
    own(
        "fulfiller-status",
        "fulfiller_status",
        PropertyKind::Token(TokenRule::UpperSnake),
    ),
    own("authored", "date_activated", PropertyKind::Date),
];

const fn forward(
    source: ResourceType,
    name: &'static str,
    target: ResourceType,
    column: &'static str,
) -> Relation {
    Relation {
        name,
        source,
        target,
        link: RelationLink::Forward(column),
    }
}

static ENCOUNTER_RELATIONS: &[Relation] = &[
    forward(ResourceType::Encounter, "patient", ResourceType::Patient, "patient_id"),
    forward(ResourceType::Encounter, "subject", ResourceType::Patient, "patient_id"),
    forward(
        ResourceType::Encounter,
        "participant",
        ResourceType::Practitioner,
        "practitioner_id",
    ),
];

static OBSERVATION_RELATIONS: &[Relation] = &[
    forward(ResourceType::Observation, "patient", ResourceType::Patient, "patient_id"),
    forward(ResourceType::Observation, "subject", ResourceType::Patient, "patient_id"),
    forward(
        ResourceType::Observation,
        "encounter",
        ResourceType::Encounter,
        "encounter_id",
    ),
    Relation {
        name: "has-member",
        source: ResourceType::Observation,
        target: ResourceType::Observation,
        link: RelationLink::Inverse("obs_group_id"),
    },
];

static SERVICE_REQUEST_RELATIONS: &[Relation] = &[
    forward(
        ResourceType::ServiceRequest,
        "patient",
        ResourceType::Patient,
        "patient_id",
    ),
    forward(
        ResourceType::ServiceRequest,
        "subject",
        ResourceType::Patient,
        "patient_id",
    ),
    forward(
        ResourceType::ServiceRequest,
        "encounter",
        ResourceType::Encounter,
        "encounter_id",
    ),
    forward(
        ResourceType::ServiceRequest,
        "requester",
        ResourceType::Practitioner,
        "requester_id",
    ),
];

/// Returns the table backing `resource_type`.
pub fn entity_table(resource_type: ResourceType) -> &'static EntityTable {
    match resource_type {
        ResourceType::Patient => &TABLES[0],
        ResourceType::Practitioner => &TABLES[1],
        ResourceType::Encounter => &TABLES[2],
        ResourceType::Observation => &TABLES[3],
        ResourceType::ServiceRequest => &TABLES[4],
    }
}

/// Returns every searchable property of `resource_type`.
pub fn properties(resource_type: ResourceType) -> &'static [Property] {
    match resource_type {
        ResourceType::Patient => PATIENT_PROPERTIES,
        ResourceType::Practitioner => PRACTITIONER_PROPERTIES,
        ResourceType::Encounter => ENCOUNTER_PROPERTIES,
        ResourceType::Observation => OBSERVATION_PROPERTIES,
        ResourceType::ServiceRequest => SERVICE_REQUEST_PROPERTIES,
    }
}

/// Returns every relation held by `resource_type`.
pub fn relations(resource_type: ResourceType) -> &'static [Relation] {
    match resource_type {
        ResourceType::Encounter => ENCOUNTER_RELATIONS,
        ResourceType::Observation => OBSERVATION_RELATIONS,
        ResourceType::ServiceRequest => SERVICE_REQUEST_RELATIONS,
        ResourceType::Patient | ResourceType::Practitioner => &[],
    }
}

/// Looks up a property by parameter name.
pub fn property(resource_type: ResourceType, name: &str) -> Option<Property> {
    properties(resource_type)
        .iter()
        .find(|p| p.name == name)
        .copied()
}

/// Looks up a relation by name.
pub fn relation(resource_type: ResourceType, name: &str) -> Option<Relation> {
    relations(resource_type)
        .iter()
        .find(|r| r.name == name)
        .copied()
}

/// Resolves a parameter name, possibly chained as `relation.parameter`,
/// into a join path from the root entity.
pub fn resolve(resource_type: ResourceType, name: &str) -> Option<ResolvedProperty> {
    if let Some(property) = property(resource_type, name) {
        return Some(ResolvedProperty {
            path: property.join.into_iter().collect(),
            property,
        });
    }

    let (relation_name, rest) = name.split_once('.')?;
    let relation = relation(resource_type, relation_name)?;
    let mut resolved = resolve(relation.target, rest)?;
    resolved.path.insert(0, relation.join_step());
    Some(resolved)
}
