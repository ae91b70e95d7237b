//! The search parameter map and its parts.
//!
//! A [`SearchParameterMap`] is the engine-agnostic description of a request:
//! handler entries holding AND-of-OR value groups, an optional chained sort,
//! and include/reverse-include directives.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{
    DateRangeValue, QuantityValue, ReferenceValue, ResourceType, StringValue, TokenValue,
    ValueGroup,
};

/// Identifies the handler that translates a parameter entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandlerKey {
    /// Reference to a patient (`patient`, `subject`).
    PatientReference,
    /// Reference to an encounter.
    EncounterReference,
    /// Reference to a practitioner (`participant`, `requester`).
    ParticipantReference,
    /// Observation group membership.
    HasMember,
    /// Coded concept, resolved through the code system resolver.
    Coded,
    /// Observation category.
    Category,
    /// Lifecycle status.
    Status,
    /// Administrative gender.
    Gender,
    /// Fulfiller status of an order.
    FulfillerStatus,
    /// Resource-independent parameters (`_id`, `_lastUpdated`).
    Common,
    /// Clinical date or timestamp.
    DateRange,
    /// Numeric value with comparator.
    Quantity,
    /// Free-text observation value.
    ValueString,
    /// Address parts (`city`, `state`, `country`, `postalcode`).
    Address,
    /// Person names.
    Name,
    /// Business identifiers.
    Identifier,
}

impl HandlerKey {
    /// Returns the kebab-case handler name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKey::PatientReference => "patient-reference",
            HandlerKey::EncounterReference => "encounter-reference",
            HandlerKey::ParticipantReference => "participant-reference",
            HandlerKey::HasMember => "has-member",
            HandlerKey::Coded => "coded",
            HandlerKey::Category => "category",
            HandlerKey::Status => "status",
            HandlerKey::Gender => "gender",
            HandlerKey::FulfillerStatus => "fulfiller-status",
            HandlerKey::Common => "common",
            HandlerKey::DateRange => "date-range",
            HandlerKey::Quantity => "quantity",
            HandlerKey::ValueString => "value-string",
            HandlerKey::Address => "address",
            HandlerKey::Name => "name",
            HandlerKey::Identifier => "identifier",
        }
    }

    /// The parameter searched when an entry carries no qualifier.
    pub fn default_parameter(&self) -> Option<&'static str> {
        match self {
            HandlerKey::PatientReference => Some("patient"),
            HandlerKey::EncounterReference => Some("encounter"),
            HandlerKey::ParticipantReference => Some("participant"),
            HandlerKey::HasMember => Some("has-member"),
            HandlerKey::Coded => Some("code"),
            HandlerKey::Category => Some("category"),
            HandlerKey::Status => Some("status"),
            HandlerKey::Gender => Some("gender"),
            HandlerKey::FulfillerStatus => Some("fulfiller-status"),
            HandlerKey::Common | HandlerKey::Address => None,
            HandlerKey::DateRange => Some("date"),
            HandlerKey::Quantity => Some("value-quantity"),
            HandlerKey::ValueString => Some("value-string"),
            HandlerKey::Name => Some("name"),
            HandlerKey::Identifier => Some("identifier"),
        }
    }

    /// Resolves the parameter name for an entry with the given qualifier.
    pub fn parameter_name(&self, qualifier: Option<&str>) -> Option<String> {
        match (self, qualifier) {
            (HandlerKey::Address, Some(q)) if !q.starts_with("address-") => {
                Some(format!("address-{}", q))
            }
            (_, Some(q)) => Some(q.to_string()),
            (_, None) => self.default_parameter().map(str::to_string),
        }
    }

    /// Returns true if this handler translates values of `kind`.
    pub fn accepts(&self, kind: ValueKind) -> bool {
        match self {
            HandlerKey::PatientReference
            | HandlerKey::EncounterReference
            | HandlerKey::ParticipantReference
            | HandlerKey::HasMember => kind == ValueKind::Reference,
            HandlerKey::Coded
            | HandlerKey::Category
            | HandlerKey::Status
            | HandlerKey::Gender
            | HandlerKey::FulfillerStatus
            | HandlerKey::Identifier => kind == ValueKind::Token,
            HandlerKey::Common => matches!(kind, ValueKind::Token | ValueKind::Date),
            HandlerKey::DateRange => kind == ValueKind::Date,
            HandlerKey::Quantity => kind == ValueKind::Quantity,
            HandlerKey::ValueString | HandlerKey::Address | HandlerKey::Name => {
                kind == ValueKind::String
            }
        }
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of values a [`ParamGroup`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// [`TokenValue`]
    Token,
    /// [`ReferenceValue`]
    Reference,
    /// [`QuantityValue`]
    Quantity,
    /// [`StringValue`]
    String,
    /// [`DateRangeValue`]
    Date,
}

/// A value group of one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "kebab-case")]
pub enum ParamGroup {
    /// Token values.
    Token(ValueGroup<TokenValue>),
    /// Reference values.
    Reference(ValueGroup<ReferenceValue>),
    /// Quantity values.
    Quantity(ValueGroup<QuantityValue>),
    /// String values.
    String(ValueGroup<StringValue>),
    /// Date range values.
    Date(ValueGroup<DateRangeValue>),
}

impl ParamGroup {
    /// Returns the value kind.
    pub fn kind(&self) -> ValueKind {
        match self {
            ParamGroup::Token(_) => ValueKind::Token,
            ParamGroup::Reference(_) => ValueKind::Reference,
            ParamGroup::Quantity(_) => ValueKind::Quantity,
            ParamGroup::String(_) => ValueKind::String,
            ParamGroup::Date(_) => ValueKind::Date,
        }
    }

    /// Returns true if some OR-group is empty.
    pub fn is_unsatisfiable(&self) -> bool {
        match self {
            ParamGroup::Token(g) => g.is_unsatisfiable(),
            ParamGroup::Reference(g) => g.is_unsatisfiable(),
            ParamGroup::Quantity(g) => g.is_unsatisfiable(),
            ParamGroup::String(g) => g.is_unsatisfiable(),
            ParamGroup::Date(g) => g.is_unsatisfiable(),
        }
    }

    /// Number of OR-groups.
    pub fn and_len(&self) -> usize {
        match self {
            ParamGroup::Token(g) => g.len(),
            ParamGroup::Reference(g) => g.len(),
            ParamGroup::Quantity(g) => g.len(),
            ParamGroup::String(g) => g.len(),
            ParamGroup::Date(g) => g.len(),
        }
    }

    /// Conjoins the OR-groups of `other`.
    ///
    /// Returns `other` unchanged if the kinds differ.
    pub fn extend(&mut self, other: ParamGroup) -> Result<(), ParamGroup> {
        match (self, other) {
            (ParamGroup::Token(a), ParamGroup::Token(b)) => a.extend(b),
            (ParamGroup::Reference(a), ParamGroup::Reference(b)) => a.extend(b),
            (ParamGroup::Quantity(a), ParamGroup::Quantity(b)) => a.extend(b),
            (ParamGroup::String(a), ParamGroup::String(b)) => a.extend(b),
            (ParamGroup::Date(a), ParamGroup::Date(b)) => a.extend(b),
            (_, other) => return Err(other),
        }
        Ok(())
    }
}

impl From<ValueGroup<TokenValue>> for ParamGroup {
    fn from(group: ValueGroup<TokenValue>) -> Self {
        ParamGroup::Token(group)
    }
}

impl From<ValueGroup<ReferenceValue>> for ParamGroup {
    fn from(group: ValueGroup<ReferenceValue>) -> Self {
        ParamGroup::Reference(group)
    }
}

impl From<ValueGroup<QuantityValue>> for ParamGroup {
    fn from(group: ValueGroup<QuantityValue>) -> Self {
        ParamGroup::Quantity(group)
    }
}

impl From<ValueGroup<StringValue>> for ParamGroup {
    fn from(group: ValueGroup<StringValue>) -> Self {
        ParamGroup::String(group)
    }
}

impl From<ValueGroup<DateRangeValue>> for ParamGroup {
    fn from(group: ValueGroup<DateRangeValue>) -> Self {
        ParamGroup::Date(group)
    }
}

/// One handler entry of a [`SearchParameterMap`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamEntry {
    /// The handler translating this entry.
    pub handler: HandlerKey,
    /// Optional qualifier selecting the parameter the handler searches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
    /// The AND-of-OR values.
    pub group: ParamGroup,
}

impl ParamEntry {
    /// The parameter name this entry searches, if it can be determined.
    pub fn parameter_name(&self) -> Option<String> {
        self.handler.parameter_name(self.qualifier.as_deref())
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    Ascending,
    /// Descending order.
    Descending,
}

/// A sort key with an optional sub-sort applied to ties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    /// The parameter to sort by; may be chained as `relation.parameter`.
    pub parameter: String,
    /// The sort direction.
    #[serde(default)]
    pub direction: SortDirection,
    /// Ordering applied among entries equal on this key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then: Option<Box<SortSpec>>,
}

impl SortSpec {
    /// Ascending sort on `parameter`.
    pub fn asc(parameter: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            direction: SortDirection::Ascending,
            then: None,
        }
    }

    /// Descending sort on `parameter`.
    pub fn desc(parameter: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            direction: SortDirection::Descending,
            then: None,
        }
    }

    /// Parses a comma-separated list, `-` marking descending keys (e.g. `-date,family`).
    pub fn parse(s: &str) -> Option<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| match p.strip_prefix('-') {
                Some(stripped) => Self::desc(stripped),
                None => Self::asc(p),
            })
            .reduce(Self::then_by)
    }

    /// Appends `next` at the end of this sort chain.
    pub fn then_by(mut self, next: SortSpec) -> Self {
        fn attach(spec: &mut SortSpec, next: SortSpec) {
            match spec.then.as_deref_mut() {
                Some(child) => attach(child, next),
                None => spec.then = Some(Box::new(next)),
            }
        }
        attach(&mut self, next);
        self
    }

    /// Iterates over the chain, starting with this key.
    pub fn iter(&self) -> impl Iterator<Item = &SortSpec> {
        std::iter::successors(Some(self), |s| s.then.as_deref())
    }
}

/// Type of include operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncludeType {
    /// Forward include: follow a reference from the primary.
    Include,
    /// Reverse include: find resources referencing the primary.
    Revinclude,
}

/// An include or reverse-include directive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncludeDirective {
    /// The type of include.
    pub include_type: IncludeType,
    /// The resource type holding the relation.
    pub source_type: ResourceType,
    /// The relation followed.
    pub relation: String,
}

impl IncludeDirective {
    /// A forward include of `source:relation`.
    pub fn include(source_type: ResourceType, relation: impl Into<String>) -> Self {
        Self {
            include_type: IncludeType::Include,
            source_type,
            relation: relation.into(),
        }
    }

    /// A reverse include of `source:relation`.
    pub fn rev_include(source_type: ResourceType, relation: impl Into<String>) -> Self {
        Self {
            include_type: IncludeType::Revinclude,
            source_type,
            relation: relation.into(),
        }
    }

    /// Parses `Source:relation` into a directive of the given type.
    pub fn parse(include_type: IncludeType, s: &str) -> Option<Self> {
        let (source, relation) = s.split_once(':')?;
        Some(Self {
            include_type,
            source_type: ResourceType::from_str(source).ok()?,
            relation: relation.to_string(),
        })
    }
}

/// The canonical description of a search request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchParameterMap {
    #[serde(default)]
    entries: Vec<ParamEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sort: Option<SortSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    includes: Vec<IncludeDirective>,
}

impl SearchParameterMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds values for `handler` searching its default parameter.
    pub fn with(mut self, handler: HandlerKey, group: impl Into<ParamGroup>) -> Self {
        self.add(handler, None, group.into());
        self
    }

    /// Adds values for `handler` searching the parameter named by `qualifier`.
    pub fn with_qualified(
        mut self,
        handler: HandlerKey,
        qualifier: impl Into<String>,
        group: impl Into<ParamGroup>,
    ) -> Self {
        self.add(handler, Some(qualifier.into()), group.into());
        self
    }

    /// Adds an entry, conjoining with an existing entry for the same
    /// handler and qualifier.
    ///
    /// A group whose kind differs from the existing entry's is dropped.
    pub fn add(&mut self, handler: HandlerKey, qualifier: Option<String>, group: ParamGroup) {
        let existing = self
            .entries
            .iter_mut()
            .find(|e| e.handler == handler && e.qualifier == qualifier);
        match existing {
            Some(entry) => {
                if let Err(rejected) = entry.group.extend(group) {
                    tracing::warn!(
                        handler = %handler,
                        kind = ?rejected.kind(),
                        "Dropping values of a different kind than the existing entry"
                    );
                }
            }
            None => self.entries.push(ParamEntry {
                handler,
                qualifier,
                group,
            }),
        }
    }

    /// Sets the sort specification.
    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Adds an include or reverse-include directive unless already present.
    pub fn with_include(mut self, directive: IncludeDirective) -> Self {
        self.add_include(directive);
        self
    }

    /// Adds an include or reverse-include directive unless already present.
    pub fn add_include(&mut self, directive: IncludeDirective) {
        if !self.includes.contains(&directive) {
            self.includes.push(directive);
        }
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[ParamEntry] {
        &self.entries
    }

    /// The sort specification.
    pub fn sort(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    /// Forward include directives.
    pub fn includes(&self) -> impl Iterator<Item = &IncludeDirective> {
        self.includes
            .iter()
            .filter(|d| d.include_type == IncludeType::Include)
    }

    /// Reverse include directives.
    pub fn rev_includes(&self) -> impl Iterator<Item = &IncludeDirective> {
        self.includes
            .iter()
            .filter(|d| d.include_type == IncludeType::Revinclude)
    }

    /// Returns true if any directive is present.
    pub fn has_includes(&self) -> bool {
        !self.includes.is_empty()
    }

    /// Returns true if some entry contains an empty OR-group.
    pub fn is_unsatisfiable(&self) -> bool {
        self.entries.iter().any(|e| e.group.is_unsatisfiable())
    }
}
