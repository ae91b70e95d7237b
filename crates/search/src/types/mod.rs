//! Core types for the search engine.
//!
//! - [`ResourceType`] - The searchable resource types
//! - [`ValueGroup`] - AND-of-OR value groups
//! - [`TokenValue`], [`ReferenceValue`], [`QuantityValue`], [`DateRangeValue`],
//!   [`StringValue`] - Typed parameter values
//! - [`SearchParameterMap`] - The full description of a search request
//! - [`Entity`] - Hydrated clinical entities
//!
//! # Building a Search
//!
//! ```
//! use helios_search::types::{
//!     HandlerKey, IncludeDirective, ReferenceValue, ResourceType, SearchParameterMap,
//!     SortSpec, TokenValue, ValueGroup,
//! };
//!
//! let map = SearchParameterMap::new()
//!     .with(
//!         HandlerKey::Coded,
//!         ValueGroup::any_of([
//!             TokenValue::with_system("http://loinc.org", "5085-9"),
//!             TokenValue::code("5089AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
//!         ]),
//!     )
//!     .with(
//!         HandlerKey::PatientReference,
//!         ValueGroup::single(ReferenceValue::chained("family", "Chebet")),
//!     )
//!     .with_sort(SortSpec::desc("date"))
//!     .with_include(IncludeDirective::include(ResourceType::Observation, "encounter"));
//!
//! assert_eq!(map.entries().len(), 2);
//! ```

mod entity;
mod resource_type;
mod search_params;
mod value_group;
mod values;

pub use entity::{
    Concept, ConceptMapping, Encounter, Entity, EntityId, ObsValue, Observation, Patient,
    PatientAddress, PatientIdentifier, PersonName, Practitioner, ServiceRequest,
};
pub use resource_type::ResourceType;
pub use search_params::{
    HandlerKey, IncludeDirective, IncludeType, ParamEntry, ParamGroup, SearchParameterMap,
    SortDirection, SortSpec, ValueKind,
};
pub use value_group::{OrGroup, ValueGroup};
pub use values::{
    DateBound, DatePrecision, DateRangeValue, QuantityComparator, QuantityValue, ReferenceValue,
    StringMatch, StringValue, TokenValue,
};
