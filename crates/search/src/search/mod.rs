//! Search query construction.
//!
//! This module turns a [`SearchParameterMap`](crate::types::SearchParameterMap)
//! into SQL over the clinical store:
//!
//! - [`registry`] - Catalog of searchable properties and relations
//! - [`parameter_handlers`] - Per-kind value translation
//! - [`code_system`] - Coded value resolution
//! - [`query_builder`] - SQL fragments and join planning
//! - [`sort`] - Ordering terms
//! - [`assembler`] - Count and id queries
//! - [`include`] - Include and reverse-include expansion

pub mod assembler;
pub mod code_system;
pub mod include;
pub mod parameter_handlers;
pub mod query_builder;
pub mod registry;
pub mod sort;

#[cfg(test)]
pub(crate) mod fake;

pub use assembler::{AssembledQuery, Assembly, Explanation, MatchSet, QueryAssembler, Window};
pub use code_system::CodeSystemResolver;
pub use include::{EntityRef, Expansion, IncludeExpander};
pub use parameter_handlers::HandlerEnv;
pub use query_builder::{QueryContext, SqlFragment, SqlParam};
pub use sort::{OrderTerm, SortPipeline};
