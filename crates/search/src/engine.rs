//! The search engine and its paginated results.
//!
//! [`SearchEngine`] ties the pieces together: it owns the repository, the
//! translator and the code system resolver, and hands out
//! [`SearchResults`] that run their queries lazily. Every
//! [`SearchResults::size`], [`SearchResults::page`] and
//! [`SearchResults::all_resources`] call is an independent read scope, so
//! results may be consumed from several threads at once.
//!
//! # Example
//!
//! ```no_run
//! use helios_search::backends::sqlite::SqliteBackend;
//! use helios_search::config::SearchConfig;
//! use helios_search::core::EntityTranslator;
//! use helios_search::engine::SearchEngine;
//! use helios_search::types::{HandlerKey, ResourceType, SearchParameterMap, TokenValue, ValueGroup};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::open("clinical.db")?;
//! let engine = SearchEngine::new(backend, EntityTranslator, SearchConfig::default())?;
//!
//! let map = SearchParameterMap::new()
//!     .with(HandlerKey::Coded, ValueGroup::single(TokenValue::code("5089")));
//! let results = engine.search(ResourceType::Observation, map);
//!
//! let total = results.size()?;
//! let first_page = results.page(0, results.preferred_page_size())?;
//! assert!(first_page.len() <= total);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::SearchConfig;
use crate::core::{ResourceTranslator, SearchRepository, SearchSession};
use crate::error::{SearchError, StorageResult};
use crate::search::include::hydrate_refs;
use crate::search::{
    Assembly, CodeSystemResolver, Explanation, HandlerEnv, IncludeExpander, MatchSet,
    QueryAssembler, Window,
};
use crate::types::{
    Entity, HandlerKey, IncludeDirective, ResourceType, SearchParameterMap, TokenValue, ValueGroup,
};

/// Runs searches against a repository.
pub struct SearchEngine<R, T> {
    repository: R,
    translator: T,
    config: SearchConfig,
    resolver: CodeSystemResolver,
}

impl<R, T> SearchEngine<R, T>
where
    R: SearchRepository,
    T: ResourceTranslator,
{
    /// Creates an engine after validating `config`.
    pub fn new(repository: R, translator: T, config: SearchConfig) -> StorageResult<Self> {
        config.validate()?;
        let resolver = CodeSystemResolver::new(&config);
        Ok(Self {
            repository,
            translator,
            config,
            resolver,
        })
    }

    /// Prepares a search. No query runs until the results are read.
    pub fn search(
        &self,
        resource_type: ResourceType,
        parameters: SearchParameterMap,
    ) -> SearchResults<'_, R, T> {
        SearchResults {
            engine: self,
            resource_type,
            parameters,
            id: Uuid::new_v4(),
            published: Utc::now(),
        }
    }

    /// Searches one entity by uuid together with its default related
    /// entities.
    ///
    /// Fails with [`SearchError::NotFound`] when no visible entity has the
    /// uuid.
    pub fn everything(
        &self,
        resource_type: ResourceType,
        uuid: &str,
    ) -> StorageResult<SearchResults<'_, R, T>> {
        self.everything_with(resource_type, uuid, default_everything(resource_type))
    }

    /// Like [`everything`](Self::everything) with caller-supplied directives.
    pub fn everything_with(
        &self,
        resource_type: ResourceType,
        uuid: &str,
        directives: impl IntoIterator<Item = IncludeDirective>,
    ) -> StorageResult<SearchResults<'_, R, T>> {
        let mut parameters = SearchParameterMap::new().with_qualified(
            HandlerKey::Common,
            "_id",
            ValueGroup::single(TokenValue::code(uuid)),
        );
        for directive in directives {
            parameters.add_include(directive);
        }

        let results = self.search(resource_type, parameters);
        if results.size()? == 0 {
            return Err(SearchError::NotFound {
                resource_type: resource_type.to_string(),
                id: uuid.to_string(),
            }
            .into());
        }
        Ok(results)
    }

    /// Renders the queries `parameters` assembles to.
    pub fn explain(
        &self,
        resource_type: ResourceType,
        parameters: &SearchParameterMap,
    ) -> StorageResult<Explanation> {
        self.repository
            .read(|session| self.assembler(session).explain(resource_type, parameters))
    }

    /// The repository searched.
    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// The translator applied to results.
    pub fn translator(&self) -> &T {
        &self.translator
    }

    /// The engine configuration.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// The code system resolver.
    pub fn resolver(&self) -> &CodeSystemResolver {
        &self.resolver
    }

    fn assembler<'a>(&'a self, session: &'a dyn SearchSession) -> QueryAssembler<'a> {
        QueryAssembler::new(HandlerEnv {
            resolver: &self.resolver,
            session,
            approximate_tolerance: self.config.approximate_tolerance,
        })
    }
}

/// The directives `everything` uses for a root type.
pub fn default_everything(resource_type: ResourceType) -> Vec<IncludeDirective> {
    match resource_type {
        ResourceType::Patient => vec![
            IncludeDirective::rev_include(ResourceType::Observation, "patient"),
            IncludeDirective::rev_include(ResourceType::Encounter, "patient"),
            IncludeDirective::rev_include(ResourceType::ServiceRequest, "patient"),
        ],
        ResourceType::Encounter => vec![
            IncludeDirective::include(ResourceType::Encounter, "patient"),
            IncludeDirective::include(ResourceType::Encounter, "participant"),
            IncludeDirective::rev_include(ResourceType::Observation, "encounter"),
            IncludeDirective::rev_include(ResourceType::ServiceRequest, "encounter"),
        ],
        ResourceType::Practitioner | ResourceType::Observation | ResourceType::ServiceRequest => {
            Vec::new()
        }
    }
}

/// A lazily evaluated, paginated search result.
///
/// Carries an identifier and a publication time for the bundle it is
/// rendered into.
pub struct SearchResults<'e, R, T> {
    engine: &'e SearchEngine<R, T>,
    resource_type: ResourceType,
    parameters: SearchParameterMap,
    id: Uuid,
    published: DateTime<Utc>,
}

impl<R, T> SearchResults<'_, R, T>
where
    R: SearchRepository,
    T: ResourceTranslator,
{
    /// Identifier generated for this result.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When this result was created.
    pub fn published(&self) -> DateTime<Utc> {
        self.published
    }

    /// The resource type searched.
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// The parameters searched.
    pub fn parameters(&self) -> &SearchParameterMap {
        &self.parameters
    }

    /// Number of distinct primary matches. Nothing is hydrated and includes
    /// are not counted.
    pub fn size(&self) -> StorageResult<usize> {
        if self.parameters.is_unsatisfiable() {
            return Ok(0);
        }
        self.engine.repository.read(|session| {
            match self
                .engine
                .assembler(session)
                .assemble(self.resource_type, &self.parameters)?
            {
                Assembly::Unsatisfiable => Ok(0),
                Assembly::Query(query) => session.count(&query.count_sql()),
            }
        })
    }

    /// Primaries in `[start, end)` followed by their forward and then their
    /// reverse includes.
    ///
    /// A window beyond the match count yields an empty list.
    pub fn page(&self, start: usize, end: usize) -> StorageResult<Vec<T::Resource>> {
        self.fetch(Some(Window::new(start, end)))
    }

    /// Every primary followed by the includes of all primaries.
    pub fn all_resources(&self) -> StorageResult<Vec<T::Resource>> {
        self.fetch(None)
    }

    /// The repository's page size hint.
    pub fn preferred_page_size(&self) -> usize {
        self.engine.repository.preferred_page_size()
    }

    fn fetch(&self, window: Option<Window>) -> StorageResult<Vec<T::Resource>> {
        if self.parameters.is_unsatisfiable()
            || window.is_some_and(|w| w.is_empty() || !w.is_addressable())
        {
            return Ok(Vec::new());
        }

        let entities = self.engine.repository.read(|session| {
            let assembly = self
                .engine
                .assembler(session)
                .assemble(self.resource_type, &self.parameters)?;
            let Assembly::Query(query) = assembly else {
                return Ok(Vec::new());
            };

            let matches = MatchSet::from_ids(session.matching_ids(&query.id_sql(window))?);
            self.hydrate(session, &matches)
        })?;

        Ok(entities
            .iter()
            .map(|entity| self.engine.translator.to_external(entity))
            .collect())
    }

    fn hydrate(&self, session: &dyn SearchSession, matches: &MatchSet) -> StorageResult<Vec<Entity>> {
        let mut entities = session.hydrate(self.resource_type, matches.ids())?;
        if matches.is_empty() || !self.parameters.has_includes() {
            return Ok(entities);
        }

        let directives = self
            .parameters
            .includes()
            .chain(self.parameters.rev_includes());
        let expansion =
            IncludeExpander::expand(session, self.resource_type, matches.ids(), directives)?;
        entities.extend(hydrate_refs(session, &expansion.forward)?);
        entities.extend(hydrate_refs(session, &expansion.reverse)?);
        Ok(entities)
    }
}

impl<R, T> std::fmt::Debug for SearchResults<'_, R, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchResults")
            .field("id", &self.id)
            .field("resource_type", &self.resource_type)
            .field("published", &self.published)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EntityTranslator;
    use crate::search::fake::FakeSession;

    struct FakeRepository {
        ids: Vec<i64>,
    }

    impl SearchRepository for FakeRepository {
        fn read<U, F>(&self, f: F) -> StorageResult<U>
        where
            F: FnOnce(&dyn SearchSession) -> StorageResult<U>,
        {
            f(&FakeSession::with_ids(self.ids.clone()))
        }

        fn preferred_page_size(&self) -> usize {
            7
        }
    }

    fn engine(ids: Vec<i64>) -> SearchEngine<FakeRepository, EntityTranslator> {
        SearchEngine::new(FakeRepository { ids }, EntityTranslator, SearchConfig::default()).unwrap()
    }

    #[test]
    fn test_results_carry_identity_metadata() {
        let engine = engine(vec![]);
        let a = engine.search(ResourceType::Patient, SearchParameterMap::new());
        let b = engine.search(ResourceType::Patient, SearchParameterMap::new());
        assert_ne!(a.id(), b.id());
        assert!(a.published() <= Utc::now());
        assert_eq!(a.preferred_page_size(), 7);
    }

    #[test]
    fn test_size_counts_via_session() {
        let engine = engine(vec![1, 2, 3]);
        let results = engine.search(ResourceType::Patient, SearchParameterMap::new());
        assert_eq!(results.size().unwrap(), 3);
    }

    #[test]
    fn test_unsatisfiable_map_is_empty() {
        let engine = engine(vec![1, 2, 3]);
        let map = SearchParameterMap::new().with(
            HandlerKey::Gender,
            ValueGroup::single(TokenValue::code("male")).and(Vec::<TokenValue>::new()),
        );
        let results = engine.search(ResourceType::Patient, map);
        assert_eq!(results.size().unwrap(), 0);
        assert!(results.all_resources().unwrap().is_empty());
    }

    #[test]
    fn test_everything_on_missing_root_is_not_found() {
        let engine = engine(vec![]);
        let err = engine
            .everything(ResourceType::Patient, "no-such-patient")
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::StorageError::Search(SearchError::NotFound { .. })
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = SearchConfig {
            approximate_tolerance: rust_decimal::Decimal::ONE,
            ..SearchConfig::default()
        };
        assert!(
            SearchEngine::new(FakeRepository { ids: vec![] }, EntityTranslator, config).is_err()
        );
    }

    #[test]
    fn test_default_everything_directives() {
        assert_eq!(default_everything(ResourceType::Patient).len(), 3);
        assert_eq!(default_everything(ResourceType::Encounter).len(), 4);
        assert!(default_everything(ResourceType::Observation).is_empty());
    }
}
