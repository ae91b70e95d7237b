//! Query assembly.
//!
//! Conjoins the predicate of every parameter entry into one filter over the
//! root entity and derives the two queries a search needs: a distinct count
//! and an ordered, windowed list of distinct primary ids. Sorting happens in
//! the id query before `LIMIT`/`OFFSET`.

use serde::Serialize;

use crate::error::StorageResult;
use crate::types::{EntityId, ResourceType, SearchParameterMap};

use super::parameter_handlers::{HandlerEnv, translate_entry};
use super::query_builder::{QueryContext, ROOT_ALIAS, SqlFragment, SqlParam};
use super::registry::{EntityTable, entity_table};
use super::sort::{self, OrderTerm, SortPipeline};

/// A `[start, end)` window over the ordered match set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    start: usize,
    end: usize,
}

impl Window {
    /// Creates a window; an inverted window is clamped to empty.
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// First position in the window.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Number of positions covered.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true if the window covers nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the start position can be bound as an SQL offset.
    pub fn is_addressable(&self) -> bool {
        i64::try_from(self.start).is_ok()
    }

    /// `LIMIT` and `OFFSET` values, saturated at `i64::MAX`.
    fn bounds(&self) -> (i64, i64) {
        let limit = i64::try_from(self.len()).unwrap_or(i64::MAX);
        let offset = i64::try_from(self.start).unwrap_or(i64::MAX);
        (limit, offset)
    }
}

/// The deduplicated, ordered primary ids matching a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchSet(Vec<EntityId>);

impl MatchSet {
    /// Builds a match set, keeping the first occurrence of each id.
    pub fn from_ids(ids: impl IntoIterator<Item = EntityId>) -> Self {
        let mut seen = std::collections::HashSet::new();
        Self(ids.into_iter().filter(|id| seen.insert(*id)).collect())
    }

    /// The ids in order.
    pub fn ids(&self) -> &[EntityId] {
        &self.0
    }

    /// Number of ids.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no id matched.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The outcome of assembling a parameter map.
#[derive(Debug, Clone)]
pub enum Assembly {
    /// The map cannot match anything; no query needs to run.
    Unsatisfiable,
    /// Queries to run.
    Query(AssembledQuery),
}

/// A filter over one entity table with its effective ordering.
#[derive(Debug, Clone)]
pub struct AssembledQuery {
    root: &'static EntityTable,
    from: String,
    filter: SqlFragment,
    ordering: Vec<OrderTerm>,
}

/// Count and id SQL of an assembled query, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    /// The resource type searched.
    pub resource_type: ResourceType,
    /// Returns false when the map short-circuits to no matches.
    pub satisfiable: bool,
    /// Count query.
    pub count: Option<SqlFragment>,
    /// Unwindowed id query.
    pub ids: Option<SqlFragment>,
}

impl AssembledQuery {
    /// The resource type searched.
    pub fn resource_type(&self) -> ResourceType {
        self.root.resource_type
    }

    /// Counts distinct matching primaries.
    pub fn count_sql(&self) -> SqlFragment {
        SqlFragment::with_params(
            format!(
                "SELECT COUNT(DISTINCT {}.{}) FROM {} WHERE {}",
                ROOT_ALIAS, self.root.pk, self.from, self.filter.sql
            ),
            self.filter.params.clone(),
        )
    }

    /// Selects distinct matching primary ids, unordered.
    pub fn filter_sql(&self) -> SqlFragment {
        SqlFragment::with_params(
            format!(
                "SELECT DISTINCT {}.{} FROM {} WHERE {}",
                ROOT_ALIAS, self.root.pk, self.from, self.filter.sql
            ),
            self.filter.params.clone(),
        )
    }

    /// Selects ordered distinct primary ids, limited to `window` if given.
    ///
    /// The filter runs as a subquery so that sort expressions see exactly
    /// one row per primary.
    pub fn id_sql(&self, window: Option<Window>) -> SqlFragment {
        let filter = self.filter_sql();
        let mut sql = format!(
            "SELECT {a}.{pk} FROM {table} {a} WHERE {a}.{pk} IN ({filter}) ORDER BY {order}",
            a = ROOT_ALIAS,
            pk = self.root.pk,
            table = self.root.table,
            filter = filter.sql,
            order = sort::render(&self.ordering),
        );
        let mut params = filter.params;
        if let Some(window) = window {
            let (limit, offset) = window.bounds();
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(SqlParam::integer(limit));
            params.push(SqlParam::integer(offset));
        }
        SqlFragment::with_params(sql, params)
    }
}

/// Assembles parameter maps into queries.
pub struct QueryAssembler<'a> {
    env: HandlerEnv<'a>,
}

impl<'a> QueryAssembler<'a> {
    /// Creates an assembler translating values through `env`.
    pub fn new(env: HandlerEnv<'a>) -> Self {
        Self { env }
    }

    /// Assembles `map` for `resource_type`.
    ///
    /// Returns [`Assembly::Unsatisfiable`] without consulting the store when
    /// an entry holds an empty OR-group.
    pub fn assemble(
        &self,
        resource_type: ResourceType,
        map: &SearchParameterMap,
    ) -> StorageResult<Assembly> {
        if map.is_unsatisfiable() {
            tracing::debug!(%resource_type, "Parameter map is unsatisfiable; skipping query");
            return Ok(Assembly::Unsatisfiable);
        }

        let mut context = QueryContext::new(resource_type);
        for (index, entry) in map.entries().iter().enumerate() {
            translate_entry(&mut context, index, entry, &self.env)?;
        }

        let query = AssembledQuery {
            root: entity_table(resource_type),
            from: context.from_clause(),
            filter: context.where_clause(),
            ordering: SortPipeline::apply(
                resource_type,
                map.sort(),
                SortPipeline::base_ordering(resource_type),
            ),
        };
        tracing::debug!(
            %resource_type,
            joins = context.join_count(),
            sql = %query.filter.sql,
            "Assembled search query"
        );
        Ok(Assembly::Query(query))
    }

    /// Assembles `map` and renders its queries.
    pub fn explain(
        &self,
        resource_type: ResourceType,
        map: &SearchParameterMap,
    ) -> StorageResult<Explanation> {
        Ok(match self.assemble(resource_type, map)? {
            Assembly::Unsatisfiable => Explanation {
                resource_type,
                satisfiable: false,
                count: None,
                ids: None,
            },
            Assembly::Query(query) => Explanation {
                resource_type,
                satisfiable: true,
                count: Some(query.count_sql()),
                ids: Some(query.id_sql(None)),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::search::code_system::CodeSystemResolver;
    use crate::search::fake::FakeSession;
    use crate::types::{HandlerKey, ReferenceValue, SortSpec, TokenValue, ValueGroup};
    use rust_decimal::Decimal;

    fn assemble(resource_type: ResourceType, map: &SearchParameterMap) -> (Assembly, usize) {
        let resolver = CodeSystemResolver::new(&SearchConfig::default());
        let session = FakeSession::default();
        let assembler = QueryAssembler::new(HandlerEnv {
            resolver: &resolver,
            session: &session,
            approximate_tolerance: Decimal::new(1, 1),
        });
        let assembly = assembler.assemble(resource_type, map).unwrap();
        (assembly, session.lookups.get())
    }

    fn query(assembly: Assembly) -> AssembledQuery {
        match assembly {
            Assembly::Query(query) => query,
            Assembly::Unsatisfiable => panic!("expected a query"),
        }
    }

    #[test]
    fn test_count_is_distinct_over_root() {
        let map = SearchParameterMap::new().with(
            HandlerKey::PatientReference,
            ValueGroup::single(ReferenceValue::chained("family", "Chebet")),
        );
        let (assembly, _) = assemble(ResourceType::Observation, &map);
        let count = query(assembly).count_sql();
        assert!(count.sql.starts_with("SELECT COUNT(DISTINCT t0.obs_id) FROM obs t0 LEFT JOIN"));
        assert_eq!(count.params, vec![SqlParam::string("Chebet%")]);
    }

    #[test]
    fn test_id_query_sorts_before_window() {
        let map = SearchParameterMap::new()
            .with(HandlerKey::Status, ValueGroup::single(TokenValue::code("final")))
            .with_sort(SortSpec::desc("date"));
        let (assembly, _) = assemble(ResourceType::Observation, &map);
        let ids = query(assembly).id_sql(Some(Window::new(10, 15)));
        assert_eq!(
            ids.sql,
            "SELECT t0.obs_id FROM obs t0 WHERE t0.obs_id IN (SELECT DISTINCT t0.obs_id FROM obs t0 \
             WHERE (t0.voided = 0) AND (t0.status = ? COLLATE NOCASE)) \
             ORDER BY t0.obs_datetime DESC, t0.obs_id ASC LIMIT ? OFFSET ?"
        );
        assert_eq!(
            ids.params,
            vec![
                SqlParam::string("final"),
                SqlParam::integer(5),
                SqlParam::integer(10)
            ]
        );
    }

    #[test]
    fn test_empty_or_group_short_circuits() {
        let map = SearchParameterMap::new().with(
            HandlerKey::Coded,
            ValueGroup::single(TokenValue::code("5089")).and(Vec::<TokenValue>::new()),
        );
        let (assembly, lookups) = assemble(ResourceType::Observation, &map);
        assert!(matches!(assembly, Assembly::Unsatisfiable));
        assert_eq!(lookups, 0);
    }

    #[test]
    fn test_window_bounds_saturate() {
        let far = Window::new(usize::MAX - 1, usize::MAX);
        assert!(!far.is_addressable());
        assert_eq!(far.bounds(), (1, i64::MAX));

        let wide = Window::new(0, usize::MAX);
        assert!(wide.is_addressable());
        assert_eq!(wide.bounds(), (i64::MAX, 0));
    }

    #[test]
    fn test_inverted_window_is_empty() {
        let window = Window::new(8, 3);
        assert!(window.is_empty());
        assert_eq!(window.start(), 8);
    }

    #[test]
    fn test_match_set_keeps_first_occurrence() {
        let set = MatchSet::from_ids([3, 1, 3, 2, 1]);
        assert_eq!(set.ids(), &[3, 1, 2]);
        assert_eq!(set.len(), 3);
    }
}
