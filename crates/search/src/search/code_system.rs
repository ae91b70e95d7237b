//! Code system resolution.
//!
//! A coded search value may name a concept by its internal id, its uuid, or
//! by a code in any coding system the concept has been mapped to. The
//! resolver turns a [`TokenValue`] into the set of concept ids it denotes.

use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::SearchConfig;
use crate::core::{ConceptLookup, SearchSession};
use crate::error::StorageResult;
use crate::types::{EntityId, TokenValue};

/// Resolves tokens to concept ids.
///
/// Constructed from configuration; the only mutable state is a bounded
/// least-recently-used resolution cache shared between searches.
pub struct CodeSystemResolver {
    sources: HashMap<String, String>,
    cache: Option<Mutex<LruCache<TokenValue, Arc<BTreeSet<EntityId>>>>>,
}

impl std::fmt::Debug for CodeSystemResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeSystemResolver")
            .field("sources", &self.sources)
            .field("cached", &self.cached_len())
            .finish()
    }
}

impl CodeSystemResolver {
    /// Creates a resolver for the configured coding systems.
    pub fn new(config: &SearchConfig) -> Self {
        let sources = config
            .code_systems
            .iter()
            .map(|m| (m.system.clone(), m.source.clone()))
            .collect();
        Self {
            sources,
            cache: NonZeroUsize::new(config.concept_cache_capacity)
                .filter(|_| config.cache_concept_lookups)
                .map(|capacity| Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Returns the concept source name for a coding system URI.
    ///
    /// URIs without a configured source are looked up verbatim.
    pub fn source_for<'a>(&'a self, system: &'a str) -> &'a str {
        self.sources.get(system).map(String::as_str).unwrap_or(system)
    }

    /// Resolves a token to the concepts it denotes.
    ///
    /// An unqualified token matches concept id, uuid, or any mapped code. A
    /// qualified token matches only codes mapped within that system.
    pub fn resolve(
        &self,
        session: &dyn SearchSession,
        token: &TokenValue,
    ) -> StorageResult<Arc<BTreeSet<EntityId>>> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lock().get(token) {
                tracing::debug!(code = %token.code, "Concept resolution served from cache");
                return Ok(Arc::clone(hit));
            }
        }

        let lookup = match token.system() {
            Some(system) => ConceptLookup::Mapped {
                source: self.source_for(system).to_string(),
                code: token.code.clone(),
            },
            None => ConceptLookup::Any {
                code: token.code.clone(),
            },
        };
        let resolved: Arc<BTreeSet<EntityId>> =
            Arc::new(session.concept_ids(&lookup)?.into_iter().collect());

        if resolved.is_empty() {
            tracing::debug!(?lookup, "Token resolved to no concepts");
        }
        if let Some(cache) = &self.cache {
            cache.lock().put(token.clone(), Arc::clone(&resolved));
        }
        Ok(resolved)
    }

    /// Resolves every token of an OR-group and unions the results.
    pub fn resolve_any<'a>(
        &self,
        session: &dyn SearchSession,
        tokens: impl IntoIterator<Item = &'a TokenValue>,
    ) -> StorageResult<BTreeSet<EntityId>> {
        let mut union = BTreeSet::new();
        for token in tokens {
            union.extend(self.resolve(session, token)?.iter().copied());
        }
        Ok(union)
    }

    /// Number of cached resolutions.
    pub fn cached_len(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.lock().len())
    }
}
