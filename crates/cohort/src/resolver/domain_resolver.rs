//! Expansion of unresolved rollup parameters into per-domain parameters.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, instrument};

use super::index::{CodeDomainIndex, CodeKey};
use crate::error::{CohortResult, ResolutionError, ValidationError};
use crate::types::{DomainType, SearchGroup, SearchParameter, SearchRequest};

/// Fills in missing domains on rollup parameters.
///
/// Resolution never mutates its input and is idempotent: a resolved tree
/// has no parameter left that needs a lookup.
#[derive(Clone)]
pub struct DomainResolver {
    index: Arc<dyn CodeDomainIndex>,
}

impl DomainResolver {
    /// Creates a resolver over a code index.
    pub fn new(index: Arc<dyn CodeDomainIndex>) -> Self {
        Self { index }
    }

    /// Resolves both the include and exclude groups of a request.
    pub async fn resolve_request(&self, request: &SearchRequest) -> CohortResult<SearchRequest> {
        Ok(SearchRequest {
            includes: self.resolve(&request.includes).await?,
            excludes: self.resolve(&request.excludes).await?,
        })
    }

    /// Returns a copy of `groups` in which every unresolved rollup parameter
    /// is replaced by one parameter per registered domain.
    ///
    /// Fails with [`ResolutionError::NoDomainFound`] when a code has no
    /// registered domain.
    #[instrument(skip(self, groups), fields(groups = groups.len()))]
    pub async fn resolve(&self, groups: &[SearchGroup]) -> CohortResult<Vec<SearchGroup>> {
        let mut keys = BTreeSet::new();
        for param in groups
            .iter()
            .flat_map(|g| g.items.iter())
            .flat_map(|i| i.search_parameters.iter())
        {
            if let Some(key) = lookup_key(param)? {
                keys.insert(key);
            }
        }

        // One lookup per distinct code, however often it appears.
        let mut domains_by_key: BTreeMap<CodeKey, Vec<DomainType>> = BTreeMap::new();
        for key in keys {
            let domains = self.index.find_domains_for_code(&key).await?;
            if domains.is_empty() {
                return Err(ResolutionError::NoDomainFound {
                    criteria_type: key.criteria_type,
                    subtype: key.subtype,
                    code: key.code,
                }
                .into());
            }
            debug!(
                criteria_type = %key.criteria_type,
                code = %key.code,
                domains = ?domains,
                "Resolved rollup code"
            );
            domains_by_key.insert(key, dedup(domains));
        }

        if domains_by_key.is_empty() {
            return Ok(groups.to_vec());
        }

        let mut resolved = groups.to_vec();
        for item in resolved.iter_mut().flat_map(|g| g.items.iter_mut()) {
            let mut params = Vec::with_capacity(item.search_parameters.len());
            for param in item.search_parameters.drain(..) {
                match lookup_key(&param)?.and_then(|key| domains_by_key.get(&key)) {
                    Some(domains) => params.extend(domains.iter().map(|domain| SearchParameter {
                        domain: Some(*domain),
                        ..param.clone()
                    })),
                    None => params.push(param),
                }
            }
            item.search_parameters = params;
        }
        Ok(resolved)
    }
}

/// The lookup key of a parameter that needs resolution, or `None` if it
/// passes through unchanged.
fn lookup_key(param: &SearchParameter) -> Result<Option<CodeKey>, ValidationError> {
    if !param.is_unresolved() || !param.criteria_type.is_rollup_system() {
        return Ok(None);
    }
    let code = param
        .value
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .ok_or_else(|| ValidationError::MissingCode {
            parameter: param.label(),
            criteria_type: param.criteria_type,
        })?;
    Ok(Some(CodeKey::new(param.criteria_type, param.subtype, code)))
}

fn dedup(domains: Vec<DomainType>) -> Vec<DomainType> {
    let mut seen = BTreeSet::new();
    domains.into_iter().filter(|d| seen.insert(*d)).collect()
}
