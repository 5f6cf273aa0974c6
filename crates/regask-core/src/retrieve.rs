//! Hybrid retrieval: grounding question spans to registry identifiers.
//!
//! Three methods, in strict priority order:
//!
//! 1. **Exact**: normalized-name or identifier equality, score 1.0
//! 2. **Lexical**: FTS index over names, rank mapped into [0, 1)
//! 3. **Semantic**: name-vector similarity, only consulted when the first
//!    two yield fewer than a configured number of candidates
//!
//! Candidates merge with per-identifier dedup, keeping the highest score and
//! breaking score ties by method priority. An unavailable index degrades the
//! search instead of failing it; only when every method is unavailable does
//! the retriever surface `RetrievalUnavailable`.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use regask_db::{name_vector, RegistryStore, VectorIndex};

use crate::errors::{RegaskError, RegaskResult};

/// Minimum cosine similarity for a semantic hit to count as a candidate.
/// Below this the neighbor is noise, not a plausible match.
pub const SEMANTIC_SCORE_FLOOR: f32 = 0.35;

// ============================================================================
// Candidates
// ============================================================================

/// Which retrieval method produced a candidate. Ordering is priority:
/// exact beats lexical beats semantic at equal score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    /// Normalized equality on name or identifier.
    Exact,
    /// Full-text match over name fields.
    Lexical,
    /// Name-vector similarity.
    Semantic,
}

/// A grounded candidate: a registry identifier with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalCandidate {
    /// Registry identifier of the matched company.
    pub company_id: String,
    /// Match confidence in [0, 1]; exact matches score exactly 1.0.
    pub score: f32,
    /// Method that produced this candidate.
    pub method: MatchMethod,
}

/// Outcome of resolving a name span.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Candidates, best first.
    pub candidates: Vec<RetrievalCandidate>,
    /// Methods that were unavailable during this resolution.
    pub degraded_methods: Vec<MatchMethod>,
}

impl Resolution {
    /// Best candidate, if any.
    pub fn best(&self) -> Option<&RetrievalCandidate> {
        self.candidates.first()
    }

    /// Identifiers tied with the best candidate's score.
    ///
    /// More than one element means the resolution is ambiguous and the
    /// caller should ask for disambiguation rather than pick one.
    pub fn tied_leaders(&self) -> Vec<&RetrievalCandidate> {
        match self.candidates.first() {
            Some(best) => self
                .candidates
                .iter()
                .take_while(|c| (c.score - best.score).abs() < f32::EPSILON)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Whether any retrieval method was skipped as unavailable.
    pub fn is_degraded(&self) -> bool {
        !self.degraded_methods.is_empty()
    }
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// Resolves company-name spans and finds activity-similar companies.
pub struct HybridRetriever<'a> {
    store: &'a RegistryStore,
    name_index: Option<&'a VectorIndex>,
    activity_index: Option<&'a VectorIndex>,
    top_k: usize,
    semantic_min_candidates: usize,
}

impl<'a> HybridRetriever<'a> {
    /// Create a retriever over the store and optional vector indexes.
    ///
    /// A `None` index means the corresponding method is unavailable and
    /// resolutions using it report degradation.
    pub fn new(
        store: &'a RegistryStore,
        name_index: Option<&'a VectorIndex>,
        activity_index: Option<&'a VectorIndex>,
        top_k: usize,
        semantic_min_candidates: usize,
    ) -> Self {
        Self {
            store,
            name_index,
            activity_index,
            top_k,
            semantic_min_candidates,
        }
    }

    /// Resolve a free-text company span to ranked registry identifiers.
    ///
    /// Fails with [`RegaskError::RetrievalUnavailable`] only when every
    /// method is unavailable; otherwise unavailable methods are recorded in
    /// the resolution and the rest proceed.
    pub fn resolve_company(&self, span: &str) -> RegaskResult<Resolution> {
        let mut candidates: Vec<RetrievalCandidate> = Vec::new();
        let mut degraded: Vec<MatchMethod> = Vec::new();
        let mut available = 0usize;

        // Exact
        match self.store.exact_company_lookup(span) {
            Ok(ids) => {
                available += 1;
                for id in ids {
                    candidates.push(RetrievalCandidate {
                        company_id: id,
                        score: 1.0,
                        method: MatchMethod::Exact,
                    });
                }
            }
            Err(err) => {
                warn!("Exact lookup unavailable: {}", err);
                degraded.push(MatchMethod::Exact);
            }
        }

        // Lexical
        match self.store.lexical_company_search(span, self.top_k) {
            Ok(ids) => {
                available += 1;
                for (rank, id) in ids.into_iter().enumerate() {
                    candidates.push(RetrievalCandidate {
                        company_id: id,
                        score: lexical_score(rank),
                        method: MatchMethod::Lexical,
                    });
                }
            }
            Err(err) if err.is_index_missing() => {
                warn!("Lexical index unavailable: {}", err);
                degraded.push(MatchMethod::Lexical);
            }
            Err(err) => return Err(err.into()),
        }

        let mut merged = merge_candidates(candidates);

        // Semantic, only when exact+lexical came up short.
        if merged.len() < self.semantic_min_candidates {
            match self.name_index {
                Some(index) => match index.query(&name_vector(span), self.top_k, None) {
                    Ok(hits) => {
                        available += 1;
                        let mut with_semantic = merged.clone();
                        for hit in hits {
                            if hit.score < SEMANTIC_SCORE_FLOOR {
                                continue;
                            }
                            with_semantic.push(RetrievalCandidate {
                                company_id: hit.id,
                                score: regask_db::clamp_score(hit.score),
                                method: MatchMethod::Semantic,
                            });
                        }
                        merged = merge_candidates(with_semantic);
                    }
                    Err(err) => {
                        warn!("Semantic index query failed: {}", err);
                        degraded.push(MatchMethod::Semantic);
                    }
                },
                None => {
                    debug!("Semantic index not configured");
                    degraded.push(MatchMethod::Semantic);
                }
            }
        }

        if available == 0 {
            return Err(RegaskError::retrieval_unavailable(
                "no retrieval method is available",
            ));
        }

        merged.truncate(self.top_k);
        Ok(Resolution {
            candidates: merged,
            degraded_methods: degraded,
        })
    }

    /// Companies with the most similar economic-activity profile, best
    /// first, excluding the given company itself.
    pub fn similar_companies(
        &self,
        company_id: &str,
        limit: usize,
    ) -> RegaskResult<Vec<RetrievalCandidate>> {
        let index = self.activity_index.ok_or_else(|| {
            RegaskError::retrieval_unavailable("activity index not configured")
        })?;

        let profile = index.get(company_id).map_err(RegaskError::Storage)?;
        let profile = profile.ok_or_else(|| {
            RegaskError::retrieval_unavailable(format!(
                "company {} has no activity profile",
                company_id
            ))
        })?;

        let hits = index
            .query(&profile, limit, Some(company_id))
            .map_err(RegaskError::Storage)?;
        Ok(hits
            .into_iter()
            .map(|hit| RetrievalCandidate {
                company_id: hit.id,
                score: regask_db::clamp_score(hit.score),
                method: MatchMethod::Semantic,
            })
            .collect())
    }
}

/// Map a lexical rank (0-based, best first) into a score strictly below 1.0
/// so lexical hits never outrank exact matches.
fn lexical_score(rank: usize) -> f32 {
    1.0 / (rank as f32 + 2.0)
}

/// Merge candidates: dedup by identifier keeping the highest score, break
/// score ties by method priority, then sort best first (identifier as the
/// final tie-break for determinism).
pub fn merge_candidates(candidates: Vec<RetrievalCandidate>) -> Vec<RetrievalCandidate> {
    let mut merged: Vec<RetrievalCandidate> = Vec::new();
    for candidate in candidates {
        match merged
            .iter_mut()
            .find(|c| c.company_id == candidate.company_id)
        {
            Some(existing) => {
                let better = candidate.score > existing.score
                    || ((candidate.score - existing.score).abs() < f32::EPSILON
                        && candidate.method < existing.method);
                if better {
                    *existing = candidate;
                }
            }
            None => merged.push(candidate),
        }
    }
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.method.cmp(&b.method))
            .then(a.company_id.cmp(&b.company_id))
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use regask_db::{index_company_names, Company, NAME_VECTOR_DIM};

    fn candidate(id: &str, score: f32, method: MatchMethod) -> RetrievalCandidate {
        RetrievalCandidate {
            company_id: id.to_string(),
            score,
            method,
        }
    }

    fn seeded_store() -> RegistryStore {
        let store = RegistryStore::open_in_memory().unwrap();
        store.apply_schema().unwrap();
        for (id, name) in [
            ("33000167", "PETROLEO BRASILEIRO S.A. PETROBRAS"),
            ("33592510", "VALE S.A."),
            ("60872504", "AMBEV S.A."),
        ] {
            store
                .insert_company(&Company {
                    cnpj_root: id.to_string(),
                    legal_name: name.to_string(),
                    trade_name: None,
                    status: "active".to_string(),
                    activity_code: "06000".to_string(),
                    secondary_activity_codes: None,
                    street: None,
                    city: None,
                    state: None,
                    postal_code: None,
                    registered_on: None,
                })
                .unwrap();
        }
        store.build_lexical_index().unwrap();
        store
    }

    #[test]
    fn test_merge_dedups_keeping_highest_score() {
        let merged = merge_candidates(vec![
            candidate("a", 0.5, MatchMethod::Lexical),
            candidate("a", 1.0, MatchMethod::Exact),
            candidate("b", 0.3, MatchMethod::Semantic),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].company_id, "a");
        assert_eq!(merged[0].score, 1.0);
        assert_eq!(merged[0].method, MatchMethod::Exact);
    }

    #[test]
    fn test_merge_breaks_score_ties_by_method_priority() {
        let merged = merge_candidates(vec![
            candidate("a", 0.5, MatchMethod::Semantic),
            candidate("a", 0.5, MatchMethod::Lexical),
        ]);
        assert_eq!(merged[0].method, MatchMethod::Lexical);
    }

    #[test]
    fn test_exact_match_scores_one() {
        let store = seeded_store();
        let retriever = HybridRetriever::new(&store, None, None, 10, 3);
        let resolution = retriever.resolve_company("VALE S.A.").unwrap();
        let best = resolution.best().unwrap();
        assert_eq!(best.company_id, "33592510");
        assert_eq!(best.score, 1.0);
        assert_eq!(best.method, MatchMethod::Exact);
    }

    #[test]
    fn test_lexical_scores_stay_below_exact() {
        assert!(lexical_score(0) < 1.0);
        assert!(lexical_score(0) > lexical_score(1));
    }

    #[test]
    fn test_missing_semantic_index_degrades_not_fails() {
        let store = seeded_store();
        let retriever = HybridRetriever::new(&store, None, None, 10, 3);
        // A fragment with no exact/lexical hits would want the semantic leg.
        let resolution = retriever.resolve_company("petrolio brasilero").unwrap();
        assert!(resolution
            .degraded_methods
            .contains(&MatchMethod::Semantic));
    }

    #[test]
    fn test_semantic_leg_catches_misspellings() {
        let store = seeded_store();
        let names = VectorIndex::in_memory(NAME_VECTOR_DIM);
        index_company_names(&store, &names).unwrap();
        let retriever = HybridRetriever::new(&store, Some(&names), None, 10, 3);

        let resolution = retriever
            .resolve_company("petroleo brasilero petrobras")
            .unwrap();
        assert_eq!(resolution.best().unwrap().company_id, "33000167");
        assert!(resolution.best().unwrap().score < 1.0);
    }

    #[test]
    fn test_similar_companies_requires_activity_index() {
        let store = seeded_store();
        let retriever = HybridRetriever::new(&store, None, None, 10, 3);
        assert!(matches!(
            retriever.similar_companies("33000167", 10),
            Err(RegaskError::RetrievalUnavailable { .. })
        ));
    }
}
