//! Ordering of candidate terms for a fetch.

use std::sync::{Arc, Mutex, PoisonError};

use super::models::{Term, TermId};

/// Which term(s) a caller wants records from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TermRequest {
    /// Freshest term that has data, falling back to older ones.
    #[default]
    Latest,
    /// Exactly the term `n` steps behind the newest (0 = newest). No fallback.
    Back(usize),
    /// A specific term by portal id. No fallback.
    Exact(TermId),
}

/// Turns a [`TermRequest`] into an ordered list of terms to try.
///
/// Only orders; deciding whether a candidate "had data" is the caller's job.
#[derive(Debug, Clone)]
pub struct TermResolver {
    /// Oldest first.
    terms: Arc<Vec<Term>>,
    fallback_depth: Option<usize>,
}

impl TermResolver {
    pub fn new(terms: Arc<Vec<Term>>, fallback_depth: Option<usize>) -> Self {
        Self {
            terms,
            fallback_depth,
        }
    }

    pub fn newest(&self) -> Option<&Term> {
        self.terms.last()
    }

    pub fn candidates_for(&self, request: &TermRequest) -> Vec<Term> {
        match request {
            TermRequest::Latest => {
                let depth = self.fallback_depth.unwrap_or(usize::MAX).max(1);
                self.terms.iter().rev().take(depth).cloned().collect()
            }
            TermRequest::Back(n) => self.terms.iter().rev().nth(*n).cloned().into_iter().collect(),
            TermRequest::Exact(id) => self
                .terms
                .iter()
                .filter(|t| &t.id == id)
                .cloned()
                .collect(),
        }
    }
}

/// Term list cached for one session generation.
#[derive(Default)]
pub struct TermCatalog {
    cached: Mutex<Option<(u64, Arc<Vec<Term>>)>>,
}

impl TermCatalog {
    pub fn get(&self, generation: u64) -> Option<Arc<Vec<Term>>> {
        let cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        cached
            .as_ref()
            .filter(|(g, _)| *g == generation)
            .map(|(_, terms)| terms.clone())
    }

    pub fn put(&self, generation: u64, terms: Arc<Vec<Term>>) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = Some((generation, terms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(depth: Option<usize>) -> TermResolver {
        let terms = vec![
            Term::new("T1", "Fall 2023", 0),
            Term::new("T2", "Winter 2023", 1),
            Term::new("T3", "Fall 2024", 2),
        ];
        TermResolver::new(Arc::new(terms), depth)
    }

    fn ids(terms: &[Term]) -> Vec<&str> {
        terms.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_latest_is_newest_first() {
        let candidates = resolver(None).candidates_for(&TermRequest::Latest);
        assert_eq!(ids(&candidates), ["T3", "T2", "T1"]);
    }

    #[test]
    fn test_latest_respects_fallback_depth() {
        let candidates = resolver(Some(2)).candidates_for(&TermRequest::Latest);
        assert_eq!(ids(&candidates), ["T3", "T2"]);
        let candidates = resolver(Some(0)).candidates_for(&TermRequest::Latest);
        assert_eq!(ids(&candidates), ["T3"]);
    }

    #[test]
    fn test_back_selects_single_term() {
        let r = resolver(None);
        assert_eq!(ids(&r.candidates_for(&TermRequest::Back(0))), ["T3"]);
        assert_eq!(ids(&r.candidates_for(&TermRequest::Back(2))), ["T1"]);
        assert!(r.candidates_for(&TermRequest::Back(3)).is_empty());
    }

    #[test]
    fn test_exact_requires_listed_term() {
        let r = resolver(None);
        assert_eq!(ids(&r.candidates_for(&TermRequest::Exact(TermId::new("T2")))), ["T2"]);
        assert!(r.candidates_for(&TermRequest::Exact(TermId::new("T9"))).is_empty());
    }

    #[test]
    fn test_catalog_is_per_generation() {
        let catalog = TermCatalog::default();
        catalog.put(1, Arc::new(vec![Term::new("T1", "Fall", 0)]));
        assert!(catalog.get(1).is_some());
        assert!(catalog.get(2).is_none());
        catalog.put(2, Arc::new(Vec::new()));
        assert!(catalog.get(1).is_none());
    }
}
