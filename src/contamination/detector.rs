use serde::Serialize;

use super::catalog::{TermCatalog, TermCategory};

const MIN_TERM_LEN: usize = 3;

/// A catalog match inside a prompt. Offsets are half-open byte offsets and are
/// only valid for the exact string the term was detected in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedTerm {
    pub id: String,
    pub term: String,
    pub category: TermCategory,
    pub start_index: usize,
    pub end_index: usize,
}

impl DetectedTerm {
    fn new(category: TermCategory, prompt: &str, start: usize, end: usize) -> Self {
        Self {
            id: format!("{category}-{start}-{end}"),
            term: prompt[start..end].to_string(),
            category,
            start_index: start,
            end_index: end,
        }
    }

    pub fn len(&self) -> usize {
        self.end_index - self.start_index
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlaps(&self, other: &DetectedTerm) -> bool {
        self.start_index < other.end_index && other.start_index < self.end_index
    }
}

pub fn detect(prompt: &str) -> Vec<DetectedTerm> {
    detect_with(TermCatalog::builtin(), prompt)
}

pub fn detect_with(catalog: &TermCatalog, prompt: &str) -> Vec<DetectedTerm> {
    if prompt.trim().is_empty() {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    for rule in catalog.rules() {
        for found in rule.pattern.find_iter(prompt) {
            if found.as_str().chars().count() < MIN_TERM_LEN {
                continue;
            }
            candidates.push(DetectedTerm::new(
                rule.category,
                prompt,
                found.start(),
                found.end(),
            ));
        }
    }

    resolve_overlaps(candidates)
}

/// Longest span wins, then the earliest one. The sort is stable, so identical
/// spans keep catalog order and the first rule's category is reported.
fn resolve_overlaps(mut candidates: Vec<DetectedTerm>) -> Vec<DetectedTerm> {
    candidates.sort_by(|a, b| {
        b.len()
            .cmp(&a.len())
            .then_with(|| a.start_index.cmp(&b.start_index))
    });

    let mut accepted: Vec<DetectedTerm> = Vec::new();
    for candidate in candidates {
        if accepted.iter().any(|kept| kept.overlaps(&candidate)) {
            continue;
        }
        accepted.push(candidate);
    }

    accepted.sort_by_key(|term| term.start_index);
    accepted
}
