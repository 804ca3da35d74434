use once_cell::sync::Lazy;
use regex::Regex;

use super::catalog::{TermCatalog, TermCategory};
use super::detector::{detect_with, DetectedTerm};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewriteError {
    #[error("Detected term '{term}' no longer matches the prompt at {start}..{end}; re-run detection")]
    StaleTerm {
        term: String,
        start: usize,
        end: usize,
    },
}

static CONNECTIVE_BEFORE_PUNCT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:with|and)\s*([,.;:!?])").expect("valid connective punctuation regex")
});
static STACKED_CONNECTIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(with|and)\s+(?:with|and)\b").expect("valid stacked connective regex")
});
static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static SPACE_BEFORE_PUNCT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+([,.;:!?])").expect("valid punctuation spacing regex"));
static REPEATED_COMMA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(?:\s*,)+").expect("valid repeated comma regex"));
static REPEATED_PERIOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(?:\s*\.)+").expect("valid repeated period regex"));
static COMMA_THEN_PERIOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*\.|\.\s*,").expect("valid mixed punctuation regex"));
static MISSING_SPACE_AFTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([,;])([^\s\d,;.])").expect("valid punctuation spacing regex"));
static TRAILING_CONNECTIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[\s,;]*\b(?:with|and)\s*$").expect("valid trailing connective regex")
});
static LEADING_CONNECTIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:and|with)\b[\s,;]*").expect("valid leading connective regex")
});

const EDGE_PUNCTUATION: &[char] = &[',', '.', ';', ':', '-', '!', '?'];

/// Splices `term` out of `prompt` and repairs the connective words and
/// punctuation left around the gap. Offsets in every other term detected on
/// the same prompt are invalid afterwards.
///
/// The clean-up runs over the whole prompt, not only the splice: whitespace
/// runs, space before punctuation and repeated commas or periods (`...`)
/// are normalised everywhere, and edge punctuation (including a final `?`
/// or `!`) is trimmed.
pub fn remove_term(prompt: &str, term: &DetectedTerm) -> Result<String, RewriteError> {
    let span = prompt.get(term.start_index..term.end_index);
    if span != Some(term.term.as_str()) {
        return Err(RewriteError::StaleTerm {
            term: term.term.clone(),
            start: term.start_index,
            end: term.end_index,
        });
    }

    let spliced = format!(
        "{}{}",
        &prompt[..term.start_index],
        &prompt[term.end_index..]
    );
    Ok(tidy(&spliced))
}

/// Removes every catalog term (optionally limited to `categories`),
/// re-detecting after each removal.
pub fn strip_all(
    catalog: &TermCatalog,
    prompt: &str,
    categories: Option<&[TermCategory]>,
) -> String {
    let mut current = prompt.to_string();
    loop {
        let next_term = detect_with(catalog, &current).into_iter().find(|term| {
            categories
                .map(|allowed| allowed.contains(&term.category))
                .unwrap_or(true)
        });
        let Some(term) = next_term else {
            return current;
        };
        match remove_term(&current, &term) {
            Ok(rewritten) if rewritten != current => current = rewritten,
            _ => return current,
        }
    }
}

fn tidy(text: &str) -> String {
    let mut current = CONNECTIVE_BEFORE_PUNCT_RE
        .replace_all(text, "$1")
        .into_owned();
    current = STACKED_CONNECTIVE_RE
        .replace_all(&current, "$1")
        .into_owned();
    current = WHITESPACE_RE.replace_all(&current, " ").into_owned();
    current = SPACE_BEFORE_PUNCT_RE
        .replace_all(&current, "$1")
        .into_owned();
    current = REPEATED_COMMA_RE.replace_all(&current, ",").into_owned();
    current = REPEATED_PERIOD_RE.replace_all(&current, ".").into_owned();
    current = COMMA_THEN_PERIOD_RE.replace_all(&current, ".").into_owned();
    current = MISSING_SPACE_AFTER_RE
        .replace_all(&current, "$1 $2")
        .into_owned();

    loop {
        let mut next = TRAILING_CONNECTIVE_RE.replace(&current, "").into_owned();
        next = LEADING_CONNECTIVE_RE.replace(&next, "").into_owned();
        next = next
            .trim_matches(|ch: char| ch.is_whitespace() || EDGE_PUNCTUATION.contains(&ch))
            .to_string();
        if next == current {
            return current;
        }
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contamination::detector::detect;

    fn remove_first(prompt: &str, needle: &str) -> String {
        let term = detect(prompt)
            .into_iter()
            .find(|term| term.term == needle)
            .unwrap_or_else(|| panic!("'{needle}' not detected in '{prompt}'"));
        remove_term(prompt, &term).unwrap()
    }

    fn assert_tidy(text: &str) {
        assert!(!text.contains(",,"), "{text}");
        assert!(!text.contains(". ."), "{text}");
        assert!(!text.contains(".."), "{text}");
        assert!(!text.contains("  "), "{text}");
        assert!(!text.starts_with(EDGE_PUNCTUATION), "{text}");
        assert!(!text.ends_with(EDGE_PUNCTUATION), "{text}");
    }

    #[test]
    fn removing_trailing_hair_drops_dangling_with() {
        let prompt = "Asian woman with long brown hair";
        let rewritten = remove_first(prompt, "long brown hair");
        assert_eq!(rewritten, "Asian woman");
        assert!(detect(&rewritten)
            .iter()
            .all(|term| term.category != TermCategory::Hair));
    }

    #[test]
    fn removing_before_comma_collapses_connective() {
        let rewritten = remove_first("portrait, smiling with blue eyes, soft light", "blue eyes");
        assert_eq!(rewritten, "portrait, smiling, soft light");
    }

    #[test]
    fn removing_leading_term_drops_leading_and() {
        let rewritten = remove_first("freckles and a warm smile", "freckles");
        assert_eq!(rewritten, "a warm smile");
    }

    #[test]
    fn removing_between_commas_leaves_single_comma() {
        let rewritten = remove_first("studio shot, 30 years old, golden hour", "30 years old");
        assert_eq!(rewritten, "studio shot, golden hour");
    }

    #[test]
    fn removing_before_period_keeps_sentence_break() {
        let rewritten = remove_first(
            "A dancer with olive skin. Dramatic lighting.",
            "olive skin",
        );
        assert_eq!(rewritten, "A dancer. Dramatic lighting");
    }

    #[test]
    fn stacked_connectives_collapse() {
        let rewritten = remove_first("a girl with full lips and high cheekbones", "full lips");
        assert_eq!(rewritten, "a girl with high cheekbones");
    }

    #[test]
    fn exclamation_and_question_marks_do_not_dangle() {
        assert_eq!(
            remove_first("blonde! portrait in soft light", "blonde"),
            "portrait in soft light"
        );
        assert_eq!(
            remove_first("portrait of a woman with blue eyes?", "blue eyes"),
            "portrait of a woman"
        );
        assert_eq!(
            remove_first("smiling with green eyes! golden hour", "green eyes"),
            "smiling! golden hour"
        );
    }

    #[test]
    fn clean_up_applies_to_the_whole_prompt() {
        let rewritten = remove_first("moody light... woman with blue eyes , film grain", "blue eyes");
        assert_eq!(rewritten, "moody light. woman, film grain");
    }

    #[test]
    fn stale_terms_are_rejected() {
        let prompt = "woman with green eyes";
        let term = detect(prompt)
            .into_iter()
            .find(|term| term.category == TermCategory::Eyes)
            .unwrap();
        let err = remove_term("man with green eyes", &term).unwrap_err();
        assert!(matches!(err, RewriteError::StaleTerm { .. }));
    }

    #[test]
    fn every_single_removal_is_tidy_and_gone() {
        let prompts = [
            "A young Latina woman, 25 years old, with hazel eyes, olive skin and freckles",
            "tall muscular man with a beard, short curly black hair and blue eyes",
            "portrait of a slim blonde girl with full lips and high cheekbones.",
            "elderly gentleman in his late 60s with grey hair, athletic build",
            "blonde! portrait in soft light",
            "portrait of a woman with blue eyes?",
        ];
        for prompt in prompts {
            for term in detect(prompt) {
                let rewritten = remove_term(prompt, &term).unwrap();
                assert_tidy(&rewritten);
                assert_ne!(
                    rewritten.get(term.start_index..term.end_index),
                    Some(term.term.as_str()),
                    "{prompt} -> {rewritten}"
                );
            }
        }
    }

    #[test]
    fn strip_all_leaves_no_terms() {
        let prompt = "tall muscular man with a beard, short curly black hair and blue eyes, cinematic";
        let cleaned = strip_all(TermCatalog::builtin(), prompt, None);
        assert!(detect(&cleaned).is_empty(), "{cleaned}");
        assert!(cleaned.contains("cinematic"));
        assert_tidy(&cleaned);
    }

    #[test]
    fn strip_all_respects_category_filter() {
        let prompt = "Asian woman with long brown hair";
        let cleaned = strip_all(TermCatalog::builtin(), prompt, Some(&[TermCategory::Hair]));
        assert_eq!(cleaned, "Asian woman");
    }
}
