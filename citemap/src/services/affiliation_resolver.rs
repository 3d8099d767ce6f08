//! Citing-author affiliation resolution
//!
//! Two policies, selected once per run:
//! - **Aggressive**: clean each free-text affiliation line with an ordered
//!   list of pattern rules and keep what survives as the organization name.
//!   Falls back to the verified organization when no line survives.
//! - **Conservative**: only an organization backed by a confirmed email
//!   domain is accepted; anything else resolves to `None`.
//!
//! Pure and deterministic: no network, no randomness.

use crate::models::{Author, CitationDataset, ResolvedAffiliation};
use crate::utils::countries::{is_country, split_country_aware};
use citemap_common::AffiliationPolicy;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// One cleanup step: every match of `pattern` is replaced by `replacement`
pub struct CleanupRule {
    pub name: &'static str,
    pub pattern: Regex,
    pub replacement: &'static str,
}

impl CleanupRule {
    fn new(name: &'static str, pattern: &str, replacement: &'static str) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).expect("static cleanup rule is valid"),
            replacement,
        }
    }

    pub fn apply(&self, text: &str) -> String {
        self.pattern.replace_all(text, self.replacement).into_owned()
    }
}

/// Aggressive-policy cleanup rules, applied in order
pub static CLEANUP_RULES: Lazy<Vec<CleanupRule>> = Lazy::new(|| {
    vec![
        CleanupRule::new("email_address", r"[\w.+-]+@[\w-]+(?:\.[\w-]+)+", ""),
        CleanupRule::new("parenthetical", r"\s*\([^)]*\)", ""),
        // "Assistant Professor at X", "PhD Student @ X"
        CleanupRule::new(
            "role_before_at",
            r"(?i)^[^,;@]*?\b(?:professor|prof\.?|lecturer|student|postdoc|post-doc|researcher|fellow|scientist|engineer|director|candidate|ph\.?\s?d\.?|doctor|manager|chair|dean|intern)\b[^,;@]*?(?:\s+at\s+|\s*@\s*)",
            "",
        ),
        // "Postdoc, X", "Associate Professor - X"
        CleanupRule::new(
            "role_before_comma",
            r"(?i)^\s*(?:(?:assistant|associate|full|visiting|adjunct|emeritus|senior|junior|principal|chief|research|postdoctoral|distinguished|lead|staff)\s+)*(?:professor|prof\.?|lecturer|postdoc|post-doc|researcher|research fellow|fellow|scientist|engineer|phd student|ph\.d\. student|phd candidate|doctoral student|graduate student|student|director|manager|chair)\s*[,\-]\s*",
            "",
        ),
        CleanupRule::new("collapse_whitespace", r"\s+", " "),
        CleanupRule::new("edge_punctuation", r"^[\s,;:\-]+|[\s,;:\-.]+$", ""),
    ]
});

/// Segments naming a person's role or sub-unit rather than an institution
static IDENTITY_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:director|manager|chair|engineer|programmer|scientist|professor|lecturer|ph\.?\s?d|postdoc|doctor|student|researcher)\b|\bdepartment of\b|\bdept\.? of\b",
    )
    .expect("static regex is valid")
});

/// Separators between independent affiliations on one line
static AFFILIATION_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[;|]").expect("static regex is valid"));

/// True when `text` names a role or sub-unit ("PhD student", "Department of X")
pub fn is_role_phrase(text: &str) -> bool {
    IDENTITY_SEGMENT.is_match(text)
}

/// Run every cleanup rule over `text`
pub fn apply_cleanup_rules(text: &str) -> String {
    CLEANUP_RULES
        .iter()
        .fold(text.to_string(), |acc, rule| rule.apply(&acc))
}

/// Institution names extracted from one raw affiliation line, in order
pub fn candidate_names(raw: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    for part in AFFILIATION_SEPARATOR.split(raw) {
        let cleaned = apply_cleanup_rules(part);
        let kept: Vec<String> = split_country_aware(&cleaned, ",")
            .into_iter()
            .filter(|segment| !is_role_phrase(segment) && !is_country(segment))
            .collect();
        if kept.is_empty() {
            continue;
        }
        let candidate = kept.join(", ");
        if candidate.chars().filter(|c| c.is_alphabetic()).count() >= 2
            && !candidates.contains(&candidate)
        {
            candidates.push(candidate);
        }
    }
    candidates
}

/// Resolve one author's affiliation under `policy`
///
/// `resolved_name = None` is the "nothing found" outcome, never an error.
/// Whenever the conservative policy resolves an author, the aggressive
/// policy does too.
pub fn resolve(author: &Author, policy: AffiliationPolicy) -> ResolvedAffiliation {
    let resolved_name = match policy {
        AffiliationPolicy::Conservative => author.verified_organization().map(String::from),
        AffiliationPolicy::Aggressive => author
            .raw_affiliation_strings
            .iter()
            .flat_map(|raw| candidate_names(raw))
            .next()
            .or_else(|| author.verified_organization().map(String::from)),
    };

    ResolvedAffiliation {
        author: author.display_name.clone(),
        resolved_name,
        policy,
    }
}

/// Resolve every author in the dataset, keyed by display name
pub fn resolve_all(
    dataset: &CitationDataset,
    policy: AffiliationPolicy,
) -> BTreeMap<String, ResolvedAffiliation> {
    dataset
        .authors()
        .map(|author| (author.display_name.clone(), resolve(author, policy)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str) -> &'static CleanupRule {
        CLEANUP_RULES
            .iter()
            .find(|r| r.name == name)
            .unwrap_or_else(|| panic!("no rule named {}", name))
    }

    fn author_with(raw: &[&str]) -> Author {
        let mut author = Author::new("Ada");
        author.raw_affiliation_strings = raw.iter().map(|s| s.to_string()).collect();
        author
    }

    #[test]
    fn test_rule_email_address() {
        assert_eq!(rule("email_address").apply("MIT ada@mit.edu"), "MIT ");
    }

    #[test]
    fn test_rule_parenthetical() {
        assert_eq!(rule("parenthetical").apply("Yale University (formerly MIT)"), "Yale University");
    }

    #[test]
    fn test_rule_role_before_at() {
        let r = rule("role_before_at");
        assert_eq!(r.apply("Assistant Professor at Yale University"), "Yale University");
        assert_eq!(r.apply("PhD Student @ MIT"), "MIT");
        assert_eq!(r.apply("PhD Student@MIT"), "MIT");
        assert_eq!(
            r.apply("Professor of Physics at University at Buffalo"),
            "University at Buffalo"
        );
        assert_eq!(r.apply("University at Buffalo"), "University at Buffalo");
        assert_eq!(
            r.apply("Doctoral School at Sorbonne"),
            "Doctoral School at Sorbonne"
        );
    }

    #[test]
    fn test_role_words_match_whole_words_only() {
        assert!(is_role_phrase("Software Engineer"));
        assert!(is_role_phrase("Ph.D. candidate"));
        assert!(is_role_phrase("Dept. of Physics"));
        assert!(!is_role_phrase("Harbin Engineering University"));
        assert!(!is_role_phrase("Doctoral School of Sciences"));
        assert!(!is_role_phrase("Chairs of Excellence Institute"));
    }

    #[test]
    fn test_rule_role_before_comma() {
        let r = rule("role_before_comma");
        assert_eq!(r.apply("Postdoc, Stanford University"), "Stanford University");
        assert_eq!(r.apply("Associate Professor - ETH Zurich"), "ETH Zurich");
        assert_eq!(r.apply("Stanford University, Postdoc"), "Stanford University, Postdoc");
    }

    #[test]
    fn test_rule_edge_punctuation() {
        assert_eq!(rule("edge_punctuation").apply(" , MIT. "), "MIT");
    }

    #[test]
    fn test_candidate_names_drop_identity_segments() {
        assert_eq!(
            candidate_names("Professor of Computer Science, Yale University"),
            vec!["Yale University"]
        );
        assert_eq!(
            candidate_names("Department of Physics, MIT"),
            vec!["MIT"]
        );
        assert_eq!(
            candidate_names("Tsinghua University, Beijing, China"),
            vec!["Tsinghua University, Beijing, China"]
        );
        assert_eq!(
            candidate_names("Doctoral School of Sciences, Sorbonne"),
            vec!["Doctoral School of Sciences, Sorbonne"]
        );
        assert!(candidate_names("PhD Student").is_empty());
        assert!(candidate_names("USA").is_empty());
    }

    #[test]
    fn test_candidate_names_split_multiple_affiliations() {
        assert_eq!(
            candidate_names("Google Research; Stanford University"),
            vec!["Google Research", "Stanford University"]
        );
    }

    #[test]
    fn test_aggressive_resolves_free_text() {
        let author = author_with(&["Assistant Professor at Yale University"]);
        let resolved = resolve(&author, AffiliationPolicy::Aggressive);
        assert_eq!(resolved.resolved_name.as_deref(), Some("Yale University"));
        assert_eq!(resolved.policy, AffiliationPolicy::Aggressive);
        assert_eq!(resolved.author, "Ada");
    }

    #[test]
    fn test_aggressive_keeps_institution_named_after_a_field() {
        let author = author_with(&["Harbin Engineering University"]);
        let resolved = resolve(&author, AffiliationPolicy::Aggressive);
        assert_eq!(
            resolved.resolved_name.as_deref(),
            Some("Harbin Engineering University")
        );
    }

    #[test]
    fn test_aggressive_falls_back_to_verified_organization() {
        let mut author = author_with(&["Student"]);
        author.verified_organization = Some("Yale University".to_string());
        author.verified_email_domain = Some("yale.edu".to_string());

        let resolved = resolve(&author, AffiliationPolicy::Aggressive);
        assert_eq!(resolved.resolved_name.as_deref(), Some("Yale University"));
    }

    #[test]
    fn test_conservative_requires_verification() {
        let mut author = author_with(&["PhD Student @ MIT"]);
        assert_eq!(resolve(&author, AffiliationPolicy::Conservative).resolved_name, None);

        author.verified_organization = Some("Massachusetts Institute of Technology".to_string());
        assert_eq!(resolve(&author, AffiliationPolicy::Conservative).resolved_name, None);

        author.verified_email_domain = Some("mit.edu".to_string());
        assert_eq!(
            resolve(&author, AffiliationPolicy::Conservative)
                .resolved_name
                .as_deref(),
            Some("Massachusetts Institute of Technology")
        );
    }

    #[test]
    fn test_no_affiliation_is_none_not_error() {
        let author = Author::new("Nobody");
        assert_eq!(resolve(&author, AffiliationPolicy::Aggressive).resolved_name, None);
        assert_eq!(resolve(&author, AffiliationPolicy::Conservative).resolved_name, None);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let author = author_with(&["Postdoc, Stanford University", "MIT"]);
        let first = resolve(&author, AffiliationPolicy::Aggressive);
        let second = resolve(&author, AffiliationPolicy::Aggressive);
        assert_eq!(first, second);
        assert_eq!(first.resolved_name.as_deref(), Some("Stanford University"));
    }
}
