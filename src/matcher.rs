//! Fuzzy duplicate detection against the program catalog.
//!
//! Each candidate is compared with every active catalog program. Name and
//! agency similarity are token-based ratios built on normalized Levenshtein
//! distance (via `strsim`); the best of a token-sort and a token-set
//! comparison is used so that word order and extra qualifiers do not hide
//! an obvious duplicate.
//!
//! ```text
//! combined = (w_name × name + w_agency × agency) / (w_name + w_agency)
//! ```
//!
//! when both sides carry an agency, otherwise the name similarity alone.
//! Exact contact matches can raise the score: a shared website scores 1.0,
//! and a shared phone or email with a reasonably similar name scores at
//! least 0.90.

use std::collections::BTreeSet;

use crate::config::MatchingConfig;
use crate::models::{MatchClass, PartialRecord, Program};

/// Name similarity a contact match needs before it can boost the score.
const CONTACT_NAME_FLOOR: f64 = 0.70;
const CONTACT_MATCH_SCORE: f64 = 0.90;

/// Active catalog programs, loaded once per discovery run.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub programs: Vec<Program>,
}

impl CatalogSnapshot {
    pub fn new(programs: Vec<Program>) -> Self {
        Self { programs }
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

/// Best catalog match for one candidate.
#[derive(Debug, Clone)]
pub struct MatchResult<'a> {
    /// Set only for possible and probable duplicates.
    pub program: Option<&'a Program>,
    pub similarity: f64,
    pub class: MatchClass,
}

impl MatchResult<'_> {
    fn novel(similarity: f64) -> Self {
        Self {
            program: None,
            similarity,
            class: MatchClass::Novel,
        }
    }

    pub fn program_key(&self) -> Option<&str> {
        self.program.map(|p| p.program_key.as_str())
    }
}

pub fn find_best_match<'a>(
    candidate: &PartialRecord,
    catalog: &'a CatalogSnapshot,
    config: &MatchingConfig,
) -> MatchResult<'a> {
    let name = match candidate.name.as_deref().map(str::trim) {
        Some(n) if !n.is_empty() => n,
        _ => return MatchResult::novel(0.0),
    };

    let mut best: Option<(&Program, f64)> = None;
    for program in &catalog.programs {
        let score = score_program(name, candidate, program, config);
        let replace = match best {
            None => true,
            Some((current, best_score)) => {
                score > best_score
                    || (score == best_score && program.updated_at > current.updated_at)
            }
        };
        if replace {
            best = Some((program, score));
        }
    }

    let Some((program, similarity)) = best else {
        return MatchResult::novel(0.0);
    };

    let class = classify(similarity, config);
    if class == MatchClass::Novel {
        return MatchResult::novel(similarity);
    }
    MatchResult {
        program: Some(program),
        similarity,
        class,
    }
}

pub fn classify(similarity: f64, config: &MatchingConfig) -> MatchClass {
    if similarity >= config.probable_threshold {
        MatchClass::ProbableDuplicate
    } else if similarity >= config.possible_threshold {
        MatchClass::PossibleDuplicate
    } else {
        MatchClass::Novel
    }
}

fn score_program(
    name: &str,
    candidate: &PartialRecord,
    program: &Program,
    config: &MatchingConfig,
) -> f64 {
    if let (Some(a), Some(b)) = (non_blank(&candidate.website), non_blank(&program.website)) {
        if normalize_url(a) == normalize_url(b) {
            return 1.0;
        }
    }

    let name_sim = text_similarity(name, &program.name);

    let mut score = match (non_blank(&candidate.agency), non_blank(&program.agency)) {
        (Some(a), Some(b)) => {
            let agency_sim = text_similarity(a, b);
            (config.name_weight * name_sim + config.agency_weight * agency_sim)
                / (config.name_weight + config.agency_weight)
        }
        _ => name_sim,
    };

    if name_sim >= CONTACT_NAME_FLOOR && contact_matches(candidate, program) {
        score = score.max(CONTACT_MATCH_SCORE);
    }

    score.clamp(0.0, 1.0)
}

fn contact_matches(candidate: &PartialRecord, program: &Program) -> bool {
    let phone = match (non_blank(&candidate.phone), non_blank(&program.phone)) {
        (Some(a), Some(b)) => {
            let (a, b) = (digits(a), digits(b));
            !a.is_empty() && a == b
        }
        _ => false,
    };
    let email = match (non_blank(&candidate.email), non_blank(&program.email)) {
        (Some(a), Some(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        _ => false,
    };
    phone || email
}

/// Case-insensitive similarity of two phrases in `[0, 1]`.
///
/// Two empty phrases score 0, not 1: absence of text is not agreement.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    token_sort_ratio(&ta, &tb).max(token_set_ratio(&ta, &tb))
}

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn token_sort_ratio(a: &[String], b: &[String]) -> f64 {
    let mut sa = a.to_vec();
    let mut sb = b.to_vec();
    sa.sort();
    sb.sort();
    strsim::normalized_levenshtein(&sa.join(" "), &sb.join(" "))
}

fn token_set_ratio(a: &[String], b: &[String]) -> f64 {
    let set_a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let set_b: BTreeSet<&str> = b.iter().map(String::as_str).collect();

    let common: Vec<&str> = set_a.intersection(&set_b).copied().collect();
    let only_a: Vec<&str> = set_a.difference(&set_b).copied().collect();
    let only_b: Vec<&str> = set_b.difference(&set_a).copied().collect();

    let base = common.join(" ");
    let with = |rest: &[&str]| {
        if rest.is_empty() {
            base.clone()
        } else if base.is_empty() {
            rest.join(" ")
        } else {
            format!("{} {}", base, rest.join(" "))
        }
    };
    let full_a = with(&only_a);
    let full_b = with(&only_b);

    let mut best = strsim::normalized_levenshtein(&full_a, &full_b);
    if !base.is_empty() {
        best = best
            .max(strsim::normalized_levenshtein(&base, &full_a))
            .max(strsim::normalized_levenshtein(&base, &full_b));
    }
    best
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn digits(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn normalize_url(url: &str) -> String {
    let lower = url.trim().to_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    without_scheme
        .strip_prefix("www.")
        .unwrap_or(without_scheme)
        .trim_end_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ts_to_datetime;

    fn program(key: &str, name: &str, agency: Option<&str>, updated: i64) -> Program {
        Program {
            id: format!("id-{}", key),
            program_key: key.to_string(),
            name: name.to_string(),
            agency: agency.map(str::to_string),
            jurisdiction: None,
            menu_category: "GENERAL".to_string(),
            priority_rank: 50.0,
            max_benefit: None,
            status_or_deadline: None,
            phone: None,
            email: None,
            website: None,
            eligibility_summary: None,
            is_active: true,
            created_at: ts_to_datetime(updated),
            updated_at: ts_to_datetime(updated),
        }
    }

    fn candidate(name: &str, agency: Option<&str>) -> PartialRecord {
        PartialRecord {
            name: Some(name.to_string()),
            agency: agency.map(str::to_string),
            ..Default::default()
        }
    }

    fn cfg() -> MatchingConfig {
        MatchingConfig::default()
    }

    #[test]
    fn test_identical_name_and_agency_is_exact() {
        let catalog = CatalogSnapshot::new(vec![program(
            "roof_repair",
            "Roof Repair Program",
            Some("Home HeadQuarters"),
            10,
        )]);
        let result = find_best_match(
            &candidate("roof repair program", Some("HOME HEADQUARTERS")),
            &catalog,
            &cfg(),
        );
        assert!((result.similarity - 1.0).abs() < 1e-9);
        assert_eq!(result.class, MatchClass::ProbableDuplicate);
        assert_eq!(result.program_key(), Some("roof_repair"));
    }

    #[test]
    fn test_empty_name_never_matches() {
        let catalog = CatalogSnapshot::new(vec![program("a", "Anything", None, 1)]);
        for name in [None, Some("".to_string()), Some("   ".to_string())] {
            let c = PartialRecord {
                name,
                website: Some("https://example.org".into()),
                ..Default::default()
            };
            let result = find_best_match(&c, &catalog, &cfg());
            assert_eq!(result.similarity, 0.0);
            assert_eq!(result.class, MatchClass::Novel);
            assert!(result.program.is_none());
        }
    }

    #[test]
    fn test_empty_catalog_is_novel() {
        let catalog = CatalogSnapshot::default();
        let result = find_best_match(
            &candidate("Lead Hazard Control", None),
            &catalog,
            &cfg(),
        );
        assert_eq!(result.class, MatchClass::Novel);
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn test_word_order_is_ignored() {
        let sim = text_similarity("Syracuse Roof Program", "Roof Program Syracuse");
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_extra_qualifiers_still_similar() {
        let sim = text_similarity(
            "Lead Hazard Control Program",
            "Onondaga County Lead Hazard Control Program",
        );
        assert!(sim >= 0.8, "got {}", sim);
    }

    #[test]
    fn test_unrelated_names_are_novel() {
        let catalog = CatalogSnapshot::new(vec![program(
            "first_home",
            "First Time Homebuyer Assistance",
            None,
            1,
        )]);
        let result = find_best_match(
            &candidate("Emergency Furnace Replacement", None),
            &catalog,
            &cfg(),
        );
        assert_eq!(result.class, MatchClass::Novel);
        assert!(result.program.is_none());
        assert!(result.similarity < 0.5);
    }

    #[test]
    fn test_agency_only_counts_when_both_present() {
        let catalog = CatalogSnapshot::new(vec![program(
            "roof",
            "Roof Repair Program",
            Some("Totally Different Agency"),
            1,
        )]);
        let without = find_best_match(&candidate("Roof Repair Program", None), &catalog, &cfg());
        assert!((without.similarity - 1.0).abs() < 1e-9);

        let with = find_best_match(
            &candidate("Roof Repair Program", Some("Home HeadQuarters")),
            &catalog,
            &cfg(),
        );
        assert!(with.similarity < 1.0);
    }

    #[test]
    fn test_tie_prefers_most_recently_updated() {
        let catalog = CatalogSnapshot::new(vec![
            program("older", "Weatherization Assistance", None, 100),
            program("newer", "Weatherization Assistance", None, 200),
            program("oldest", "Weatherization Assistance", None, 50),
        ]);
        let result = find_best_match(
            &candidate("Weatherization Assistance", None),
            &catalog,
            &cfg(),
        );
        assert_eq!(result.program_key(), Some("newer"));
    }

    #[test]
    fn test_website_match_is_exact() {
        let mut p = program("hhq", "Home Repair Loans", None, 1);
        p.website = Some("https://www.homehq.org/".into());
        let catalog = CatalogSnapshot::new(vec![p]);
        let c = PartialRecord {
            name: Some("Completely Different Title".into()),
            website: Some("http://homehq.org".into()),
            ..Default::default()
        };
        let result = find_best_match(&c, &catalog, &cfg());
        assert_eq!(result.similarity, 1.0);
        assert_eq!(result.class, MatchClass::ProbableDuplicate);
    }

    #[test]
    fn test_phone_match_raises_similar_names() {
        let mut p = program("emergency", "Emergency Home Repair Program", Some("City"), 1);
        p.phone = Some("(315) 555-1234".into());
        let catalog = CatalogSnapshot::new(vec![p]);

        let mut c = candidate("Emergency Home Repair Grants", Some("Unrelated Agency Name"));
        let before = find_best_match(&c, &catalog, &cfg()).similarity;
        c.phone = Some("315.555.1234".into());
        let after = find_best_match(&c, &catalog, &cfg()).similarity;
        assert!(after >= 0.9);
        assert!(after > before);
    }

    #[test]
    fn test_classification_thresholds() {
        let c = cfg();
        assert_eq!(classify(0.80, &c), MatchClass::ProbableDuplicate);
        assert_eq!(classify(0.79, &c), MatchClass::PossibleDuplicate);
        assert_eq!(classify(0.50, &c), MatchClass::PossibleDuplicate);
        assert_eq!(classify(0.49, &c), MatchClass::Novel);
    }
}
