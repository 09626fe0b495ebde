//! Field extraction from raw listings.
//!
//! Feeds deliver a title and a free-text description; the extractor pulls
//! recognizable fields out of that text with regular expressions. Sources
//! that deliver structured fields (the JSON API, JSON feed files) supply
//! them in [`RawListing::fields`], which always win over pattern matches.
//!
//! The result is an [`Extracted`] value: the populated [`PartialRecord`]
//! plus the explicit set of expected fields that could not be recovered,
//! which the confidence scorer consumes.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{Extracted, PartialRecord, RawListing};

/// Descriptions shorter than this are not useful as an eligibility summary.
const MIN_ELIGIBILITY_CHARS: usize = 100;
const MAX_ELIGIBILITY_CHARS: usize = 500;
const MAX_DEADLINE_CHARS: usize = 100;
const MAX_AGENCY_CHARS: usize = 100;

static BENEFIT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(?:up to|maximum of|max|grant of)\s*\$\s*([\d,]+)",
        r"(?i)\$\s*([\d,]+)\s*(?:grant|assistance|benefit)",
        r"\$\s*([\d,]+(?:\s*-\s*\$?\s*[\d,]+)?)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid benefit regex"))
    .collect()
});

static NUMERIC_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2}[/-]\d{1,2}[/-]\d{4})\b").expect("valid date regex"));

static MONTH_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(January|February|March|April|May|June|July|August|September|October|November|December|Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)\.?\s+(\d{1,2}),?\s+(\d{4})\b",
    )
    .expect("valid month date regex")
});

static DEADLINE_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:deadline|due|closes|close date|application period ends):\s*([^\n.]+)")
        .expect("valid deadline keyword regex")
});

static PHONE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\((\d{3})\)\s*(\d{3})-(\d{4})",
        r"\b(\d{3})-(\d{3})-(\d{4})\b",
        r"\b(\d{3})\.(\d{3})\.(\d{4})\b",
        r"\b(\d{3})\s+(\d{3})\s+(\d{4})\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid phone regex"))
    .collect()
});

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("valid email regex")
});

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("valid url regex"));

static AGENCY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(?:administered by|offered by|provided by)\s+(?:the\s+)?([^.\n]+?)(?:[.\n]|$)",
        r"(?i)\b((?:Department|Office) of [^.\n]+?)(?:[.,\n]|$)",
        r"\b(HUD|USDA|NYSERDA|HCR)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid agency regex"))
    .collect()
});

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid html tag regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Menu categories checked in order; the first keyword hit wins.
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "URGENT SAFETY",
        &["emergency", "urgent", "safety", "structural", "hazard", "dangerous"],
    ),
    (
        "HEALTH HAZARDS",
        &["lead", "asbestos", "mold", "health", "toxic", "contamination"],
    ),
    (
        "AGING IN PLACE",
        &["senior", "elderly", "aging", "accessibility", "ada", "disabled", "mobility"],
    ),
    (
        "ENERGY & BILLS",
        &[
            "energy",
            "weatherization",
            "efficiency",
            "insulation",
            "heating",
            "utility",
            "bills",
            "hvac",
        ],
    ),
    (
        "HISTORIC RESTORATION",
        &["historic", "heritage", "preservation", "restoration", "landmark"],
    ),
    (
        "BUYING HELP",
        &["purchase", "down payment", "first-time", "homebuyer", "acquisition", "ownership"],
    ),
];

pub const DEFAULT_CATEGORY: &str = "GENERAL";

/// Extracts a normalized record from a raw listing.
pub fn extract(listing: &RawListing) -> Extracted {
    let description = strip_html(&listing.description);
    let title = strip_html(&listing.title);
    let text = format!("{} {}", title, description);

    let structured = |key: &str| {
        listing
            .fields
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let name = structured("name").or_else(|| Some(title.clone()).filter(|t| !t.is_empty()));

    let eligibility = structured("eligibility").or_else(|| {
        (description.chars().count() > MIN_ELIGIBILITY_CHARS)
            .then(|| truncate_chars(&description, MAX_ELIGIBILITY_CHARS))
    });

    let fields = PartialRecord {
        name,
        agency: structured("agency").or_else(|| extract_agency(&text)),
        max_benefit: structured("max_benefit").or_else(|| extract_benefit_amount(&text)),
        deadline: structured("deadline")
            .or_else(|| extract_deadline(&format!("{} {}", description, title))),
        eligibility,
        phone: structured("phone").or_else(|| extract_phone(&description)),
        email: structured("email")
            .map(|e| e.to_lowercase())
            .or_else(|| extract_email(&description)),
        website: structured("website").or_else(|| extract_website(&description)),
        jurisdiction: structured("jurisdiction").or_else(|| classify_jurisdiction(&text)),
        menu_category: structured("menu_category")
            .or_else(|| Some(classify_category(&text).to_string())),
    };

    Extracted::from_fields(fields)
}

/// Removes markup and collapses whitespace.
pub fn strip_html(text: &str) -> String {
    let without_tags = HTML_TAG.replace_all(text, " ");
    WHITESPACE
        .replace_all(&without_tags, " ")
        .trim()
        .to_string()
}

pub fn extract_benefit_amount(text: &str) -> Option<String> {
    BENEFIT_PATTERNS
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| format!("${}", m.as_str().trim()))
}

pub fn extract_deadline(text: &str) -> Option<String> {
    if let Some(caps) = NUMERIC_DATE.captures(text) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }
    if let Some(caps) = MONTH_DATE.captures(text) {
        return Some(format!("{} {}, {}", &caps[1], &caps[2], &caps[3]));
    }
    DEADLINE_KEYWORD
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| truncate_chars(m.as_str().trim(), MAX_DEADLINE_CHARS))
        .filter(|d| !d.is_empty())
}

/// Normalizes to `(315) 555-1234`.
pub fn extract_phone(text: &str) -> Option<String> {
    PHONE_PATTERNS
        .iter()
        .find_map(|re| re.captures(text))
        .map(|caps| format!("({}) {}-{}", &caps[1], &caps[2], &caps[3]))
}

pub fn extract_email(text: &str) -> Option<String> {
    EMAIL.find(text).map(|m| m.as_str().to_lowercase())
}

pub fn extract_website(text: &str) -> Option<String> {
    URL.find(text).map(|m| {
        m.as_str()
            .trim_end_matches(['.', ',', ')', ';', ':'])
            .to_string()
    })
}

pub fn extract_agency(text: &str) -> Option<String> {
    AGENCY_PATTERNS
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|a| !a.is_empty() && a.chars().count() < MAX_AGENCY_CHARS)
}

pub fn classify_jurisdiction(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let jurisdiction = if lower.contains("syracuse") {
        "City of Syracuse"
    } else if lower.contains("onondaga") {
        "Onondaga County"
    } else if ["new york state", "nys", "ny state"]
        .iter()
        .any(|k| lower.contains(k))
    {
        "New York State"
    } else if ["federal", "hud", "usda", "national"]
        .iter()
        .any(|k| lower.contains(k))
    {
        "Federal"
    } else {
        return None;
    };
    Some(jurisdiction.to_string())
}

pub fn classify_category(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(DEFAULT_CATEGORY)
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
