use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;

use crate::error::ValidationError;
use crate::models::listing::NewListing;
use crate::sources::{RawListing, SalaryKind, Source};

/// Turns candidate records into persistable listings. The only hard
/// requirements are title and company name; everything else degrades to
/// None rather than dropping the record.
pub struct Validator {
    location_aliases: HashMap<&'static str, &'static str>,
}

impl Validator {
    pub fn new() -> Self {
        let location_aliases = HashMap::from([
            ("cbd", "Central Business District"),
            ("central business district", "Central Business District"),
            ("raffles place", "Raffles Place"),
            ("orchard", "Orchard Road"),
            ("one-north", "One-North"),
            ("one north", "One-North"),
            ("jurong east", "Jurong East"),
            ("tampines", "Tampines"),
            ("changi", "Changi"),
            ("islandwide", "Singapore"),
            ("sg", "Singapore"),
            ("singapore", "Singapore"),
            ("wfh", "Remote"),
            ("work from home", "Remote"),
            ("remote", "Remote"),
        ]);
        Validator { location_aliases }
    }

    pub fn validate(
        &self,
        source: Source,
        salary_kind: SalaryKind,
        raw: RawListing,
        now: DateTime<Utc>,
    ) -> Result<NewListing, ValidationError> {
        let title = required(&raw.title).ok_or(ValidationError::MissingTitle)?;
        let company_name = required(&raw.company_name).ok_or(ValidationError::MissingCompany)?;

        let (salary_min, salary_max) = match (raw.salary_min, raw.salary_max) {
            (None, None) => raw
                .salary_text
                .as_deref()
                .map(parse_salary)
                .unwrap_or((None, None)),
            pair => ordered(pair),
        };
        let salary_currency = raw
            .salary_currency
            .clone()
            .or_else(|| raw.salary_text.as_deref().and_then(detect_currency));

        Ok(NewListing {
            source,
            source_job_id: raw.source_job_id,
            title,
            company_name,
            has_salary_data: salary_min.is_some() || salary_max.is_some(),
            salary_min,
            salary_max,
            salary_currency,
            salary_type: salary_kind,
            location: raw.location.as_deref().map(|l| self.normalize_location(l)),
            employment_type: raw.employment_type,
            seniority_level: raw.seniority_level,
            skills: normalize_set(raw.skills),
            benefits: normalize_set(raw.benefits),
            posted_at: raw
                .posted_text
                .as_deref()
                .and_then(|t| resolve_posted_at(t, now)),
            detail_url: raw.detail_url,
        })
    }

    /// Canonical area name where the alias table knows one; the raw string
    /// otherwise. Unmapped locations are never an error.
    pub fn normalize_location(&self, raw: &str) -> String {
        let key = raw.trim().to_lowercase();
        match self.location_aliases.get(key.as_str()) {
            Some(canonical) => (*canonical).to_string(),
            None => raw.trim().to_string(),
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

fn required(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn ordered(pair: (Option<i64>, Option<i64>)) -> (Option<i64>, Option<i64>) {
    match pair {
        (Some(a), Some(b)) if a > b => (Some(b), Some(a)),
        other => other,
    }
}

/// Sets come in as whatever the page listed; store them trimmed, sorted
/// and unique.
fn normalize_set(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn salary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d[\d,]*(?:\.\d+)?)\s*([kK])?").unwrap())
}

/// Parse free-form salary text. Ranges give (min, max), a single figure is
/// duplicated into both ends, `K` suffixes expand a thousandfold, and
/// anything unparsable ("Competitive") yields (None, None) rather than
/// failing the record.
pub fn parse_salary(text: &str) -> (Option<i64>, Option<i64>) {
    let mut values: Vec<i64> = Vec::with_capacity(2);
    for cap in salary_re().captures_iter(text) {
        let digits = cap[1].replace(',', "");
        let Ok(mut value) = digits.parse::<f64>() else {
            continue;
        };
        if cap.get(2).is_some() {
            value *= 1000.0;
        }
        values.push(value as i64);
        if values.len() == 2 {
            break;
        }
    }
    match values[..] {
        [] => (None, None),
        [v] => (Some(v), Some(v)),
        [a, b, ..] => (Some(a.min(b)), Some(a.max(b))),
    }
}

fn detect_currency(text: &str) -> Option<String> {
    let t = text.to_uppercase();
    if t.contains("S$") || t.contains("SGD") {
        Some("SGD".to_string())
    } else if t.contains('€') || t.contains("EUR") {
        Some("EUR".to_string())
    } else if t.contains('£') || t.contains("GBP") {
        Some("GBP".to_string())
    } else if t.contains('$') {
        Some("USD".to_string())
    } else {
        None
    }
}

fn relative_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d+)\s*(minute|hour|day|week|month)s?\s+ago").unwrap())
}

fn compact_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Glassdoor-style ages: "24h", "3d", "2w", "30d+".
    RE.get_or_init(|| Regex::new(r"(?i)^\s*(\d+)\s*([hdw])\+?\s*$").unwrap())
}

/// Resolve possibly-relative posted-date text against an explicit `now`.
/// Never reads the system clock; unmappable text resolves to None instead
/// of a guess.
pub fn resolve_posted_at(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let t = text.trim().to_lowercase();
    if t.is_empty() {
        return None;
    }
    if t == "today" || t.contains("just posted") || t == "new" {
        return Some(now);
    }
    if t.contains("yesterday") {
        return Some(now - Duration::days(1));
    }
    if let Some(cap) = compact_re().captures(&t) {
        let n: i64 = cap[1].parse().ok()?;
        return match &cap[2] {
            "h" => Some(now - Duration::hours(n)),
            "w" => Some(now - Duration::weeks(n)),
            _ => Some(now - Duration::days(n)),
        };
    }
    if let Some(cap) = relative_re().captures(&t) {
        let n: i64 = cap[1].parse().ok()?;
        return match cap[2].to_lowercase().as_str() {
            "minute" => Some(now - Duration::minutes(n)),
            "hour" => Some(now - Duration::hours(n)),
            "day" => Some(now - Duration::days(n)),
            "week" => Some(now - Duration::weeks(n)),
            // Close enough for listing ages; sources only say "2 months ago".
            "month" => Some(now - Duration::days(30 * n)),
            _ => None,
        };
    }
    if let Ok(date) = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    None
}
