use async_trait::async_trait;
use serde_json::Value;

use crate::error::ScrapeError;
use crate::scrape::fetcher::FetchedPage;
use crate::sources::{
    DetailFields, Pace, RawListing, SalaryKind, SearchQuery, Source, SourceAdapter, SourceProfile,
};

const API_BASE: &str = "https://api.mycareersfuture.gov.sg/v2";
const PAGE_SIZE: u32 = 20;

/// MyCareersFuture: open JSON search API, employer-listed salaries. No
/// session required.
pub struct McfAdapter;

#[async_trait]
impl SourceAdapter for McfAdapter {
    fn source(&self) -> Source {
        Source::Mcf
    }

    fn profile(&self) -> SourceProfile {
        SourceProfile {
            pace: Pace::Pagination,
            default_page_limit: 10,
            requires_auth: false,
        }
    }

    fn salary_kind(&self) -> SalaryKind {
        SalaryKind::Actual
    }

    fn search_url(&self, query: &SearchQuery, page: u32) -> String {
        let qs = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("search", &query.keywords)
            .append_pair("limit", &PAGE_SIZE.to_string())
            .append_pair("page", &page.to_string())
            .finish();
        format!("{API_BASE}/jobs?{qs}")
    }

    fn extract_listings(&self, page: &FetchedPage) -> Result<Vec<RawListing>, ScrapeError> {
        let data: Value = serde_json::from_str(&page.body).map_err(|_| {
            ScrapeError::StructuralExtraction { url: page.url.clone() }
        })?;
        let results = data
            .get("results")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ScrapeError::StructuralExtraction { url: page.url.clone() })?;

        let records: Vec<RawListing> = results.iter().filter_map(parse_result).collect();
        if records.is_empty() && !results.is_empty() {
            // The result array is populated but nothing in it was keyable:
            // the response schema has shifted under us.
            return Err(ScrapeError::StructuralExtraction { url: page.url.clone() });
        }
        Ok(records)
    }

    fn has_next_page(&self, page: &FetchedPage, page_index: u32) -> bool {
        let total = serde_json::from_str::<Value>(&page.body)
            .ok()
            .and_then(|data| data.get("total").and_then(|v| v.as_u64()))
            .unwrap_or(0);
        u64::from((page_index + 1) * PAGE_SIZE) < total
    }

    fn detail_url(&self, raw: &RawListing) -> Option<String> {
        raw.detail_url.clone()
    }

    fn extract_detail(&self, page: &FetchedPage) -> DetailFields {
        let Ok(data) = serde_json::from_str::<Value>(&page.body) else {
            return DetailFields::default();
        };
        DetailFields {
            description: data
                .get("description")
                .and_then(|v| v.as_str())
                .map(String::from),
            requirements: data
                .get("otherRequirements")
                .and_then(|v| v.as_str())
                .map(String::from),
        }
    }
}

/// Parse one search result. Records without a uuid cannot be keyed and are
/// skipped; every other missing field is carried as None.
fn parse_result(raw: &Value) -> Option<RawListing> {
    let Some(uuid) = raw.get("uuid").and_then(|v| v.as_str()) else {
        tracing::warn!("mcf result without uuid, skipping record");
        return None;
    };

    let title = raw.get("title").and_then(|v| v.as_str()).map(String::from);
    let company_name = raw
        .get("postedCompany")
        .and_then(|c| c.get("name"))
        .and_then(|v| v.as_str())
        .map(String::from);
    if title.is_none() || company_name.is_none() {
        tracing::debug!(uuid, "mcf result missing title or company");
    }

    let salary = raw.get("salary");
    let salary_min = salary
        .and_then(|s| s.get("minimum"))
        .and_then(|v| v.as_i64());
    let salary_max = salary
        .and_then(|s| s.get("maximum"))
        .and_then(|v| v.as_i64());

    let employment_type = raw
        .get("employmentTypes")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|e| e.get("employmentType"))
        .and_then(|v| v.as_str())
        .map(String::from);
    let seniority_level = raw
        .get("positionLevels")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|p| p.get("position"))
        .and_then(|v| v.as_str())
        .map(String::from);
    let skills = raw
        .get("skills")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|s| s.get("skill").and_then(|v| v.as_str()))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let location = raw
        .get("address")
        .and_then(|a| a.get("districts"))
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|d| d.get("region"))
        .and_then(|v| v.as_str())
        .map(String::from);

    let metadata = raw.get("metadata");
    let posted_text = metadata
        .and_then(|m| m.get("newPostingDate"))
        .and_then(|v| v.as_str())
        .map(String::from);
    let detail_url = metadata
        .and_then(|m| m.get("jobDetailsUrl"))
        .and_then(|v| v.as_str())
        .map(String::from)
        .or_else(|| Some(format!("{API_BASE}/jobs/{uuid}")));

    Some(RawListing {
        source_job_id: uuid.to_string(),
        title,
        company_name,
        location,
        salary_min,
        salary_max,
        salary_text: None,
        salary_currency: Some("SGD".to_string()),
        employment_type,
        seniority_level,
        skills,
        benefits: Vec::new(),
        posted_text,
        detail_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> FetchedPage {
        FetchedPage {
            url: "https://api.mycareersfuture.gov.sg/v2/jobs?search=engineer".to_string(),
            status: 200,
            body: body.to_string(),
        }
    }

    const FIXTURE: &str = r#"{
        "results": [
            {
                "uuid": "abc123",
                "title": "Software Engineer",
                "postedCompany": {"name": "Acme Pte Ltd"},
                "salary": {"minimum": 5000, "maximum": 7000, "type": {"salaryType": "Monthly"}},
                "employmentTypes": [{"employmentType": "Full Time"}],
                "positionLevels": [{"position": "Senior Executive"}],
                "skills": [{"skill": "Rust"}, {"skill": "SQL"}],
                "address": {"districts": [{"region": "CBD"}]},
                "metadata": {
                    "newPostingDate": "2026-07-30",
                    "jobDetailsUrl": "https://www.mycareersfuture.gov.sg/job/abc123"
                }
            },
            {
                "uuid": "def456",
                "title": "Data Analyst",
                "postedCompany": {"name": "Globex"}
            }
        ],
        "total": 45
    }"#;

    #[test]
    fn extracts_fully_populated_records() {
        let records = McfAdapter.extract_listings(&page(FIXTURE)).unwrap();
        assert_eq!(records.len(), 2);

        let r = &records[0];
        assert_eq!(r.source_job_id, "abc123");
        assert_eq!(r.title.as_deref(), Some("Software Engineer"));
        assert_eq!(r.company_name.as_deref(), Some("Acme Pte Ltd"));
        assert_eq!(r.salary_min, Some(5000));
        assert_eq!(r.salary_max, Some(7000));
        assert_eq!(r.location.as_deref(), Some("CBD"));
        assert_eq!(r.skills, vec!["Rust".to_string(), "SQL".to_string()]);
        assert_eq!(r.posted_text.as_deref(), Some("2026-07-30"));
    }

    #[test]
    fn missing_salary_keeps_the_record() {
        let records = McfAdapter.extract_listings(&page(FIXTURE)).unwrap();
        let r = &records[1];
        assert_eq!(r.source_job_id, "def456");
        assert_eq!(r.salary_min, None);
        assert_eq!(r.salary_max, None);
    }

    #[test]
    fn empty_result_set_is_not_structural() {
        let records = McfAdapter
            .extract_listings(&page(r#"{"results": [], "total": 0}"#))
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn non_json_body_is_structural() {
        let err = McfAdapter
            .extract_listings(&page("<html>maintenance</html>"))
            .unwrap_err();
        assert!(matches!(err, ScrapeError::StructuralExtraction { .. }));
    }

    #[test]
    fn missing_results_key_is_structural() {
        let err = McfAdapter
            .extract_listings(&page(r#"{"jobs": []}"#))
            .unwrap_err();
        assert!(matches!(err, ScrapeError::StructuralExtraction { .. }));
    }

    #[test]
    fn unkeyable_results_are_structural() {
        let body = r#"{"results": [{"title": "No id here"}], "total": 1}"#;
        let err = McfAdapter.extract_listings(&page(body)).unwrap_err();
        assert!(matches!(err, ScrapeError::StructuralExtraction { .. }));
    }

    #[test]
    fn pagination_follows_the_total_count() {
        let p = page(FIXTURE);
        assert!(McfAdapter.has_next_page(&p, 0));
        assert!(McfAdapter.has_next_page(&p, 1));
        assert!(!McfAdapter.has_next_page(&p, 2));
    }

    #[test]
    fn search_url_encodes_keywords() {
        let q = SearchQuery {
            keywords: "software engineer".to_string(),
            locations: Vec::new(),
            page_limit: None,
        };
        let url = McfAdapter.search_url(&q, 2);
        assert!(url.contains("search=software+engineer"));
        assert!(url.contains("page=2"));
    }

    #[test]
    fn detail_extraction_reads_description() {
        let body = r#"{"description": "<p>Build things</p>", "otherRequirements": "5 years Rust"}"#;
        let detail = McfAdapter.extract_detail(&page(body));
        assert_eq!(detail.description.as_deref(), Some("<p>Build things</p>"));
        assert_eq!(detail.requirements.as_deref(), Some("5 years Rust"));
    }
}
