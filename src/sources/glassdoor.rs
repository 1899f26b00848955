use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::EngineSettings;
use crate::error::ScrapeError;
use crate::scrape::fetcher::{FetchedPage, PageFetch};
use crate::sources::{
    DetailFields, Pace, RawListing, SalaryKind, SearchQuery, Source, SourceAdapter, SourceProfile,
};

const BASE_URL: &str = "https://www.glassdoor.com";
const LOGIN_URL: &str = "https://www.glassdoor.com/profile/ajax/loginAjax.htm";
const LOGOUT_URL: &str = "https://www.glassdoor.com/profile/logout.htm";

/// Glassdoor: server-rendered HTML listing pages behind a login wall.
/// Salaries are site estimates; the defense posture is tight, so this
/// adapter runs at the strict pace with shallow default pagination.
pub struct GlassdoorAdapter;

fn select_text(card: ElementRef<'_>, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    card.select(&sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn parse_card(card: ElementRef<'_>) -> Option<RawListing> {
    let Some(job_id) = card.value().attr("data-jobid") else {
        tracing::warn!("glassdoor card without data-jobid, skipping record");
        return None;
    };

    let title = select_text(card, r#"a[data-test="job-title"]"#);
    let company_name = select_text(card, r#"span[data-test="employer-name"]"#);
    if title.is_none() || company_name.is_none() {
        tracing::debug!(job_id, "glassdoor card missing title or employer");
    }

    let detail_url = Selector::parse(r#"a[data-test="job-title"]"#)
        .ok()
        .and_then(|sel| card.select(&sel).next())
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| Url::parse(BASE_URL).ok()?.join(href).ok())
        .map(|u| u.to_string());

    Some(RawListing {
        source_job_id: job_id.to_string(),
        title,
        company_name,
        location: select_text(card, r#"div[data-test="emp-location"]"#),
        salary_min: None,
        salary_max: None,
        salary_text: select_text(card, r#"span[data-test="detail-salary"]"#),
        salary_currency: None,
        employment_type: None,
        seniority_level: None,
        skills: Vec::new(),
        benefits: Vec::new(),
        posted_text: select_text(card, r#"div[data-test="job-age"]"#),
        detail_url,
    })
}

/// Recognizable empty states: the search ran but matched nothing.
fn is_no_results_page(doc: &Html, body: &str) -> bool {
    if let Ok(sel) = Selector::parse(r#"[data-test="no-results"]"#)
        && doc.select(&sel).next().is_some()
    {
        return true;
    }
    let lower = body.to_lowercase();
    lower.contains("no jobs found") || lower.contains("0 jobs")
}

#[async_trait]
impl SourceAdapter for GlassdoorAdapter {
    fn source(&self) -> Source {
        Source::Glassdoor
    }

    fn profile(&self) -> SourceProfile {
        SourceProfile {
            pace: Pace::Strict,
            default_page_limit: 5,
            requires_auth: true,
        }
    }

    fn salary_kind(&self) -> SalaryKind {
        SalaryKind::Estimated
    }

    fn search_url(&self, query: &SearchQuery, page: u32) -> String {
        let mut qs = url::form_urlencoded::Serializer::new(String::new());
        qs.append_pair("sc.keyword", &query.keywords);
        if let Some(location) = query.locations.first() {
            qs.append_pair("locKeyword", location);
        }
        qs.append_pair("p", &(page + 1).to_string());
        format!("{BASE_URL}/Job/jobs.htm?{}", qs.finish())
    }

    fn extract_listings(&self, page: &FetchedPage) -> Result<Vec<RawListing>, ScrapeError> {
        let doc = Html::parse_document(&page.body);
        let card_sel = Selector::parse(r#"li[data-test="jobListing"]"#)
            .map_err(|_| ScrapeError::StructuralExtraction { url: page.url.clone() })?;

        let records: Vec<RawListing> = doc.select(&card_sel).filter_map(parse_card).collect();
        if records.is_empty() && !page.body.trim().is_empty() && !is_no_results_page(&doc, &page.body)
        {
            return Err(ScrapeError::StructuralExtraction { url: page.url.clone() });
        }
        Ok(records)
    }

    fn has_next_page(&self, page: &FetchedPage, _page_index: u32) -> bool {
        let doc = Html::parse_document(&page.body);
        let Ok(sel) = Selector::parse(r#"button[data-test="pagination-next"]"#) else {
            return false;
        };
        doc.select(&sel)
            .next()
            .is_some_and(|btn| btn.value().attr("disabled").is_none())
    }

    fn detail_url(&self, raw: &RawListing) -> Option<String> {
        raw.detail_url.clone()
    }

    fn extract_detail(&self, page: &FetchedPage) -> DetailFields {
        let doc = Html::parse_document(&page.body);
        let root = doc.root_element();
        DetailFields {
            description: select_text(root, r#"div[data-test="jobDescriptionContent"]"#),
            requirements: select_text(root, r#"section[data-test="job-requirements"]"#),
        }
    }

    /// Log in once per run. The session lives in the fetcher's cookie jar
    /// and is explicitly discarded by `close_session` on every exit path.
    async fn open_session(
        &self,
        fetcher: &dyn PageFetch,
        settings: &EngineSettings,
    ) -> Result<(), ScrapeError> {
        let (Some(email), Some(password)) =
            (&settings.glassdoor_email, &settings.glassdoor_password)
        else {
            return Err(ScrapeError::Session(
                "glassdoor credentials not configured".to_string(),
            ));
        };

        let resp = fetcher
            .post_form(
                LOGIN_URL,
                &[("username", email.as_str()), ("password", password.as_str())],
            )
            .await?;
        let lower = resp.body.to_lowercase();
        if lower.contains("incorrect") || lower.contains("invalid credentials") {
            return Err(ScrapeError::Session("glassdoor login rejected".to_string()));
        }
        tracing::info!("glassdoor session opened");
        Ok(())
    }

    async fn close_session(&self, fetcher: &dyn PageFetch) {
        if let Err(e) = fetcher.fetch(LOGOUT_URL, Pace::Listing).await {
            tracing::debug!(error = %e, "glassdoor logout failed, discarding session anyway");
        }
        tracing::info!("glassdoor session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> FetchedPage {
        FetchedPage {
            url: "https://www.glassdoor.com/Job/jobs.htm?sc.keyword=engineer".to_string(),
            status: 200,
            body: body.to_string(),
        }
    }

    const FIXTURE: &str = r#"<html><body><ul>
        <li data-test="jobListing" data-jobid="gd-101">
            <a data-test="job-title" href="/partner/jobListing.htm?id=101">Backend Engineer</a>
            <span data-test="employer-name">Initech</span>
            <div data-test="emp-location">Singapore</div>
            <span data-test="detail-salary">$60K - $80K (Employer est.)</span>
            <div data-test="job-age">3d</div>
        </li>
        <li data-test="jobListing" data-jobid="gd-102">
            <a data-test="job-title" href="/partner/jobListing.htm?id=102">Site Reliability Engineer</a>
            <span data-test="employer-name">Hooli</span>
        </li>
    </ul>
    <button data-test="pagination-next"></button>
    </body></html>"#;

    #[test]
    fn extracts_cards_with_salary_bands() {
        let records = GlassdoorAdapter.extract_listings(&page(FIXTURE)).unwrap();
        assert_eq!(records.len(), 2);

        let r = &records[0];
        assert_eq!(r.source_job_id, "gd-101");
        assert_eq!(r.title.as_deref(), Some("Backend Engineer"));
        assert_eq!(r.company_name.as_deref(), Some("Initech"));
        assert_eq!(r.salary_text.as_deref(), Some("$60K - $80K (Employer est.)"));
        assert_eq!(r.posted_text.as_deref(), Some("3d"));
        assert!(r.detail_url.as_deref().unwrap().starts_with("https://www.glassdoor.com/"));
    }

    #[test]
    fn missing_salary_keeps_the_record() {
        let records = GlassdoorAdapter.extract_listings(&page(FIXTURE)).unwrap();
        let r = &records[1];
        assert_eq!(r.source_job_id, "gd-102");
        assert_eq!(r.salary_text, None);
        assert_eq!(r.location, None);
    }

    #[test]
    fn next_button_enables_pagination() {
        assert!(GlassdoorAdapter.has_next_page(&page(FIXTURE), 0));

        let last = r#"<html><body>
            <li data-test="jobListing" data-jobid="x"></li>
            <button data-test="pagination-next" disabled></button>
        </body></html>"#;
        assert!(!GlassdoorAdapter.has_next_page(&page(last), 0));
    }

    #[test]
    fn no_results_page_is_not_structural() {
        let body = r#"<html><body><div data-test="no-results">No jobs found for this search</div></body></html>"#;
        let records = GlassdoorAdapter.extract_listings(&page(body)).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn unrecognizable_markup_is_structural() {
        let body = "<html><body><h1>Welcome to our redesigned jobs experience!</h1></body></html>";
        let err = GlassdoorAdapter.extract_listings(&page(body)).unwrap_err();
        assert!(matches!(err, ScrapeError::StructuralExtraction { .. }));
    }

    #[test]
    fn cards_without_job_ids_are_skipped() {
        let body = r#"<html><body>
            <li data-test="jobListing" data-jobid="keep">
                <a data-test="job-title" href="/j/1">Kept</a>
                <span data-test="employer-name">A</span>
            </li>
            <li data-test="jobListing">
                <a data-test="job-title" href="/j/2">Dropped</a>
            </li>
        </body></html>"#;
        let records = GlassdoorAdapter.extract_listings(&page(body)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_job_id, "keep");
    }

    #[test]
    fn search_url_carries_keyword_location_and_page() {
        let q = SearchQuery {
            keywords: "data engineer".to_string(),
            locations: vec!["Singapore".to_string()],
            page_limit: None,
        };
        let url = GlassdoorAdapter.search_url(&q, 1);
        assert!(url.contains("sc.keyword=data+engineer"));
        assert!(url.contains("locKeyword=Singapore"));
        assert!(url.contains("p=2"));
    }
}
