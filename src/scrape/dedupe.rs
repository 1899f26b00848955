use std::collections::HashMap;

use crate::models::listing::NewListing;
use crate::sources::Source;

/// Collapse records sharing a natural key within one batch. Last seen wins
/// for mutable fields; first-seen order is preserved. Stateless across
/// runs: cross-run collapsing is the upsert's job.
pub fn dedupe(records: Vec<NewListing>) -> Vec<NewListing> {
    let mut index: HashMap<(Source, String), usize> = HashMap::with_capacity(records.len());
    let mut out: Vec<NewListing> = Vec::with_capacity(records.len());

    for record in records {
        let key = (record.source, record.source_job_id.clone());
        match index.get(&key) {
            Some(&slot) => out[slot] = record,
            None => {
                index.insert(key, out.len());
                out.push(record);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SalaryKind;

    fn listing(id: &str, salary_max: Option<i64>) -> NewListing {
        NewListing {
            source: Source::Mcf,
            source_job_id: id.to_string(),
            title: "Engineer".to_string(),
            company_name: "Acme".to_string(),
            salary_min: None,
            salary_max,
            salary_currency: None,
            salary_type: SalaryKind::Actual,
            has_salary_data: salary_max.is_some(),
            location: None,
            employment_type: None,
            seniority_level: None,
            skills: Vec::new(),
            benefits: Vec::new(),
            posted_at: None,
            detail_url: None,
        }
    }

    #[test]
    fn same_key_collapses_to_the_later_record() {
        let out = dedupe(vec![listing("a", Some(7000)), listing("a", Some(9000))]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].salary_max, Some(9000));
    }

    #[test]
    fn distinct_keys_survive_in_order() {
        let out = dedupe(vec![listing("a", None), listing("b", None), listing("a", Some(1))]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].source_job_id, "a");
        assert_eq!(out[0].salary_max, Some(1));
        assert_eq!(out[1].source_job_id, "b");
    }

    #[test]
    fn cross_source_ids_do_not_collide() {
        let mut other = listing("a", None);
        other.source = Source::Glassdoor;
        let out = dedupe(vec![listing("a", None), other]);
        assert_eq!(out.len(), 2);
    }
}
