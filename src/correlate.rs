//! Name-based matching between static test sites and reported test records.
//!
//! Two rules, tried in order over every candidate record:
//!
//! 1. the site name equals the record's `name`;
//! 2. the site name occurs inside the record's `full_name`.
//!
//! Within a rule, the first candidate in store order wins. Rule 1 is always
//! exhausted before rule 2 is considered, so an exact match later in the store
//! beats an earlier containment match.

use serde::Serialize;
use tracing::trace;

use crate::models::{FileCoverage, TestRecord, TestSite, TestStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchRule {
    ExactName,
    FullNameContains,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteMatch {
    pub test_id: String,
    pub status: TestStatus,
    pub duration: u64,
    pub rule: MatchRule,
    /// Coverage of the function sharing the site's name, when reported.
    pub coverage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelatedSite {
    pub site: TestSite,
    pub matched: Option<SiteMatch>,
}

impl CorrelatedSite {
    pub fn status(&self) -> Option<TestStatus> {
        self.matched.as_ref().map(|m| m.status)
    }
}

/// Match every site against `records`, which must be in store order and
/// already narrowed to the document's file.
pub fn correlate<'a>(
    sites: &[TestSite],
    records: impl IntoIterator<Item = &'a TestRecord>,
    coverage: Option<&FileCoverage>,
) -> Vec<CorrelatedSite> {
    let records: Vec<&TestRecord> = records.into_iter().collect();
    sites
        .iter()
        .map(|site| {
            let matched = find_match(site, &records).map(|(record, rule)| SiteMatch {
                test_id: record.id.clone(),
                status: record.status,
                duration: record.duration,
                rule,
                coverage: coverage
                    .and_then(|c| c.function_named(&site.name))
                    .map(|f| if f.covered { 100.0 } else { 0.0 }),
            });
            if matched.is_none() {
                trace!(site = %site.name, line = site.line, "no record for site");
            }
            CorrelatedSite {
                site: site.clone(),
                matched,
            }
        })
        .collect()
}

fn find_match<'a>(
    site: &TestSite,
    records: &[&'a TestRecord],
) -> Option<(&'a TestRecord, MatchRule)> {
    if let Some(&record) = records.iter().find(|r| r.name == site.name) {
        return Some((record, MatchRule::ExactName));
    }
    records
        .iter()
        .find(|r| r.full_name.contains(&site.name))
        .map(|record| (*record, MatchRule::FullNameContains))
}

/// Inline text shown next to a site, e.g. `✔ passed (12ms) · 100% covered`.
pub fn site_label(site: &CorrelatedSite) -> String {
    match &site.matched {
        None => "◌ not yet run".to_string(),
        Some(m) => {
            let mut label = format!("{} {}", m.status.icon(), m.status.label());
            if m.status.is_terminal() {
                label.push_str(&format!(" ({}ms)", m.duration));
            }
            if let Some(coverage) = m.coverage {
                label.push_str(&format!(" · {coverage:.0}% covered"));
            }
            label
        }
    }
}
