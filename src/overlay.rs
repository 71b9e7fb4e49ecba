//! Line coverage classification and the inline annotations built from it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::correlate::{CorrelatedSite, site_label};
use crate::models::{BranchHit, CoverageMetrics, FileCoverage, LineHit, MetricKind, Range};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoverageClass {
    Covered,
    Uncovered,
    PartiallyCovered,
}

/// Explanatory payload attached to a decorated line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "class", rename_all = "kebab-case")]
pub enum AnnotationDetail {
    Covered {
        hits: u64,
    },
    Uncovered {
        /// File offered to the generate-tests affordance.
        generate_for: PathBuf,
    },
    PartiallyCovered {
        taken: usize,
        total: usize,
        untaken: Vec<u32>,
    },
}

impl AnnotationDetail {
    pub fn class(&self) -> CoverageClass {
        match self {
            AnnotationDetail::Covered { .. } => CoverageClass::Covered,
            AnnotationDetail::Uncovered { .. } => CoverageClass::Uncovered,
            AnnotationDetail::PartiallyCovered { .. } => CoverageClass::PartiallyCovered,
        }
    }

    pub fn message(&self) -> String {
        match self {
            AnnotationDetail::Covered { hits } => {
                let times = if *hits == 1 { "time" } else { "times" };
                format!("Covered: executed {hits} {times}")
            }
            AnnotationDetail::Uncovered { .. } => {
                "Not executed by any test. Generate tests for this file?".to_string()
            }
            AnnotationDetail::PartiallyCovered {
                taken,
                total,
                untaken,
            } => {
                let list = untaken
                    .iter()
                    .map(|b| format!("#{b}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Partially covered: {taken}/{total} branches taken (untaken: {list})")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decoration {
    pub range: Range,
    pub detail: AnnotationDetail,
}

/// Decorations for one document, one list per class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecorationSet {
    pub covered: Vec<Decoration>,
    pub uncovered: Vec<Decoration>,
    pub partially_covered: Vec<Decoration>,
}

impl DecorationSet {
    pub fn len(&self) -> usize {
        self.covered.len() + self.uncovered.len() + self.partially_covered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The decoration on a 0-based line, if any.
    pub fn at_line(&self, line: u32) -> Option<&Decoration> {
        self.covered
            .iter()
            .chain(&self.uncovered)
            .chain(&self.partially_covered)
            .find(|d| d.range.contains_line(line))
    }

    fn push(&mut self, decoration: Decoration) {
        match decoration.detail.class() {
            CoverageClass::Covered => self.covered.push(decoration),
            CoverageClass::Uncovered => self.uncovered.push(decoration),
            CoverageClass::PartiallyCovered => self.partially_covered.push(decoration),
        }
    }
}

/// Classify one reported line given the branches on that line.
pub fn classify<'a>(
    hit: &LineHit,
    branches: impl IntoIterator<Item = &'a BranchHit>,
) -> CoverageClass {
    if !hit.covered {
        return CoverageClass::Uncovered;
    }
    if branches.into_iter().any(|b| !b.taken) {
        CoverageClass::PartiallyCovered
    } else {
        CoverageClass::Covered
    }
}

/// Build decorations for every reported line that still exists in the
/// document. Reported lines are 1-based; lines beyond `line_count` are left
/// over from an older buffer and are dropped.
pub fn build_decorations(coverage: &FileCoverage, line_count: u32) -> DecorationSet {
    let mut set = DecorationSet::default();
    let mut discarded = 0usize;

    for (&line, hit) in &coverage.lines {
        if line == 0 || line > line_count {
            discarded += 1;
            continue;
        }
        let branches: Vec<&BranchHit> = coverage.branches_on(line).collect();
        let detail = match classify(hit, branches.iter().copied()) {
            CoverageClass::Covered => AnnotationDetail::Covered { hits: hit.hits },
            CoverageClass::Uncovered => AnnotationDetail::Uncovered {
                generate_for: coverage.path.clone(),
            },
            CoverageClass::PartiallyCovered => AnnotationDetail::PartiallyCovered {
                taken: branches.iter().filter(|b| b.taken).count(),
                total: branches.len(),
                untaken: branches
                    .iter()
                    .filter(|b| !b.taken)
                    .map(|b| b.branch)
                    .collect(),
            },
        };
        set.push(Decoration {
            range: Range::line(line - 1),
            detail,
        });
    }

    if discarded > 0 {
        debug!(
            path = %coverage.path.display(),
            discarded,
            line_count,
            "dropped coverage lines outside the document"
        );
    }
    set
}

/// Minimum acceptable percentage per metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageThresholds {
    #[serde(default = "default_lines")]
    pub lines: f64,
    #[serde(default = "default_branches")]
    pub branches: f64,
    #[serde(default = "default_functions")]
    pub functions: f64,
    #[serde(default = "default_statements")]
    pub statements: f64,
}

fn default_lines() -> f64 {
    80.0
}

fn default_branches() -> f64 {
    75.0
}

fn default_functions() -> f64 {
    85.0
}

fn default_statements() -> f64 {
    80.0
}

impl Default for CoverageThresholds {
    fn default() -> Self {
        Self {
            lines: default_lines(),
            branches: default_branches(),
            functions: default_functions(),
            statements: default_statements(),
        }
    }
}

impl CoverageThresholds {
    pub fn get(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Lines => self.lines,
            MetricKind::Branches => self.branches,
            MetricKind::Functions => self.functions,
            MetricKind::Statements => self.statements,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub metric: MetricKind,
    pub actual: f64,
    pub required: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThresholdStatus {
    pub violations: Vec<Violation>,
}

impl ThresholdStatus {
    pub fn is_violated(&self) -> bool {
        !self.violations.is_empty()
    }

    pub fn summary(&self) -> String {
        if self.violations.is_empty() {
            return "Coverage meets all thresholds".to_string();
        }
        let parts: Vec<String> = self
            .violations
            .iter()
            .map(|v| {
                format!(
                    "{} {:.1}% < {:.1}%",
                    v.metric.label(),
                    v.actual,
                    v.required
                )
            })
            .collect();
        format!("Coverage below threshold: {}", parts.join(", "))
    }
}

pub fn evaluate_thresholds(
    metrics: &CoverageMetrics,
    thresholds: &CoverageThresholds,
) -> ThresholdStatus {
    let violations = MetricKind::ALL
        .iter()
        .filter_map(|&kind| {
            let actual = metrics.get(kind).percentage;
            let required = thresholds.get(kind);
            (actual < required).then_some(Violation {
                metric: kind,
                actual,
                required,
            })
        })
        .collect();
    ThresholdStatus { violations }
}

/// Hover text for a 0-based line, combining coverage and any test site there.
pub fn hover_for_line(
    line: u32,
    decorations: &DecorationSet,
    sites: &[CorrelatedSite],
) -> Option<String> {
    let mut parts = Vec::new();
    for site in sites.iter().filter(|s| s.site.line == line) {
        parts.push(format!("{}: {}", site.site.name, site_label(site)));
    }
    if let Some(decoration) = decorations.at_line(line) {
        parts.push(decoration.detail.message());
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::CoverageMetric;

    fn scenario_file() -> FileCoverage {
        let mut coverage = FileCoverage::new("/repo/cart.ts");
        coverage.lines.insert(10, LineHit { hits: 3, covered: true });
        coverage.lines.insert(11, LineHit { hits: 0, covered: false });
        coverage.lines.insert(12, LineHit { hits: 2, covered: true });
        coverage.branches.push(BranchHit { line: 12, branch: 0, taken: true });
        coverage.branches.push(BranchHit { line: 12, branch: 1, taken: false });
        coverage
    }

    #[test]
    fn scenario_covered_uncovered_partial() {
        let set = build_decorations(&scenario_file(), 100);

        assert_eq!(set.covered.len(), 1);
        assert_eq!(set.uncovered.len(), 1);
        assert_eq!(set.partially_covered.len(), 1);
        assert_eq!(set.covered[0].range, Range::line(9));
        assert_eq!(set.uncovered[0].range, Range::line(10));
        assert_eq!(set.partially_covered[0].range, Range::line(11));
        assert_eq!(set.covered[0].detail, AnnotationDetail::Covered { hits: 3 });
        assert_eq!(
            set.partially_covered[0].detail,
            AnnotationDetail::PartiallyCovered {
                taken: 1,
                total: 2,
                untaken: vec![1]
            }
        );
    }

    #[test]
    fn classification_is_total_and_exclusive() {
        let mut coverage = FileCoverage::new("/f.ts");
        for line in 1..=60u32 {
            coverage.lines.insert(
                line,
                LineHit {
                    hits: u64::from(line % 3),
                    covered: line % 3 != 0,
                },
            );
            if line % 5 == 0 {
                coverage.branches.push(BranchHit {
                    line,
                    branch: 0,
                    taken: line % 2 == 0,
                });
            }
        }
        let set = build_decorations(&coverage, 60);
        assert_eq!(set.len(), coverage.lines.len());

        for line in 0..60u32 {
            let hits = [&set.covered, &set.uncovered, &set.partially_covered]
                .iter()
                .filter(|list| list.iter().any(|d| d.range.start.line == line))
                .count();
            assert_eq!(hits, 1, "line {line} must land in exactly one class");
        }
    }

    #[test]
    fn uncovered_wins_over_branch_data() {
        let hit = LineHit { hits: 0, covered: false };
        let branches = [BranchHit { line: 1, branch: 0, taken: true }];
        assert_eq!(classify(&hit, &branches), CoverageClass::Uncovered);
    }

    #[test]
    fn lines_outside_document_are_discarded() {
        let set = build_decorations(&scenario_file(), 11);
        assert_eq!(set.len(), 2);
        assert!(set.partially_covered.is_empty());

        let mut zero = FileCoverage::new("/f.ts");
        zero.lines.insert(0, LineHit { hits: 1, covered: true });
        assert!(build_decorations(&zero, 10).is_empty());
    }

    #[test]
    fn uncovered_payload_offers_generation() {
        let set = build_decorations(&scenario_file(), 100);
        assert_eq!(
            set.uncovered[0].detail,
            AnnotationDetail::Uncovered {
                generate_for: PathBuf::from("/repo/cart.ts")
            }
        );
        assert!(set.uncovered[0].detail.message().starts_with("Not executed"));
    }

    #[test]
    fn thresholds_list_every_violation() {
        let metrics = CoverageMetrics {
            lines: CoverageMetric::new(100, 90),
            branches: CoverageMetric::new(100, 50),
            functions: CoverageMetric::new(100, 80),
            statements: CoverageMetric::new(0, 0),
        };
        let status = evaluate_thresholds(&metrics, &CoverageThresholds::default());
        assert!(status.is_violated());
        let failed: Vec<MetricKind> = status.violations.iter().map(|v| v.metric).collect();
        assert_eq!(failed, vec![MetricKind::Branches, MetricKind::Functions]);
        assert_eq!(
            status.summary(),
            "Coverage below threshold: branches 50.0% < 75.0%, functions 80.0% < 85.0%"
        );
    }

    #[test]
    fn healthy_metrics_pass() {
        let metrics = CoverageMetrics {
            lines: CoverageMetric::new(10, 10),
            branches: CoverageMetric::new(4, 3),
            functions: CoverageMetric::new(0, 0),
            statements: CoverageMetric::new(5, 4),
        };
        let status = evaluate_thresholds(&metrics, &CoverageThresholds::default());
        assert!(!status.is_violated());
    }

    #[test]
    fn hover_combines_coverage_detail() {
        let set = build_decorations(&scenario_file(), 100);
        let hover = hover_for_line(9, &set, &[]).unwrap();
        assert_eq!(hover, "Covered: executed 3 times");
        assert_eq!(hover_for_line(50, &set, &[]), None);
    }
}
