pub mod coverage;
pub mod diagnostic;
pub mod flaky;
pub mod result;
pub mod site;
pub mod status;

pub use coverage::{
    BranchHit, CoverageMetric, CoverageMetrics, CoverageReport, FileCoverage, FunctionHit,
    LineHit, MetricKind,
};
pub use diagnostic::{
    CoverageGap, DiagnosticDetail, DiagnosticKind, DiagnosticRecord, GapType, Severity,
};
pub use flaky::{FlakyError, FlakyTestRecord};
pub use result::{TestError, TestRecord, strip_ansi};
pub use site::{Position, Range, SiteKind, TestSite};
pub use status::TestStatus;
