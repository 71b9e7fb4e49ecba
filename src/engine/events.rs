use tracing::{debug, info};

use crate::models::{CoverageGap, CoverageReport, FlakyTestRecord, TestRecord, TestStatus};

use super::Engine;

/// Updates pushed from the test service into the engine.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    TestStarted(TestRecord),
    TestCompleted(TestRecord),
    CoverageUpdated(CoverageReport),
    GapsUpdated(Vec<CoverageGap>),
    FlakyDetected(Vec<FlakyTestRecord>),
}

/// Apply a service event, then notify subscribers.
pub fn handle_service_event(engine: &mut Engine, event: ServiceEvent) {
    match event {
        ServiceEvent::TestStarted(record) => {
            debug!(test = %record.id, "test started");
            let known = engine.store.mark_running(&record.id).cloned();
            let started = match known {
                Some(known) => known,
                None => {
                    let mut record = record;
                    record.status = TestStatus::Running;
                    engine.store.upsert_test(record.clone());
                    record
                }
            };
            engine.events.test_started.publish(&started);
        }

        ServiceEvent::TestCompleted(record) => {
            let record = record.sanitize();
            debug!(test = %record.id, status = record.status.label(), "test completed");
            // One marker per failing line; a later pass clears it.
            engine.diagnostics.clear_failure(&record);
            if record.status == TestStatus::Failed {
                engine.diagnostics.upsert_failure(&record);
            }
            engine.index.upsert(record.clone());
            engine.store.upsert_test(record.clone());
            engine.events.test_completed.publish(&record);
        }

        ServiceEvent::CoverageUpdated(report) => {
            info!(
                files = report.files.len(),
                lines = report.metrics.lines.percentage,
                "coverage updated"
            );
            engine.store.set_coverage(report);
            if let Some(current) = engine.store.current_report() {
                engine.events.coverage_updated.publish(current);
            }
        }

        ServiceEvent::GapsUpdated(gaps) => {
            debug!(gaps = gaps.len(), "coverage gaps replaced");
            engine.diagnostics.replace_gaps(&gaps);
        }

        ServiceEvent::FlakyDetected(records) => {
            for record in &records {
                debug!(test = %record.test_id, rate = record.failure_rate(), "flaky test");
                engine.diagnostics.upsert_flaky(record);
            }
        }
    }
}
