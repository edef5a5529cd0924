//! Run metrics. Every score is 1.0 or 0.0; a run passes only when all are 1.0.

use std::collections::BTreeMap;

use egl_kernel::{CompileCode, ReasonCode};
use egl_store::Expectation;
use serde::Serialize;

use super::FixtureReport;

pub(crate) struct Inputs<'a> {
    pub reports: &'a [FixtureReport],
    pub expectations: &'a BTreeMap<String, Expectation>,
    pub leak_count: usize,
    pub plan_hashes_reproduced: bool,
    pub ledger_intact: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub expectation_match_score: f64,
    pub refusal_rate: f64,
    pub no_side_effect_on_refusal_score: f64,
    pub no_absolute_path_leak_score: f64,
    pub plan_hash_integrity_score: f64,
    pub ledger_integrity_score: f64,
    pub pass: bool,
}

fn score(ok: bool) -> f64 {
    if ok { 1.0 } else { 0.0 }
}

/// A declared expectation with no evaluated fixture is a mismatch.
fn expectations_match(reports: &[FixtureReport], expectations: &BTreeMap<String, Expectation>) -> bool {
    expectations.iter().all(|(fixture_id, want)| {
        let Some(report) = reports.iter().find(|r| &r.fixture_id == fixture_id) else {
            tracing::warn!(fixture_id = %fixture_id, "expectation names a fixture the pack never ran");
            return false;
        };
        let outcome = report.outcome;
        let ok = want.matches(
            outcome.status_str(),
            outcome.reason_code().map(ReasonCode::as_str),
            outcome.refusal_status().map(|s| s.as_str()),
        );
        if !ok {
            tracing::warn!(
                fixture_id = %fixture_id,
                expected_status = %want.status,
                expected_reason = want.reason_code.as_deref().unwrap_or(""),
                actual_status = outcome.status_str(),
                actual_reason = outcome.reason_code().map(ReasonCode::as_str).unwrap_or(""),
                "expectation mismatch"
            );
        }
        ok
    })
}

fn refused_without_side_effect(report: &FixtureReport) -> bool {
    report.outcome.is_admitted()
        || (!report.executor_invoked
            && !report.execution_artifacts
            && report.pre_state_hash_sha256 == report.post_state_hash_sha256)
}

impl Metrics {
    pub(crate) fn compute(inputs: Inputs<'_>) -> Self {
        let unmapped: ReasonCode = CompileCode::UnmappedToolSurface.into();
        let scores = [
            expectations_match(inputs.reports, inputs.expectations),
            inputs
                .reports
                .iter()
                .any(|r| r.outcome.reason_code() == Some(unmapped)),
            inputs.reports.iter().all(refused_without_side_effect),
            inputs.leak_count == 0,
            inputs.plan_hashes_reproduced,
            inputs.ledger_intact,
        ];
        let [expectation, refusal, side_effect, leak, plan_hash, ledger] = scores.map(score);
        Self {
            expectation_match_score: expectation,
            refusal_rate: refusal,
            no_side_effect_on_refusal_score: side_effect,
            no_absolute_path_leak_score: leak,
            plan_hash_integrity_score: plan_hash,
            ledger_integrity_score: ledger,
            pass: scores.iter().all(|ok| *ok),
        }
    }
}
