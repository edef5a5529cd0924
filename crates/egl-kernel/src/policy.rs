//! Plan policy validator.
//!
//! A fixed battery of named checks, run in order against a compiled plan.
//! The first check that fires decides the refusal, so reason codes are
//! reproducible for any given plan.

use serde_json::json;

use crate::codes::{AdmissionCode, PolicyCode};
use crate::compiler::CompiledPlan;
use crate::context::AdmissionContext;
use crate::error::EglError;
use crate::intent::FileAction;
use crate::refusal::{Refusal, TIER_HUMAN_REVIEW};
use crate::registry::SKILL_INSTALL_SURFACE;
use crate::sce::expected_sce_hash;
use crate::token::{RatificationToken, TokenBindings, approver_id, validate_token};

/// Approvals needed to expand the execution surface.
pub const QUORUM_REQUIRED: usize = 2;

const SYSTEM_CORE_ZONE: &str = "SYSTEM_CORE";
const MEMORY_ZONE: &str = "memory";

fn file_actions(compiled: &CompiledPlan) -> impl Iterator<Item = &FileAction> {
    compiled.plan.actions.iter().filter_map(|a| a.body.as_file())
}

fn is_memory_md_write(file: &FileAction) -> bool {
    file.zone_str() == MEMORY_ZONE
        && file.op == "write"
        && file.path.starts_with("memory/")
        && file.path.ends_with(".md")
}

/// Run every policy check. On admission the returned context carries any
/// admission reason the checks recorded.
pub fn validate(compiled: &CompiledPlan, ctx: AdmissionContext) -> Result<AdmissionContext, Refusal> {
    let verdict = check(compiled, ctx);
    if let Err(refusal) = &verdict {
        tracing::debug!(
            code = refusal.code.as_str(),
            status = refusal.status.as_str(),
            violated_ref = %refusal.violated_ref,
            "policy refused plan"
        );
    }
    verdict
}

fn check(compiled: &CompiledPlan, ctx: AdmissionContext) -> Result<AdmissionContext, Refusal> {
    if file_actions(compiled).any(FileAction::zone_is_unknown) {
        return Err(Refusal::hard(
            PolicyCode::ZoneUnknown,
            "File operation has UNKNOWN zone",
            "policy:file.zone",
        ));
    }

    if file_actions(compiled).any(|f| f.zone_str() == SYSTEM_CORE_ZONE && f.op == "delete") {
        return Err(Refusal::hard(
            PolicyCode::SystemCoreDelete,
            "Delete in SYSTEM_CORE is prohibited",
            "policy:file.delete.SYSTEM_CORE",
        ));
    }

    if file_actions(compiled).any(is_memory_md_write) {
        return Err(Refusal::defer(
            PolicyCode::MemoryMdWrite,
            "Writes to memory/*.md require human review",
            "policy:file.write.memory_md",
        )
        .with_tier(TIER_HUMAN_REVIEW));
    }

    let meta = &compiled.meta;
    if let (Some(lane), Some(expected)) = (&meta.lane_id, &meta.expected_lane_id)
        && lane != expected
    {
        return Err(Refusal::hard(
            PolicyCode::LaneMismatch,
            "lane_id does not match expected_lane_id",
            "policy:lane.match",
        )
        .with_meta(json!({"lane_id": lane, "expected_lane_id": expected})));
    }

    if meta.prohibit_replay == Some(true)
        && meta
            .seen_plan_hashes
            .as_ref()
            .is_some_and(|seen| seen.binary_search(&compiled.plan_hash).is_ok())
    {
        return Err(Refusal::hard(
            PolicyCode::PlanReplay,
            "plan hash already seen; replay prohibited",
            "policy:replay.prohibited",
        )
        .with_meta(json!({"plan_hash": compiled.plan_hash})));
    }

    if let Some(expected) = &meta.expected_plan_hash
        && *expected != compiled.plan_hash
    {
        return Err(Refusal::hard(
            PolicyCode::HashMismatch,
            "computed plan hash does not match expected_plan_hash",
            "policy:hash.match",
        )
        .with_meta(json!({"expected_plan_hash": expected, "plan_hash": compiled.plan_hash})));
    }

    if compiled.plan.touches_surface(SKILL_INSTALL_SURFACE) {
        return skill_install_gate(compiled, ctx);
    }

    Ok(ctx)
}

/// Supply-chain gate: capability diff, artifact integrity, then a quorum of
/// valid ratification tokens from distinct approvers.
fn skill_install_gate(compiled: &CompiledPlan, ctx: AdmissionContext) -> Result<AdmissionContext, Refusal> {
    let skill = match &compiled.meta.skill_install {
        Some(si)
            if si.capability_diff_present
                && si.capability_diff_digest.as_deref().is_some_and(|d| !d.is_empty()) =>
        {
            si
        }
        _ => {
            return Err(Refusal::hard(
                PolicyCode::MissingCapabilityDiff,
                "capability_diff missing or empty",
                "policy:skill.install.capability_diff",
            ));
        }
    };

    let declared = skill.declared_sha256.as_deref().unwrap_or("");
    let observed = skill.observed_sha256.as_deref().unwrap_or("");
    if declared.is_empty() || observed.is_empty() {
        return Err(Refusal::hard(
            PolicyCode::MissingArtifactHash,
            "artifact bytes_b64 and declared_sha256 are required",
            "policy:skill.install.artifact_hash",
        ));
    }
    if !observed.eq_ignore_ascii_case(declared) {
        return Err(Refusal::hard(
            PolicyCode::ArtifactHashMismatch,
            "declared_sha256 does not match observed artifact bytes",
            "policy:skill.install.artifact_hash.match",
        )
        .with_meta(json!({"declared_sha256": declared, "observed_sha256": observed})));
    }

    let tokens = &ctx.ratification_tokens;
    if tokens.is_empty() {
        return Err(Refusal::defer(
            PolicyCode::HitlRequiredSurfaceExpansion,
            "Skill installation expands execution surface and requires human review",
            "policy:surface_expansion.hitl",
        )
        .with_tier(TIER_HUMAN_REVIEW));
    }

    let sce_hash = expected_sce_hash(&ctx.fixture_id, skill).map_err(codec_refusal)?;
    let expected = TokenBindings::new()
        .with("sce_hash_sha256", sce_hash)
        .with(
            "authority_diff_sha256",
            skill.authority_diff_sha256.clone().unwrap_or_default(),
        )
        .with("intent_hash", compiled.intent_hash.clone())
        .with("lane_id", ctx.binding_lane_id.clone())
        .with("attestation_nonce", ctx.attestation_nonce.clone());

    for token in tokens {
        if let Err(rejection) = validate_token::<RatificationToken>(token, &expected, &ctx.now) {
            return Err(Refusal::hard(
                rejection.code,
                rejection.reason,
                "policy:skill.install.hitl_token",
            ));
        }
    }

    if tokens.len() < QUORUM_REQUIRED {
        return Err(Refusal::defer(
            PolicyCode::HitlQuorumNotMet,
            "Skill installation requires 2-key human quorum approval",
            "policy:surface_expansion.hitl.quorum",
        )
        .with_tier(TIER_HUMAN_REVIEW));
    }

    if approver_id(&tokens[0]) == approver_id(&tokens[1]) {
        return Err(Refusal::defer(
            PolicyCode::HitlDuplicateApprover,
            "Quorum requires distinct approver_id values",
            "policy:surface_expansion.hitl.quorum.distinct",
        )
        .with_tier(TIER_HUMAN_REVIEW));
    }

    Ok(ctx.admitted_because(AdmissionCode::HitlQuorumAccepted))
}

/// The SCE could not be encoded; nothing can be bound to it.
fn codec_refusal(err: EglError) -> Refusal {
    Refusal::hard(
        PolicyCode::MissingCapabilityDiff,
        format!("supply-chain evidence could not be encoded: {err}"),
        "policy:skill.install.capability_diff",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Compilation, compile};
    use crate::intent::Intent;
    use crate::registry::{RawSurfaceEntry, TOOL_SURFACE_MAP_SCHEMA_ID, ToolSurfaceMap, ToolSurfaceRegistry};
    use serde_json::{Value, json};

    fn registry() -> ToolSurfaceRegistry {
        let surfaces = ["file.read", "file.write", "file.delete", "skill.install"]
            .iter()
            .map(|id| RawSurfaceEntry {
                surface_id: Some(id.to_string()),
                kind: Some("any".to_string()),
                schema_ref: Some("ref".to_string()),
            })
            .collect();
        ToolSurfaceRegistry::from_map(ToolSurfaceMap {
            schema_id: Some(TOOL_SURFACE_MAP_SCHEMA_ID.to_string()),
            version: Some("1".to_string()),
            surfaces,
        })
        .expect("registry")
    }

    fn compiled(intent: Value) -> CompiledPlan {
        let intent = Intent::from_value(intent).expect("intent");
        match compile(&intent, &registry()).expect("compile") {
            Compilation::Compiled(c) => c,
            Compilation::Refused(r) => panic!("unexpected refusal {r:?}"),
        }
    }

    fn file_intent(op: &str, zone: Value, path: &str) -> Value {
        json!({
            "actions": [{
                "action_id": "A1", "kind": "file", "tool_surface_id": format!("file.{op}"),
                "file": {"op": op, "zone": zone, "path": path}
            }]
        })
    }

    fn code(result: Result<AdmissionContext, Refusal>) -> String {
        result.expect_err("refused").code.as_str().to_string()
    }

    #[test]
    fn zone_rules() {
        let ctx = AdmissionContext::new("fx");
        assert_eq!(
            code(validate(&compiled(file_intent("read", json!("UNKNOWN"), "x")), ctx.clone())),
            "ZONE_UNKNOWN"
        );
        assert_eq!(
            code(validate(&compiled(file_intent("delete", json!("SYSTEM_CORE"), "core/x")), ctx.clone())),
            "SYSTEM_CORE_DELETE"
        );
        let memory = validate(&compiled(file_intent("write", json!("memory"), "memory/notes.md")), ctx.clone())
            .expect_err("memory");
        assert_eq!(memory.code.as_str(), "MEMORY_MD_WRITE");
        assert!(!memory.is_terminal());
        assert_eq!(memory.tier.as_deref(), Some("T4"));
        assert!(validate(&compiled(file_intent("write", json!("memory"), "memory/notes.txt")), ctx).is_ok());
    }

    #[test]
    fn lane_replay_and_hash_binding() {
        let ctx = AdmissionContext::new("fx");
        let mut lane = file_intent("read", json!("repo"), "x");
        lane["lane_id"] = json!("a");
        lane["expected_lane_id"] = json!("b");
        let refusal = validate(&compiled(lane), ctx.clone()).expect_err("lane");
        assert_eq!(refusal.code.as_str(), "LANE_MISMATCH");
        assert_eq!(refusal.meta, Some(json!({"lane_id": "a", "expected_lane_id": "b"})));

        let plain = compiled(file_intent("read", json!("repo"), "x"));
        let mut replay = file_intent("read", json!("repo"), "x");
        replay["prohibit_replay"] = json!(true);
        replay["seen_plan_hashes"] = json!(["sha3-512:zzz", plain.plan_hash]);
        assert_eq!(code(validate(&compiled(replay.clone()), ctx.clone())), "PLAN_REPLAY");
        replay["prohibit_replay"] = json!(false);
        assert!(validate(&compiled(replay), ctx.clone()).is_ok());

        let mut hash = file_intent("read", json!("repo"), "x");
        hash["expected_plan_hash"] = json!("sha3-512:nope");
        assert_eq!(code(validate(&compiled(hash.clone()), ctx.clone())), "HASH_MISMATCH");
        hash["expected_plan_hash"] = json!(plain.plan_hash);
        assert!(validate(&compiled(hash), ctx).is_ok());
    }

    fn skill_intent(skill: Value) -> Value {
        json!({
            "actions": [{
                "action_id": "A1", "kind": "process", "tool_surface_id": "skill.install",
                "process": {"command": "skill.install", "args": []}
            }],
            "skill_install": skill
        })
    }

    #[test]
    fn supply_chain_preconditions() {
        let ctx = AdmissionContext::new("fx");
        assert_eq!(
            code(validate(&compiled(skill_intent(json!({"capability_diff_present": false}))), ctx.clone())),
            "MISSING_CAPABILITY_DIFF"
        );
        let no_hash = json!({"capability_diff_present": true, "capability_diff_digest": "cd", "declared_sha256": "aa"});
        assert_eq!(code(validate(&compiled(skill_intent(no_hash)), ctx.clone())), "MISSING_ARTIFACT_HASH");
        let mismatch = json!({
            "capability_diff_present": true, "capability_diff_digest": "cd",
            "declared_sha256": "AA", "observed_sha256": "bb"
        });
        assert_eq!(code(validate(&compiled(skill_intent(mismatch)), ctx.clone())), "ARTIFACT_HASH_MISMATCH");
        let case_only = json!({
            "capability_diff_present": true, "capability_diff_digest": "cd",
            "declared_sha256": "AA", "observed_sha256": "aa"
        });
        let deferred = validate(&compiled(skill_intent(case_only)), ctx).expect_err("needs tokens");
        assert_eq!(deferred.code.as_str(), "HITL_REQUIRED_SURFACE_EXPANSION");
    }
}
