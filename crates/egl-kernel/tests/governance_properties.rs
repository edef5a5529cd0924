//! End-to-end properties of the decision core: compile, admit, bind and
//! record, exercised only through the public API.

use std::cell::RefCell;
use std::path::Path;

use egl_kernel::capability::AuthorityDiff;
use egl_kernel::codes::PermitCode;
use egl_kernel::guard::{
    FILE_ATTESTATION_SCHEMA_ID, FILE_ATTESTATION_VERSION, FileAttestation, FileClassification, FileIdentity,
    FileIntegrity, ZONE_WORKSPACE, toctou_recheck,
};
use egl_kernel::ledger::{chain_hash, seq};
use egl_kernel::permit::{PERMIT_SCHEMA_ID, compute_permit_sha256, seal_permit};
use egl_kernel::receipt::{RatificationSummary, ReceiptBinding, SkillInstallStubReceipt, receipt_hash};
use egl_kernel::registry::{RawSurfaceEntry, TOOL_SURFACE_MAP_SCHEMA_ID};
use egl_kernel::sce::expected_sce_hash;
use egl_kernel::token::{approver_id, build_token, token_sha256};
use egl_kernel::*;
use serde_json::{Value, json};

const NOW: &str = "2026-02-13T00:00:00Z";
const NONCE: &str = "nonce-1";

fn registry(ids: &[&str]) -> ToolSurfaceRegistry {
    let surfaces = ids
        .iter()
        .map(|id| RawSurfaceEntry {
            surface_id: Some(id.to_string()),
            kind: Some("any".to_string()),
            schema_ref: Some(format!("schemas/{id}.json")),
        })
        .collect();
    ToolSurfaceRegistry::from_map(ToolSurfaceMap {
        schema_id: Some(TOOL_SURFACE_MAP_SCHEMA_ID.to_string()),
        version: Some("1.1.1".to_string()),
        surfaces,
    })
    .expect("registry")
}

fn default_registry() -> ToolSurfaceRegistry {
    registry(&["file.read", "file.write", "skill.install", "browser.navigate"])
}

#[test]
fn compile_is_deterministic() {
    let raw = json!({
        "schema_id": "EGL.INTENT",
        "version": "0.1.0",
        "intent_id": "I-1",
        "actions": [
            {"action_id": "A2", "kind": "net", "tool_surface_id": "browser.navigate", "net": {"url": "https://example.com"}},
            {"action_id": "A1", "kind": "file", "tool_surface_id": "file.read", "file": {"op": "read", "zone": "repo", "path": "a.txt"}},
        ],
    });
    let first = compile(&Intent::from_value(raw.clone()).expect("intent"), &default_registry()).expect("compile");
    let second = compile(&Intent::from_value(raw).expect("intent"), &default_registry()).expect("compile");

    assert_eq!(first.plan_hash(), second.plan_hash());
    assert_eq!(
        canonical_json_string(&first.record().expect("record")),
        canonical_json_string(&second.record().expect("record"))
    );
    let plan = first.plan().expect("plan");
    assert_eq!(plan.actions[0].tool_surface_id, "file.read");
}

#[test]
fn unmapped_surface_fails_closed() {
    let raw = json!({
        "actions": [{"action_id": "A1", "kind": "process", "tool_surface_id": "process.unknown",
                     "process": {"command": "rm", "args": ["-rf", "/"]}}]
    });
    let intent = Intent::from_value(raw).expect("intent");
    for reg in [default_registry(), ToolSurfaceRegistry::empty()] {
        let compilation = compile(&intent, &reg).expect("compile");
        let Compilation::Refused(refusal) = &compilation else {
            panic!("expected refusal");
        };
        assert_eq!(refusal.code.as_str(), "UNMAPPED_TOOL_SURFACE");
        assert_eq!(refusal.status, RefusalStatus::RefuseHard);
        assert!(compilation.intent_hash().is_some());
        assert!(compilation.plan().is_none());

        let admission = admit(&compilation, AdmissionContext::new("fx")).expect("admit");
        assert!(!admission.aar.is_ok());
        assert!(admission.context.is_none());
        assert!(Attestation::of(&admission.aar).is_none());
    }
}

struct SkillFixture {
    compilation: Compilation,
    skill_sce: String,
    authority_diff: String,
}

fn skill_fixture() -> SkillFixture {
    let call = json!({
        "tool": "skill.install",
        "id": "skill-1",
        "skill_id": "skill.demo",
        "version_lock": "1.0.0",
        "requested_authority_profile": "restricted",
        "artifact": {
            // sha256("hello")
            "declared_sha256": "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
            "bytes_b64": "aGVsbG8=",
        },
        "capability_diff": {"adds_tools": ["web.fetch"], "adds_egress": ["Example.COM"]},
    });
    let root = Path::new("/work/repo");
    let envelope = build_envelope(root, "fx-skill", &call).expect("envelope");
    let intent = normalize_to_intent(root, &envelope).expect("intent");
    let compilation = compile(&intent, &default_registry()).expect("compile");
    let compiled = compilation.compiled().expect("compiled");
    let skill = compiled.meta.skill_install.clone().expect("skill");
    SkillFixture {
        skill_sce: expected_sce_hash("fx-skill", &skill).expect("sce"),
        authority_diff: skill.authority_diff_sha256.clone().expect("authority diff"),
        compilation,
    }
}

fn ratification(fx: &SkillFixture, approver: &str) -> Value {
    build_token::<RatificationToken>(
        &TokenBindings::new()
            .with("sce_hash_sha256", fx.skill_sce.clone())
            .with("authority_diff_sha256", fx.authority_diff.clone())
            .with("intent_hash", fx.compilation.intent_hash().unwrap_or_default())
            .with("lane_id", "proxy")
            .with("attestation_nonce", NONCE)
            .with("approver_id", approver),
    )
}

fn admit_with(fx: &SkillFixture, tokens: Vec<Value>) -> Admission {
    let ctx = AdmissionContext::new("fx-skill")
        .with_binding_lane("proxy")
        .with_nonce(NONCE)
        .with_now(NOW)
        .with_tokens(tokens);
    admit(&fx.compilation, ctx).expect("admit")
}

fn summary(admission: &Admission) -> (Option<String>, Option<String>) {
    (
        admission.outcome.refusal_status().map(|s| s.as_str().to_string()),
        admission.outcome.reason_code().map(|c| c.as_str().to_string()),
    )
}

#[test]
fn skill_install_requires_distinct_quorum() {
    let fx = skill_fixture();
    let defer = |code: &str| (Some("DEFER_HITL".to_string()), Some(code.to_string()));

    assert_eq!(summary(&admit_with(&fx, vec![])), defer("HITL_REQUIRED_SURFACE_EXPANSION"));
    assert_eq!(
        summary(&admit_with(&fx, vec![ratification(&fx, "alice")])),
        defer("HITL_QUORUM_NOT_MET")
    );
    assert_eq!(
        summary(&admit_with(&fx, vec![ratification(&fx, "alice"), ratification(&fx, "alice")])),
        defer("HITL_DUPLICATE_APPROVER")
    );

    let tokens = vec![ratification(&fx, "bob"), ratification(&fx, "alice")];
    let admission = admit_with(&fx, tokens.clone());
    assert!(admission.outcome.is_admitted());
    assert_eq!(summary(&admission), (None, Some("HITL_QUORUM_ACCEPTED".to_string())));
    assert!(admission.aar.is_ok());

    let ratified = RatificationSummary::from_pairs(
        tokens
            .iter()
            .map(|t| (token_sha256::<RatificationToken>(t), approver_id(t).to_string())),
    );
    assert_eq!(ratified.approvers, vec!["alice", "bob"]);
    let binding = ReceiptBinding {
        intent_hash: fx.compilation.intent_hash().map(str::to_string),
        plan_hash: fx.compilation.plan_hash().map(str::to_string),
        ..ReceiptBinding::default()
    };
    let receipt = |sce: &str| {
        SkillInstallStubReceipt::new("fx-skill", &binding, "proxy", Some(NONCE), sce, Some(fx.authority_diff.as_str()), &ratified)
    };
    let recorded = receipt_hash(&receipt(&fx.skill_sce)).expect("hash");
    assert_eq!(recorded, receipt_hash(&receipt(&fx.skill_sce)).expect("hash"));
    assert_ne!(recorded, receipt_hash(&receipt("other")).expect("hash"));
}

#[test]
fn wrong_lane_token_is_a_hard_refusal() {
    let fx = skill_fixture();
    let mut stray = ratification(&fx, "bob");
    stray["lane_id"] = json!("elsewhere");
    let admission = admit_with(&fx, vec![ratification(&fx, "alice"), stray]);
    // The lane edit breaks the self-hash before any binding is compared.
    assert_eq!(admission.outcome.reason_code().map(|c| c.as_str()), Some("INVALID_HITL_TOKEN"));
    assert!(admission.outcome.is_hard_refusal());
}

#[test]
fn permit_tamper_is_detected() {
    let permit = seal_permit(json!({
        "schema_id": PERMIT_SCHEMA_ID,
        "version": "0.1.0",
        "lane_id": "proxy",
        "attestation_nonce": NONCE,
        "expiry_ts": "2026-03-01T00:00:00Z",
        "scope": {
            "execution_target": "SANDBOX",
            "filesystem": {"read_roots": ["sandbox"], "write_roots": ["sandbox"], "deny_paths": []},
        },
    }));
    let expected = PermitBindings {
        lane_id: Some("proxy".to_string()),
        attestation_nonce: Some(NONCE.to_string()),
        ..PermitBindings::default()
    };
    assert!(validate_permit(&permit, &expected, NOW).is_ok());

    let mut tampered = permit.clone();
    tampered["scope"]["filesystem"]["write_roots"] = json!(["sandbox", "secrets"]);
    let rejection = validate_permit(&tampered, &expected, NOW).expect_err("tampered");
    assert_eq!(rejection.code, PermitCode::InvalidPermit);

    let mut retarget = permit;
    retarget["scope"]["execution_target"] = json!("HOST");
    assert_eq!(
        validate_permit(&retarget, &expected, NOW).expect_err("host").code,
        PermitCode::InvalidPermit
    );
}

#[test]
fn nested_hash_field_is_part_of_the_permit_hash() {
    let permit = seal_permit(json!({
        "schema_id": PERMIT_SCHEMA_ID,
        "version": "0.1.0",
        "lane_id": "proxy",
        "attestation_nonce": NONCE,
        "expiry_ts": "2026-03-01T00:00:00Z",
        "scope": {
            "execution_target": "SANDBOX",
            "filesystem": {"read_roots": ["sandbox"], "write_roots": ["sandbox"], "deny_paths": []},
        },
    }));
    let expected = PermitBindings {
        lane_id: Some("proxy".to_string()),
        attestation_nonce: Some(NONCE.to_string()),
        ..PermitBindings::default()
    };
    assert!(validate_permit(&permit, &expected, NOW).is_ok());

    let mut injected = permit.clone();
    injected["scope"]["filesystem"]["permit_sha256"] = json!("injected");
    assert_ne!(compute_permit_sha256(&injected), compute_permit_sha256(&permit));
    assert_eq!(
        validate_permit(&injected, &expected, NOW).expect_err("nested key").code,
        PermitCode::InvalidPermit
    );
}

struct SwapAfterFirst(RefCell<u32>);

impl LiveAttestation for SwapAfterFirst {
    fn file(&self, op: &str, path: &str) -> FileAttestation {
        let mut calls = self.0.borrow_mut();
        *calls += 1;
        let swapped = *calls > 1;
        let zone = if swapped { "UNKNOWN" } else { ZONE_WORKSPACE };
        FileAttestation {
            schema_id: FILE_ATTESTATION_SCHEMA_ID.to_string(),
            version: FILE_ATTESTATION_VERSION.to_string(),
            op: op.to_string(),
            zone: zone.to_string(),
            path: path.to_string(),
            exists: true,
            identity: FileIdentity {
                absolute_path: path.to_string(),
                requested_path: path.to_string(),
            },
            classification: FileClassification {
                zone: zone.to_string(),
                is_symlink: swapped,
            },
            integrity: FileIntegrity {
                content_hash: (!swapped).then(|| "5afe".to_string()),
                size_bytes: (!swapped).then_some(5),
            },
        }
    }
}

#[test]
fn symlink_swap_after_admission_is_caught() {
    let probe = SwapAfterFirst(RefCell::new(0));
    let snapshot = probe.file("read", "sandbox/_th_tmp/toctou_symlink_swap/target.txt");
    let (recheck, rejection) =
        toctou_recheck(&probe, &snapshot, "read", "sandbox/_th_tmp/toctou_symlink_swap/target.txt")
            .expect_err("swap");
    assert_eq!(rejection.code.as_str(), "TOCTOU_DETECTED");
    assert!(recheck.classification.is_symlink);
    assert!(recheck.integrity.content_hash.is_none());
}

#[test]
fn ledger_digests_sort_before_hashing() {
    let a = LedgerRecord::new("fx-a", seq::DECISION, "admission").with("reason_code", Value::Null);
    let b = LedgerRecord::new("fx-b", seq::DECISION, "refusal").with("reason_code", "ZONE_UNKNOWN");

    let forward = ProvenanceLedger::from_records(vec![a.clone(), b.clone()]);
    let reverse = ProvenanceLedger::from_records(vec![b.clone(), a.clone()]);
    assert_eq!(forward.canonical_hash().expect("h"), reverse.canonical_hash().expect("h"));
    assert_eq!(forward.chain_hash().expect("h"), reverse.chain_hash().expect("h"));

    // Folding the unsorted order by hand gives a different history.
    let fold = |records: &[&LedgerRecord]| {
        records.iter().fold(String::new(), |prev, r| {
            let rec = sha256_stable(&r.to_value().expect("value"));
            sha256_stable(&json!({"prev": prev, "rec": rec}))
        })
    };
    assert_eq!(fold(&[&a, &b]), chain_hash(&[b.clone(), a.clone()]).expect("h"));
    assert_ne!(fold(&[&b, &a]), chain_hash(&[a, b]).expect("h"));
}

#[test]
fn egress_grants_keep_port_shape() {
    let host_only = AuthorityDiff::derive(&json!({"adds_egress": ["Example.COM"]}));
    let with_port = AuthorityDiff::derive(&json!({"adds_egress": ["Example.COM:443"]}));
    assert_eq!(host_only.adds_egress, vec!["example.com"]);
    assert_eq!(with_port.adds_egress, vec!["example.com:443"]);
    assert_ne!(
        host_only.digest().expect("digest").sha256,
        with_port.digest().expect("digest").sha256
    );
}
