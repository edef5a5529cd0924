//! Execution permits: self-hashing, lane- and plan-bound capability grants.
//!
//! `validate_permit` checks the base permit (shape, self-hash, expiry,
//! bindings, sandbox target, repo-relative roots) and returns a
//! [`PermitGrant`]. Kind-specific scope checks are methods on the grant,
//! so none of them can run against a permit that failed the base checks.

use std::fmt;

use serde_json::{Map, Value, json};

use crate::canonical::{SHA256_PREFIX, canonical_json_string, sha256_text_hex};
use crate::clock::is_expired;
use crate::codes::PermitCode;
use crate::diff::DiffStats;
use crate::egress::EgressScope;
use crate::intent::OUTSIDE_REPO;
use crate::paths::{is_repo_relative, path_within_roots};

pub const PERMIT_SCHEMA_ID: &str = "EGL.EXECUTION_PERMIT";
pub const PERMIT_VERSIONS: &[&str] = &["0.1.0", "0.2.0"];
/// Git scope is only honoured from this version on.
pub const PERMIT_GIT_VERSION: &str = "0.2.0";
pub const PERMIT_HASH_FIELD: &str = "permit_sha256";
pub const PERMIT_VALIDATION_SCHEMA_ID: &str = "EGL.EXECUTION_PERMIT_VALIDATION";

const SANDBOX_TARGET: &str = "SANDBOX";
const FILE_WRITE_OP: &str = "file.write";

/// `sha256:` over the canonical permit with its own top-level hash field
/// removed. Nested keys of the same name stay in the payload.
pub fn compute_permit_sha256(permit: &Value) -> String {
    let payload = match permit {
        Value::Object(map) => {
            let mut map = map.clone();
            map.remove(PERMIT_HASH_FIELD);
            Value::Object(map)
        }
        _ => Value::Null,
    };
    format!(
        "{SHA256_PREFIX}{}",
        sha256_text_hex(&canonical_json_string(&payload))
    )
}

/// Values a permit must be bound to. Only non-empty expectations are
/// checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermitBindings {
    pub lane_id: Option<String>,
    pub attestation_nonce: Option<String>,
    pub law_bundle_sha256: Option<String>,
    pub plan_hash_sha3_512: Option<String>,
    pub intent_hash_sha3_512: Option<String>,
}

impl PermitBindings {
    pub fn to_value(&self) -> Value {
        json!({
            "lane_id": self.lane_id,
            "attestation_nonce": self.attestation_nonce,
            "law_bundle_sha256": self.law_bundle_sha256,
            "plan_hash_sha3_512": self.plan_hash_sha3_512,
            "intent_hash_sha3_512": self.intent_hash_sha3_512,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermitRejection {
    pub code: PermitCode,
    pub reason: String,
}

impl PermitRejection {
    fn new(code: PermitCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    fn scope(reason: impl Into<String>) -> Self {
        Self::new(PermitCode::PermitScopeViolation, reason)
    }
}

impl fmt::Display for PermitRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.reason)
    }
}

/// Lenient read-only view over one scope object. A flag is set only when
/// it is literally `true`.
#[derive(Debug, Clone, Copy)]
struct ScopeView<'a>(Option<&'a Map<String, Value>>);

impl<'a> ScopeView<'a> {
    fn of(value: Option<&'a Value>) -> Self {
        Self(value.and_then(Value::as_object))
    }

    fn child(&self, key: &str) -> Option<ScopeView<'a>> {
        self.0?.get(key)?.as_object().map(|m| ScopeView(Some(m)))
    }

    fn flag(&self, key: &str) -> bool {
        self.0.and_then(|m| m.get(key)).and_then(Value::as_bool) == Some(true)
    }

    fn text(&self, key: &str) -> String {
        match self.0.and_then(|m| m.get(key)) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// Top-level string field; non-strings read as empty.
    fn string_field(&self, key: &str) -> String {
        self.0
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    }

    fn raw_list(&self, key: &str) -> Option<&'a Vec<Value>> {
        self.0?.get(key)?.as_array()
    }

    fn strings(&self, key: &str) -> Vec<String> {
        self.raw_list(key)
            .map(|items| {
                items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Numeric threshold. Numbers and numeric strings count, null is zero,
    /// anything else is absent.
    fn number(&self, key: &str) -> Option<f64> {
        match self.0.and_then(|m| m.get(key))? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Value::Null => Some(0.0),
            _ => None,
        }
    }
}

/// A permit that passed the base checks.
#[derive(Debug, Clone, Copy)]
pub struct PermitGrant<'a> {
    permit: &'a Value,
    scope: ScopeView<'a>,
}

/// Validate the base permit against the expected bindings at `now`.
pub fn validate_permit<'a>(
    permit: &'a Value,
    expected: &PermitBindings,
    now: &str,
) -> Result<PermitGrant<'a>, PermitRejection> {
    let Some(obj) = permit.as_object() else {
        return Err(PermitRejection::new(
            PermitCode::InvalidPermit,
            "execution permit must be an object",
        ));
    };
    let version = obj.get("version").and_then(Value::as_str).unwrap_or("");
    if obj.get("schema_id").and_then(Value::as_str) != Some(PERMIT_SCHEMA_ID)
        || !PERMIT_VERSIONS.contains(&version)
    {
        return Err(PermitRejection::new(
            PermitCode::InvalidPermit,
            "permit schema_id/version mismatch",
        ));
    }

    let provided = obj.get(PERMIT_HASH_FIELD).and_then(Value::as_str).unwrap_or("");
    if provided != compute_permit_sha256(permit) {
        return Err(PermitRejection::new(
            PermitCode::InvalidPermit,
            "permit self-hash mismatch",
        ));
    }

    if let Some(expiry) = obj.get("expiry_ts").and_then(Value::as_str)
        && is_expired(expiry, now)
    {
        return Err(PermitRejection::new(PermitCode::PermitExpired, "permit expired"));
    }

    let top = ScopeView::of(Some(permit));
    let bindings = top.child("bindings").unwrap_or(ScopeView(None));
    let checks: [(&Option<String>, String, &str); 5] = [
        (&expected.lane_id, top.string_field("lane_id"), "lane_id binding mismatch"),
        (
            &expected.attestation_nonce,
            top.string_field("attestation_nonce"),
            "attestation_nonce binding mismatch",
        ),
        (
            &expected.law_bundle_sha256,
            bindings.text("law_bundle_sha256"),
            "law bundle binding mismatch",
        ),
        (
            &expected.plan_hash_sha3_512,
            bindings.text("plan_hash_sha3_512"),
            "plan hash binding mismatch",
        ),
        (
            &expected.intent_hash_sha3_512,
            bindings.text("intent_hash_sha3_512"),
            "intent hash binding mismatch",
        ),
    ];
    for (want, actual, reason) in checks {
        if let Some(want) = want.as_deref().filter(|w| !w.is_empty())
            && actual != want
        {
            return Err(PermitRejection::new(PermitCode::PermitBindingMismatch, reason));
        }
    }

    let scope = top.child("scope").unwrap_or(ScopeView(None));
    if scope.text("execution_target") != SANDBOX_TARGET {
        return Err(PermitRejection::scope("execution_target must be SANDBOX"));
    }

    let fs = scope.child("filesystem").unwrap_or(ScopeView(None));
    let roots = ["read_roots", "write_roots", "deny_paths"]
        .iter()
        .flat_map(|key| fs.raw_list(key).into_iter().flatten());
    for root in roots {
        if !root.as_str().is_some_and(is_repo_relative) {
            return Err(PermitRejection::new(
                PermitCode::InvalidPermit,
                "permit contains non-repo-relative paths",
            ));
        }
    }

    Ok(PermitGrant { permit, scope })
}

/// Publish surface family a permit can allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishSurface {
    Post,
    Thread,
}

impl PublishSurface {
    pub fn as_str(self) -> &'static str {
        match self {
            PublishSurface::Post => "x",
            PublishSurface::Thread => "x_thread",
        }
    }
}

impl<'a> PermitGrant<'a> {
    pub fn permit(&self) -> &'a Value {
        self.permit
    }

    pub fn permit_sha256(&self) -> String {
        compute_permit_sha256(self.permit)
    }

    pub fn version(&self) -> &'a str {
        self.permit
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Deny paths win over read and write roots. An empty path is not
    /// checked.
    pub fn check_filesystem(&self, op: &str, rel_path: &str) -> Result<(), PermitRejection> {
        if rel_path.is_empty() {
            return Ok(());
        }
        let fs = self.scope.child("filesystem").unwrap_or(ScopeView(None));
        if path_within_roots(rel_path, &fs.strings("deny_paths")) {
            return Err(PermitRejection::scope("path denied by permit"));
        }
        match op {
            "read" if !path_within_roots(rel_path, &fs.strings("read_roots")) => {
                Err(PermitRejection::scope("path not within permit read_roots"))
            }
            "write" if !path_within_roots(rel_path, &fs.strings("write_roots")) => {
                Err(PermitRejection::scope("path not within permit write_roots"))
            }
            _ => Ok(()),
        }
    }

    /// Limits applied to a governed write, measured on its diff preview.
    pub fn check_write_diff(&self, diff_bytes: u64, stats: &DiffStats) -> Result<(), PermitRejection> {
        let allowed_ops = self.scope.raw_list("allowed_ops").map(|_| self.scope.strings("allowed_ops"));
        if !allowed_ops.is_some_and(|ops| ops.iter().any(|op| op == FILE_WRITE_OP)) {
            return Err(PermitRejection::new(
                PermitCode::PermitOpNotAllowed,
                "permit.allowed_ops must include file.write to apply patch",
            ));
        }

        let (Some(max_bytes), Some(max_added), Some(max_removed)) = (
            self.scope.number("max_diff_bytes"),
            self.scope.number("max_added_lines"),
            self.scope.number("max_removed_lines"),
        ) else {
            return Err(PermitRejection::new(
                PermitCode::PermitDiffScopeViolation,
                "permit missing diff threshold fields",
            ));
        };

        if diff_bytes as f64 > max_bytes {
            return Err(PermitRejection::new(
                PermitCode::DiffTooLarge,
                "diff exceeds max_diff_bytes",
            ));
        }
        if stats.added_lines as f64 > max_added || stats.removed_lines as f64 > max_removed {
            return Err(PermitRejection::new(
                PermitCode::DiffLineLimitExceeded,
                "diff exceeds line thresholds",
            ));
        }
        Ok(())
    }

    /// Local-only git: remotes and pushes denied, branch under the allowed
    /// prefix, every pipeline step explicitly allowed.
    pub fn check_git(&self, expected_base_branch: &str, branch: &str) -> Result<(), PermitRejection> {
        if self.version() != PERMIT_GIT_VERSION {
            return Err(PermitRejection::scope("git scope requires permit version 0.2.0"));
        }
        let Some(git) = self.scope.child("git") else {
            return Err(PermitRejection::scope("git scope missing"));
        };
        if !git.flag("deny_remote") || !git.flag("deny_push") {
            return Err(PermitRejection::scope("git deny_remote/deny_push must be true"));
        }
        if !git.flag("allow") {
            return Err(PermitRejection::scope("git.allow must be true"));
        }
        if !expected_base_branch.is_empty() && git.text("allowed_base_branch") != expected_base_branch {
            return Err(PermitRejection::scope("base branch not allowed by permit"));
        }
        let prefix = git.text("allowed_branch_prefix");
        if prefix.is_empty() || !branch.starts_with(&prefix) {
            return Err(PermitRejection::scope("branch prefix not allowed"));
        }
        if git.text("repo_root") != "." {
            return Err(PermitRejection::scope("git.repo_root must be '.'"));
        }
        for step in [
            "allow_create_branch",
            "allow_apply_patch",
            "allow_stage",
            "allow_commit",
        ] {
            if !git.flag(step) {
                return Err(PermitRejection::scope(format!("git.{step} must be true")));
            }
        }
        Ok(())
    }

    pub fn check_publish(
        &self,
        surface: PublishSurface,
        payload_bytes: u64,
        has_commit_binding: bool,
    ) -> Result<(), PermitRejection> {
        let violation = |reason: &str| PermitRejection::new(PermitCode::PublishScopeViolation, reason);
        let Some(publish) = self.scope.child("publish") else {
            return Err(violation("publish scope missing"));
        };
        if !publish.flag("allow") {
            return Err(violation("publish.allow must be true"));
        }
        let allowed = publish.strings("allowed_surfaces");
        let wanted = surface.as_str();
        if !allowed.iter().any(|s| s == wanted || s == PublishSurface::Post.as_str()) {
            return Err(violation("surface not allowed by permit"));
        }
        if let Some(max) = publish.number("max_payload_bytes")
            && max > 0.0
            && payload_bytes as f64 > max
        {
            return Err(PermitRejection::new(
                PermitCode::PayloadTooLarge,
                "payload exceeds max_payload_bytes",
            ));
        }
        if publish.flag("require_commit_binding") && !has_commit_binding {
            return Err(PermitRejection::new(
                PermitCode::MissingPostBinding,
                "commit/receipt binding required",
            ));
        }
        Ok(())
    }

    /// The egress scope, once it is open and well formed.
    pub fn check_egress(&self) -> Result<EgressScope, PermitRejection> {
        let violation = |reason: &str| PermitRejection::new(PermitCode::EgressScopeViolation, reason);
        let Some(egress) = self.egress_value() else {
            return Err(violation("egress scope missing"));
        };
        let Some(scope) = EgressScope::from_value(egress) else {
            return Err(violation("egress scope missing"));
        };
        if !scope.allow {
            return Err(violation("egress.allow must be true"));
        }
        if !scope.allowlist.iter().all(Value::is_string) {
            return Err(PermitRejection::new(
                PermitCode::InvalidPermit,
                "egress.allowlist must be string[]",
            ));
        }
        Ok(scope)
    }

    pub fn egress_value(&self) -> Option<&'a Value> {
        self.scope.0?.get("egress").filter(|v| v.is_object())
    }

    pub fn check_exec(&self, env_profile: &str, cmd: &str) -> Result<(), PermitRejection> {
        let Some(exec) = self.scope.child("exec") else {
            return Err(PermitRejection::scope("exec scope missing"));
        };
        check_command_scope(exec, "exec", env_profile, cmd)
    }

    /// Exec rules plus a repo-relative lockfile inside any declared roots.
    pub fn check_deps(&self, env_profile: &str, cmd: &str, lockfile_path: &str) -> Result<(), PermitRejection> {
        let Some(deps) = self.scope.child("deps") else {
            return Err(PermitRejection::scope("deps scope missing"));
        };
        check_command_scope(deps, "deps", env_profile, cmd)?;

        if lockfile_path.is_empty() || lockfile_path == OUTSIDE_REPO || !is_repo_relative(lockfile_path) {
            return Err(PermitRejection::scope("lockfile_path must be repo-relative"));
        }
        let roots = deps.strings("lockfile_roots");
        if !roots.is_empty() && !path_within_roots(lockfile_path, &roots) {
            return Err(PermitRejection::scope(
                "lockfile_path not within permit lockfile_roots",
            ));
        }
        Ok(())
    }
}

fn check_command_scope(
    scope: ScopeView<'_>,
    name: &str,
    env_profile: &str,
    cmd: &str,
) -> Result<(), PermitRejection> {
    if !scope.flag("allow") {
        return Err(PermitRejection::scope(format!("{name}.allow must be true")));
    }
    if env_profile.is_empty() {
        return Err(PermitRejection::new(
            PermitCode::ExecProfileNotAllowed,
            "env_profile required",
        ));
    }
    if !scope.strings("profiles").iter().any(|p| p == env_profile) {
        return Err(PermitRejection::new(
            PermitCode::ExecProfileNotAllowed,
            "env_profile not allowed by permit",
        ));
    }
    if !scope.strings("allowed_cmds").iter().any(|c| c == cmd) {
        return Err(PermitRejection::new(
            PermitCode::ExecCmdNotAllowed,
            "cmd not allowed by permit",
        ));
    }
    Ok(())
}

/// Seal a permit body by computing and inserting its self-hash.
pub fn seal_permit(mut permit: Value) -> Value {
    let hash = compute_permit_sha256(&permit);
    if let Some(obj) = permit.as_object_mut() {
        obj.insert(PERMIT_HASH_FIELD.to_string(), Value::String(hash));
    }
    permit
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: &str = "2026-02-13T00:00:00Z";

    fn body() -> Value {
        json!({
            "schema_id": PERMIT_SCHEMA_ID,
            "version": "0.2.0",
            "lane_id": "lane",
            "attestation_nonce": "n1",
            "expiry_ts": "2026-03-01T00:00:00Z",
            "bindings": {
                "law_bundle_sha256": "sha256:law",
                "plan_hash_sha3_512": "sha3-512:p",
                "intent_hash_sha3_512": "sha3-512:i"
            },
            "scope": {
                "execution_target": "SANDBOX",
                "filesystem": {
                    "read_roots": ["sandbox", "docs"],
                    "write_roots": ["sandbox"],
                    "deny_paths": ["sandbox/secret"]
                },
                "allowed_ops": ["file.read", "file.write"],
                "max_diff_bytes": 200,
                "max_added_lines": 5,
                "max_removed_lines": 5,
                "git": {
                    "allow": true, "deny_remote": true, "deny_push": true,
                    "allowed_base_branch": "main", "allowed_branch_prefix": "egl/",
                    "repo_root": ".", "allow_create_branch": true, "allow_apply_patch": true,
                    "allow_stage": true, "allow_commit": true
                },
                "publish": {"allow": true, "allowed_surfaces": ["x_thread"], "max_payload_bytes": 10, "require_commit_binding": true},
                "egress": {"allow": true, "allowlist": ["example.com"]},
                "exec": {"allow": true, "profiles": ["ci"], "allowed_cmds": ["npm test"]},
                "deps": {"allow": true, "profiles": ["ci"], "allowed_cmds": ["npm ci"], "lockfile_roots": ["sandbox"]}
            }
        })
    }

    fn expected() -> PermitBindings {
        PermitBindings {
            lane_id: Some("lane".to_string()),
            attestation_nonce: Some("n1".to_string()),
            law_bundle_sha256: Some("sha256:law".to_string()),
            plan_hash_sha3_512: Some("sha3-512:p".to_string()),
            intent_hash_sha3_512: Some("sha3-512:i".to_string()),
        }
    }

    fn code_of(result: Result<PermitGrant<'_>, PermitRejection>) -> PermitCode {
        result.expect_err("rejected").code
    }

    #[test]
    fn sealed_permit_validates() {
        let permit = seal_permit(body());
        let grant = validate_permit(&permit, &expected(), NOW).expect("valid");
        assert_eq!(grant.permit_sha256(), permit[PERMIT_HASH_FIELD].as_str().unwrap_or(""));
        assert!(grant.permit_sha256().starts_with("sha256:"));
    }

    #[test]
    fn scope_tamper_is_invalid() {
        let mut permit = seal_permit(body());
        permit["scope"]["filesystem"]["write_roots"] = json!(["sandbox", "docs"]);
        let err = validate_permit(&permit, &expected(), NOW).expect_err("tampered");
        assert_eq!(err.code, PermitCode::InvalidPermit);
        assert_eq!(err.reason, "permit self-hash mismatch");
    }

    #[test]
    fn base_check_order() {
        assert_eq!(code_of(validate_permit(&json!("x"), &expected(), NOW)), PermitCode::InvalidPermit);

        let mut old = body();
        old["version"] = json!("9.9.9");
        assert_eq!(code_of(validate_permit(&seal_permit(old), &expected(), NOW)), PermitCode::InvalidPermit);

        let permit = seal_permit(body());
        assert_eq!(
            code_of(validate_permit(&permit, &expected(), "2026-04-01T00:00:00Z")),
            PermitCode::PermitExpired
        );

        let mut other_plan = expected();
        other_plan.plan_hash_sha3_512 = Some("sha3-512:other".to_string());
        let err = validate_permit(&permit, &other_plan, NOW).expect_err("binding");
        assert_eq!(err.code, PermitCode::PermitBindingMismatch);
        assert_eq!(err.reason, "plan hash binding mismatch");

        let mut unbound = expected();
        unbound.lane_id = Some(String::new());
        unbound.attestation_nonce = None;
        assert!(validate_permit(&permit, &unbound, NOW).is_ok());

        let mut host = body();
        host["scope"]["execution_target"] = json!("HOST");
        assert_eq!(
            code_of(validate_permit(&seal_permit(host), &expected(), NOW)),
            PermitCode::PermitScopeViolation
        );

        let mut absolute = body();
        absolute["scope"]["filesystem"]["deny_paths"] = json!(["/etc"]);
        assert_eq!(
            code_of(validate_permit(&seal_permit(absolute), &expected(), NOW)),
            PermitCode::InvalidPermit
        );
    }

    #[test]
    fn filesystem_deny_wins() {
        let permit = seal_permit(body());
        let grant = validate_permit(&permit, &expected(), NOW).expect("valid");
        assert!(grant.check_filesystem("read", "docs/readme.md").is_ok());
        assert!(grant.check_filesystem("write", "sandbox/a.txt").is_ok());
        let denied = grant.check_filesystem("read", "sandbox/secret/key").expect_err("deny");
        assert_eq!(denied.reason, "path denied by permit");
        let outside = grant.check_filesystem("write", "docs/readme.md").expect_err("write root");
        assert_eq!(outside.reason, "path not within permit write_roots");
        assert!(grant.check_filesystem("delete", "anything").is_ok());
    }

    #[test]
    fn write_diff_limits() {
        let permit = seal_permit(body());
        let grant = validate_permit(&permit, &expected(), NOW).expect("valid");
        let stats = |added, removed| DiffStats {
            added_lines: added,
            removed_lines: removed,
            changed_lines: None,
            bytes_before: 0,
            bytes_after: 0,
            bytes_delta: 0,
        };
        assert!(grant.check_write_diff(100, &stats(2, 2)).is_ok());
        assert_eq!(grant.check_write_diff(201, &stats(2, 2)).expect_err("big").code, PermitCode::DiffTooLarge);
        assert_eq!(
            grant.check_write_diff(100, &stats(6, 0)).expect_err("lines").code,
            PermitCode::DiffLineLimitExceeded
        );

        let mut no_ops = body();
        no_ops["scope"]["allowed_ops"] = json!(["file.read"]);
        let sealed = seal_permit(no_ops);
        let grant = validate_permit(&sealed, &expected(), NOW).expect("valid");
        assert_eq!(
            grant.check_write_diff(1, &stats(1, 1)).expect_err("op").code,
            PermitCode::PermitOpNotAllowed
        );

        let mut no_limits = body();
        if let Some(scope) = no_limits["scope"].as_object_mut() {
            scope.remove("max_added_lines");
        }
        let sealed = seal_permit(no_limits);
        let grant = validate_permit(&sealed, &expected(), NOW).expect("valid");
        assert_eq!(
            grant.check_write_diff(1, &stats(1, 1)).expect_err("limits").code,
            PermitCode::PermitDiffScopeViolation
        );
    }

    #[test]
    fn git_scope() {
        let permit = seal_permit(body());
        let grant = validate_permit(&permit, &expected(), NOW).expect("valid");
        assert!(grant.check_git("main", "egl/feature").is_ok());
        assert_eq!(
            grant.check_git("main", "feature").expect_err("prefix").reason,
            "branch prefix not allowed"
        );

        let mut v1 = body();
        v1["version"] = json!("0.1.0");
        let sealed = seal_permit(v1);
        let grant = validate_permit(&sealed, &expected(), NOW).expect("valid");
        assert_eq!(
            grant.check_git("main", "egl/x").expect_err("version").code,
            PermitCode::PermitScopeViolation
        );

        let mut push = body();
        push["scope"]["git"]["deny_push"] = json!(false);
        let sealed = seal_permit(push);
        let grant = validate_permit(&sealed, &expected(), NOW).expect("valid");
        assert_eq!(
            grant.check_git("main", "egl/x").expect_err("push").reason,
            "git deny_remote/deny_push must be true"
        );
    }

    #[test]
    fn publish_scope() {
        let permit = seal_permit(body());
        let grant = validate_permit(&permit, &expected(), NOW).expect("valid");
        assert!(grant.check_publish(PublishSurface::Thread, 10, true).is_ok());
        assert_eq!(
            grant.check_publish(PublishSurface::Post, 1, true).expect_err("surface").code,
            PermitCode::PublishScopeViolation
        );
        assert_eq!(
            grant.check_publish(PublishSurface::Thread, 11, true).expect_err("size").code,
            PermitCode::PayloadTooLarge
        );
        assert_eq!(
            grant.check_publish(PublishSurface::Thread, 1, false).expect_err("binding").code,
            PermitCode::MissingPostBinding
        );
    }

    #[test]
    fn egress_exec_deps_scopes() {
        let permit = seal_permit(body());
        let grant = validate_permit(&permit, &expected(), NOW).expect("valid");
        assert!(grant.check_egress().expect("egress").allow);

        assert!(grant.check_exec("ci", "npm test").is_ok());
        assert_eq!(grant.check_exec("", "npm test").expect_err("profile").code, PermitCode::ExecProfileNotAllowed);
        assert_eq!(grant.check_exec("ci", "rm -rf").expect_err("cmd").code, PermitCode::ExecCmdNotAllowed);

        assert!(grant.check_deps("ci", "npm ci", "sandbox/package-lock.json").is_ok());
        assert_eq!(
            grant.check_deps("ci", "npm ci", OUTSIDE_REPO).expect_err("outside").code,
            PermitCode::PermitScopeViolation
        );
        assert_eq!(
            grant.check_deps("ci", "npm ci", "package-lock.json").expect_err("root").reason,
            "lockfile_path not within permit lockfile_roots"
        );

        let mut bad = body();
        bad["scope"]["egress"]["allowlist"] = json!(["example.com", 443]);
        let sealed = seal_permit(bad);
        let grant = validate_permit(&sealed, &expected(), NOW).expect("valid");
        assert_eq!(grant.check_egress().expect_err("list").code, PermitCode::InvalidPermit);
    }
}
