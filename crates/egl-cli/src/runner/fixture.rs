//! One fixture: compile, admit, governed gates, executor, evidence.
//!
//! Gates only ever tighten an admitted outcome; the first refusal a fixture
//! meets is the one it keeps. The single exception is a law-bundle mismatch,
//! which replaces whatever verdict came before it.

use std::fs;
use std::path::Path;

use egl_kernel::canonical::{SHA256_PREFIX, sha256_stable, sha256_tagged, to_canonical_value};
use egl_kernel::capability::{AuthorityDiff, capability_diff_digest};
use egl_kernel::clock::is_expired;
use egl_kernel::compiler::PlanAction;
use egl_kernel::diff::unified_diff;
use egl_kernel::egress::{EGRESS_CHECK_SCHEMA_ID, EgressScope, evaluate_egress};
use egl_kernel::envelope::{DRAFTS_ROOT, derive_write_after_text};
use egl_kernel::guard::{FileAttestation, binding_nonce, toctou_recheck};
use egl_kernel::intent::{FileAction, OUTSIDE_REPO};
use egl_kernel::ledger::seq;
use egl_kernel::paths::safe_rel_path;
use egl_kernel::permit::{PublishSurface, compute_permit_sha256};
use egl_kernel::policy::QUORUM_REQUIRED;
use egl_kernel::receipt::{
    CommandSpec, ExecutionRecord, PostStubReceipt, RatificationSummary, ReceiptBinding, SkillInstallStubReceipt,
    StubRun, deps_artifacts, stub_result, test_artifacts,
};
use egl_kernel::sce::{SCE_ALLOW, SceDecision, SupplyChainEvidence};
use egl_kernel::token::{approver_id, token_sha256};
use egl_kernel::{
    AdmissionCode, AdmissionContext, ActionAdmissionRecord, Attestation, Compilation, Envelope, GateCode,
    GitRatificationToken, GuardCode, Intent, LedgerRecord, NonceRecord, Outcome, PermitBindings, PermitCode,
    PermitGrant, PermitRejection, PublishPostRatificationToken, ReasonCode, RefusalStatus, Tool, TokenBindings,
    admit, build_envelope, compile, normalize_to_intent, redact_for_io, validate_permit, validate_token,
};
use egl_store::{
    ArtifactWriter, ExecRefusal, FixtureDocument, LiveAttestationBundle, StoreError, WritePayload, load_fixture,
    prepare_toctou, simulate_toctou_swap,
};
use serde_json::{Value, json};

use super::evidence::{
    CommandFacts, DiffPreview, DraftFacts, EGRESS_CHECK_BUNDLE_SCHEMA_ID, EVIDENCE_VERSION, EgressFacts, GitFacts,
    PERMIT_HASH_SCHEMA_ID, PermitCheck, PostFacts, SkillFacts, permit_validation_record,
};
use super::{RUN_VERSION, RunContext, RunRecords};

pub const IO_SCHEMA_ID: &str = "EGL.IO";
pub const DECISION_SCHEMA_ID: &str = "EGL.DECISION";

const SURFACE_DRAFT_CREATE: &str = "publish.draft.create";
const SURFACE_DRAFT_COMMIT: &str = "publish.draft.commit";
const SURFACE_BROWSER: &str = "browser.navigate";
const SURFACE_PATCH: &str = "code.patch.apply";
const SURFACE_TEST: &str = "code.test.run";
const SURFACE_DEPS: &str = "code.deps.fetch";
const GIT_BASE_BRANCH: &str = "main";

/// What the run keeps about one evaluated fixture.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureReport {
    pub fixture_id: String,
    pub intent_path: String,
    pub outcome: Outcome,
    pub intent_hash: Option<String>,
    pub plan_hash: Option<String>,
    pub executor_invoked: bool,
    /// `result.json` or `file_receipt.json` exists for the fixture.
    pub execution_artifacts: bool,
    pub pre_state_hash_sha256: Option<String>,
    pub post_state_hash_sha256: Option<String>,
}

/// Read a fixture document as an intent. Tool calls go through the
/// envelope; the proxy source accepts nothing else.
pub(crate) fn load_intent(
    ctx: &RunContext,
    fixture_id: &str,
    intent_path: &str,
) -> Result<(Intent, Option<Envelope>), StoreError> {
    match load_fixture(&ctx.repo_root, intent_path)? {
        FixtureDocument::Intent(_) if ctx.source.is_proxy() => Err(StoreError::Contract(format!(
            "{fixture_id}: proxy source needs a tool call, found an intent at {intent_path}"
        ))),
        FixtureDocument::Intent(raw) => Ok((Intent::from_value(raw)?, None)),
        FixtureDocument::ToolCall(call) => {
            let envelope = build_envelope(&ctx.repo_root, fixture_id, &call)?;
            let intent = normalize_to_intent(&ctx.repo_root, &envelope)?;
            Ok((intent, Some(envelope)))
        }
    }
}

pub(crate) fn evaluate(
    ctx: &RunContext,
    records: &mut RunRecords,
    fixture_id: &str,
    intent_path: &str,
) -> Result<FixtureReport, StoreError> {
    let (intent, envelope) = load_intent(ctx, fixture_id, intent_path)?;
    let compilation = compile(&intent, &ctx.registry)?;

    let lane = match &envelope {
        Some(env) => env.binding_lane().to_string(),
        None => intent.meta.lane_id.clone().unwrap_or_default(),
    };
    let nonce = binding_nonce(
        ctx.attest,
        &intent.hash(),
        envelope.as_ref().and_then(Envelope::force_nonce),
        &records.guard,
    );
    let tokens = envelope
        .as_ref()
        .map(Envelope::skill_ratification_tokens)
        .unwrap_or_default();
    let admission = admit(
        &compilation,
        AdmissionContext::new(fixture_id)
            .with_binding_lane(lane.as_str())
            .with_nonce(nonce.clone().unwrap_or_default())
            .with_now(ctx.now.as_str())
            .with_tokens(tokens),
    )?;
    tracing::debug!(
        fixture_id,
        status = admission.outcome.status_str(),
        code = admission.outcome.reason_code().map(ReasonCode::as_str).unwrap_or(""),
        "admission decided"
    );

    let mut eval = Evaluation::new(ctx, fixture_id, intent_path, &intent, envelope.as_ref(), &compilation);
    eval.lane = lane;
    eval.nonce = nonce;
    eval.outcome = admission.outcome;

    eval.attest(records, &admission.aar)?;
    if ctx.source.is_proxy() {
        eval.binding_gates();
    }
    eval.toctou_gate()?;
    if ctx.source.is_proxy() {
        eval.proxy_gates()?;
    }
    eval.nonce_gate(records)?;
    eval.execute(records)?;
    eval.draft_commit_evidence()?;
    eval.skill_evidence()?;
    eval.finish(records, &admission.aar)
}

/// Current text of a write target. A missing file is empty; anything else
/// that keeps it from being read faults the run.
fn read_before_text(path: &Path) -> Result<String, StoreError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(StoreError::io(path, err)),
    }
}

/// Per-fixture state carried through the gates.
struct Evaluation<'a> {
    ctx: &'a RunContext,
    fixture_id: &'a str,
    intent_path: &'a str,
    intent: &'a Intent,
    envelope: Option<&'a Envelope>,
    compilation: &'a Compilation,
    writer: ArtifactWriter,

    lane: String,
    nonce: Option<String>,
    outcome: Outcome,

    snapshot: Option<FileAttestation>,
    toctou: Option<egl_store::sandbox::ToctouPaths>,
    permit: PermitCheck,
    grant: Option<PermitGrant<'a>>,
    expected: Option<PermitBindings>,
    pre_state: Option<String>,
    post_state: Option<String>,
    preview: Option<DiffPreview>,
    draft: Option<DraftFacts>,
    git: Option<GitFacts>,
    git_reason: Option<ReasonCode>,
    post: Option<PostFacts>,
    egress: Option<EgressFacts>,
    command: Option<CommandFacts>,
    skill: Option<SkillFacts>,
    executor_invoked: bool,
    file_receipt_hash: Option<String>,
}

impl<'a> Evaluation<'a> {
    fn new(
        ctx: &'a RunContext,
        fixture_id: &'a str,
        intent_path: &'a str,
        intent: &'a Intent,
        envelope: Option<&'a Envelope>,
        compilation: &'a Compilation,
    ) -> Self {
        Self {
            ctx,
            fixture_id,
            intent_path,
            intent,
            envelope,
            compilation,
            writer: ctx.fixture_out(fixture_id),
            lane: String::new(),
            nonce: None,
            outcome: Outcome::admitted(),
            snapshot: None,
            toctou: None,
            permit: PermitCheck::NotRequired,
            grant: None,
            expected: None,
            pre_state: None,
            post_state: None,
            preview: None,
            draft: None,
            git: None,
            git_reason: None,
            post: None,
            egress: None,
            command: None,
            skill: None,
            executor_invoked: false,
            file_receipt_hash: None,
        }
    }

    fn first_action(&self) -> Option<&'a PlanAction> {
        self.compilation.plan().and_then(|plan| plan.first_action())
    }

    fn file_action(&self) -> Option<&'a FileAction> {
        self.first_action().and_then(|a| a.body.as_file())
    }

    fn surface(&self) -> &'a str {
        self.first_action().map(|a| a.tool_surface_id.as_str()).unwrap_or("")
    }

    fn tool(&self) -> Option<Tool> {
        self.envelope.and_then(Envelope::tool)
    }

    fn arg_text(&self, key: &str) -> String {
        self.envelope
            .and_then(|env| env.arg_str(key))
            .unwrap_or("")
            .to_string()
    }

    fn intent_hash(&self) -> Option<String> {
        self.compilation.intent_hash().map(str::to_string)
    }

    fn plan_hash(&self) -> Option<String> {
        self.compilation.plan_hash().map(str::to_string)
    }

    fn law_sha256(&self) -> &str {
        &self.ctx.law.law_bundle_sha256
    }

    fn is_post_surface(&self) -> bool {
        Tool::from_name(self.surface()).is_some_and(Tool::is_post)
    }

    fn is_write_attempt(&self) -> bool {
        self.outcome.is_admitted()
            && self.tool() != Some(Tool::SkillInstall)
            && self.file_action().is_some_and(|f| f.op == "write" && !f.path.is_empty())
    }

    fn is_patch_preview(&self) -> bool {
        self.surface() == SURFACE_PATCH
            && self
                .file_action()
                .is_some_and(|f| f.op == "write" && !f.path.is_empty() && f.path != OUTSIDE_REPO)
    }

    fn is_draft_commit(&self) -> bool {
        self.surface() == SURFACE_DRAFT_COMMIT && self.draft.is_some()
    }

    fn receipt_binding(&self) -> ReceiptBinding {
        ReceiptBinding {
            permit_sha256: self.permit_sha256(),
            law_bundle_sha256: Some(self.law_sha256().to_string()),
            plan_hash: self.plan_hash(),
            intent_hash: self.intent_hash(),
        }
    }

    fn permit_sha256(&self) -> Option<String> {
        self.envelope
            .and_then(Envelope::execution_permit)
            .filter(|p| p.is_object())
            .map(compute_permit_sha256)
    }

    fn has_permit(&self) -> bool {
        self.envelope.and_then(Envelope::execution_permit).is_some()
    }

    fn attestation_nonce(&self) -> Option<String> {
        self.outcome.is_admitted().then(|| self.nonce.clone()).flatten()
    }

    /// Replace an admitted outcome; a refused one stays as it is.
    fn tighten(&mut self, next: Outcome) {
        if !self.outcome.is_admitted() {
            return;
        }
        tracing::debug!(
            fixture_id = self.fixture_id,
            code = next.reason_code().map(ReasonCode::as_str).unwrap_or(""),
            status = next.status_str(),
            "gate tightened outcome"
        );
        self.outcome = next;
    }

    fn refuse(&mut self, code: impl Into<ReasonCode>) {
        self.tighten(Outcome::hard(code));
    }

    fn attest(&mut self, records: &mut RunRecords, aar: &ActionAdmissionRecord) -> Result<(), StoreError> {
        let live = self.ctx.attest.is_live();
        if live
            && self.ctx.source.is_proxy()
            && self.ctx.toctou_swaps.contains(self.fixture_id)
            && self.file_action().is_some()
        {
            let paths = prepare_toctou(&self.ctx.repo_root)?;
            self.writer.write("toctou.paths.json", &paths.record())?;
            records.leak_roots.push(paths.dir.clone());
            self.toctou = Some(paths);
        }
        if !aar.is_ok() {
            return Ok(());
        }
        if live {
            if let Some(plan) = self.compilation.plan() {
                let bundle = LiveAttestationBundle::probe(&self.ctx.probe, plan);
                self.writer.write("attestation.json", &bundle)?;
                self.snapshot = bundle.file_entry().cloned();
            }
        } else if let Some(attestation) = Attestation::of(aar) {
            self.writer.write("attestation.json", &attestation)?;
        }
        Ok(())
    }

    /// Law bundle, lane and expiry: what the envelope claims to be bound to.
    fn binding_gates(&mut self) {
        let Some(env) = self.envelope else {
            return;
        };
        if let Some(expected) = env.expected_law_bundle_sha256()
            && expected != self.law_sha256()
        {
            tracing::warn!(fixture_id = self.fixture_id, expected, "law bundle mismatch");
            self.outcome = Outcome::hard(GateCode::PolicyVersionMismatch);
        }
        if !env.lane_id.is_empty() && env.lane_id != env.binding_lane() {
            self.refuse(GateCode::LaneMismatch);
        }
        if let Some(expiry) = env.expiry_ts()
            && is_expired(expiry, &self.ctx.now)
        {
            self.refuse(GateCode::PlanExpired);
        }
    }

    /// Live runs re-attest an admitted file action right before execution.
    fn toctou_gate(&mut self) -> Result<(), StoreError> {
        if !self.ctx.attest.is_live() || !self.outcome.is_admitted() {
            return Ok(());
        }
        let (Some(file), Some(snapshot)) = (self.file_action(), self.snapshot.clone()) else {
            return Ok(());
        };
        if let Some(paths) = &self.toctou {
            let swap = simulate_toctou_swap(paths)?;
            self.writer.write("toctou.swap.json", &swap)?;
        }
        let op = if file.op.is_empty() { "unknown" } else { file.op.as_str() };
        match toctou_recheck(&self.ctx.probe, &snapshot, op, &file.path) {
            Ok(recheck) => {
                self.writer.write("attestation.recheck.json", &recheck)?;
            }
            Err((recheck, rejection)) => {
                self.writer.write("attestation.recheck.json", &recheck)?;
                self.refuse(rejection.code);
            }
        }
        Ok(())
    }

    fn proxy_gates(&mut self) -> Result<(), StoreError> {
        let Some(env) = self.envelope else {
            return Ok(());
        };
        self.surface_prerequisites(env);

        self.pre_state = self
            .file_action()
            .filter(|f| !f.path.is_empty())
            .and_then(|f| self.ctx.executor.file_state_sha256(&f.path));

        if self.is_write_attempt() || self.is_patch_preview() {
            self.diff_preview(env)?;
        }
        if self.tool() == Some(Tool::GitPipelineCommit) && self.outcome.is_admitted() {
            self.git_reference(env)?;
        }

        self.validate_permit(env);
        self.post_token(env);
        self.git_token(env);
        self.write_permit_artifacts()?;

        if self.surface() == SURFACE_BROWSER {
            self.browser_egress()?;
        }
        if self.surface() == SURFACE_DEPS {
            self.deps_egress()?;
        }
        Ok(())
    }

    /// Permit presence and surface-specific preconditions.
    fn surface_prerequisites(&mut self, env: &'a Envelope) {
        let surface = self.surface();
        let has_permit = self.has_permit();

        if self.outcome.is_admitted() && (surface == SURFACE_DRAFT_CREATE || surface == SURFACE_DRAFT_COMMIT) {
            let path = self.file_action().map(|f| f.path.clone());
            self.draft = Some(DraftFacts {
                path: path.clone(),
                draft_kind: env.arg_str("draft_kind").map(str::to_string),
                content_sha256: env.arg_str("content_sha256").map(str::to_string),
            });
            if !has_permit {
                self.refuse(PermitCode::PermitRequired);
            }
            if path.is_some_and(|p| !p.is_empty() && !p.starts_with(DRAFTS_ROOT)) {
                self.refuse(PermitCode::PermitScopeViolation);
            }
        }

        if self.tool().is_some_and(Tool::is_post) {
            let payload = self.arg_text("payload_text");
            self.post = Some(PostFacts {
                surface: if env.arg_str("post_kind") == Some("x_thread") {
                    PublishSurface::Thread
                } else {
                    PublishSurface::Post
                },
                payload_sha256: env.arg_str("payload_sha256").map(str::to_string),
                payload_bytes: payload.len() as u64,
                source_commit_hash: env.arg_str("source_commit_hash").map(str::to_string),
                source_receipt_hash_sha256: env.arg_str("source_receipt_hash_sha256").map(str::to_string),
                ratification_token_hash_sha256: None,
                stub_receipt_hash_sha256: None,
            });
            if !has_permit {
                self.refuse(PermitCode::PermitRequired);
            }
        }

        if (surface == SURFACE_BROWSER || surface == SURFACE_TEST) && !has_permit {
            self.refuse(PermitCode::PermitRequired);
        }

        if surface == SURFACE_TEST || surface == SURFACE_DEPS {
            let lockfile_path = self.arg_text("lockfile_path");
            self.command = Some(CommandFacts {
                lockfile_sha256: self.ctx.executor.file_state_sha256(&lockfile_path),
                lockfile_path,
                ..CommandFacts::default()
            });
        }
        if surface == SURFACE_DEPS {
            if !has_permit {
                self.refuse(PermitCode::PermitRequired);
            } else if !self.lockfile_exists() {
                self.refuse(GateCode::MissingLockfile);
            }
        }
    }

    fn lockfile_exists(&self) -> bool {
        let lockfile = self.arg_text("lockfile_path");
        if lockfile.is_empty() || lockfile == OUTSIDE_REPO {
            return false;
        }
        safe_rel_path(&self.ctx.repo_root, &lockfile)
            .filter(|rel| !rel.is_empty())
            .is_some_and(|rel| self.ctx.repo_root.join(rel).is_file())
    }

    fn command_spec(&self) -> CommandSpec {
        CommandSpec {
            cmd: self.arg_text("cmd"),
            cwd: self
                .envelope
                .and_then(|env| env.arg_str("cwd"))
                .unwrap_or(".")
                .to_string(),
            env_profile: self.arg_text("env_profile"),
        }
    }

    /// Whole-file diff of the write, persisted before any permit check.
    fn diff_preview(&mut self, env: &'a Envelope) -> Result<(), StoreError> {
        let Some(file) = self.file_action() else {
            return Ok(());
        };
        let Some(rel) = safe_rel_path(&self.ctx.repo_root, &file.path).filter(|rel| !rel.is_empty()) else {
            self.refuse(PermitCode::PermitScopeViolation);
            return Ok(());
        };
        let before = read_before_text(&self.ctx.repo_root.join(&rel))?;
        let after = derive_write_after_text(&file.path, &env.args);
        let diff = unified_diff(&file.path, &before, &after);
        let preview_hash = self
            .writer
            .write_value("diff.preview.json", &DiffPreview::record(&file.path, &diff))?;
        tracing::debug!(
            fixture_id = self.fixture_id,
            path = %file.path,
            diff_sha256 = %diff.sha256,
            "diff preview written"
        );
        self.preview = Some(DiffPreview {
            diff,
            after_text: after,
            preview_hash_sha256: preview_hash,
        });
        Ok(())
    }

    /// A git pipeline commits a diff some earlier fixture previewed.
    fn git_reference(&mut self, env: &'a Envelope) -> Result<(), StoreError> {
        let mut git = self.git_facts(env);
        let source = self.arg_text("source_diff_fixture_id");
        let source_out = self.ctx.fixture_out(&source);
        if source.is_empty() || !source_out.exists("diff.preview.json") {
            self.refuse(GateCode::GitDiffReferenceMissing);
        } else {
            let preview = source_out.read_value("diff.preview.json")?;
            git.diff_sha256 = preview.get("diff_sha256").and_then(Value::as_str).map(str::to_string);
            git.diff_preview_hash_sha256 = Some(sha256_tagged(&preview));
        }
        self.git = Some(git);
        Ok(())
    }

    fn git_facts(&self, env: &'a Envelope) -> GitFacts {
        GitFacts {
            branch: self.arg_text("git_branch"),
            base_branch: env.arg_str("base_branch").unwrap_or(GIT_BASE_BRANCH).to_string(),
            ratification_token_hash_sha256: env
                .ratification_token()
                .and_then(token_sha256::<GitRatificationToken>)
                .map(|h| format!("{SHA256_PREFIX}{h}")),
            ..GitFacts::default()
        }
    }

    fn permit_bindings(&self) -> PermitBindings {
        PermitBindings {
            lane_id: Some(self.lane.clone()),
            attestation_nonce: self.nonce.clone(),
            law_bundle_sha256: Some(self.law_sha256().to_string()),
            plan_hash_sha3_512: self.plan_hash(),
            intent_hash_sha3_512: self.intent_hash(),
        }
    }

    fn validate_permit(&mut self, env: &'a Envelope) {
        let surface = self.surface();
        let is_git = self.tool() == Some(Tool::GitPipelineCommit);
        let governed = self.file_action().is_some()
            || is_git
            || self.is_post_surface()
            || surface == SURFACE_BROWSER
            || surface == SURFACE_TEST
            || surface == SURFACE_DEPS;
        let eligible = self.outcome.is_admitted()
            || self.is_post_surface()
            || self.is_patch_preview()
            || surface == SURFACE_TEST
            || surface == SURFACE_DEPS;
        if !(eligible && governed) || self.tool() == Some(Tool::SkillInstall) {
            return;
        }

        let bindings = self.permit_bindings();
        let grant = match env.execution_permit() {
            None => Err(PermitCheck::missing()),
            Some(permit) => validate_permit(permit, &bindings, &self.ctx.now)
                .and_then(|grant| self.scope_checks(env, &grant).map(|()| grant))
                .map_err(PermitCheck::from),
        };
        match grant {
            Ok(grant) => {
                self.grant = Some(grant);
                self.permit = PermitCheck::Passed;
            }
            Err(check) => self.permit = check,
        }
        self.expected = Some(bindings);
        tracing::debug!(
            fixture_id = self.fixture_id,
            code = self.permit.code().unwrap_or("OK"),
            "permit evaluated"
        );
        if let Some(code) = self.permit.rejected_code() {
            self.refuse(code);
        }
    }

    fn scope_checks(&self, env: &'a Envelope, grant: &PermitGrant<'a>) -> Result<(), PermitRejection> {
        if let Some(file) = self.file_action() {
            grant.check_filesystem(&file.op, &file.path)?;
        }
        if self.is_write_attempt()
            && let Some(preview) = &self.preview
        {
            grant.check_write_diff(preview.diff.byte_len(), &preview.stats())?;
        }
        if let Some(post) = &self.post {
            grant.check_publish(post.surface, post.payload_bytes, post.has_source_binding())?;
        }
        let surface = self.surface();
        if surface == SURFACE_BROWSER {
            grant.check_egress()?;
        }
        let spec = self.command_spec();
        if surface == SURFACE_TEST {
            grant.check_exec(&spec.env_profile, &spec.cmd)?;
        }
        if surface == SURFACE_DEPS {
            grant.check_deps(&spec.env_profile, &spec.cmd, &self.arg_text("lockfile_path"))?;
        }
        if self.tool() == Some(Tool::GitPipelineCommit) || self.is_draft_commit() {
            grant.check_git(GIT_BASE_BRANCH, env.arg_str("git_branch").unwrap_or(""))?;
        }
        Ok(())
    }

    fn post_token_bindings(&self, post: &PostFacts) -> TokenBindings {
        TokenBindings::new()
            .with("law_bundle_sha256", self.law_sha256())
            .with("plan_hash", self.plan_hash().unwrap_or_default())
            .with("intent_hash", self.intent_hash().unwrap_or_default())
            .with("lane_id", self.lane.as_str())
            .with("attestation_nonce", self.nonce.clone().unwrap_or_default())
            .with("surface", post.surface.as_str())
            .with("payload_sha256", post.payload_sha256.clone().unwrap_or_default())
            .with("source_commit_hash", post.source_commit_hash.clone().unwrap_or_default())
            .with(
                "source_receipt_hash_sha256",
                post.source_receipt_hash_sha256.clone().unwrap_or_default(),
            )
    }

    /// Posts always need a ratification token; only live runs accept one.
    fn post_token(&mut self, env: &'a Envelope) {
        let Some(mut post) = self.post.clone() else {
            return;
        };
        if !self.is_post_surface() || !self.outcome.is_admitted() {
            return;
        }
        let token = env.ratification_token();
        post.ratification_token_hash_sha256 = token
            .and_then(token_sha256::<PublishPostRatificationToken>)
            .map(|h| format!("{SHA256_PREFIX}{h}"));
        let bindings = self.post_token_bindings(&post);
        self.post = Some(post);

        let Some(token) = token else {
            self.tighten(Outcome::defer(GateCode::HitlRequiredPublishPost));
            return;
        };
        match validate_token::<PublishPostRatificationToken>(token, &bindings, &self.ctx.now) {
            Err(rejection) => self.refuse(rejection.code),
            Ok(()) if self.ctx.attest.is_live() => {
                self.outcome = Outcome::admitted_with(AdmissionCode::HitlTokenAccepted);
            }
            Ok(()) => self.tighten(Outcome::defer(GateCode::HitlRequiredPublishPost)),
        }
    }

    fn git_token_bindings(&self, git: &GitFacts) -> TokenBindings {
        TokenBindings::new()
            .with("law_bundle_sha256", self.law_sha256())
            .with("plan_hash", self.plan_hash().unwrap_or_default())
            .with("intent_hash", self.intent_hash().unwrap_or_default())
            .with("lane_id", self.lane.as_str())
            .with("attestation_nonce", self.nonce.clone().unwrap_or_default())
            .with("git_branch", git.branch.as_str())
            .with("diff_sha256", git.diff_sha256.clone().unwrap_or_default())
    }

    /// A live token is checked, but git never runs: the pipeline defers.
    fn git_token(&mut self, env: &'a Envelope) {
        if self.tool() != Some(Tool::GitPipelineCommit) || !self.outcome.is_admitted() {
            return;
        }
        let Some(git) = self.git.clone() else {
            return;
        };
        if self.ctx.attest.is_live()
            && let Some(token) = env.ratification_token()
            && let Err(rejection) =
                validate_token::<GitRatificationToken>(token, &self.git_token_bindings(&git), &self.ctx.now)
        {
            self.refuse(rejection.code);
            return;
        }
        self.tighten(Outcome::defer(GateCode::HitlRequiredGitCommit));
    }

    fn write_permit_artifacts(&self) -> Result<(), StoreError> {
        let permit_sha256 = self.permit_sha256();
        self.writer.write_value(
            "permit.hash.json",
            &json!({
                "schema_id": PERMIT_HASH_SCHEMA_ID,
                "version": EVIDENCE_VERSION,
                "execution_permit_sha256": permit_sha256,
            }),
        )?;
        let permit_reason = self
            .outcome
            .reason_code()
            .is_some_and(|code| code.as_str().starts_with("PERMIT_"));
        let expected = permit_reason.then(|| self.expected.clone().unwrap_or_else(|| self.permit_bindings()));
        let git = self.git.as_ref().filter(|_| self.tool() == Some(Tool::GitPipelineCommit));
        let record = permit_validation_record(
            &self.permit,
            permit_sha256.as_deref(),
            self.preview.as_ref(),
            git,
            expected.as_ref(),
        );
        self.writer.write_value("permit.validation.json", &record)?;
        Ok(())
    }

    fn raw_permit_egress(&self) -> Option<&'a Value> {
        self.envelope
            .and_then(Envelope::execution_permit)
            .and_then(|p| p.get("scope"))
            .and_then(|s| s.get("egress"))
            .filter(|e| e.is_object())
    }

    fn validated_egress_scope(&self) -> Option<EgressScope> {
        if !self.permit.is_passed() {
            return None;
        }
        self.raw_permit_egress().and_then(EgressScope::from_value)
    }

    /// Why egress is refused before any verdict counts.
    fn egress_precondition(&self) -> Option<ReasonCode> {
        if !self.has_permit() {
            return Some(PermitCode::PermitRequired.into());
        }
        if !self.permit.is_passed() {
            return self
                .outcome
                .reason_code()
                .or_else(|| self.permit.rejected_code())
                .or(Some(PermitCode::InvalidPermit.into()));
        }
        None
    }

    fn browser_egress(&mut self) -> Result<(), StoreError> {
        let target = self
            .first_action()
            .and_then(|a| a.body.as_net())
            .map(|net| net.url.clone())
            .unwrap_or_default();
        let scope = self.validated_egress_scope();
        let verdict = evaluate_egress(&target, None, scope.as_ref());
        let reason = match self.egress_precondition() {
            Some(code) => Some(code),
            None => verdict.reason_code.map(ReasonCode::from),
        };
        if let Some(code) = reason {
            self.refuse(code);
        }
        let zone = to_canonical_value(&verdict.zone)?;
        self.writer.write_value(
            "egress.check.json",
            &json!({
                "schema_id": EGRESS_CHECK_SCHEMA_ID,
                "version": EVIDENCE_VERSION,
                "target_input": verdict.target_input,
                "canonical_target": verdict.canonical_target,
                "protocol": verdict.protocol,
                "zone": zone,
                "permit_egress_allow": self.raw_permit_egress().map(|e| e.get("allow") == Some(&Value::Bool(true))),
                "allowlist": verdict.allowlist,
                "status": if reason.is_some() { "refused" } else { "ok" },
                "reason_code": reason.map(ReasonCode::as_str),
            }),
        )?;
        self.egress = Some(EgressFacts {
            canonical_target: verdict.canonical_target,
            protocol: verdict.protocol,
            zone: Some(zone),
        });
        Ok(())
    }

    /// Dependency fetches reach their registry over HTTPS only.
    fn deps_egress(&mut self) -> Result<(), StoreError> {
        let scope = self.validated_egress_scope();
        let mut checks = Vec::new();
        let mut first_refused = None;
        for target in self.command_spec().egress_targets() {
            let verdict = evaluate_egress(&target, Some("HTTPS"), scope.as_ref());
            if first_refused.is_none() {
                first_refused = verdict.reason_code.map(ReasonCode::from);
            }
            checks.push(json!({
                "target_input": verdict.target_input,
                "canonical_target": verdict.canonical_target,
                "protocol": verdict.protocol,
                "zone": to_canonical_value(&verdict.zone)?,
                "status": verdict.status(),
                "reason_code": verdict.reason_code.map(|c| c.as_str()),
            }));
        }
        let reason = self.egress_precondition().or(first_refused);
        if let Some(code) = reason {
            self.refuse(code);
        }
        let raw = self.raw_permit_egress();
        self.writer.write_value(
            "deps.egress.check.json",
            &json!({
                "schema_id": EGRESS_CHECK_BUNDLE_SCHEMA_ID,
                "version": EVIDENCE_VERSION,
                "surface": SURFACE_DEPS,
                "permit_egress_allow": raw.map(|e| e.get("allow") == Some(&Value::Bool(true))),
                "allowlist": raw.and_then(|e| e.get("allowlist")).filter(|a| a.is_array()).cloned().unwrap_or(json!([])),
                "status": if reason.is_some() { "refused" } else { "ok" },
                "reason_code": reason.map(ReasonCode::as_str),
                "checks": checks,
            }),
        )?;
        Ok(())
    }

    /// Live runs spend each nonce once; the registry outlives the run.
    fn nonce_gate(&mut self, records: &mut RunRecords) -> Result<(), StoreError> {
        if !self.ctx.attest.is_live() || !self.outcome.is_admitted() {
            return Ok(());
        }
        let Some(nonce) = self.nonce.clone() else {
            self.refuse(GuardCode::NonceReplay);
            return Ok(());
        };
        let record = NonceRecord {
            nonce,
            intent_hash: self.intent_hash(),
            fixture_id: self.fixture_id.to_string(),
            lane_id: Some(self.lane.clone()),
            ts: self.ctx.now.clone(),
        };
        match records.guard.check_and_record(record) {
            Err(rejection) => self.refuse(rejection.code),
            Ok(record) => {
                if let Some(registry) = &records.nonce_registry {
                    registry.append(&record)?;
                }
            }
        }
        Ok(())
    }

    fn execute(&mut self, records: &mut RunRecords) -> Result<(), StoreError> {
        let mut record = ExecutionRecord::not_invoked(self.ctx.attest, &self.lane);
        record.expiry_ts = self.envelope.and_then(Envelope::expiry_ts).map(str::to_string);
        record.binding = if self.ctx.source.is_proxy() {
            Some(self.ctx.law_value()?)
        } else {
            None
        };
        record.execution_permit_sha256 = self.permit_sha256();
        record.permit_validation_code = self.permit.code().map(str::to_string);
        self.post_state = self.pre_state.clone();

        if self.outcome.is_admitted() {
            if self.ctx.source.is_proxy() {
                self.execute_governed(&mut record)?;
            } else {
                let path = self.file_action().map(|f| f.path.as_str());
                let result = stub_result(self.surface(), path);
                record.result_hash_sha256 = Some(self.writer.write_value("result.json", &result)?);
                record.executor_invoked = true;
                record.execution_kind = Some("stub".to_string());
                record.permit_validated = self.permit.is_passed();
            }
        }

        if self.outcome.is_admitted() {
            if let Some(nonce) = &self.nonce {
                records.guard.note_admitted(nonce);
            }
        } else {
            // A refusal must leave the referenced file exactly as it was.
            record = self.refused_record(record);
        }

        record.attestation_nonce = self.attestation_nonce();
        record.pre_state_hash_sha256 = self.pre_state.clone();
        record.post_state_hash_sha256 = self.post_state.clone();
        record.side_effect_detected = self.pre_state != self.post_state;
        record.file_receipt_hash_sha256 = self.file_receipt_hash.clone();
        self.executor_invoked = record.executor_invoked;
        self.writer.write_value("execution.json", &record.to_value()?)?;
        Ok(())
    }

    fn refused_record(&mut self, mut record: ExecutionRecord) -> ExecutionRecord {
        if let Some(file) = self.file_action().filter(|f| !f.path.is_empty()) {
            self.post_state = self.ctx.executor.file_state_sha256(&file.path);
        }
        record.executor_invoked = false;
        record.execution_kind = None;
        record.result_hash_sha256 = None;
        record.permit_validated = self.permit.is_passed();
        self.file_receipt_hash = None;
        record
    }

    fn execute_governed(&mut self, record: &mut ExecutionRecord) -> Result<(), StoreError> {
        let surface = self.surface();
        let binding = self.receipt_binding();
        record.permit_validated = true;

        if let Some(mut post) = self.post.clone().filter(|_| self.is_post_surface()) {
            let receipt = PostStubReceipt::new(
                post.surface.as_str(),
                post.payload_sha256.as_deref().unwrap_or(""),
                post.source_commit_hash.as_deref(),
                post.source_receipt_hash_sha256.as_deref(),
                post.ratification_token_hash_sha256.as_deref(),
                binding,
            );
            let receipt_hash = self.writer.write("post_stub_receipt.json", &receipt)?;
            let result = json!({
                "kind": "publish_post_stub_result",
                "payload_sha256": post.payload_sha256,
                "post_stub_receipt_hash_sha256": receipt_hash,
            });
            post.stub_receipt_hash_sha256 = Some(receipt_hash);
            self.post = Some(post);
            self.invoked(record, "post_stub", &result)?;
        } else if surface == SURFACE_BROWSER {
            let egress = self.egress.clone().unwrap_or_default();
            let result = json!({
                "kind": "browser_navigate_stub_result",
                "canonical_target": egress.canonical_target,
                "protocol": egress.protocol,
                "zone": egress.zone,
            });
            self.invoked(record, "net_stub", &result)?;
        } else if surface == SURFACE_TEST {
            let spec = self.command_spec();
            let (test_result, receipt) = test_artifacts(&spec, &StubRun::test(), binding);
            let result_hash = self.writer.write("test.result.json", &test_result)?;
            let receipt_hash = self.writer.write("test_receipt.json", &receipt)?;
            let result = json!({
                "kind": "code_test_stub_result",
                "exit_code": test_result.exit_code,
                "test_result_hash_sha256": result_hash,
                "test_receipt_hash_sha256": receipt_hash,
            });
            self.command = Some(CommandFacts {
                exit_code: Some(test_result.exit_code),
                receipt_hash_sha256: Some(receipt_hash),
                ..self.command.clone().unwrap_or_default()
            });
            self.invoked(record, "test_stub", &result)?;
        } else if surface == SURFACE_DEPS {
            let spec = self.command_spec();
            let lockfile = self.arg_text("lockfile_path");
            let lockfile_sha256 = self.ctx.executor.file_state_sha256(&lockfile);
            let (deps_result, receipt) =
                deps_artifacts(&spec, &StubRun::deps(), &lockfile, lockfile_sha256.clone(), binding);
            let result_hash = self.writer.write("deps.result.json", &deps_result)?;
            let receipt_hash = self.writer.write("deps.receipt.json", &receipt)?;
            let result = json!({
                "kind": "code_deps_stub_result",
                "exit_code": deps_result.exit_code,
                "deps_result_hash_sha256": result_hash,
                "deps_receipt_hash_sha256": receipt_hash,
            });
            self.command = Some(CommandFacts {
                exit_code: Some(deps_result.exit_code),
                receipt_hash_sha256: Some(receipt_hash),
                lockfile_path: lockfile,
                lockfile_sha256,
            });
            self.invoked(record, "deps_stub", &result)?;
        } else if self.tool() == Some(Tool::SkillInstall) {
            record.permit_validated = false;
        } else {
            self.execute_sandbox(record, binding)?;
        }
        Ok(())
    }

    fn invoked(&self, record: &mut ExecutionRecord, kind: &str, result: &Value) -> Result<(), StoreError> {
        record.result_hash_sha256 = Some(self.writer.write_value("result.json", result)?);
        record.executor_invoked = true;
        record.execution_kind = Some(kind.to_string());
        Ok(())
    }

    fn write_payload(&self) -> WritePayload {
        let mut payload = WritePayload::default();
        if self.is_write_attempt()
            && let Some(preview) = &self.preview
        {
            payload.after_text = Some(preview.after_text.clone());
            payload.diff_sha256 = Some(preview.diff.sha256.clone());
            payload.diff_stats = Some(preview.stats());
            payload.diff_preview_hash_sha256 = Some(preview.preview_hash_sha256.clone());
            if let Some(draft) = &self.draft {
                payload.draft_kind = draft.draft_kind.clone();
                payload.content_sha256 = draft.content_sha256.clone();
            }
        }
        payload
    }

    /// The only path that touches the repository.
    fn execute_sandbox(&mut self, record: &mut ExecutionRecord, binding: ReceiptBinding) -> Result<(), StoreError> {
        let Some(action) = self.first_action() else {
            self.refuse(GateCode::UnsupportedAction);
            return Ok(());
        };
        let applied = match (self.grant, action.body.as_file()) {
            (Some(grant), Some(_)) => self.ctx.executor.apply(action, &grant, binding, &self.write_payload()),
            (None, Some(_)) => Err(ExecRefusal {
                code: PermitCode::PermitRequired.into(),
                note: "no validated permit".to_string(),
            }),
            (_, None) => Err(ExecRefusal {
                code: GateCode::UnsupportedAction.into(),
                note: "Only file actions are supported".to_string(),
            }),
        };
        match applied {
            Err(refusal) => {
                tracing::warn!(fixture_id = self.fixture_id, code = refusal.code.as_str(), note = %refusal.note, "executor refused");
                self.refuse(refusal.code);
            }
            Ok(applied) => {
                self.invoked(record, "real_sandbox", &to_canonical_value(&applied.result)?)?;
                self.file_receipt_hash = Some(self.writer.write("file_receipt.json", &applied.receipt)?);
                if let Some(file) = self.file_action().filter(|f| !f.path.is_empty()) {
                    self.post_state = self.ctx.executor.file_state_sha256(&file.path);
                }
                tracing::info!(
                    fixture_id = self.fixture_id,
                    surface = %applied.tool_surface_id,
                    "sandbox action applied"
                );
            }
        }
        Ok(())
    }

    /// The commit half of an executed draft commit. Git itself never runs.
    fn draft_commit_evidence(&mut self) -> Result<(), StoreError> {
        let Some(env) = self.envelope else {
            return Ok(());
        };
        let is_git = self.tool() == Some(Tool::GitPipelineCommit);
        let draft_commit = self.is_draft_commit() && self.outcome.is_admitted();
        if !is_git && !draft_commit {
            return Ok(());
        }
        if draft_commit {
            let mut git = self.git_facts(env);
            if let Some(preview) = &self.preview {
                git.diff_sha256 = Some(preview.diff.sha256.clone());
                git.diff_preview_hash_sha256 = Some(preview.preview_hash_sha256.clone());
            }
            let token_code = match env.ratification_token() {
                Some(token) if self.ctx.attest.is_live() => {
                    validate_token::<GitRatificationToken>(token, &self.git_token_bindings(&git), &self.ctx.now)
                        .err()
                        .map(|rejection| ReasonCode::from(rejection.code))
                }
                _ => None,
            };
            self.git_reason = Some(token_code.unwrap_or(GateCode::HitlRequiredGitCommit.into()));
            self.git = Some(git);
        }
        let git = self.git.clone().unwrap_or_else(|| self.git_facts(env));
        let reason = if draft_commit {
            self.git_reason
        } else {
            self.outcome.reason_code()
        };
        self.writer.write_value(
            "git.execution.json",
            &git.execution_record(self.ctx.attest.as_str(), reason.map(ReasonCode::as_str)),
        )?;
        Ok(())
    }

    /// Supply-chain evidence for a skill install; a quorum-accepted install
    /// also gets its stub receipt.
    fn skill_evidence(&mut self) -> Result<(), StoreError> {
        if !self.ctx.source.is_proxy() || self.tool() != Some(Tool::SkillInstall) {
            return Ok(());
        }
        let (Some(env), Some(skill)) = (self.envelope, self.intent.meta.skill_install.as_ref()) else {
            return Ok(());
        };
        let diff = env
            .arg("skill_install_request")
            .and_then(|req| req.get("capability_diff"))
            .filter(|d| d.is_object());
        let (capability, authority) = match diff {
            Some(diff) => (Some(capability_diff_digest(diff)), Some(AuthorityDiff::derive(diff).digest()?)),
            None => (None, None),
        };
        let canonical_or_null = |d: &Option<egl_kernel::capability::CanonicalDigest>| {
            d.as_ref().map(|d| d.canonical_json.clone()).unwrap_or_else(|| "null".to_string())
        };
        self.writer
            .write_text("capability_diff_canonical.json", &canonical_or_null(&capability))?;
        self.writer
            .write_text("authority_diff_canonical.json", &canonical_or_null(&authority))?;
        let capability_sha = capability.map(|d| d.sha256);
        let authority_sha = authority.map(|d| d.sha256);

        let status = match self.outcome.refusal_status() {
            Some(status) => status.as_str(),
            None => SCE_ALLOW,
        };
        let reason = self.outcome.reason_code().map(ReasonCode::as_str);
        let sce = SupplyChainEvidence::build(
            self.fixture_id,
            skill,
            capability_sha,
            authority_sha.clone(),
            SceDecision::new(status, reason),
        );
        self.writer.write_value("sce.json", &sce.to_value()?)?;
        let sce_hash = sce.hash()?;

        let tokens = env.skill_ratification_tokens();
        let quorum_met = self.outcome.reason_code() == Some(AdmissionCode::HitlQuorumAccepted.into());
        let ratification = if quorum_met {
            RatificationSummary::from_pairs(tokens.iter().map(|token| {
                (
                    token.get("token_sha256").and_then(Value::as_str).map(str::to_string),
                    approver_id(token).to_string(),
                )
            }))
        } else {
            RatificationSummary::default()
        };

        let mut stub_receipt_hash = None;
        if self.outcome.is_admitted() && quorum_met {
            let receipt = SkillInstallStubReceipt::new(
                self.fixture_id,
                &self.receipt_binding(),
                &self.lane,
                self.attestation_nonce().as_deref(),
                &sce_hash,
                authority_sha.as_deref(),
                &ratification,
            );
            stub_receipt_hash = Some(self.writer.write("skill_install_stub_receipt.json", &receipt)?);
        }
        self.skill = Some(SkillFacts {
            ratification,
            token_count: tokens.len(),
            sce_hash_sha256: Some(sce_hash),
            stub_receipt_hash_sha256: stub_receipt_hash,
        });
        Ok(())
    }

    fn io_record(&self, aar: &ActionAdmissionRecord) -> Result<Value, StoreError> {
        let mut io = json!({
            "schema_id": IO_SCHEMA_ID,
            "version": RUN_VERSION,
            "pack_id": self.ctx.pack_id,
            "run_id": self.ctx.run_id,
            "fixture_id": self.fixture_id,
            "intent_path": self.intent_path,
            "compilation": self.compilation.record()?,
            "aar": aar.to_value()?,
        });
        let Some(map) = io.as_object_mut() else {
            return Ok(io);
        };
        if let Some(env) = self.envelope {
            map.insert("envelope".to_string(), redact_for_io(env)?);
        }
        if let Some(skill) = &self.intent.meta.skill_install {
            let facts = self.skill.clone().unwrap_or_default();
            map.insert(
                "parameters".to_string(),
                json!({
                    "skill_install": {
                        "capability_diff_digest": skill.capability_diff_digest,
                        "authority_diff_sha256": skill.authority_diff_sha256,
                        "ratification_token_hashes": facts.ratification.token_hashes,
                        "ratification_approvers": facts.ratification.approvers,
                        "ratification_token_count": facts.token_count,
                        "declared_hash": skill.declared_sha256,
                        "observed_hash": skill.observed_sha256,
                        "version_lock": skill.version_lock,
                        "requested_authority_profile": skill.requested_authority_profile,
                    }
                }),
            );
        }
        Ok(io)
    }

    fn finish(mut self, records: &mut RunRecords, aar: &ActionAdmissionRecord) -> Result<FixtureReport, StoreError> {
        if self.post_state.is_none()
            && let Some(file) = self.file_action().filter(|f| !f.path.is_empty())
        {
            self.post_state = self.ctx.executor.file_state_sha256(&file.path);
        }
        let proxy = self.ctx.source.is_proxy();
        let law = if proxy { Some(self.ctx.law_value()?) } else { None };
        let outcome = self.outcome;
        let reason = outcome.reason_code().map(ReasonCode::as_str);
        let refusal_status = outcome.refusal_status().map(RefusalStatus::as_str);
        let intent_hash = self.intent_hash();
        let plan_hash = self.plan_hash();
        let plan_value = match self.compilation.plan() {
            Some(plan) if outcome.is_admitted() => Some(plan.to_value()?),
            _ => None,
        };

        self.writer.write_value("io.json", &self.io_record(aar)?)?;
        if let Some(plan) = &plan_value {
            self.writer.write_value("plan.json", plan)?;
        }

        let decision = json!({
            "schema_id": DECISION_SCHEMA_ID,
            "version": RUN_VERSION,
            "pack_id": self.ctx.pack_id,
            "run_id": self.ctx.run_id,
            "fixture_id": self.fixture_id,
            "status": outcome.status_str(),
            "reason_code": reason,
            "refusal_status": refusal_status,
            "hashes": {
                "intent": intent_hash,
                "plan": plan_hash,
                "aar": aar.hashes.aar,
                "ledger": aar.ledger.hashes.ledger,
            },
        });
        self.writer.write_value("decision.json", &decision)?;
        let decision_hash = sha256_stable(&decision);

        records.per_test.insert(
            self.fixture_id.to_string(),
            json!({
                "intent_hash": intent_hash,
                "plan_hash": plan_hash,
                "decision_hash": decision_hash,
            }),
        );

        let attestation_nonce = self.attestation_nonce();
        let expiry_ts = self.envelope.and_then(Envelope::expiry_ts).map(str::to_string);
        let mut freeze = json!({
            "fixture_id": self.fixture_id,
            "intent_path": self.intent_path,
            "intent_hash": intent_hash,
            "plan_hash": plan_hash,
            "decision": outcome.summary(),
            "reason_code": reason,
            "plan": plan_value,
        });
        if proxy && let Some(map) = freeze.as_object_mut() {
            map.insert("attestation_nonce".to_string(), json!(attestation_nonce));
            map.insert("expiry_ts".to_string(), json!(expiry_ts));
            map.insert("lane_id".to_string(), json!(self.lane));
            map.insert("binding".to_string(), law.clone().unwrap_or(Value::Null));
        }
        records.freeze.push(freeze);

        self.append_ledger(records, &decision_hash, law.as_ref())?;

        let execution_artifacts = self.writer.exists("result.json") || self.writer.exists("file_receipt.json");
        Ok(FixtureReport {
            fixture_id: self.fixture_id.to_string(),
            intent_path: self.intent_path.to_string(),
            outcome,
            intent_hash,
            plan_hash,
            executor_invoked: self.executor_invoked,
            execution_artifacts,
            pre_state_hash_sha256: self.pre_state.clone(),
            post_state_hash_sha256: self.post_state.clone(),
        })
    }

    fn decision_ledger_record(&self, decision_hash: &str, law: Option<&Value>) -> LedgerRecord {
        let outcome = self.outcome;
        let kind = if outcome.is_admitted() { "admission" } else { "refusal" };
        let mut rec = LedgerRecord::new(self.fixture_id, seq::DECISION, kind)
            .with("decision_hash", decision_hash)
            .with("intent_hash", json!(self.intent_hash()))
            .with("plan_hash", json!(self.plan_hash()))
            .with("reason_code", json!(outcome.reason_code().map(ReasonCode::as_str)))
            .with("refusal_status", json!(outcome.refusal_status().map(RefusalStatus::as_str)));

        if let Some(law) = law {
            rec = rec
                .with("attestation_nonce", json!(self.attestation_nonce()))
                .with("expiry_ts", json!(self.envelope.and_then(Envelope::expiry_ts)))
                .with("lane_id", self.lane.as_str())
                .with("execution_permit_sha256", json!(self.permit_sha256()))
                .with("execution_permit_validated", self.permit.ok_value())
                .with("execution_permit_validation_code", json!(self.permit.code()))
                .merge(law);
        }
        if let Some(sce_hash) = self.skill.as_ref().and_then(|s| s.sce_hash_sha256.clone()) {
            rec = rec.with("sce_hash_sha256", sce_hash);
        }
        if let Some(preview) = &self.preview {
            rec = rec
                .with("diff_sha256", preview.diff.sha256.as_str())
                .with("diff_stats", json!(preview.diff.stats))
                .with("diff_preview_hash_sha256", preview.preview_hash_sha256.as_str());
        }
        if let Some(hash) = &self.file_receipt_hash {
            rec = rec.with("file_receipt_hash_sha256", hash.as_str());
        }
        if let Some(egress) = &self.egress {
            rec = rec
                .with("egress_canonical_target", json!(egress.canonical_target))
                .with("egress_protocol", json!(egress.protocol))
                .with("egress_zone", egress.zone.clone().unwrap_or(Value::Null));
        }
        if self.tool() == Some(Tool::GitPipelineCommit)
            && let Some(git) = &self.git
        {
            rec = rec
                .with("git_branch", git.branch.as_str())
                .with("git_base_branch", git.base_branch.as_str())
                .with("git_diff_sha256", json!(git.diff_sha256))
                .with("git_diff_preview_hash_sha256", json!(git.diff_preview_hash_sha256));
            if let Some(hash) = &git.ratification_token_hash_sha256 {
                rec = rec.with("ratification_token_hash_sha256", hash.as_str());
            }
        }
        if let Some(post) = self.post.as_ref().filter(|_| self.tool().is_some_and(Tool::is_post)) {
            rec = rec
                .with("publish_surface", post.surface.as_str())
                .with("payload_sha256", json!(post.payload_sha256))
                .with("source_commit_hash", json!(post.source_commit_hash))
                .with("source_receipt_hash_sha256", json!(post.source_receipt_hash_sha256));
            if let Some(hash) = &post.ratification_token_hash_sha256 {
                rec = rec.with("ratification_token_hash_sha256", hash.as_str());
            }
            if let Some(hash) = &post.stub_receipt_hash_sha256 {
                rec = rec.with("post_stub_receipt_hash_sha256", hash.as_str());
            }
        }
        if let Some(skill) = &self.skill {
            rec = rec
                .with("ratification_token_hashes", json!(skill.ratification.token_hashes))
                .with("ratification_approvers", json!(skill.ratification.approvers))
                .with("ratification_quorum_required", json!(QUORUM_REQUIRED))
                .with(
                    "ratification_quorum_met",
                    outcome.is_admitted()
                        && outcome.reason_code() == Some(AdmissionCode::HitlQuorumAccepted.into()),
                );
            if let Some(hash) = &skill.stub_receipt_hash_sha256 {
                rec = rec.with("skill_install_stub_receipt_hash_sha256", hash.as_str());
            }
        }
        if law.is_some() && outcome.reason_code() == Some(GateCode::PolicyVersionMismatch.into()) {
            rec = rec
                .with(
                    "expected_law_bundle_sha256",
                    json!(self.envelope.and_then(Envelope::expected_law_bundle_sha256)),
                )
                .with("actual_law_bundle_sha256", self.law_sha256());
        }
        rec
    }

    fn append_ledger(&self, records: &mut RunRecords, decision_hash: &str, law: Option<&Value>) -> Result<(), StoreError> {
        let none = Value::Null;
        let law_fields = law.unwrap_or(&none);
        let admitted = self.outcome.is_admitted();
        records.ledger.append(self.decision_ledger_record(decision_hash, law));

        if admitted {
            records.ledger.append(
                LedgerRecord::new(self.fixture_id, seq::PLAN_FREEZE, "plan_freeze")
                    .with("plan_hash", json!(self.plan_hash()))
                    .merge(law_fields),
            );
        }

        let draft = self.draft.clone().unwrap_or_default();
        if admitted && self.draft.is_some() {
            records.ledger.append(
                LedgerRecord::new(self.fixture_id, seq::EXECUTION, "publish_draft")
                    .with("draft_path", json!(draft.path))
                    .with("draft_kind", json!(draft.draft_kind))
                    .with("content_sha256", json!(draft.content_sha256))
                    .merge(law_fields),
            );
        }
        if admitted
            && self.is_draft_commit()
            && let Some(git) = &self.git
        {
            records.ledger.append(
                LedgerRecord::new(self.fixture_id, seq::DRAFT_COMMIT, "publish_draft_commit")
                    .with("draft_path", json!(draft.path))
                    .with("draft_kind", json!(draft.draft_kind))
                    .with("content_sha256", json!(draft.content_sha256))
                    .with("diff_sha256", json!(git.diff_sha256))
                    .with("diff_preview_hash_sha256", json!(git.diff_preview_hash_sha256))
                    .with("git_branch", git.branch.as_str())
                    .with("git_base_branch", git.base_branch.as_str())
                    .with("git_commit_hash", Value::Null)
                    .with("reason_code", json!(self.git_reason.map(ReasonCode::as_str)))
                    .merge(law_fields),
            );
        }
        if admitted
            && let Some(post) = self.post.as_ref().filter(|_| self.is_post_surface())
        {
            records.ledger.append(
                LedgerRecord::new(self.fixture_id, seq::EXECUTION, "publish_post_stub")
                    .with("surface", post.surface.as_str())
                    .with("payload_sha256", json!(post.payload_sha256))
                    .with("source_commit_hash", json!(post.source_commit_hash))
                    .with("source_receipt_hash_sha256", json!(post.source_receipt_hash_sha256))
                    .with("ratification_token_hash_sha256", json!(post.ratification_token_hash_sha256))
                    .with("post_stub_receipt_hash_sha256", json!(post.stub_receipt_hash_sha256))
                    .merge(law_fields),
            );
        }

        let surface = self.surface();
        if surface == SURFACE_TEST || surface == SURFACE_DEPS {
            let spec = self.command_spec();
            let facts = self.command.clone().unwrap_or_default();
            let kind = if surface == SURFACE_TEST { "code_test_run" } else { "code_deps_fetch" };
            let mut rec = LedgerRecord::new(self.fixture_id, seq::EXECUTION, kind)
                .with("cmd_sha256", spec.cmd_sha256())
                .with("cwd", spec.cwd.as_str())
                .with("env_profile", spec.env_profile.as_str())
                .with("exit_code", json!(facts.exit_code));
            if surface == SURFACE_DEPS {
                rec = rec
                    .with("lockfile_sha256", json!(facts.lockfile_sha256))
                    .with("lockfile_path", facts.lockfile_path.as_str());
            }
            if let Some(hash) = facts.receipt_hash_sha256 {
                let key = if surface == SURFACE_TEST {
                    "test_receipt_hash_sha256"
                } else {
                    "deps_receipt_hash_sha256"
                };
                rec = rec.with(key, hash);
            }
            records.ledger.append(rec.merge(law_fields));
        }
        Ok(())
    }
}
