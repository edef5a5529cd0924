//! Pack runner.
//!
//! Evaluates every fixture of a pack in id order against one frozen law
//! bundle, writes per-fixture evidence under `out/<pack_id>/<run_id>/`, and
//! finishes with the run-level plan freeze, provenance ledger, metrics and
//! artifact hashes.
//!
//! ```text
//! egl.toml + pack.json
//!     │
//! law bundle ─► sandbox reset ─► nonce registry (live)
//!     │
//! for each fixture: compile ─► admit ─► governed gates ─► execute ─► evidence
//!     │
//! plan.freeze.json · spe.ledger.jsonl · metrics.json · artifact.hashes.json
//! ```

mod evidence;
mod fixture;
mod metrics;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use egl_kernel::canonical::{sha256_stable, to_canonical_value};
use egl_kernel::{AttestMode, LawBinding, ProvenanceLedger, ReplayGuard, ToolSurfaceRegistry, compile};
use egl_store::{
    ArtifactWriter, EglConfig, FsAttestation, NONCE_REGISTRY_FILE, NonceRegistry, Pack, SandboxExecutor, StoreError,
    load_law_bundle, load_tool_surface_map, read_ledger_from_path, reset_sandbox, scan_for_path_leaks,
    write_ledger_to_path,
};
use serde_json::{Value, json};

pub use fixture::FixtureReport;
pub use metrics::Metrics;

pub const RUN_VERSION: &str = "0.1.0";
pub const LAW_BUNDLE_HASH_SCHEMA_ID: &str = "EGL.LAW_BUNDLE_HASH";
pub const PLAN_FREEZE_BUNDLE_SCHEMA_ID: &str = "EGL.PLAN_FREEZE_BUNDLE";
pub const LEDGER_FILE: &str = "spe.ledger.jsonl";

/// Where fixture documents come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Intents as written; tool calls are normalized but not gated further.
    Fixture,
    /// Tool calls through the proxy envelope and every governed gate.
    Proxy,
}

impl Source {
    pub fn is_proxy(self) -> bool {
        self == Source::Proxy
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub repo_root: PathBuf,
    pub pack_path: PathBuf,
    pub run_id: String,
    pub attest: AttestMode,
    pub source: Source,
    pub now: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub pack_id: String,
    pub run_id: String,
    pub metrics: Metrics,
}

/// Read-only state shared by every fixture of a run.
pub(crate) struct RunContext {
    pub repo_root: PathBuf,
    pub pack_id: String,
    pub run_id: String,
    pub attest: AttestMode,
    pub source: Source,
    pub now: String,
    pub registry: ToolSurfaceRegistry,
    pub law: LawBinding,
    pub out: ArtifactWriter,
    pub executor: SandboxExecutor,
    pub probe: FsAttestation,
    /// Fixtures whose target is swapped between attestation and execution.
    pub toctou_swaps: BTreeSet<String>,
}

impl RunContext {
    pub fn fixture_out(&self, fixture_id: &str) -> ArtifactWriter {
        self.out.child(Path::new("fixtures").join(fixture_id))
    }

    pub fn law_value(&self) -> Result<Value, StoreError> {
        Ok(to_canonical_value(&self.law)?)
    }
}

/// Everything that accumulates while fixtures are evaluated.
pub(crate) struct RunRecords {
    pub guard: ReplayGuard,
    pub nonce_registry: Option<NonceRegistry>,
    pub ledger: ProvenanceLedger,
    pub freeze: Vec<Value>,
    pub per_test: BTreeMap<String, Value>,
    pub reports: Vec<FixtureReport>,
    pub leak_roots: Vec<PathBuf>,
}

fn resolve_now(options: &RunOptions, config: &EglConfig) -> String {
    match (&options.now, options.attest) {
        (Some(now), _) => now.clone(),
        (None, AttestMode::Live) => Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        (None, AttestMode::Mock) => config.mock_now.clone(),
    }
}

/// Run one pack end to end.
pub fn run_pack(options: &RunOptions) -> Result<RunSummary, StoreError> {
    let config = EglConfig::load(&options.repo_root)?;
    let pack = Pack::load(&options.pack_path)?;
    let out_root = options
        .repo_root
        .join(&config.out_dir)
        .join(&pack.pack_id)
        .join(&options.run_id);
    let out = ArtifactWriter::create_new(&out_root)?;

    let surface_map = load_tool_surface_map(&options.repo_root.join(&config.tool_surface_map))?;
    let law_bundle = load_law_bundle(&options.repo_root, &config.law_bundle_files())?;
    let law = law_bundle.binding()?;
    out.write("law.bundle.json", &law_bundle)?;
    out.write_value(
        "law.bundle.hash.json",
        &json!({
            "schema_id": LAW_BUNDLE_HASH_SCHEMA_ID,
            "version": RUN_VERSION,
            "law_bundle_sha256": law.law_bundle_sha256,
        }),
    )?;

    let reset = reset_sandbox(&options.repo_root)?;
    out.write("sandbox.reset.json", &reset)?;

    let nonce_registry = options
        .attest
        .is_live()
        .then(|| NonceRegistry::new(out.path(NONCE_REGISTRY_FILE)));
    let guard = match &nonce_registry {
        Some(registry) => registry.seed_guard()?,
        None => ReplayGuard::new(),
    };

    let ctx = RunContext {
        repo_root: options.repo_root.clone(),
        pack_id: pack.pack_id.clone(),
        run_id: options.run_id.clone(),
        attest: options.attest,
        source: options.source,
        now: resolve_now(options, &config),
        registry: surface_map.registry,
        law,
        out,
        executor: SandboxExecutor::new(&options.repo_root),
        probe: FsAttestation::new(&options.repo_root),
        toctou_swaps: pack.toctou_swap_fixtures(),
    };
    tracing::info!(
        pack_id = %ctx.pack_id,
        run_id = %ctx.run_id,
        attest = ctx.attest.as_str(),
        proxy = ctx.source.is_proxy(),
        fixtures = pack.fixtures.len(),
        "pack run started"
    );

    let mut records = RunRecords {
        guard,
        nonce_registry,
        ledger: ProvenanceLedger::new(),
        freeze: Vec::new(),
        per_test: BTreeMap::new(),
        reports: Vec::new(),
        leak_roots: Vec::new(),
    };

    for (fixture_id, rel_path) in &pack.fixtures {
        let report = fixture::evaluate(&ctx, &mut records, fixture_id, rel_path)?;
        tracing::info!(
            fixture_id = %fixture_id,
            status = report.outcome.status_str(),
            reason_code = report.outcome.reason_code().map(|c| c.as_str()).unwrap_or(""),
            "fixture decided"
        );
        records.reports.push(report);
    }

    finish(&ctx, &pack, records)
}

fn finish(ctx: &RunContext, pack: &Pack, records: RunRecords) -> Result<RunSummary, StoreError> {
    let plan_freeze = json!({
        "schema_id": PLAN_FREEZE_BUNDLE_SCHEMA_ID,
        "version": RUN_VERSION,
        "pack_id": ctx.pack_id,
        "run_id": ctx.run_id,
        "plans": records.freeze,
    });
    ctx.out.write_value("plan.freeze.json", &plan_freeze)?;

    let ledger_path = ctx.out.path(LEDGER_FILE);
    write_ledger_to_path(&ledger_path, &records.ledger)?;
    let reread = read_ledger_from_path(&ledger_path)?;
    let ledger_canonical = reread.canonical_hash()?;
    let ledger_chain = reread.chain_hash()?;
    let ledger_intact =
        ledger_canonical == records.ledger.canonical_hash()? && ledger_chain == records.ledger.chain_hash()?;

    let mut leak_roots = vec![ctx.out.root().to_path_buf()];
    leak_roots.extend(records.leak_roots.iter().cloned());
    let leaks = scan_for_path_leaks(&leak_roots)?;
    for leak in &leaks {
        tracing::warn!(artifact = %leak, "absolute path leaked into an artifact");
    }

    let metrics = Metrics::compute(metrics::Inputs {
        reports: &records.reports,
        expectations: &pack.expectations,
        leak_count: leaks.len(),
        plan_hashes_reproduced: plan_hashes_reproduce(ctx, &records.reports)?,
        ledger_intact,
    });
    ctx.out.write("metrics.json", &metrics)?;

    let metrics_value = to_canonical_value(&metrics)?;
    ctx.out.write_value(
        "artifact.hashes.json",
        &json!({
            "pack_id": ctx.pack_id,
            "run_id": ctx.run_id,
            "hashes": {
                "metrics": sha256_stable(&metrics_value),
                "plan_freeze": sha256_stable(&plan_freeze),
                "ledger_canonical": ledger_canonical,
                "ledger_chain": ledger_chain,
            },
            "per_test": records.per_test,
        }),
    )?;
    tracing::info!(pack_id = %ctx.pack_id, run_id = %ctx.run_id, pass = metrics.pass, "pack run finished");

    Ok(RunSummary {
        pack_id: ctx.pack_id.clone(),
        run_id: ctx.run_id.clone(),
        metrics,
    })
}

/// Recompile every fixture from disk and compare intent and plan hashes
/// with what the run recorded.
fn plan_hashes_reproduce(ctx: &RunContext, reports: &[FixtureReport]) -> Result<bool, StoreError> {
    for report in reports {
        let (intent, _) = fixture::load_intent(ctx, &report.fixture_id, &report.intent_path)?;
        let compilation = compile(&intent, &ctx.registry)?;
        if compilation.intent_hash() != report.intent_hash.as_deref()
            || compilation.plan_hash() != report.plan_hash.as_deref()
        {
            tracing::warn!(fixture_id = %report.fixture_id, "recompiled hashes differ from the run");
            return Ok(false);
        }
    }
    Ok(true)
}
