use serde_json::{Value, json};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

struct TempDirGuard {
    path: PathBuf,
}

impl TempDirGuard {
    fn new(prefix: &str) -> Self {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("egl-cli-{prefix}-{}-{unique}", std::process::id()));
        fs::create_dir_all(&path).expect("temp dir should be created");
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

fn run_egl<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_egl"))
        .args(args)
        .output()
        .expect("egl command should execute")
}

fn assert_success(output: &Output) {
    if !output.status.success() {
        panic!(
            "command failed with status {:?}\nstdout:\n{}\nstderr:\n{}",
            output.status.code(),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
    }
}

fn assert_failure(output: &Output) {
    if output.status.success() {
        panic!(
            "command unexpectedly succeeded\nstdout:\n{}\nstderr:\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
    }
}

fn parse_json_stdout(output: &Output) -> Value {
    serde_json::from_slice::<Value>(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "expected valid JSON stdout, got error: {e}\nstdout:\n{}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

fn read_json(path: &Path) -> Value {
    let text = fs::read_to_string(path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()));
    serde_json::from_str(&text).unwrap_or_else(|e| panic!("parse {}: {e}", path.display()))
}

fn write_json(path: &Path, value: &Value) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent dir should be created");
    }
    fs::write(path, serde_json::to_string_pretty(value).expect("json")).expect("file should be written");
}

const SURFACE_MAP: &str = r#"schema_id = "EGL.TOOL_SURFACE_MAP"
version = "1.0.0"

[[surfaces]]
surface_id = "file.read"
kind = "file"
schema_ref = "schemas/file.read.json"

[[surfaces]]
surface_id = "file.write"
kind = "file"
schema_ref = "schemas/file.write.json"
"#;

fn seed_repo(root: &Path) {
    fs::create_dir_all(root.join("harness")).expect("harness dir");
    fs::write(root.join("harness/tool_surface_map.toml"), SURFACE_MAP).expect("surface map");
    fs::write(root.join("egl.toml"), "mock_now = \"2026-02-13T00:00:00Z\"\n").expect("config");
}

fn intent(intent_id: &str, surface: &str, file: Value) -> Value {
    json!({
        "schema_id": "EGL.INTENT",
        "version": "0.1.0",
        "intent_id": intent_id,
        "actions": [
            {"action_id": "A1", "kind": "file", "tool_surface_id": surface, "file": file}
        ]
    })
}

fn seed_fixture_pack(root: &Path) {
    write_json(
        &root.join("fixtures/read_seed.json"),
        &intent(
            "I-read",
            "file.read",
            json!({"op": "read", "zone": "sandbox", "path": "sandbox/_th_tmp/seed.txt"}),
        ),
    );
    write_json(
        &root.join("fixtures/unmapped.json"),
        &intent(
            "I-unmapped",
            "process.unknown",
            json!({"op": "read", "zone": "sandbox", "path": "sandbox/_th_tmp/seed.txt"}),
        ),
    );
    write_json(
        &root.join("fixtures/zone_unknown.json"),
        &intent("I-zone", "file.write", json!({"op": "write", "path": "sandbox/_th_tmp/new.txt"})),
    );
    write_json(
        &root.join("packs/smoke.json"),
        &json!({
            "pack_id": "SMOKE",
            "fixtures": {
                "read_seed": "fixtures/read_seed.json",
                "unmapped": "fixtures/unmapped.json",
                "zone_unknown": "fixtures/zone_unknown.json"
            },
            "expectations": {
                "read_seed": {"status": "admitted"},
                "unmapped": {"status": "rejected", "reason_code": "UNMAPPED_TOOL_SURFACE", "refusal_status": "REFUSE_HARD"},
                "zone_unknown": {"status": "rejected", "reason_code": "ZONE_UNKNOWN"}
            }
        }),
    );
}

fn seed_proxy_pack(root: &Path) {
    write_json(
        &root.join("fixtures/proxy/write_no_permit.json"),
        &json!({"tool": "fs.write", "path": "sandbox/_th_tmp/proxy.txt", "after_text": "hello\n"}),
    );
    write_json(
        &root.join("fixtures/proxy/delete_unmapped.json"),
        &json!({"tool": "fs.delete", "path": "sandbox/_th_tmp/seed.txt"}),
    );
    write_json(
        &root.join("packs/proxy.json"),
        &json!({
            "pack_id": "PROXY",
            "fixtures": {
                "delete_unmapped": "fixtures/proxy/delete_unmapped.json",
                "write_no_permit": "fixtures/proxy/write_no_permit.json"
            },
            "expectations": {
                "delete_unmapped": {"status": "rejected", "reason_code": "UNMAPPED_TOOL_SURFACE"},
                "write_no_permit": {"status": "rejected", "reason_code": "PERMIT_REQUIRED"}
            }
        }),
    );
}

fn run_pack(root: &Path, pack: &str, run_id: &str, source: &str) -> Output {
    run_pack_attested(root, pack, run_id, source, "mock")
}

fn run_pack_attested(root: &Path, pack: &str, run_id: &str, source: &str, attest: &str) -> Output {
    run_egl([
        OsStr::new("run-pack"),
        OsStr::new("--repo-root"),
        root.as_os_str(),
        OsStr::new("--pack"),
        OsStr::new(pack),
        OsStr::new("--run-id"),
        OsStr::new(run_id),
        OsStr::new("--source"),
        OsStr::new(source),
        OsStr::new("--attest"),
        OsStr::new(attest),
    ])
}

fn ledger_records(path: &Path) -> Vec<Value> {
    fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("ledger line"))
        .collect()
}

#[test]
fn fixture_pack_passes_and_writes_evidence() {
    let tmp = TempDirGuard::new("fixture-pack");
    seed_repo(tmp.path());
    seed_fixture_pack(tmp.path());

    let output = run_pack(tmp.path(), "packs/smoke.json", "r1", "fixture");
    assert_success(&output);
    let summary = parse_json_stdout(&output);
    assert_eq!(summary["pack_id"], "SMOKE");
    assert_eq!(summary["metrics"]["pass"], true);
    assert_eq!(summary["metrics"]["refusal_rate"], 1.0);

    let out = tmp.path().join("out/SMOKE/r1");
    for file in [
        "law.bundle.json",
        "law.bundle.hash.json",
        "sandbox.reset.json",
        "plan.freeze.json",
        "spe.ledger.jsonl",
        "metrics.json",
        "artifact.hashes.json",
    ] {
        assert!(out.join(file).is_file(), "missing run artifact {file}");
    }
    let reset = fs::read_to_string(out.join("sandbox.reset.json")).expect("sandbox reset");
    insta::assert_snapshot!(
        reset,
        @r#"{"cleaned_roots":["sandbox/_publish_drafts/"],"root":"sandbox/_th_tmp","schema_id":"EGL.SANDBOX_RESET","seeded_files":["sandbox/_th_tmp/seed.txt","sandbox/_th_tmp/toctou_symlink_swap/target.txt"],"version":"0.1.0"}"#
    );

    let admitted = out.join("fixtures/read_seed");
    assert!(admitted.join("plan.json").is_file());
    assert!(admitted.join("result.json").is_file());
    let decision = read_json(&admitted.join("decision.json"));
    assert_eq!(decision["status"], "admitted");
    assert!(decision["hashes"]["plan"].as_str().is_some_and(|h| h.starts_with("sha3-512:")));

    let refused = out.join("fixtures/unmapped");
    assert!(!refused.join("plan.json").exists());
    let decision = read_json(&refused.join("decision.json"));
    assert_eq!(decision["reason_code"], "UNMAPPED_TOOL_SURFACE");
    assert_eq!(decision["refusal_status"], "REFUSE_HARD");

    let hashes = read_json(&out.join("artifact.hashes.json"));
    assert!(hashes["per_test"]["zone_unknown"]["decision_hash"].is_string());
    assert!(!tmp.path().join("sandbox/_th_tmp/new.txt").exists());
}

#[test]
fn reusing_a_run_id_is_refused() {
    let tmp = TempDirGuard::new("rerun");
    seed_repo(tmp.path());
    seed_fixture_pack(tmp.path());
    assert_success(&run_pack(tmp.path(), "packs/smoke.json", "same", "fixture"));

    let second = run_pack(tmp.path(), "packs/smoke.json", "same", "fixture");
    assert_failure(&second);
    assert!(String::from_utf8_lossy(&second.stderr).contains("error:"));
}

#[test]
fn mock_runs_reproduce_artifact_hashes() {
    let tmp = TempDirGuard::new("determinism");
    seed_repo(tmp.path());
    seed_fixture_pack(tmp.path());
    assert_success(&run_pack(tmp.path(), "packs/smoke.json", "a", "fixture"));
    assert_success(&run_pack(tmp.path(), "packs/smoke.json", "b", "fixture"));

    let a = read_json(&tmp.path().join("out/SMOKE/a/artifact.hashes.json"));
    let b = read_json(&tmp.path().join("out/SMOKE/b/artifact.hashes.json"));
    assert_eq!(a["hashes"], b["hashes"]);
    assert_eq!(a["per_test"], b["per_test"]);
}

#[test]
fn proxy_write_without_permit_is_refused_before_any_write() {
    let tmp = TempDirGuard::new("proxy-pack");
    seed_repo(tmp.path());
    seed_proxy_pack(tmp.path());

    let output = run_pack(tmp.path(), "packs/proxy.json", "p1", "proxy");
    assert_success(&output);
    assert_eq!(parse_json_stdout(&output)["metrics"]["pass"], true);

    let fixture_out = tmp.path().join("out/PROXY/p1/fixtures/write_no_permit");
    let preview = read_json(&fixture_out.join("diff.preview.json"));
    assert_eq!(preview["path"], "sandbox/_th_tmp/proxy.txt");
    assert!(preview["diff_unified"].as_str().is_some_and(|d| d.contains("+hello")));

    let validation = read_json(&fixture_out.join("permit.validation.json"));
    assert_eq!(validation["ok"], false);
    assert_eq!(validation["code"], "PERMIT_REQUIRED");
    assert_eq!(validation["expected"]["lane_id"], "proxy");

    let execution = read_json(&fixture_out.join("execution.json"));
    assert_eq!(execution["executor_invoked"], false);
    assert!(!tmp.path().join("sandbox/_th_tmp/proxy.txt").exists());
}

#[test]
fn proxy_deps_ledger_records_the_lockfile() {
    let tmp = TempDirGuard::new("proxy-deps");
    seed_repo(tmp.path());
    let map = format!(
        "{SURFACE_MAP}\n[[surfaces]]\nsurface_id = \"code.deps.fetch\"\nkind = \"process\"\nschema_ref = \"schemas/code.deps.fetch.json\"\n"
    );
    fs::write(tmp.path().join("harness/tool_surface_map.toml"), map).expect("surface map");
    fs::write(tmp.path().join("package-lock.json"), "{\"lockfileVersion\": 3}\n").expect("lockfile");
    write_json(
        &tmp.path().join("fixtures/proxy/deps_no_permit.json"),
        &json!({
            "tool": "code.deps.fetch",
            "cmd": "npm ci",
            "env_profile": "node",
            "lockfile_path": "package-lock.json"
        }),
    );
    write_json(
        &tmp.path().join("packs/deps.json"),
        &json!({"pack_id": "DEPS", "fixtures": {"deps_no_permit": "fixtures/proxy/deps_no_permit.json"}}),
    );

    let _ = run_pack(tmp.path(), "packs/deps.json", "d1", "proxy");
    let ledger = ledger_records(&tmp.path().join("out/DEPS/d1/spe.ledger.jsonl"));
    let deps = ledger
        .iter()
        .find(|r| r["kind"] == "code_deps_fetch")
        .unwrap_or_else(|| panic!("no deps record in {ledger:?}"));
    assert_eq!(deps["lockfile_path"], "package-lock.json");
    let lockfile_sha256 = deps["lockfile_sha256"].as_str().expect("lockfile digest");
    assert!(lockfile_sha256.starts_with("sha256:"));
    assert_eq!(lockfile_sha256.len(), "sha256:".len() + 64);
}

#[test]
fn unreadable_write_target_aborts_the_run() {
    let tmp = TempDirGuard::new("proxy-binary");
    seed_repo(tmp.path());
    fs::create_dir_all(tmp.path().join("docs")).expect("docs dir");
    fs::write(tmp.path().join("docs/blob.txt"), [0xff, 0xfe, 0x00, 0x80]).expect("binary file");
    write_json(
        &tmp.path().join("fixtures/proxy/write_binary.json"),
        &json!({"tool": "fs.write", "path": "docs/blob.txt", "after_text": "text\n"}),
    );
    write_json(
        &tmp.path().join("packs/binary.json"),
        &json!({"pack_id": "BINARY", "fixtures": {"write_binary": "fixtures/proxy/write_binary.json"}}),
    );

    let output = run_pack(tmp.path(), "packs/binary.json", "b1", "proxy");
    assert_failure(&output);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("blob.txt"), "stderr: {stderr}");
    assert!(!tmp.path().join("out/BINARY/b1/fixtures/write_binary/diff.preview.json").exists());
}

#[test]
fn live_swap_staging_follows_the_pack_flag() {
    let tmp = TempDirGuard::new("proxy-swap");
    seed_repo(tmp.path());
    let call = json!({"tool": "fs.read", "path": "sandbox/_th_tmp/toctou_symlink_swap/target.txt"});
    write_json(&tmp.path().join("fixtures/proxy/swap.json"), &call);
    write_json(
        &tmp.path().join("packs/swap.json"),
        &json!({
            "pack_id": "SWAP",
            "fixtures": {
                "swap_read": "fixtures/proxy/swap.json",
                "toctou_symlink_swap": "fixtures/proxy/swap.json"
            },
            "expectations": {
                "swap_read": {"status": "rejected", "reason_code": "TOCTOU_DETECTED", "stage_toctou_swap": true}
            }
        }),
    );

    let output = run_pack_attested(tmp.path(), "packs/swap.json", "s1", "proxy", "live");
    let fixtures = tmp.path().join("out/SWAP/s1/fixtures");
    assert!(
        fixtures.join("swap_read/toctou.paths.json").is_file(),
        "flagged fixture was not staged\nstderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(!fixtures.join("toctou_symlink_swap/toctou.paths.json").exists());
}

#[test]
fn proxy_source_refuses_plain_intents() {
    let tmp = TempDirGuard::new("proxy-intent");
    seed_repo(tmp.path());
    seed_fixture_pack(tmp.path());
    let output = run_pack(tmp.path(), "packs/smoke.json", "x", "proxy");
    assert_failure(&output);
    assert!(String::from_utf8_lossy(&output.stderr).contains("proxy source needs a tool call"));
}

#[test]
fn ledger_verify_accepts_run_digests_and_rejects_others() {
    let tmp = TempDirGuard::new("ledger");
    seed_repo(tmp.path());
    seed_fixture_pack(tmp.path());
    assert_success(&run_pack(tmp.path(), "packs/smoke.json", "r1", "fixture"));

    let out = tmp.path().join("out/SMOKE/r1");
    let hashes = read_json(&out.join("artifact.hashes.json"));
    let canonical = hashes["hashes"]["ledger_canonical"].as_str().expect("canonical digest");
    let chain = hashes["hashes"]["ledger_chain"].as_str().expect("chain digest");
    let ledger = out.join("spe.ledger.jsonl");

    let ok = run_egl([
        OsStr::new("ledger"),
        OsStr::new("verify"),
        ledger.as_os_str(),
        OsStr::new("--canonical"),
        OsStr::new(canonical),
        OsStr::new("--chain"),
        OsStr::new(chain),
    ]);
    assert_success(&ok);
    let report = parse_json_stdout(&ok);
    assert_eq!(report["canonical_ok"], true);
    assert_eq!(report["chain_ok"], true);
    assert!(report["records"].as_u64().is_some_and(|n| n >= 3));

    let bad = run_egl([
        OsStr::new("ledger"),
        OsStr::new("verify"),
        ledger.as_os_str(),
        OsStr::new("--chain"),
        OsStr::new("00"),
    ]);
    assert_failure(&bad);
    assert_eq!(parse_json_stdout(&bad)["chain_ok"], false);
}

#[test]
fn hash_stable_ignores_run_id() {
    let tmp = TempDirGuard::new("hash");
    let a = tmp.path().join("a.json");
    let b = tmp.path().join("b.json");
    write_json(&a, &json!({"run_id": "one", "value": [1, 2]}));
    write_json(&b, &json!({"value": [1, 2], "run_id": "two"}));

    let ha = parse_json_stdout(&run_egl([OsStr::new("hash"), a.as_os_str(), OsStr::new("--stable")]));
    let hb = parse_json_stdout(&run_egl([OsStr::new("hash"), b.as_os_str(), OsStr::new("--stable")]));
    assert_eq!(ha["sha256"], hb["sha256"]);
    assert_eq!(ha["sha3_512"], hb["sha3_512"]);
    assert!(ha["sha256"].as_str().is_some_and(|h| h.starts_with("sha256:")));

    let raw = parse_json_stdout(&run_egl([OsStr::new("hash"), a.as_os_str()]));
    assert_ne!(raw["sha256"], ha["sha256"]);
}

#[test]
fn seal_is_idempotent() {
    let tmp = TempDirGuard::new("seal");
    let permit = tmp.path().join("permit.json");
    write_json(
        &permit,
        &json!({
            "version": "0.1.0",
            "lane_id": "proxy",
            "scope": {"filesystem": {"read_roots": ["sandbox/"], "write_roots": []}}
        }),
    );

    let first = run_egl([OsStr::new("seal"), permit.as_os_str(), OsStr::new("--write")]);
    assert_success(&first);
    let hash = String::from_utf8_lossy(&first.stdout).trim().to_string();
    assert!(hash.starts_with("sha256:"), "unexpected seal output {hash}");
    let sealed = read_json(&permit);
    assert_eq!(sealed["permit_sha256"], hash.as_str());

    let again = run_egl([OsStr::new("seal"), permit.as_os_str()]);
    assert_success(&again);
    assert_eq!(parse_json_stdout(&again)["permit_sha256"], hash.as_str());
}

#[test]
fn seal_rejects_non_object() {
    let tmp = TempDirGuard::new("seal-bad");
    let permit = tmp.path().join("permit.json");
    fs::write(&permit, "[1, 2]").expect("write");
    let output = run_egl([OsStr::new("seal"), permit.as_os_str()]);
    assert_failure(&output);
}
