//! Tool-call envelopes.
//!
//! A raw tool call from an agent is first normalized into an envelope
//! (repo-relative paths, normalized text, known argument shapes) and then
//! into a single-action intent. Everything the envelope carries is safe to
//! persist once passed through [`redact_for_io`].

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::canonical::{SHA256_PREFIX, sha256_bytes_hex, sha256_text_hex, to_canonical_value};
use crate::capability::{AuthorityDiff, capability_diff_digest, capability_diff_present};
use crate::diff::normalize_newlines;
use crate::error::EglError;
use crate::intent::{
    Action, ActionBody, FileAction, INTENT_SCHEMA_ID, INTENT_VERSION, Intent, NetAction, OUTSIDE_REPO,
    ProcessAction, SkillInstallDescriptor, ZONE_UNKNOWN,
};
use crate::paths::{has_abs_windows_path, safe_rel_path, to_posix};
use crate::permit::compute_permit_sha256;
use crate::token::{GitRatificationToken, PublishPostRatificationToken, token_sha256};

pub const PROXY: &str = "proxy";
pub const ZONE_REPO: &str = "repo";
pub const DRAFTS_ROOT: &str = "sandbox/_publish_drafts/";

/// Argument keys that steer binding rather than describe the call.
const BINDING_ARGS: [&str; 3] = ["force_nonce", "expiry_ts", "bind_lane_id"];
/// Top-level tool-call keys that are not arguments.
const CALL_KEYS: [&str; 6] = ["tool", "name", "id", "call_id", "lane_id", "binding"];

/// Tools the proxy knows how to normalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    FsRead,
    FsWrite,
    FsDelete,
    Exec,
    BrowserNavigate,
    GitPipelineCommit,
    DraftCreate,
    DraftBundle,
    DraftCommit,
    PostX,
    PostXThread,
    PatchApply,
    TestRun,
    DepsFetch,
    SkillInstall,
}

impl Tool {
    pub const ALL: &'static [Tool] = &[
        Tool::FsRead,
        Tool::FsWrite,
        Tool::FsDelete,
        Tool::Exec,
        Tool::BrowserNavigate,
        Tool::GitPipelineCommit,
        Tool::DraftCreate,
        Tool::DraftBundle,
        Tool::DraftCommit,
        Tool::PostX,
        Tool::PostXThread,
        Tool::PatchApply,
        Tool::TestRun,
        Tool::DepsFetch,
        Tool::SkillInstall,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Tool::FsRead => "fs.read",
            Tool::FsWrite => "fs.write",
            Tool::FsDelete => "fs.delete",
            Tool::Exec => "exec",
            Tool::BrowserNavigate => "browser.navigate",
            Tool::GitPipelineCommit => "git.pipeline_commit_from_diff",
            Tool::DraftCreate => "publish.draft.create",
            Tool::DraftBundle => "publish.draft.bundle",
            Tool::DraftCommit => "publish.draft.commit",
            Tool::PostX => "publish.post.x",
            Tool::PostXThread => "publish.post.x_thread",
            Tool::PatchApply => "code.patch.apply",
            Tool::TestRun => "code.test.run",
            Tool::DepsFetch => "code.deps.fetch",
            Tool::SkillInstall => "skill.install",
        }
    }

    pub fn from_name(name: &str) -> Option<Tool> {
        Tool::ALL.iter().copied().find(|t| t.name() == name)
    }

    pub fn is_draft(self) -> bool {
        matches!(self, Tool::DraftCreate | Tool::DraftBundle | Tool::DraftCommit)
    }

    pub fn is_post(self) -> bool {
        matches!(self, Tool::PostX | Tool::PostXThread)
    }

    /// Tools whose `ratification_token` is a git token.
    pub fn takes_git_token(self) -> bool {
        matches!(self, Tool::GitPipelineCommit | Tool::DraftCommit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub session_id: String,
    pub lane_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<Value>,
    pub agent_id: String,
    pub channel: String,
    pub origin: String,
}

impl Envelope {
    pub fn tool(&self) -> Option<Tool> {
        Tool::from_name(&self.tool_name)
    }

    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    pub fn execution_permit(&self) -> Option<&Value> {
        self.args.get("execution_permit").filter(|v| !v.is_null())
    }

    pub fn ratification_token(&self) -> Option<&Value> {
        self.args.get("ratification_token").filter(|v| v.is_object())
    }

    pub fn force_nonce(&self) -> Option<&str> {
        self.arg_str("force_nonce")
    }

    pub fn expiry_ts(&self) -> Option<&str> {
        self.arg_str("expiry_ts")
    }

    /// Lane every token and permit must bind to: an explicit
    /// `bind_lane_id`, else the envelope lane.
    pub fn binding_lane(&self) -> &str {
        match self.arg_str("bind_lane_id") {
            Some(lane) => lane,
            None if !self.lane_id.is_empty() => &self.lane_id,
            None => PROXY,
        }
    }

    pub fn expected_law_bundle_sha256(&self) -> Option<&str> {
        self.binding
            .as_ref()
            .and_then(|b| b.get("expected_law_bundle_sha256"))
            .and_then(Value::as_str)
    }

    fn skill_request(&self) -> Option<&Map<String, Value>> {
        self.args.get("skill_install_request").and_then(Value::as_object)
    }

    /// Ratification tokens submitted with a skill install: the
    /// `ratification_tokens` list when present, else the single token.
    /// Only objects count.
    pub fn skill_ratification_tokens(&self) -> Vec<Value> {
        let Some(req) = self.skill_request() else {
            return Vec::new();
        };
        let raw: Vec<&Value> = match req.get("ratification_tokens").and_then(Value::as_array) {
            Some(items) => items.iter().collect(),
            None => req.get("ratification_token").into_iter().collect(),
        };
        raw.into_iter().filter(|t| t.is_object()).cloned().collect()
    }

    pub fn to_value(&self) -> Result<Value, EglError> {
        to_canonical_value(self)
    }
}

/// LF line endings and no trailing spaces or tabs on any line.
pub fn normalize_text(text: &str) -> String {
    normalize_newlines(text)
        .split('\n')
        .map(|line| line.trim_end_matches([' ', '\t']))
        .collect::<Vec<_>>()
        .join("\n")
}

fn with_final_newline(text: String) -> String {
    if text.ends_with('\n') { text } else { text + "\n" }
}

fn tagged_text_sha256(text: &str) -> String {
    format!("{SHA256_PREFIX}{}", sha256_text_hex(text))
}

/// Fault on any drive-letter or UNC path in a string leaf of `value`.
pub fn reject_windows_abs_paths(value: &Value, location: &str) -> Result<(), EglError> {
    match value {
        Value::String(s) if has_abs_windows_path(s) => Err(EglError::AbsolutePath {
            location: location.to_string(),
        }),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .try_for_each(|(i, v)| reject_windows_abs_paths(v, &format!("{location}[{i}]"))),
        Value::Object(map) => map
            .iter()
            .try_for_each(|(k, v)| reject_windows_abs_paths(v, &format!("{location}.{k}"))),
        _ => Ok(()),
    }
}

fn rel_or(repo_root: &Path, raw: &str, fallback: &str) -> String {
    if raw.is_empty() {
        return fallback.to_string();
    }
    safe_rel_path(repo_root, raw)
        .filter(|rel| !rel.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn copy_present(src: &Map<String, Value>, dst: &mut Map<String, Value>, keys: &[&str]) {
    for key in keys {
        if let Some(v) = src.get(*key) {
            dst.insert(key.to_string(), v.clone());
        }
    }
}

fn copy_strings(src: &Map<String, Value>, dst: &mut Map<String, Value>, keys: &[&str]) {
    for key in keys {
        if let Some(v) = src.get(*key).filter(|v| v.is_string()) {
            dst.insert(key.to_string(), v.clone());
        }
    }
}

fn normalize_args(repo_root: &Path, tool: Option<Tool>, args: Map<String, Value>) -> Map<String, Value> {
    let text = |key: &str| str_arg(&args, key).unwrap_or("");
    let mut out = Map::new();

    match tool {
        Some(Tool::FsRead | Tool::FsWrite | Tool::FsDelete) => {
            out = args.clone();
            let raw = match args.get("path") {
                Some(Value::String(s)) => s.clone(),
                None | Some(Value::Null) => String::new(),
                Some(other) => other.to_string(),
            };
            let rel = safe_rel_path(repo_root, &raw).unwrap_or_else(|| OUTSIDE_REPO.to_string());
            out.insert("path".to_string(), Value::String(rel));
            return out;
        }
        Some(Tool::SkillInstall) => {
            let request = json!({
                "skill_id": text("skill_id"),
                "artifact": args.get("artifact").cloned().unwrap_or(Value::Null),
                "capability_diff": args.get("capability_diff").cloned().unwrap_or(Value::Null),
                "requested_authority_profile": text("requested_authority_profile"),
                "version_lock": text("version_lock"),
                "ratification_token": args.get("ratification_token").cloned().unwrap_or(Value::Null),
                "ratification_tokens": args.get("ratification_tokens").cloned().unwrap_or(Value::Null),
            });
            out.insert("skill_install_request".to_string(), request);
        }
        Some(t) if t.is_draft() => {
            let draft_kind = str_arg(&args, "draft_kind").unwrap_or("x_post");
            let content = normalize_text(text("content"));
            let content_hex = sha256_text_hex(&content);
            let default_path = format!("{DRAFTS_ROOT}{draft_kind}_{}.md", &content_hex[..12]);
            let target_path = str_arg(&args, "target_path")
                .filter(|raw| !raw.is_empty())
                .and_then(|raw| safe_rel_path(repo_root, raw))
                .filter(|rel| rel.starts_with(DRAFTS_ROOT))
                .unwrap_or(default_path);

            out.insert("draft_kind".to_string(), json!(draft_kind));
            if let Some(title) = str_arg(&args, "title").filter(|t| !t.is_empty()) {
                out.insert("title".to_string(), json!(title));
            }
            out.insert("content".to_string(), json!(content));
            if let Some(tags) = args.get("tags").and_then(Value::as_array).filter(|t| !t.is_empty()) {
                let tags: Vec<Value> = tags
                    .iter()
                    .map(|t| match t {
                        Value::String(s) => Value::String(s.clone()),
                        other => Value::String(other.to_string()),
                    })
                    .collect();
                out.insert("tags".to_string(), Value::Array(tags));
            }
            out.insert("target_path".to_string(), json!(target_path));
            out.insert("content_sha256".to_string(), json!(format!("{SHA256_PREFIX}{content_hex}")));
            copy_strings(&args, &mut out, &["git_branch", "base_branch", "commit_message"]);
            copy_present(&args, &mut out, &["ratification_token", "execution_permit"]);
        }
        Some(t) if t.is_post() => {
            let post_kind = if t == Tool::PostXThread { "x_thread" } else { "x_post" };
            let payload = with_final_newline(normalize_text(text("payload_text")));
            out.insert("post_kind".to_string(), json!(post_kind));
            out.insert("payload_sha256".to_string(), json!(tagged_text_sha256(&payload)));
            out.insert("payload_text".to_string(), json!(payload));
            for key in ["source_commit_hash", "source_receipt_hash_sha256"] {
                if let Some(v) = str_arg(&args, key).filter(|v| !v.is_empty()) {
                    out.insert(key.to_string(), json!(v));
                }
            }
            copy_present(&args, &mut out, &["execution_permit", "ratification_token"]);
        }
        Some(Tool::PatchApply) => {
            let after = with_final_newline(normalize_text(text("after_text")));
            out.insert("repo_root".to_string(), json!("."));
            out.insert("path".to_string(), json!(rel_or(repo_root, text("path"), OUTSIDE_REPO)));
            out.insert("after_text_sha256".to_string(), json!(tagged_text_sha256(&after)));
            out.insert("after_text".to_string(), json!(after));
            copy_present(&args, &mut out, &["execution_permit"]);
        }
        Some(t @ (Tool::TestRun | Tool::DepsFetch)) => {
            let cwd = str_arg(&args, "cwd").unwrap_or(".");
            out.insert("cwd".to_string(), json!(rel_or(repo_root, cwd, ".")));
            out.insert("cmd".to_string(), json!(normalize_text(text("cmd"))));
            out.insert("env_profile".to_string(), json!(normalize_text(text("env_profile"))));
            if t == Tool::DepsFetch {
                let lockfile = rel_or(repo_root, text("lockfile_path"), OUTSIDE_REPO);
                out.insert("lockfile_path".to_string(), json!(lockfile));
            }
            copy_present(&args, &mut out, &["execution_permit"]);
        }
        _ => return args,
    }

    copy_strings(&args, &mut out, &BINDING_ARGS);
    out
}

/// Normalize a raw tool call into an envelope.
///
/// Fails on a non-object call and on any absolute Windows path left in the
/// normalized envelope.
pub fn build_envelope(repo_root: &Path, fixture_id: &str, call: &Value) -> Result<Envelope, EglError> {
    let Some(obj) = call.as_object() else {
        return Err(EglError::MalformedEnvelope {
            description: "tool call must be a JSON object".to_string(),
        });
    };
    let text = |key: &str| match obj.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    let tool_name = text("tool").or_else(|| text("name")).unwrap_or_default();
    let tool_call_id = text("id").or_else(|| text("call_id")).unwrap_or_else(|| fixture_id.to_string());
    let lane_id = obj
        .get("lane_id")
        .and_then(Value::as_str)
        .unwrap_or(PROXY)
        .to_string();
    let binding = obj.get("binding").filter(|b| b.is_object()).cloned();

    let raw_args: Map<String, Value> = obj
        .iter()
        .filter(|(k, _)| !CALL_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let args = normalize_args(repo_root, Tool::from_name(&tool_name), raw_args);

    let envelope = Envelope {
        session_id: PROXY.to_string(),
        lane_id,
        tool_call_id,
        tool_name,
        args,
        binding,
        agent_id: PROXY.to_string(),
        channel: "cli".to_string(),
        origin: PROXY.to_string(),
    };
    reject_windows_abs_paths(&envelope.to_value()?, "envelope")?;
    Ok(envelope)
}

fn repo_rel(repo_root: &Path, path: Option<&Value>) -> Option<String> {
    let p = path?.as_str()?;
    if p == OUTSIDE_REPO || has_abs_windows_path(p) {
        return None;
    }
    safe_rel_path(repo_root, p).filter(|rel| !rel.is_empty())
}

fn file_body(op: &str, zone: Option<&str>, rel: Option<String>) -> ActionBody {
    let zone = zone.unwrap_or(if rel.is_some() { ZONE_REPO } else { ZONE_UNKNOWN });
    let path = rel.unwrap_or_else(|| OUTSIDE_REPO.to_string());
    ActionBody::File {
        file: FileAction::new(op, zone, &path),
    }
}

fn surface_process(surface: &str) -> ActionBody {
    ActionBody::Process {
        process: ProcessAction {
            command: surface.to_string(),
            args: Vec::new(),
        },
    }
}

fn skill_install_descriptor(request: Option<&Map<String, Value>>) -> Result<SkillInstallDescriptor, EglError> {
    let empty = Map::new();
    let req = request.unwrap_or(&empty);
    let text = |key: &str| str_arg(req, key).unwrap_or("").to_string();
    let artifact = req.get("artifact");
    let declared_sha256 = artifact
        .and_then(|a| a.get("declared_sha256"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let decoded = artifact
        .and_then(|a| a.get("bytes_b64"))
        .and_then(Value::as_str)
        .filter(|b64| !b64.is_empty())
        .and_then(|b64| STANDARD.decode(b64.trim()).ok());
    let observed_sha256 = decoded.as_deref().map(sha256_bytes_hex);
    let artifact_size_bytes = decoded.as_ref().map(|bytes| bytes.len() as u64);

    let diff = req.get("capability_diff").cloned().unwrap_or(Value::Null);
    let present = capability_diff_present(&diff);
    let (capability_diff_digest, authority_diff_sha256) = if present {
        (
            Some(capability_diff_digest(&diff).sha256),
            Some(AuthorityDiff::derive(&diff).digest()?.sha256),
        )
    } else {
        (None, None)
    };

    Ok(SkillInstallDescriptor {
        skill_id: text("skill_id"),
        requested_authority_profile: text("requested_authority_profile"),
        version_lock: text("version_lock"),
        declared_sha256,
        observed_sha256,
        artifact_size_bytes,
        capability_diff_present: present,
        capability_diff_digest,
        authority_diff_sha256,
    })
}

/// Turn an envelope into a one-action intent (`A1`).
///
/// Unknown tools map to the surface `unknown.<tool>` so that compilation
/// refuses them as unmapped.
pub fn normalize_to_intent(repo_root: &Path, envelope: &Envelope) -> Result<Intent, EglError> {
    let args = &envelope.args;
    let mut skill_install = None;

    let (surface, body) = match envelope.tool() {
        Some(t @ (Tool::FsRead | Tool::FsWrite)) => {
            let op = if t == Tool::FsRead { "read" } else { "write" };
            let rel = repo_rel(repo_root, args.get("path"));
            (format!("file.{op}"), file_body(op, None, rel))
        }
        Some(Tool::FsDelete) => {
            let rel = repo_rel(repo_root, args.get("path"));
            let zone = args.get("zone").filter(|z| !z.is_null()).map(|z| match z {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
            ("file.delete".to_string(), file_body("delete", zone.as_deref(), rel))
        }
        Some(Tool::Exec) => {
            let surface = if str_arg(args, "target") == Some("host") {
                "exec.host"
            } else {
                "exec.sandbox"
            };
            let process = ProcessAction {
                command: str_arg(args, "command").unwrap_or("").to_string(),
                args: args
                    .get("args")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                            .collect()
                    })
                    .unwrap_or_default(),
            };
            (surface.to_string(), ActionBody::Process { process })
        }
        Some(Tool::BrowserNavigate) => {
            let net = NetAction {
                url: str_arg(args, "url").unwrap_or("").to_string(),
            };
            ("browser.navigate".to_string(), ActionBody::Net { net })
        }
        Some(t) if t.is_draft() => {
            let rel = repo_rel(repo_root, args.get("target_path"));
            (t.name().to_string(), file_body("write", None, rel))
        }
        Some(Tool::PatchApply) => {
            let rel = repo_rel(repo_root, args.get("path"));
            (Tool::PatchApply.name().to_string(), file_body("write", None, rel))
        }
        Some(Tool::SkillInstall) => {
            let request = args.get("skill_install_request").and_then(Value::as_object);
            skill_install = Some(skill_install_descriptor(request)?);
            let surface = Tool::SkillInstall.name();
            (surface.to_string(), surface_process(surface))
        }
        Some(t) => (t.name().to_string(), surface_process(t.name())),
        None => (format!("unknown.{}", envelope.tool_name), surface_process("")),
    };

    let action = Action {
        action_id: "A1".to_string(),
        tool_surface_id: surface,
        body,
    };
    let mut raw = json!({
        "schema_id": INTENT_SCHEMA_ID,
        "version": INTENT_VERSION,
        "intent_id": envelope.tool_call_id,
        "actions": [to_canonical_value(&action)?],
    });
    if let (Some(skill), Some(obj)) = (skill_install, raw.as_object_mut()) {
        obj.insert("skill_install".to_string(), to_canonical_value(&skill)?);
    }
    Intent::from_value(raw)
}

/// Envelope as it may be persisted: no permits, tokens, artifact bytes or
/// patch text, only their hashes.
pub fn redact_for_io(envelope: &Envelope) -> Result<Value, EglError> {
    let mut redacted = envelope.clone();
    let tool = envelope.tool();
    let args = &mut redacted.args;

    if tool == Some(Tool::SkillInstall)
        && let Some(Value::Object(req)) = args.get_mut("skill_install_request")
    {
        if let Some(Value::Object(artifact)) = req.get_mut("artifact") {
            artifact.remove("bytes_b64");
        }
        req.remove("ratification_token");
        req.remove("ratification_tokens");
    }

    if let Some(permit) = args.remove("execution_permit") {
        let hash = permit.is_object().then(|| compute_permit_sha256(&permit));
        args.insert("execution_permit_sha256".to_string(), json!(hash));
    }

    match tool {
        Some(Tool::PatchApply) => {
            let after = args.remove("after_text");
            if !args.get("after_text_sha256").is_some_and(Value::is_string) {
                let hash = after
                    .as_ref()
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .map(tagged_text_sha256);
                args.insert("after_text_sha256".to_string(), json!(hash));
            }
        }
        Some(t) if t.takes_git_token() || t.is_post() => {
            let token = args.remove("ratification_token").filter(Value::is_object);
            let hash = token.and_then(|tok| {
                if t.takes_git_token() {
                    token_sha256::<GitRatificationToken>(&tok)
                } else {
                    token_sha256::<PublishPostRatificationToken>(&tok)
                }
            });
            let tagged = hash.map(|h| format!("{SHA256_PREFIX}{h}"));
            args.insert("ratification_token_sha256".to_string(), json!(tagged));
        }
        _ => {}
    }

    redacted.to_value()
}

/// Deterministic bytes a write-class action lays down.
///
/// Explicit `after_text` wins, then a publish draft (front matter plus
/// normalized content), then a `write_spec` (`literal` or `repeat`), then a
/// path marker.
pub fn derive_write_after_text(rel_path: &str, args: &Map<String, Value>) -> String {
    if let Some(after) = str_arg(args, "after_text") {
        return normalize_newlines(after);
    }

    if let (Some(kind), Some(content)) = (str_arg(args, "draft_kind"), str_arg(args, "content")) {
        let trimmed = normalize_text(content);
        let content_hex = sha256_text_hex(&trimmed);
        return format!(
            "---\nschema_id: EGL.PUBLISH_DRAFT\nversion: 0.1.0\ndraft_kind: {kind}\ncontent_sha256: {SHA256_PREFIX}{content_hex}\n---\n{}",
            with_final_newline(trimmed)
        );
    }

    let marker = format!("EGL_DIFF_WRITE:{}", to_posix(rel_path));
    let spec = args.get("write_spec").filter(|s| s.is_object());
    match spec.and_then(|s| s.get("kind")).and_then(Value::as_str) {
        Some("literal") => normalize_newlines(
            spec.and_then(|s| s.get("text"))
                .and_then(Value::as_str)
                .unwrap_or(""),
        ),
        Some("repeat") => {
            let ch = spec
                .and_then(|s| s.get("char"))
                .and_then(Value::as_str)
                .and_then(|c| c.chars().next())
                .unwrap_or('A');
            let count = spec
                .and_then(|s| s.get("count"))
                .and_then(Value::as_f64)
                .filter(|n| n.is_finite() && *n > 0.0)
                .map_or(0, |n| n.floor() as usize);
            format!("{marker}\n{}", ch.to_string().repeat(count))
        }
        _ => marker,
    }
}
