//! Human ratification tokens.
//!
//! Every token kind shares one skeleton: a fixed field projection is
//! hashed and compared with the stored `token_sha256`, the approver must
//! be named, expiry is checked, then each binding field must equal the
//! expected value exactly. Kinds differ only in their projection, their
//! binding fields and their reason codes.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::canonical::{canonical_json_string, sha256_text_hex};
use crate::clock::is_expired;
use crate::codes::TokenCode;

pub const TOKEN_VERSION: &str = "0.1.0";
pub const TOKEN_HASH_FIELD: &str = "token_sha256";

/// A self-hashing approval that binds to caller-supplied values.
pub trait SelfHashingBindable {
    const SCHEMA_ID: &'static str;
    /// Fields covered by the self-hash, besides `schema_id` and `version`.
    const PROJECTION: &'static [&'static str];
    /// Fields compared against expected values, in check order.
    const BINDINGS: &'static [&'static str];
    const INVALID: TokenCode;
    const MISMATCH: TokenCode;
    /// Hash projected values as stored and leave absent fields out, rather
    /// than hashing their string views.
    const RAW_PROJECTION: bool = false;

    fn mismatch_code(_field: &str) -> TokenCode {
        Self::MISMATCH
    }

    /// Checks that run after the field-by-field bindings pass.
    fn extra_bindings(_token: &Value, _expected: &TokenBindings) -> Result<(), TokenRejection> {
        Ok(())
    }
}

/// Surface-expansion approval for skill installs.
#[derive(Debug, Clone, Copy)]
pub struct RatificationToken;

/// Approval for a governed git commit.
#[derive(Debug, Clone, Copy)]
pub struct GitRatificationToken;

/// Approval for publishing a post.
#[derive(Debug, Clone, Copy)]
pub struct PublishPostRatificationToken;

impl SelfHashingBindable for RatificationToken {
    const SCHEMA_ID: &'static str = "EGL.RATIFICATION_TOKEN";
    const PROJECTION: &'static [&'static str] = &[
        "sce_hash_sha256",
        "authority_diff_sha256",
        "intent_hash",
        "lane_id",
        "attestation_nonce",
        "expires_ts",
        "approver_id",
    ];
    const BINDINGS: &'static [&'static str] = &[
        "authority_diff_sha256",
        "sce_hash_sha256",
        "intent_hash",
        "lane_id",
        "attestation_nonce",
    ];
    const INVALID: TokenCode = TokenCode::InvalidHitlToken;
    const MISMATCH: TokenCode = TokenCode::HitlTokenBindingMismatch;
    const RAW_PROJECTION: bool = true;

    fn mismatch_code(field: &str) -> TokenCode {
        if field == "authority_diff_sha256" {
            TokenCode::HitlAuthorityDiffMismatch
        } else {
            Self::MISMATCH
        }
    }
}

impl SelfHashingBindable for GitRatificationToken {
    const SCHEMA_ID: &'static str = "EGL.GIT_RATIFICATION_TOKEN";
    const PROJECTION: &'static [&'static str] = &[
        "law_bundle_sha256",
        "plan_hash",
        "intent_hash",
        "lane_id",
        "attestation_nonce",
        "expires_ts",
        "approver_id",
        "git_branch",
        "diff_sha256",
    ];
    const BINDINGS: &'static [&'static str] = &[
        "law_bundle_sha256",
        "plan_hash",
        "intent_hash",
        "lane_id",
        "attestation_nonce",
        "git_branch",
        "diff_sha256",
    ];
    const INVALID: TokenCode = TokenCode::InvalidGitHitlToken;
    const MISMATCH: TokenCode = TokenCode::GitHitlTokenBindingMismatch;
}

impl SelfHashingBindable for PublishPostRatificationToken {
    const SCHEMA_ID: &'static str = "EGL.PUBLISH_POST_RATIFICATION_TOKEN";
    const PROJECTION: &'static [&'static str] = &[
        "law_bundle_sha256",
        "plan_hash",
        "intent_hash",
        "lane_id",
        "attestation_nonce",
        "expires_ts",
        "approver_id",
        "surface",
        "payload_sha256",
        "source_commit_hash",
        "source_receipt_hash_sha256",
    ];
    const BINDINGS: &'static [&'static str] = &[
        "law_bundle_sha256",
        "plan_hash",
        "intent_hash",
        "lane_id",
        "attestation_nonce",
        "surface",
        "payload_sha256",
    ];
    const INVALID: TokenCode = TokenCode::InvalidHitlToken;
    const MISMATCH: TokenCode = TokenCode::HitlTokenBindingMismatch;

    /// The post must bind to its source: a commit when one is expected,
    /// otherwise a receipt. Expecting neither is itself a mismatch.
    fn extra_bindings(token: &Value, expected: &TokenBindings) -> Result<(), TokenRejection> {
        for field in ["source_commit_hash", "source_receipt_hash_sha256"] {
            let want = expected.get(field);
            if want.is_empty() {
                continue;
            }
            if field_text(token, field) != want {
                return Err(TokenRejection::new(
                    Self::MISMATCH,
                    format!("binding mismatch: {field}"),
                ));
            }
            return Ok(());
        }
        Err(TokenRejection::new(
            Self::MISMATCH,
            "missing expected commit/receipt binding",
        ))
    }
}

/// Expected binding values. Absent fields compare as the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenBindings(BTreeMap<String, String>);

impl TokenBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, value: impl Into<String>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> &str {
        self.0.get(field).map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRejection {
    pub code: TokenCode,
    pub reason: String,
}

impl TokenRejection {
    fn new(code: TokenCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.reason)
    }
}

/// String view of a token field. Missing and null are empty; other
/// scalars use their JSON text.
fn field_text(token: &Value, field: &str) -> String {
    match token.get(field) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn projection<K: SelfHashingBindable>(token: &Value) -> Value {
    let mut map = Map::new();
    for field in ["schema_id", "version"].iter().chain(K::PROJECTION) {
        if !K::RAW_PROJECTION {
            map.insert(field.to_string(), Value::String(field_text(token, field)));
        } else if let Some(value) = token.get(*field) {
            map.insert(field.to_string(), value.clone());
        }
    }
    Value::Object(map)
}

/// Bare SHA-256 hex over the kind's projection, or `None` for a
/// non-object.
pub fn token_sha256<K: SelfHashingBindable>(token: &Value) -> Option<String> {
    if !token.is_object() {
        return None;
    }
    Some(sha256_text_hex(&canonical_json_string(&projection::<K>(token))))
}

/// Issue a token of kind `K` from its field values. Unset fields are
/// empty strings.
pub fn build_token<K: SelfHashingBindable>(fields: &TokenBindings) -> Value {
    let mut map = Map::new();
    map.insert("schema_id".to_string(), Value::String(K::SCHEMA_ID.to_string()));
    map.insert("version".to_string(), Value::String(TOKEN_VERSION.to_string()));
    for field in K::PROJECTION {
        map.insert(field.to_string(), Value::String(fields.get(field).to_string()));
    }
    let mut token = Value::Object(map);
    if let (Some(hash), Some(obj)) = (token_sha256::<K>(&token), token.as_object_mut()) {
        obj.insert(TOKEN_HASH_FIELD.to_string(), Value::String(hash));
    }
    token
}

pub fn validate_token<K: SelfHashingBindable>(
    token: &Value,
    expected: &TokenBindings,
    now: &str,
) -> Result<(), TokenRejection> {
    let Some(obj) = token.as_object() else {
        return Err(TokenRejection::new(K::INVALID, "token missing or not an object"));
    };
    if obj.get("schema_id").and_then(Value::as_str) != Some(K::SCHEMA_ID)
        || obj.get("version").and_then(Value::as_str) != Some(TOKEN_VERSION)
    {
        return Err(TokenRejection::new(K::INVALID, "schema_id/version mismatch"));
    }

    let stored = obj.get(TOKEN_HASH_FIELD).and_then(Value::as_str);
    if stored.is_none() || stored != token_sha256::<K>(token).as_deref() {
        return Err(TokenRejection::new(K::INVALID, "token_sha256 self-check failed"));
    }

    match obj.get("approver_id").and_then(Value::as_str) {
        Some(approver) if !approver.is_empty() => {}
        _ => return Err(TokenRejection::new(K::INVALID, "approver_id missing")),
    }

    if is_expired(&field_text(token, "expires_ts"), now) {
        return Err(TokenRejection::new(TokenCode::HitlTokenExpired, "token expired"));
    }

    for field in K::BINDINGS {
        if field_text(token, field) != expected.get(field) {
            return Err(TokenRejection::new(
                K::mismatch_code(field),
                format!("binding mismatch: {field}"),
            ));
        }
    }

    K::extra_bindings(token, expected)
}

/// Approver id of a token, if it names one.
pub fn approver_id(token: &Value) -> &str {
    token.get("approver_id").and_then(Value::as_str).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: &str = "2026-02-13T00:00:00Z";

    fn generic_fields() -> TokenBindings {
        TokenBindings::new()
            .with("sce_hash_sha256", "sce")
            .with("authority_diff_sha256", "ad")
            .with("intent_hash", "sha3-512:i")
            .with("lane_id", "lane")
            .with("attestation_nonce", "n1")
            .with("expires_ts", "2026-03-01T00:00:00Z")
            .with("approver_id", "alice")
    }

    #[test]
    fn built_token_validates_against_its_own_bindings() {
        let token = build_token::<RatificationToken>(&generic_fields());
        assert_eq!(token["schema_id"], "EGL.RATIFICATION_TOKEN");
        assert_eq!(
            token[TOKEN_HASH_FIELD].as_str().map(str::len),
            Some(64)
        );
        assert_eq!(validate_token::<RatificationToken>(&token, &generic_fields(), NOW), Ok(()));
    }

    #[test]
    fn ratification_projection_leaves_absent_fields_out() {
        let mut token = build_token::<RatificationToken>(&generic_fields());
        let obj = token.as_object_mut().expect("object");
        obj.remove("expires_ts");
        obj.remove(TOKEN_HASH_FIELD);

        let expected = json!({
            "schema_id": "EGL.RATIFICATION_TOKEN",
            "version": TOKEN_VERSION,
            "sce_hash_sha256": "sce",
            "authority_diff_sha256": "ad",
            "intent_hash": "sha3-512:i",
            "lane_id": "lane",
            "attestation_nonce": "n1",
            "approver_id": "alice",
        });
        let hash = token_sha256::<RatificationToken>(&token);
        assert_eq!(hash, Some(sha256_text_hex(&canonical_json_string(&expected))));
        let bare = json!({"schema_id": "EGL.RATIFICATION_TOKEN", "version": TOKEN_VERSION});
        let mut empty_expiry = bare.clone();
        empty_expiry["expires_ts"] = json!("");
        assert_ne!(
            token_sha256::<RatificationToken>(&bare),
            token_sha256::<RatificationToken>(&empty_expiry)
        );

        if let (Some(hash), Some(obj)) = (hash, token.as_object_mut()) {
            obj.insert(TOKEN_HASH_FIELD.to_string(), json!(hash));
        }
        assert_eq!(validate_token::<RatificationToken>(&token, &generic_fields(), NOW), Ok(()));
    }

    #[test]
    fn git_projection_reads_absent_fields_as_empty() {
        let full = build_token::<GitRatificationToken>(&TokenBindings::new().with("approver_id", "alice"));
        let mut sparse = full.clone();
        if let Some(obj) = sparse.as_object_mut() {
            obj.remove("git_branch");
        }
        assert_eq!(
            token_sha256::<GitRatificationToken>(&sparse),
            token_sha256::<GitRatificationToken>(&full)
        );
    }

    #[test]
    fn tamper_fails_self_check() {
        let mut token = build_token::<RatificationToken>(&generic_fields());
        token["lane_id"] = json!("other");
        let err = validate_token::<RatificationToken>(&token, &generic_fields(), NOW)
            .expect_err("tampered");
        assert_eq!(err.code, TokenCode::InvalidHitlToken);
        assert_eq!(err.reason, "token_sha256 self-check failed");
    }

    #[test]
    fn authority_diff_drift_is_distinguished() {
        let token = build_token::<RatificationToken>(&generic_fields());
        let err = validate_token::<RatificationToken>(
            &token,
            &generic_fields().with("authority_diff_sha256", "other"),
            NOW,
        )
        .expect_err("drift");
        assert_eq!(err.code, TokenCode::HitlAuthorityDiffMismatch);

        let err = validate_token::<RatificationToken>(
            &token,
            &generic_fields().with("attestation_nonce", "n2"),
            NOW,
        )
        .expect_err("nonce");
        assert_eq!(err.code, TokenCode::HitlTokenBindingMismatch);
        assert_eq!(err.reason, "binding mismatch: attestation_nonce");
    }

    #[test]
    fn empty_expected_still_binds() {
        let token = build_token::<RatificationToken>(&generic_fields());
        let expected = generic_fields().with("lane_id", "");
        let err = validate_token::<RatificationToken>(&token, &expected, NOW).expect_err("empty");
        assert_eq!(err.code, TokenCode::HitlTokenBindingMismatch);
    }

    #[test]
    fn expiry_and_missing_approver() {
        let token = build_token::<RatificationToken>(&generic_fields());
        let err = validate_token::<RatificationToken>(&token, &generic_fields(), "2026-03-02T00:00:00Z")
            .expect_err("expired");
        assert_eq!(err.code, TokenCode::HitlTokenExpired);

        let anonymous = build_token::<RatificationToken>(&generic_fields().with("approver_id", ""));
        let err = validate_token::<RatificationToken>(&anonymous, &generic_fields(), NOW)
            .expect_err("anonymous");
        assert_eq!(err.reason, "approver_id missing");
    }

    #[test]
    fn kinds_do_not_cross_validate() {
        let token = build_token::<RatificationToken>(&generic_fields());
        let err = validate_token::<GitRatificationToken>(&token, &TokenBindings::new(), NOW)
            .expect_err("wrong kind");
        assert_eq!(err.code, TokenCode::InvalidGitHitlToken);
        assert!(token_sha256::<GitRatificationToken>(&json!("x")).is_none());
    }

    #[test]
    fn git_binding_order() {
        let fields = TokenBindings::new()
            .with("law_bundle_sha256", "sha256:law")
            .with("plan_hash", "sha3-512:p")
            .with("intent_hash", "sha3-512:i")
            .with("lane_id", "lane")
            .with("attestation_nonce", "n")
            .with("approver_id", "bob")
            .with("git_branch", "egl/feature")
            .with("diff_sha256", "sha256:d");
        let token = build_token::<GitRatificationToken>(&fields);
        assert_eq!(validate_token::<GitRatificationToken>(&token, &fields, NOW), Ok(()));

        let err = validate_token::<GitRatificationToken>(
            &token,
            &fields.clone().with("git_branch", "main").with("diff_sha256", "x"),
            NOW,
        )
        .expect_err("branch");
        assert_eq!(err.code, TokenCode::GitHitlTokenBindingMismatch);
        assert_eq!(err.reason, "binding mismatch: git_branch");
    }

    #[test]
    fn publish_post_requires_source_binding() {
        let fields = TokenBindings::new()
            .with("plan_hash", "p")
            .with("approver_id", "carol")
            .with("surface", "x")
            .with("payload_sha256", "sha256:pl")
            .with("source_receipt_hash_sha256", "sha256:r");
        let token = build_token::<PublishPostRatificationToken>(&fields);
        assert_eq!(
            validate_token::<PublishPostRatificationToken>(&token, &fields, NOW),
            Ok(())
        );

        let no_source = fields.clone().with("source_receipt_hash_sha256", "");
        let err = validate_token::<PublishPostRatificationToken>(&token, &no_source, NOW)
            .expect_err("no source");
        assert_eq!(err.reason, "missing expected commit/receipt binding");

        let commit = fields.with("source_commit_hash", "abc123");
        let err = validate_token::<PublishPostRatificationToken>(&token, &commit, NOW)
            .expect_err("commit preferred");
        assert_eq!(err.reason, "binding mismatch: source_commit_hash");
    }
}
