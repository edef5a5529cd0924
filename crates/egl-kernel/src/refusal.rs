//! Hashed refusal records and the per-fixture outcome they fold into.

use serde::Serialize;
use serde_json::{Value, json};

use crate::canonical::{sha3_512_tagged, to_canonical_value};
use crate::codes::{AdmissionCode, CompileCode, ReasonCode, RefusalStatus};

pub const REFUSAL_SCHEMA_ID: &str = "EGL.REFUSAL";
pub const REFUSAL_VERSION: &str = "0.1.0";

/// Tier label attached to human-review deferrals.
pub const TIER_HUMAN_REVIEW: &str = "T4";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefusalHashes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    pub refusal: String,
}

/// A gate refusal. `hashes.refusal` is always recomputed from the other
/// fields; callers never set it directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Refusal {
    pub schema_id: String,
    pub version: String,
    pub status: RefusalStatus,
    pub code: ReasonCode,
    pub reason: String,
    pub violated_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_surface_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    pub hashes: RefusalHashes,
}

impl Refusal {
    fn new(
        status: RefusalStatus,
        code: impl Into<ReasonCode>,
        reason: impl Into<String>,
        violated_ref: impl Into<String>,
    ) -> Self {
        let mut refusal = Self {
            schema_id: REFUSAL_SCHEMA_ID.to_string(),
            version: REFUSAL_VERSION.to_string(),
            status,
            code: code.into(),
            reason: reason.into(),
            violated_ref: violated_ref.into(),
            tool_surface_id: None,
            tier: None,
            meta: None,
            hashes: RefusalHashes {
                intent: None,
                refusal: String::new(),
            },
        };
        refusal.reseal();
        refusal
    }

    /// Terminal refusal.
    pub fn hard(
        code: impl Into<ReasonCode>,
        reason: impl Into<String>,
        violated_ref: impl Into<String>,
    ) -> Self {
        Self::new(RefusalStatus::RefuseHard, code, reason, violated_ref)
    }

    /// Human-review deferral.
    pub fn defer(
        code: impl Into<ReasonCode>,
        reason: impl Into<String>,
        violated_ref: impl Into<String>,
    ) -> Self {
        Self::new(RefusalStatus::DeferHitl, code, reason, violated_ref)
    }

    /// Compiler refusal for a surface the registry does not map.
    ///
    /// Carries the intent hash even though no plan exists, and hashes only
    /// the code, surface and intent so the digest is stable across reason
    /// wording changes.
    pub fn unmapped(surface_id: &str, intent_hash: &str) -> Self {
        let code = CompileCode::UnmappedToolSurface;
        Self {
            schema_id: REFUSAL_SCHEMA_ID.to_string(),
            version: REFUSAL_VERSION.to_string(),
            status: RefusalStatus::RefuseHard,
            code: code.into(),
            reason: "No mapping, no execution".to_string(),
            violated_ref: "tool_surface_map#surfaces".to_string(),
            tool_surface_id: Some(surface_id.to_string()),
            tier: None,
            meta: None,
            hashes: RefusalHashes {
                intent: Some(intent_hash.to_string()),
                refusal: sha3_512_tagged(&json!({
                    "code": code.as_str(),
                    "tool_surface_id": surface_id,
                    "intent": intent_hash,
                })),
            },
        }
    }

    pub fn with_tier(mut self, tier: &str) -> Self {
        self.tier = Some(tier.to_string());
        self.reseal();
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self.reseal();
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status == RefusalStatus::RefuseHard
    }

    fn reseal(&mut self) {
        let mut base = json!({
            "schema_id": self.schema_id,
            "version": self.version,
            "status": self.status.as_str(),
            "code": self.code.as_str(),
            "reason": self.reason,
            "violated_ref": self.violated_ref,
        });
        if let Some(map) = base.as_object_mut() {
            if let Some(tier) = &self.tier {
                map.insert("tier".to_string(), json!(tier));
            }
            if let Some(meta) = &self.meta {
                map.insert("meta".to_string(), meta.clone());
            }
        }
        self.hashes.refusal = sha3_512_tagged(&base);
    }

    pub fn to_value(&self) -> Value {
        to_canonical_value(self).unwrap_or(Value::Null)
    }
}

/// Final verdict for one fixture after every gate has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Admitted {
        reason: Option<ReasonCode>,
    },
    Rejected {
        code: ReasonCode,
        status: RefusalStatus,
    },
}

impl Outcome {
    pub fn admitted() -> Self {
        Outcome::Admitted { reason: None }
    }

    pub fn admitted_with(reason: AdmissionCode) -> Self {
        Outcome::Admitted {
            reason: Some(reason.into()),
        }
    }

    pub fn hard(code: impl Into<ReasonCode>) -> Self {
        Outcome::Rejected {
            code: code.into(),
            status: RefusalStatus::RefuseHard,
        }
    }

    pub fn defer(code: impl Into<ReasonCode>) -> Self {
        Outcome::Rejected {
            code: code.into(),
            status: RefusalStatus::DeferHitl,
        }
    }

    pub fn from_refusal(refusal: &Refusal) -> Self {
        Outcome::Rejected {
            code: refusal.code,
            status: refusal.status,
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Outcome::Admitted { .. })
    }

    pub fn is_hard_refusal(&self) -> bool {
        matches!(
            self,
            Outcome::Rejected {
                status: RefusalStatus::RefuseHard,
                ..
            }
        )
    }

    /// `"admitted"` or `"rejected"`.
    pub fn status_str(&self) -> &'static str {
        if self.is_admitted() {
            "admitted"
        } else {
            "rejected"
        }
    }

    pub fn reason_code(&self) -> Option<ReasonCode> {
        match self {
            Outcome::Admitted { reason } => *reason,
            Outcome::Rejected { code, .. } => Some(*code),
        }
    }

    pub fn refusal_status(&self) -> Option<RefusalStatus> {
        match self {
            Outcome::Admitted { .. } => None,
            Outcome::Rejected { status, .. } => Some(*status),
        }
    }

    /// `{status, reason_code, refusal_status}` as recorded in decisions.
    pub fn summary(&self) -> Value {
        json!({
            "status": self.status_str(),
            "reason_code": self.reason_code().map(ReasonCode::as_str),
            "refusal_status": self.refusal_status().map(RefusalStatus::as_str),
        })
    }
}
