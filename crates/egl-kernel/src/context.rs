//! Values the admission gates read, and what they record on success.

use serde_json::Value;

use crate::codes::AdmissionCode;

/// Per-fixture admission state.
///
/// Gates never mutate a shared context: each takes one by value and either
/// refuses or hands back an updated copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdmissionContext {
    pub fixture_id: String,
    /// Lane every token and permit must bind to.
    pub binding_lane_id: String,
    /// Nonce candidate every token and permit must bind to.
    pub attestation_nonce: String,
    /// Evaluation clock, RFC 3339.
    pub now: String,
    /// Raw ratification tokens submitted with a skill install.
    pub ratification_tokens: Vec<Value>,
    /// Set by a gate that admits for a specific reason.
    pub admission_reason: Option<AdmissionCode>,
}

impl AdmissionContext {
    pub fn new(fixture_id: impl Into<String>) -> Self {
        Self {
            fixture_id: fixture_id.into(),
            ..Self::default()
        }
    }

    pub fn with_binding_lane(mut self, lane_id: impl Into<String>) -> Self {
        self.binding_lane_id = lane_id.into();
        self
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.attestation_nonce = nonce.into();
        self
    }

    pub fn with_now(mut self, now: impl Into<String>) -> Self {
        self.now = now.into();
        self
    }

    pub fn with_tokens(mut self, tokens: Vec<Value>) -> Self {
        self.ratification_tokens = tokens;
        self
    }

    pub fn admitted_because(mut self, reason: AdmissionCode) -> Self {
        self.admission_reason = Some(reason);
        self
    }
}
