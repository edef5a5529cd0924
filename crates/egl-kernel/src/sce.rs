//! Supply-chain evidence for skill installs.

use serde::Serialize;
use serde_json::Value;

use crate::canonical::{canonical_json_string, sha256_text_hex, to_canonical_value};
use crate::error::EglError;
use crate::intent::SkillInstallDescriptor;

pub const SCE_SCHEMA_ID: &str = "EGL.SCE";
pub const SCE_VERSION: &str = "0.1.0";

/// Decision status recorded in an SCE when the install was admitted.
pub const SCE_ALLOW: &str = "ALLOW";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceSkill {
    pub skill_id: String,
    pub version_lock: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceCapability {
    pub requested_authority_profile: String,
    pub capability_diff_sha256: Option<String>,
    pub authority_diff_sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceArtifact {
    pub declared_sha256: Option<String>,
    pub observed_sha256: Option<String>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceDecision {
    pub status: String,
    pub reason_code: Option<String>,
}

impl SceDecision {
    pub fn new(status: &str, reason_code: Option<&str>) -> Self {
        Self {
            status: status.to_string(),
            reason_code: reason_code.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupplyChainEvidence {
    pub schema_id: String,
    pub version: String,
    pub fixture_id: String,
    pub action_type: String,
    pub skill: SceSkill,
    pub capability: SceCapability,
    pub artifact: SceArtifact,
    pub decision: SceDecision,
}

impl SupplyChainEvidence {
    /// Build from an install descriptor. Diff digests are passed explicitly
    /// because the audit copy recomputes them from the raw request.
    pub fn build(
        fixture_id: &str,
        skill: &SkillInstallDescriptor,
        capability_diff_sha256: Option<String>,
        authority_diff_sha256: Option<String>,
        decision: SceDecision,
    ) -> Self {
        Self {
            schema_id: SCE_SCHEMA_ID.to_string(),
            version: SCE_VERSION.to_string(),
            fixture_id: fixture_id.to_string(),
            action_type: "INSTALL_SKILL".to_string(),
            skill: SceSkill {
                skill_id: skill.skill_id.clone(),
                version_lock: skill.version_lock.clone(),
            },
            capability: SceCapability {
                requested_authority_profile: skill.requested_authority_profile.clone(),
                capability_diff_sha256,
                authority_diff_sha256,
            },
            artifact: SceArtifact {
                declared_sha256: skill.declared_sha256.clone(),
                observed_sha256: skill.observed_sha256.clone(),
                size_bytes: skill.artifact_size_bytes,
            },
            decision,
        }
    }

    pub fn to_value(&self) -> Result<Value, EglError> {
        to_canonical_value(self)
    }

    pub fn canonical(&self) -> Result<String, EglError> {
        Ok(canonical_json_string(&self.to_value()?))
    }

    /// Bare SHA-256 hex of the canonical SCE.
    pub fn hash(&self) -> Result<String, EglError> {
        Ok(sha256_text_hex(&self.canonical()?))
    }
}

/// The SCE hash a ratification token must bind to: the install as it
/// would be recorded once quorum is accepted.
pub fn expected_sce_hash(fixture_id: &str, skill: &SkillInstallDescriptor) -> Result<String, EglError> {
    SupplyChainEvidence::build(
        fixture_id,
        skill,
        skill.capability_diff_digest.clone(),
        skill.authority_diff_sha256.clone(),
        SceDecision::new(SCE_ALLOW, Some("HITL_QUORUM_ACCEPTED")),
    )
    .hash()
}
