//! Closed reason-code families.
//!
//! Each gate family owns one enum. Wire strings are fixed here and nowhere
//! else; everything downstream (artifacts, ledger records, pack
//! expectations) compares against `as_str()`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! reason_codes {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($variant:ident => $wire:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(format!(
                        concat!("unknown ", stringify!($name), ": {}"),
                        other
                    )),
                }
            }
        }
    };
}

reason_codes! {
    /// Intent compiler refusals.
    CompileCode {
        UnmappedToolSurface => "UNMAPPED_TOOL_SURFACE",
    }
}

reason_codes! {
    /// Plan policy validator refusals, in check order.
    PolicyCode {
        ZoneUnknown => "ZONE_UNKNOWN",
        SystemCoreDelete => "SYSTEM_CORE_DELETE",
        MemoryMdWrite => "MEMORY_MD_WRITE",
        LaneMismatch => "LANE_MISMATCH",
        PlanReplay => "PLAN_REPLAY",
        HashMismatch => "HASH_MISMATCH",
        MissingCapabilityDiff => "MISSING_CAPABILITY_DIFF",
        MissingArtifactHash => "MISSING_ARTIFACT_HASH",
        ArtifactHashMismatch => "ARTIFACT_HASH_MISMATCH",
        HitlRequiredSurfaceExpansion => "HITL_REQUIRED_SURFACE_EXPANSION",
        HitlQuorumNotMet => "HITL_QUORUM_NOT_MET",
        HitlDuplicateApprover => "HITL_DUPLICATE_APPROVER",
    }
}

reason_codes! {
    /// Reasons recorded on an admitted outcome.
    AdmissionCode {
        HitlQuorumAccepted => "HITL_QUORUM_ACCEPTED",
        HitlTokenAccepted => "HITL_TOKEN_ACCEPTED",
    }
}

reason_codes! {
    /// Execution permit and scope refusals.
    PermitCode {
        PermitRequired => "PERMIT_REQUIRED",
        InvalidPermit => "INVALID_PERMIT",
        PermitExpired => "PERMIT_EXPIRED",
        PermitBindingMismatch => "PERMIT_BINDING_MISMATCH",
        PermitScopeViolation => "PERMIT_SCOPE_VIOLATION",
        PermitOpNotAllowed => "PERMIT_OP_NOT_ALLOWED",
        PermitDiffScopeViolation => "PERMIT_DIFF_SCOPE_VIOLATION",
        DiffTooLarge => "DIFF_TOO_LARGE",
        DiffLineLimitExceeded => "DIFF_LINE_LIMIT_EXCEEDED",
        PublishScopeViolation => "PUBLISH_SCOPE_VIOLATION",
        PayloadTooLarge => "PAYLOAD_TOO_LARGE",
        MissingPostBinding => "MISSING_POST_BINDING",
        EgressScopeViolation => "EGRESS_SCOPE_VIOLATION",
        ExecProfileNotAllowed => "EXEC_PROFILE_NOT_ALLOWED",
        ExecCmdNotAllowed => "EXEC_CMD_NOT_ALLOWED",
    }
}

reason_codes! {
    /// Egress gate verdicts.
    EgressCode {
        EgressScopeViolation => "EGRESS_SCOPE_VIOLATION",
        LocalhostDenied => "LOCALHOST_DENIED",
        LanDenied => "LAN_DENIED",
        InsecureProtocol => "INSECURE_PROTOCOL",
        EgressDrift => "EGRESS_DRIFT",
        EgressDenied => "EGRESS_DENIED",
    }
}

reason_codes! {
    /// Ratification token refusals.
    TokenCode {
        InvalidHitlToken => "INVALID_HITL_TOKEN",
        InvalidGitHitlToken => "INVALID_GIT_HITL_TOKEN",
        HitlTokenExpired => "HITL_TOKEN_EXPIRED",
        HitlAuthorityDiffMismatch => "HITL_AUTHORITY_DIFF_MISMATCH",
        HitlTokenBindingMismatch => "HITL_TOKEN_BINDING_MISMATCH",
        GitHitlTokenBindingMismatch => "GIT_HITL_TOKEN_BINDING_MISMATCH",
    }
}

reason_codes! {
    /// Nonce and TOCTOU guard refusals.
    GuardCode {
        NonceReplay => "NONCE_REPLAY",
        ToctouDetected => "TOCTOU_DETECTED",
    }
}

reason_codes! {
    /// Orchestrator-level gates that sit between the kernel validators.
    GateCode {
        PlanExpired => "PLAN_EXPIRED",
        PolicyVersionMismatch => "POLICY_VERSION_MISMATCH",
        LaneMismatch => "LANE_MISMATCH",
        MissingLockfile => "MISSING_LOCKFILE",
        HitlRequiredGitCommit => "HITL_REQUIRED_GIT_COMMIT",
        HitlRequiredPublishPost => "HITL_REQUIRED_PUBLISH_POST",
        GitDiffReferenceMissing => "GIT_DIFF_REFERENCE_MISSING",
        UnsupportedAction => "UNSUPPORTED_ACTION",
    }
}

/// Any reason code, serialized as its bare wire string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ReasonCode {
    Compile(CompileCode),
    Policy(PolicyCode),
    Admission(AdmissionCode),
    Permit(PermitCode),
    Egress(EgressCode),
    Token(TokenCode),
    Guard(GuardCode),
    Gate(GateCode),
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::Compile(c) => c.as_str(),
            ReasonCode::Policy(c) => c.as_str(),
            ReasonCode::Admission(c) => c.as_str(),
            ReasonCode::Permit(c) => c.as_str(),
            ReasonCode::Egress(c) => c.as_str(),
            ReasonCode::Token(c) => c.as_str(),
            ReasonCode::Guard(c) => c.as_str(),
            ReasonCode::Gate(c) => c.as_str(),
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! into_reason {
    ($($family:ident => $variant:ident),+ $(,)?) => {
        $(
            impl From<$family> for ReasonCode {
                fn from(code: $family) -> Self {
                    ReasonCode::$variant(code)
                }
            }
        )+
    };
}

into_reason! {
    CompileCode => Compile,
    PolicyCode => Policy,
    AdmissionCode => Admission,
    PermitCode => Permit,
    EgressCode => Egress,
    TokenCode => Token,
    GuardCode => Guard,
    GateCode => Gate,
}

/// Terminal vs retryable refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefusalStatus {
    /// Resubmitting the same inputs always fails the same way.
    RefuseHard,
    /// Resubmission with human ratification may succeed.
    DeferHitl,
}

impl RefusalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RefusalStatus::RefuseHard => "REFUSE_HARD",
            RefusalStatus::DeferHitl => "DEFER_HITL",
        }
    }
}

impl fmt::Display for RefusalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_strings_match_serde() {
        for code in PolicyCode::ALL {
            assert_eq!(
                serde_json::to_value(code).expect("serialize"),
                json!(code.as_str())
            );
        }
        for code in PermitCode::ALL {
            assert_eq!(
                serde_json::to_value(code).expect("serialize"),
                json!(code.as_str())
            );
        }
    }

    #[test]
    fn unified_code_serializes_bare() {
        let code: ReasonCode = TokenCode::HitlAuthorityDiffMismatch.into();
        assert_eq!(
            serde_json::to_value(code).expect("serialize"),
            json!("HITL_AUTHORITY_DIFF_MISMATCH")
        );
        assert_eq!(code.to_string(), "HITL_AUTHORITY_DIFF_MISMATCH");
    }

    #[test]
    fn parse_round_trip() {
        for code in GuardCode::ALL {
            assert_eq!(code.as_str().parse::<GuardCode>(), Ok(*code));
        }
        assert!("NOPE".parse::<GateCode>().is_err());
    }

    #[test]
    fn refusal_status_wire() {
        assert_eq!(
            serde_json::to_value(RefusalStatus::DeferHitl).expect("serialize"),
            json!("DEFER_HITL")
        );
    }
}
