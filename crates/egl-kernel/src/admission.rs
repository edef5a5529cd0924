//! Action admission records.
//!
//! `admit` folds a compilation and the policy verdict into one hashed
//! record. A refused record carries the refusal; an admitted one carries
//! the frozen plan. Either way the record holds a small SPE ledger naming
//! the evidence it rests on.

use serde::Serialize;
use serde_json::{Value, json};

use crate::canonical::{sha3_512_tagged, to_canonical_value};
use crate::codes::{AdmissionCode, ReasonCode};
use crate::compiler::{Compilation, CompiledPlan};
use crate::context::AdmissionContext;
use crate::error::EglError;
use crate::policy;
use crate::refusal::{Outcome, Refusal};

pub const AAR_SCHEMA_ID: &str = "EGL.AAR";
pub const PLAN_FREEZE_SCHEMA_ID: &str = "EGL.PLAN_FREEZE";
pub const SPE_LEDGER_SCHEMA_ID: &str = "EGL.SPE_LEDGER";
pub const ATTESTATION_SCHEMA_ID: &str = "EGL.ATTESTATION";
pub const RECORD_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreezeHashes {
    pub plan: String,
    pub freeze: String,
}

/// A plan pinned by hash, with the exact canonical text that was hashed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanFreeze {
    pub schema_id: String,
    pub version: String,
    pub plan_hash: String,
    pub plan_canonical: String,
    pub plan: Value,
    pub hashes: FreezeHashes,
}

impl PlanFreeze {
    pub fn of(compiled: &CompiledPlan) -> Result<Self, EglError> {
        let plan = compiled.plan.to_value()?;
        let plan_canonical = compiled.plan.canonical()?;
        let plan_hash = sha3_512_tagged(&plan);
        let freeze = sha3_512_tagged(&json!({
            "schema_id": PLAN_FREEZE_SCHEMA_ID,
            "version": RECORD_VERSION,
            "plan_hash": plan_hash,
        }));
        Ok(Self {
            schema_id: PLAN_FREEZE_SCHEMA_ID.to_string(),
            version: RECORD_VERSION.to_string(),
            plan_hash: plan_hash.clone(),
            plan_canonical,
            plan,
            hashes: FreezeHashes {
                plan: plan_hash,
                freeze,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpeEntryBody {
    Refusal {
        code: ReasonCode,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_surface_id: Option<String>,
        hashes: RefusalEntryHashes,
    },
    PlanFreeze {
        plan_hash: String,
        hashes: FreezeEntryHashes,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefusalEntryHashes {
    pub refusal: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreezeEntryHashes {
    pub freeze: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeEntry {
    pub entry_id: String,
    #[serde(flatten)]
    pub body: SpeEntryBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeLedgerHashes {
    pub ledger: String,
}

/// Per-decision evidence ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeLedger {
    pub schema_id: String,
    pub version: String,
    pub entries: Vec<SpeEntry>,
    pub hashes: SpeLedgerHashes,
}

impl SpeLedger {
    pub fn build(freeze: Option<&PlanFreeze>, refusal: Option<&Refusal>) -> Result<Self, EglError> {
        let mut entries = Vec::new();
        if let Some(refusal) = refusal {
            entries.push(SpeEntry {
                entry_id: "SPE/REFUSAL/0001".to_string(),
                body: SpeEntryBody::Refusal {
                    code: refusal.code,
                    tool_surface_id: refusal.tool_surface_id.clone(),
                    hashes: RefusalEntryHashes {
                        refusal: refusal.hashes.refusal.clone(),
                    },
                },
            });
        }
        if let Some(freeze) = freeze {
            entries.push(SpeEntry {
                entry_id: "SPE/PLAN_FREEZE/0001".to_string(),
                body: SpeEntryBody::PlanFreeze {
                    plan_hash: freeze.plan_hash.clone(),
                    hashes: FreezeEntryHashes {
                        freeze: freeze.hashes.freeze.clone(),
                    },
                },
            });
        }
        entries.sort_by(|a, b| a.entry_id.cmp(&b.entry_id));

        let ledger = sha3_512_tagged(&json!({
            "schema_id": SPE_LEDGER_SCHEMA_ID,
            "version": RECORD_VERSION,
            "entries": to_canonical_value(&entries)?,
        }));
        Ok(Self {
            schema_id: SPE_LEDGER_SCHEMA_ID.to_string(),
            version: RECORD_VERSION.to_string(),
            entries,
            hashes: SpeLedgerHashes { ledger },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AarStatus {
    Ok,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdmissionNote {
    pub code: AdmissionCode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AarHashes {
    pub aar: String,
}

/// The `EGL.AAR` record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionAdmissionRecord {
    pub schema_id: String,
    pub version: String,
    pub status: AarStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal: Option<Refusal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_freeze: Option<PlanFreeze>,
    pub ledger: SpeLedger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admission: Option<AdmissionNote>,
    pub hashes: AarHashes,
}

impl ActionAdmissionRecord {
    fn sealed(
        status: AarStatus,
        refusal: Option<Refusal>,
        plan_freeze: Option<PlanFreeze>,
        admission: Option<AdmissionNote>,
    ) -> Result<Self, EglError> {
        let ledger = SpeLedger::build(plan_freeze.as_ref(), refusal.as_ref())?;
        let mut aar = Self {
            schema_id: AAR_SCHEMA_ID.to_string(),
            version: RECORD_VERSION.to_string(),
            status,
            refusal,
            plan_freeze,
            ledger,
            admission,
            hashes: AarHashes { aar: String::new() },
        };
        let mut body = to_canonical_value(&aar)?;
        if let Some(map) = body.as_object_mut() {
            map.remove("hashes");
        }
        aar.hashes.aar = sha3_512_tagged(&body);
        Ok(aar)
    }

    pub fn is_ok(&self) -> bool {
        self.status == AarStatus::Ok
    }

    pub fn to_value(&self) -> Result<Value, EglError> {
        to_canonical_value(self)
    }
}

/// Result of admission: the record plus the state later gates read.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub aar: ActionAdmissionRecord,
    pub outcome: Outcome,
    /// Present only when admitted.
    pub context: Option<AdmissionContext>,
}

/// Compile-time refusals pass straight through; otherwise run the policy
/// validator and freeze the plan it admits.
pub fn admit(compilation: &Compilation, ctx: AdmissionContext) -> Result<Admission, EglError> {
    let compiled = match compilation {
        Compilation::Refused(refusal) => {
            return Ok(Admission {
                outcome: Outcome::from_refusal(refusal),
                aar: ActionAdmissionRecord::sealed(AarStatus::Rejected, Some(refusal.clone()), None, None)?,
                context: None,
            });
        }
        Compilation::Compiled(compiled) => compiled,
    };

    match policy::validate(compiled, ctx) {
        Err(refusal) => Ok(Admission {
            outcome: Outcome::from_refusal(&refusal),
            aar: ActionAdmissionRecord::sealed(AarStatus::Rejected, Some(refusal), None, None)?,
            context: None,
        }),
        Ok(ctx) => {
            let freeze = PlanFreeze::of(compiled)?;
            let admission = ctx.admission_reason.map(|code| AdmissionNote { code });
            let outcome = match ctx.admission_reason {
                Some(code) => Outcome::admitted_with(code),
                None => Outcome::admitted(),
            };
            Ok(Admission {
                aar: ActionAdmissionRecord::sealed(AarStatus::Ok, None, Some(freeze), admission)?,
                outcome,
                context: Some(ctx),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttestationHashes {
    pub attestation: String,
}

/// Deterministic attestation over an admitted record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attestation {
    pub schema_id: String,
    pub version: String,
    pub plan_hash: String,
    pub ledger_hash: String,
    pub aar_hash: String,
    pub hashes: AttestationHashes,
}

impl Attestation {
    /// `None` unless the record admitted a plan.
    pub fn of(aar: &ActionAdmissionRecord) -> Option<Self> {
        let freeze = aar.plan_freeze.as_ref().filter(|_| aar.is_ok())?;
        let payload = json!({
            "schema_id": ATTESTATION_SCHEMA_ID,
            "version": RECORD_VERSION,
            "plan_hash": freeze.plan_hash,
            "ledger_hash": aar.ledger.hashes.ledger,
            "aar_hash": aar.hashes.aar,
        });
        Some(Self {
            schema_id: ATTESTATION_SCHEMA_ID.to_string(),
            version: RECORD_VERSION.to_string(),
            plan_hash: freeze.plan_hash.clone(),
            ledger_hash: aar.ledger.hashes.ledger.clone(),
            aar_hash: aar.hashes.aar.clone(),
            hashes: AttestationHashes {
                attestation: sha3_512_tagged(&payload),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::intent::Intent;
    use crate::registry::{RawSurfaceEntry, TOOL_SURFACE_MAP_SCHEMA_ID, ToolSurfaceMap, ToolSurfaceRegistry};

    fn registry() -> ToolSurfaceRegistry {
        ToolSurfaceRegistry::from_map(ToolSurfaceMap {
            schema_id: Some(TOOL_SURFACE_MAP_SCHEMA_ID.to_string()),
            version: Some("1".to_string()),
            surfaces: vec![RawSurfaceEntry {
                surface_id: Some("file.read".to_string()),
                kind: Some("file".to_string()),
                schema_ref: Some("ref".to_string()),
            }],
        })
        .expect("registry")
    }

    fn compilation(zone: &str, surface: &str) -> Compilation {
        let intent = Intent::from_value(json!({
            "actions": [{
                "action_id": "A1", "kind": "file", "tool_surface_id": surface,
                "file": {"op": "read", "zone": zone, "path": "README.md"}
            }]
        }))
        .expect("intent");
        compile(&intent, &registry()).expect("compile")
    }

    #[test]
    fn admitted_record_freezes_plan() {
        let c = compilation("repo", "file.read");
        let admission = admit(&c, AdmissionContext::new("fx")).expect("admit");
        assert!(admission.outcome.is_admitted());
        assert!(admission.aar.is_ok());
        let freeze = admission.aar.plan_freeze.as_ref().expect("freeze");
        assert_eq!(Some(freeze.plan_hash.as_str()), c.plan_hash());
        assert_eq!(admission.aar.ledger.entries.len(), 1);
        assert_eq!(admission.aar.ledger.entries[0].entry_id, "SPE/PLAN_FREEZE/0001");

        let value = admission.aar.to_value().expect("value");
        assert_eq!(value["status"], "ok");
        assert!(value.get("refusal").is_none());
        assert!(value.get("admission").is_none());
        assert_eq!(value["ledger"]["entries"][0]["kind"], "plan_freeze");

        let attestation = Attestation::of(&admission.aar).expect("attestation");
        assert_eq!(attestation.aar_hash, admission.aar.hashes.aar);
        assert!(attestation.hashes.attestation.starts_with("sha3-512:"));
    }

    #[test]
    fn refusals_record_evidence_without_plan() {
        for c in [compilation("UNKNOWN", "file.read"), compilation("repo", "process.unknown")] {
            let admission = admit(&c, AdmissionContext::new("fx")).expect("admit");
            assert!(!admission.outcome.is_admitted());
            assert!(admission.context.is_none());
            assert!(admission.aar.plan_freeze.is_none());
            assert!(Attestation::of(&admission.aar).is_none());
            let value = admission.aar.to_value().expect("value");
            assert_eq!(value["status"], "rejected");
            assert_eq!(value["ledger"]["entries"][0]["entry_id"], "SPE/REFUSAL/0001");
        }
    }

    #[test]
    fn record_hash_is_reproducible() {
        let a = admit(&compilation("repo", "file.read"), AdmissionContext::new("fx")).expect("a");
        let b = admit(&compilation("repo", "file.read"), AdmissionContext::new("fx")).expect("b");
        assert_eq!(a.aar.hashes.aar, b.aar.hashes.aar);
        assert_eq!(a.aar.ledger.hashes.ledger, b.aar.ledger.hashes.ledger);
    }
}
