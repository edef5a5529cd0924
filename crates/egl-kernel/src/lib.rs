//! # EGL Kernel
//!
//! The decision core of the execution governance layer. An agent's tool
//! call becomes an intent, the intent compiles against a registry of
//! allowed tool surfaces into a plan, and the plan passes an ordered chain
//! of gates before anything may execute. Every verdict, admission or
//! refusal, is hashed the same way so audits replay byte for byte.
//!
//! This crate does no I/O. Filesystem collaborators (ledger files, nonce
//! registry, live attestation, executors) live in `egl-store`.
//!
//! ## Pipeline
//!
//! ```text
//! Envelope              ← normalized tool call (proxy source only)
//!     │
//! Intent                ← hashed exactly as submitted
//!     │  compile()
//! Compilation           ← Compiled(plan) | Refused(UNMAPPED_TOOL_SURFACE)
//!     │  admit()
//! ActionAdmissionRecord ← policy verdict + plan freeze + SPE ledger
//!     │
//! permit / token / egress / nonce / TOCTOU gates
//!     │
//! ProvenanceLedger      ← seq-ordered records, canonical + chain digests
//! ```

pub mod admission;
pub mod canonical;
pub mod capability;
pub mod clock;
pub mod codes;
pub mod compiler;
pub mod context;
pub mod diff;
pub mod egress;
pub mod envelope;
pub mod error;
pub mod guard;
pub mod intent;
pub mod law_bundle;
pub mod ledger;
pub mod paths;
pub mod permit;
pub mod policy;
pub mod receipt;
pub mod refusal;
pub mod registry;
pub mod sce;
pub mod token;

pub use admission::{ActionAdmissionRecord, Admission, Attestation, PlanFreeze, SpeLedger, admit};
pub use canonical::{canonical_json_string, sha3_512_tagged, sha256_stable, sha256_tagged};
pub use codes::{
    AdmissionCode, CompileCode, EgressCode, GateCode, GuardCode, PermitCode, PolicyCode, ReasonCode,
    RefusalStatus, TokenCode,
};
pub use compiler::{Compilation, CompiledPlan, Plan, compile};
pub use context::AdmissionContext;
pub use envelope::{Envelope, Tool, build_envelope, normalize_to_intent, redact_for_io};
pub use error::EglError;
pub use guard::{AttestMode, GuardRejection, LiveAttestation, NonceRecord, ReplayGuard};
pub use intent::Intent;
pub use law_bundle::{LawBinding, LawBundle};
pub use ledger::{LedgerRecord, ProvenanceLedger};
pub use permit::{PermitBindings, PermitGrant, PermitRejection, validate_permit};
pub use refusal::{Outcome, Refusal};
pub use registry::{ToolSurfaceMap, ToolSurfaceRegistry};
pub use token::{
    GitRatificationToken, PublishPostRatificationToken, RatificationToken, SelfHashingBindable, TokenBindings,
    TokenRejection, validate_token,
};
