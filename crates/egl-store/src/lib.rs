//! # egl-store
//!
//! File-backed collaborators for the EGL kernel.
//!
//! This crate provides:
//! - JSON-Lines ledger read/write with atomic replace
//! - canonical JSON artifact files and the absolute-path leak scan
//! - the lock-guarded nonce registry
//! - `FsAttestation`, the live file probe behind `LiveAttestation`
//! - the tool surface map and law bundle loaders
//! - packs, fixtures and `egl.toml` configuration
//! - `SandboxExecutor`, the only component that writes to the repository
//!
//! ## Data flow
//!
//! ```text
//! egl.toml ─► EglConfig ─► surface map + law files ─► kernel
//! pack.json ─► fixtures ─► kernel decisions ─► ArtifactWriter / spe.ledger.jsonl
//!                                  │
//!                     FsAttestation + SandboxExecutor (sandbox/ only)
//! ```

pub mod artifacts;
pub mod attest;
pub mod config;
pub mod error;
pub mod executor;
pub mod jsonl;
pub mod law_files;
pub mod nonce_registry;
pub mod pack;
pub mod sandbox;
pub mod surface_map;

pub use artifacts::{ArtifactWriter, contains_absolute_path_leak, scan_for_path_leaks};
pub use attest::{FsAttestation, LiveAttestationBundle};
pub use config::{EglConfig, LawBundleFiles};
pub use error::StoreError;
pub use executor::{Applied, ExecRefusal, FileReceipt, SandboxExecutor, WritePayload};
pub use jsonl::{JsonlError, read_ledger_from_path, write_ledger_to_path};
pub use law_files::load_law_bundle;
pub use nonce_registry::{NONCE_REGISTRY_FILE, NonceRegistry};
pub use pack::{Expectation, FixtureDocument, Pack, load_fixture};
pub use sandbox::{SandboxReset, prepare_toctou, reset_sandbox, simulate_toctou_swap};
pub use surface_map::{LoadedSurfaceMap, load_tool_surface_map};
