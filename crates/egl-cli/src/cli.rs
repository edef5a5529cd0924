use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "egl",
    about = "EGL: compile, gate and record agent tool calls against a frozen law bundle",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate every fixture of a pack and write the run's evidence
    RunPack {
        /// Path to the pack JSON (relative to the repository root)
        #[arg(long)]
        pack: String,

        /// Run identifier; `out/<pack_id>/<run_id>` must not exist yet
        #[arg(long)]
        run_id: String,

        /// Attestation mode
        #[arg(long, value_enum, default_value_t = AttestArg::Mock)]
        attest: AttestArg,

        /// Where fixtures come from
        #[arg(long, value_enum, default_value_t = SourceArg::Fixture)]
        source: SourceArg,

        /// Evaluation clock (RFC 3339); overrides `mock_now` from egl.toml
        #[arg(long)]
        now: Option<String>,

        /// Repository root holding egl.toml, fixtures and the sandbox
        #[arg(long, default_value = ".")]
        repo_root: String,
    },

    /// Compute and insert `permit_sha256` into an execution permit
    Seal {
        /// Permit JSON file
        permit: String,

        /// Rewrite the file in place instead of printing
        #[arg(long)]
        write: bool,
    },

    /// Provenance ledger utilities
    Ledger {
        #[command(subcommand)]
        command: LedgerCommands,
    },

    /// Print the canonical SHA-256 and SHA3-512 digests of a JSON file
    Hash {
        /// JSON file
        file: String,

        /// Drop top-level `run_id` before hashing
        #[arg(long)]
        stable: bool,
    },
}

#[derive(Subcommand)]
pub enum LedgerCommands {
    /// Recompute the canonical and chain digests of a JSONL ledger
    Verify {
        /// Path to spe.ledger.jsonl
        path: String,

        /// Expected canonical digest (bare hex)
        #[arg(long)]
        canonical: Option<String>,

        /// Expected chain digest (bare hex)
        #[arg(long)]
        chain: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum AttestArg {
    #[value(name = "mock")]
    Mock,
    #[value(name = "live")]
    Live,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    #[value(name = "fixture")]
    Fixture,
    #[value(name = "proxy")]
    Proxy,
}
