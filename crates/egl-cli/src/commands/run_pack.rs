use std::path::PathBuf;

use egl_kernel::AttestMode;
use serde_json::json;

use crate::cli::{AttestArg, SourceArg};
use crate::runner::{self, RunOptions, Source};
use crate::support::{or_exit, print_json};

pub struct Args {
    pub pack: String,
    pub run_id: String,
    pub attest: AttestArg,
    pub source: SourceArg,
    pub now: Option<String>,
    pub repo_root: String,
}

pub fn run(args: Args) {
    if args.run_id.trim().is_empty() {
        eprintln!("error: --run-id must not be empty");
        std::process::exit(1);
    }
    let repo_root = PathBuf::from(&args.repo_root);
    let options = RunOptions {
        pack_path: repo_root.join(&args.pack),
        repo_root,
        run_id: args.run_id,
        attest: match args.attest {
            AttestArg::Mock => AttestMode::Mock,
            AttestArg::Live => AttestMode::Live,
        },
        source: match args.source {
            SourceArg::Fixture => Source::Fixture,
            SourceArg::Proxy => Source::Proxy,
        },
        now: args.now.filter(|n| !n.is_empty()),
    };

    let summary = or_exit(runner::run_pack(&options));
    print_json(&json!({
        "pack_id": summary.pack_id,
        "run_id": summary.run_id,
        "metrics": summary.metrics,
    }));
    if !summary.metrics.pass {
        std::process::exit(1);
    }
}
