use egl_store::read_ledger_from_path;
use serde_json::json;

use crate::support::{or_exit, print_json};

/// Recompute both ledger digests; exit 1 when an expected digest differs.
pub fn verify(path: String, canonical: Option<String>, chain: Option<String>) {
    let ledger = or_exit(read_ledger_from_path(&path));
    let canonical_hash = or_exit(ledger.canonical_hash());
    let chain_hash = or_exit(ledger.chain_hash());

    let canonical_ok = canonical.as_deref().is_none_or(|want| want == canonical_hash);
    let chain_ok = chain.as_deref().is_none_or(|want| want == chain_hash);

    print_json(&json!({
        "path": path,
        "records": ledger.len(),
        "ledger_canonical": canonical_hash,
        "ledger_chain": chain_hash,
        "canonical_ok": canonical_ok,
        "chain_ok": chain_ok,
    }));

    if !(canonical_ok && chain_ok) {
        std::process::exit(1);
    }
}
