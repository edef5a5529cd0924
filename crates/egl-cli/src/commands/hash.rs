use egl_kernel::canonical::{sha3_512_tagged, sha256_tagged, strip_key};
use serde_json::json;

use crate::support::{print_json, read_json_or_exit};

pub fn run(file: String, stable: bool) {
    let raw = read_json_or_exit(&file);
    let value = if stable { strip_key(&raw, "run_id") } else { raw };
    print_json(&json!({
        "path": file,
        "stable": stable,
        "sha256": sha256_tagged(&value),
        "sha3_512": sha3_512_tagged(&value),
    }));
}
