use std::path::Path;

use egl_kernel::canonical::canonical_json_string;
use egl_kernel::permit::{PERMIT_HASH_FIELD, seal_permit};

use crate::support::{print_json, read_json_or_exit, write_text_or_exit};

pub fn run(permit: String, write: bool) {
    let body = read_json_or_exit(&permit);
    if !body.is_object() {
        eprintln!("error: {permit}: execution permit must be a JSON object");
        std::process::exit(1);
    }
    let sealed = seal_permit(body);
    if write {
        write_text_or_exit(Path::new(&permit), &canonical_json_string(&sealed));
        if let Some(hash) = sealed.get(PERMIT_HASH_FIELD).and_then(|h| h.as_str()) {
            println!("{hash}");
        }
    } else {
        print_json(&sealed);
    }
}
