use std::fs;
use std::path::Path;

use serde_json::Value;

pub fn read_json_or_exit(path: &str) -> Value {
    let text = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("error: failed to read {path}: {e}");
        std::process::exit(1);
    });
    serde_json::from_str(&text).unwrap_or_else(|e| {
        eprintln!("error: invalid json at {path}: {e}");
        std::process::exit(1);
    })
}

pub fn write_text_or_exit(path: &Path, text: &str) {
    fs::write(path, text).unwrap_or_else(|e| {
        eprintln!("error: failed to write {}: {e}", path.display());
        std::process::exit(1);
    });
}

/// Unwrap a fallible step or report it as `error: <message>` and exit 1.
pub fn or_exit<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
    result.unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(1);
    })
}

pub fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("error: json serialization: {e}");
            std::process::exit(1);
        }
    }
}
