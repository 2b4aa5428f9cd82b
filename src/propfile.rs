//! Property file parser
//!
//! Parses simple `key = value` files. `#` starts a comment anywhere on a
//! line, surrounding whitespace is trimmed, and lines without `=` are
//! skipped with a warning.

use std::fs;
use std::io;
use std::path::Path;

/// Parse property file text, invoking `handler` with `(key, value)` for
/// each entry in file order. Key case is preserved.
pub fn parse_propfile(data: &str, handler: &mut dyn FnMut(&str, &str)) {
    for (index, raw) in data.lines().enumerate() {
        let line = match raw.find('#') {
            Some(hash) => &raw[..hash],
            None => raw,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once('=') {
            Some((key, value)) => {
                let key = key.trim();
                if key.is_empty() {
                    log::warn!("Line {}: value without key", index + 1);
                    continue;
                }
                handler(key, value.trim());
            }
            None => log::warn!("Line {}: key without value", index + 1),
        }
    }
}

/// Read and parse a property file into ordered pairs
pub fn read_propfile(path: &Path) -> io::Result<Vec<(String, String)>> {
    let data = fs::read_to_string(path)?;
    let mut entries = Vec::new();
    parse_propfile(&data, &mut |key, value| {
        entries.push((key.to_string(), value.to_string()));
    });
    Ok(entries)
}
