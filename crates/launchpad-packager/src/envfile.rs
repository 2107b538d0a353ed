//! `.env` file written next to the packaged entry point.

use launchpad_core::EnvVars;
use std::path::{Path, PathBuf};

pub const ENV_FILE: &str = ".env";

/// One `KEY=value` line per variable, in key order.
pub fn render_env_file(env: &EnvVars) -> String {
    let mut out = String::new();
    for (key, value) in env {
        out.push_str(key);
        out.push('=');
        out.push_str(&format_value(value));
        out.push('\n');
    }
    out
}

pub fn write_env_file(dir: &Path, env: &EnvVars) -> std::io::Result<PathBuf> {
    let path = dir.join(ENV_FILE);
    std::fs::write(&path, render_env_file(env))?;
    Ok(path)
}

/// Bare when safe, otherwise double-quoted with `\`, `"`, `$` and backtick
/// escaped so both dotenv parsers and `sh` read back the original.
fn format_value(value: &str) -> String {
    if !needs_quotes(value) {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' | '"' | '$' | '`' => {
                quoted.push('\\');
                quoted.push(c);
            }
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

fn needs_quotes(value: &str) -> bool {
    value.chars().any(|c| {
        c.is_whitespace()
            || matches!(
                c,
                '"' | '\'' | '\\' | '$' | '`' | '#' | ';' | '&' | '|' | '<' | '>' | '(' | ')' | '*' | '?' | '!' | '~'
            )
    })
}
