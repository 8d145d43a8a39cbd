//! `${VAR}` placeholder resolution for server environment values.
//!
//! Resolution is a pure string transform over a variable lookup, run once when
//! a server process is spawned.

use std::collections::HashMap;

/// Replace `${VAR}` and `${VAR:-default}` using the live process environment.
///
/// Unset variables without a default resolve to the empty string. A leading
/// `~` in a default is expanded to the home directory.
pub fn resolve_env_placeholders(input: &str) -> String {
    resolve_with(input, |name| std::env::var(name).ok())
}

/// Resolve every value of an env map against the live environment.
pub fn resolve_env_map(env: &HashMap<String, String>) -> HashMap<String, String> {
    env.iter()
        .map(|(key, value)| (key.clone(), resolve_env_placeholders(value)))
        .collect()
}

/// Replace placeholders using `lookup` to read variables.
pub fn resolve_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return input.to_string();
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let body = &rest[start + 2..];
        match body.find('}') {
            Some(end) => {
                result.push_str(&resolve_var_expr(&body[..end], &lookup));
                rest = &body[end + 1..];
            }
            None => {
                // Unterminated: kept verbatim.
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr<F>(expr: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        lookup(var_name).unwrap_or_else(|| expand_tilde(default))
    } else {
        lookup(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}
