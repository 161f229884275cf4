//! Placeholder substitution for tool configuration scripts
//!
//! Templates mark values as `{name}`. Other braces (MATLAB cell arrays,
//! struct literals) pass through untouched as long as they do not look like
//! a bare identifier in braces.

use crate::error::{Result, SorterError};
use std::fmt::Display;
use std::path::Path;

/// Replace every `{key}` with its value
///
/// Placeholders are read from the template only. Substituted values are
/// copied through as-is, so a value may itself contain braces. Fails if the
/// template has a `{identifier}` placeholder with no value.
pub fn render(template: &str, values: &[(&str, String)]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let ident = after.find('}').map(|close| &after[..close]).filter(|s| is_ident(s));
        match ident {
            Some(key) => {
                let value = values
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| v)
                    .ok_or_else(|| {
                        SorterError::Configuration(format!(
                            "template placeholder '{{{}}}' has no value",
                            key
                        ))
                    })?;
                out.push_str(value);
                rest = &after[key.len() + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn is_ident(text: &str) -> bool {
    text.chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && text.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// MATLAB row vector literal, e.g. `[0, 1.5, 2]`
pub fn matlab_vector<T: Display>(values: &[T]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

/// MATLAB string literal with quotes doubled
pub fn matlab_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn matlab_path(path: &Path) -> String {
    matlab_string(&path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_replaces_all_occurrences() {
        let out = render(
            "ops.NchanTOT = {nchan}; ops.Nchan = {nchan}; ops.fs = {fs};",
            &[("nchan", "4".to_string()), ("fs", "30000".to_string())],
        )
        .unwrap();
        assert_eq!(out, "ops.NchanTOT = 4; ops.Nchan = 4; ops.fs = 30000;");
    }

    #[test]
    fn test_matlab_cells_pass_through() {
        let out = render("names = {'a', 'b'}; x = c{1};", &[]).unwrap();
        assert_eq!(out, "names = {'a', 'b'}; x = c{1};");
    }

    #[test]
    fn test_missing_value_fails() {
        let result = render("ops.fs = {sample_rate};", &[("nchan", "4".to_string())]);
        assert!(matches!(result, Err(SorterError::Configuration(msg)) if msg.contains("sample_rate")));
    }

    #[test]
    fn test_values_are_not_rescanned() {
        let out = render(
            "fpath = {output_folder}; ops.GPU = {useGPU};",
            &[
                ("output_folder", "'/data/{session}/{useGPU}'".to_string()),
                ("useGPU", "1".to_string()),
            ],
        )
        .unwrap();
        assert_eq!(out, "fpath = '/data/{session}/{useGPU}'; ops.GPU = 1;");
    }

    #[test]
    fn test_unclosed_brace_passes_through() {
        assert_eq!(render("x = {a} {", &[("a", "1".to_string())]).unwrap(), "x = 1 {");
    }

    #[test]
    fn test_literals() {
        assert_eq!(matlab_vector(&[0.0, 1.5, 2.0]), "[0, 1.5, 2]");
        assert_eq!(matlab_vector::<i64>(&[]), "[]");
        assert_eq!(matlab_string("/data/o'neil"), "'/data/o''neil'");
    }
}
