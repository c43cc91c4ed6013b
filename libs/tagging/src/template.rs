//! Environment-variable tag templates.
//!
//! Templates use the `{{.NAME}}` placeholder form, with optional whitespace
//! inside the braces (`{{ .NAME }}`). Every referenced variable must be set.

use std::collections::BTreeMap;

use crate::TagPolicyError;

/// Expand `template` against `env`.
pub fn expand_env_template(
    template: &str,
    env: &BTreeMap<String, String>,
) -> Result<String, TagPolicyError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];

        let close = after_open.find("}}").ok_or_else(|| {
            TagPolicyError::InvalidTemplate(format!("unterminated placeholder in {template:?}"))
        })?;

        let name = parse_placeholder(after_open[..close].trim())?;
        let value = env
            .get(name)
            .ok_or_else(|| TagPolicyError::MissingVariable(name.to_string()))?;
        out.push_str(value);

        rest = &after_open[close + 2..];
    }

    if rest.contains("}}") {
        return Err(TagPolicyError::InvalidTemplate(format!(
            "unmatched closing braces in {template:?}"
        )));
    }
    out.push_str(rest);

    Ok(out)
}

fn parse_placeholder(inner: &str) -> Result<&str, TagPolicyError> {
    let name = inner.strip_prefix('.').ok_or_else(|| {
        TagPolicyError::InvalidTemplate(format!("placeholder {inner:?} must start with '.'"))
    })?;

    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(TagPolicyError::InvalidTemplate(format!(
            "invalid variable name {name:?}"
        )));
    }

    Ok(name)
}
