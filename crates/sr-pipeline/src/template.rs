//! Placeholder expansion for step arguments.
//!
//! Recognized placeholders are `{workdir}`, `{artifact}` and
//! `{input:<name>}`. Any other brace pair is left untouched, since commands
//! routinely carry literal braces (Python format strings, JSON).

use crate::context::StepContext;

/// Expand placeholders in `text` using values from `ctx`.
///
/// # Errors
///
/// Returns [`sr_core::Error::Validation`] when an `{input:<name>}` refers to
/// an input that was not staged.
pub fn expand(text: &str, ctx: &StepContext) -> sr_core::Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let Some(close) = tail.find('}') else {
            out.push_str(tail);
            return Ok(out);
        };
        let key = &tail[1..close];
        match lookup(key, ctx)? {
            Some(value) => out.push_str(&value),
            None => out.push_str(&tail[..=close]),
        }
        rest = &tail[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn lookup(key: &str, ctx: &StepContext) -> sr_core::Result<Option<String>> {
    let value = match key {
        "workdir" => Some(ctx.workdir.display().to_string()),
        "artifact" => Some(ctx.artifact_path().display().to_string()),
        _ => match key.strip_prefix("input:") {
            Some(name) => match ctx.inputs.get(name) {
                Some(path) => Some(path.display().to_string()),
                None => {
                    return Err(sr_core::Error::Validation(format!(
                        "placeholder refers to unknown input '{name}'"
                    )))
                }
            },
            None => None,
        },
    };
    Ok(value)
}
