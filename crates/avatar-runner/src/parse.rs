//! LLM response parsing into typed decisions.
//!
//! The LLM returns raw text (ideally JSON of the form
//! `{"type": "GOAL" | "SAY" | "IDLE", "value": "..."}`). This module
//! extracts and validates it into a [`Decision`]. Anything that does not
//! validate is an error; the multiplexer turns errors into `Idle`.

use avatar_types::Decision;

use crate::error::RunnerError;

/// Intermediate struct for deserializing the LLM's raw JSON response.
#[derive(Debug, serde::Deserialize)]
struct RawDecision {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

/// Parse an LLM response string into a [`Decision`].
///
/// Attempts, in order:
/// 1. Direct `serde_json` deserialization
/// 2. Extract JSON from a markdown code block
/// 3. The outermost `{ ... }` span of the text
///
/// Each candidate is retried with trailing commas stripped.
pub fn parse_decision(raw: &str) -> Result<Decision, RunnerError> {
    let trimmed = raw.trim();

    let candidates = [
        Some(trimmed),
        extract_json_from_codeblock(trimmed),
        extract_outer_object(trimmed),
    ];
    for candidate in candidates.into_iter().flatten() {
        if let Some(parsed) = try_deserialize(candidate) {
            return convert(parsed);
        }
    }

    Err(RunnerError::Parse(format!(
        "no decision object found in: {trimmed}"
    )))
}

fn try_deserialize(text: &str) -> Option<RawDecision> {
    serde_json::from_str::<RawDecision>(text)
        .ok()
        .or_else(|| serde_json::from_str::<RawDecision>(&strip_trailing_commas(text)).ok())
}

/// Validate the decision type and its value.
fn convert(raw: RawDecision) -> Result<Decision, RunnerError> {
    let value = raw
        .value
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .unwrap_or_default();

    match raw.kind.trim().to_uppercase().as_str() {
        "IDLE" => Ok(Decision::Idle),
        "SAY" if !value.is_empty() => Ok(Decision::Say(value.to_owned())),
        "GOAL" if !value.is_empty() => Ok(Decision::ActGoal(value.to_owned())),
        "SAY" | "GOAL" => Err(RunnerError::Parse(format!(
            "{} decision without a text value",
            raw.kind
        ))),
        other => Err(RunnerError::Parse(format!("unknown decision type: {other}"))),
    }
}

/// Extract the body of the first markdown code block.
fn extract_json_from_codeblock(text: &str) -> Option<&str> {
    let fence = text.find("```")?;
    let after_fence = fence.checked_add(3)?;
    let body_start = text
        .get(after_fence..)
        .and_then(|s| s.find('\n'))
        .and_then(|nl| after_fence.checked_add(nl))
        .and_then(|pos| pos.checked_add(1))?;
    let body = text.get(body_start..)?;
    let end = body.find("```")?;
    body.get(..end).map(str::trim)
}

/// The span from the first `{` to the last `}`.
fn extract_outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    text.get(start..=end)
}

/// Strip trailing commas before closing braces and brackets (common LLM error).
fn strip_trailing_commas(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == ',' {
            let rest: String = chars.clone().skip_while(|n| n.is_whitespace()).take(1).collect();
            if rest == "}" || rest == "]" {
                continue;
            }
        }
        result.push(c);
    }
    result
}
