//! Judge response parsing.
//!
//! The model is asked for a bare JSON object but often wraps it in a code
//! fence or a sentence of prose. The first JSON object in the text is taken;
//! anything else is a `JudgeError::Parse`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::errors::JudgeError;
use crate::judge::WindowVerdict;
use crate::window::AnalysisWindow;

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").unwrap());

/// Locate the first JSON object in a raw response.
///
/// A fenced block wins. Otherwise each `{` is tried in turn and the first
/// one that starts a complete object is taken, ignoring whatever follows it.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    if let Some(caps) = FENCED_JSON.captures(raw) {
        return caps.get(1).map(|m| m.as_str());
    }
    for (start, _) in raw.match_indices('{') {
        let tail = &raw[start..];
        let mut stream = serde_json::Deserializer::from_str(tail).into_iter::<Value>();
        if let Some(Ok(Value::Object(_))) = stream.next() {
            return Some(&tail[..stream.byte_offset()]);
        }
    }
    // Nothing parses; hand back the widest candidate so the error names the problem.
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

/// Parse a raw judge response into a verdict for `window`.
///
/// A non-null `faulty_step` must name a step of this window, by both order
/// and name; anything else is rejected rather than guessed at.
pub fn parse_verdict(raw: &str, window: &AnalysisWindow<'_>) -> Result<WindowVerdict, JudgeError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| JudgeError::parse("response contains no JSON object"))?;
    let value: Value =
        serde_json::from_str(json).map_err(|e| JudgeError::parse(format!("invalid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| JudgeError::parse("expected a JSON object"))?;

    let faulty_step = read_faulty_step(obj)?;
    let reason = read_text(obj, "reason", true)?;
    let suggestion = read_text(obj, "suggestion", false)?;
    let order = read_order(obj)?;

    let Some(name) = faulty_step else {
        return Ok(WindowVerdict::clear(reason, suggestion));
    };

    let order = order.ok_or_else(|| {
        JudgeError::parse(format!(
            "`faulty_step_order` is required when `faulty_step` is set ('{name}')"
        ))
    })?;
    let step = window.step_with_order(order).ok_or_else(|| {
        JudgeError::parse(format!(
            "faulty_step_order {order} is not part of window (steps {} → {})",
            window.first().order,
            window.last().order
        ))
    })?;
    if !step.name.eq_ignore_ascii_case(&name) {
        return Err(JudgeError::parse(format!(
            "faulty_step '{name}' does not match step {order} ('{}')",
            step.name
        )));
    }

    Ok(WindowVerdict::fault(step.name.clone(), step.order, reason, suggestion))
}

fn read_faulty_step(obj: &Map<String, Value>) -> Result<Option<String>, JudgeError> {
    match obj.get("faulty_step") {
        None => Err(JudgeError::parse("missing required field `faulty_step`")),
        Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty()
                || trimmed.eq_ignore_ascii_case("null")
                || trimmed.eq_ignore_ascii_case("none")
            {
                Ok(None)
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
        Some(other) => Err(JudgeError::parse(format!(
            "`faulty_step` must be a string or null, got {other}"
        ))),
    }
}

fn read_text(obj: &Map<String, Value>, key: &str, required: bool) -> Result<String, JudgeError> {
    match obj.get(key) {
        None if required => Err(JudgeError::parse(format!("missing required field `{key}`"))),
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(other) => Err(JudgeError::parse(format!(
            "`{key}` must be a string, got {other}"
        ))),
    }
}

fn read_order(obj: &Map<String, Value>) -> Result<Option<i64>, JudgeError> {
    match obj.get("faulty_step_order") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| JudgeError::parse(format!("`faulty_step_order` is not an integer: {n}"))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| JudgeError::parse(format!("`faulty_step_order` is not an integer: {s:?}"))),
        Some(other) => Err(JudgeError::parse(format!(
            "`faulty_step_order` must be an integer or null, got {other}"
        ))),
    }
}
