//! Deterministic payload summarization.
//!
//! Oversized step payloads are replaced by a fixed-shape sample so that the
//! judging prompt stays bounded no matter what a pipeline recorded.
//!
//! ## Rules
//!
//! | Shape      | Over threshold                                             |
//! |------------|------------------------------------------------------------|
//! | null       | kept                                                       |
//! | sequence   | first and last `sample_size / 2` items + true item count   |
//! | scalar     | first and last `sample_size` chars + true char count       |
//! | mapping    | oversized children summarized; if still too large, the     |
//! |            | mapping's canonical text is summarized like a scalar       |
//!
//! Size is the character length of the compact JSON text. A summary carries
//! the `$xray_summary` tag and is never summarized again, so the operation is
//! idempotent. No randomness: the same payload and parameters always yield
//! the same output.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key that marks a JSON object as a summary produced here.
pub const SUMMARY_TAG: &str = "$xray_summary";

/// Threshold and sample size for one summarization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryParams {
    pub threshold_chars: usize,
    pub sample_size: usize,
}

impl SummaryParams {
    pub fn new(threshold_chars: usize, sample_size: usize) -> Self {
        Self {
            threshold_chars,
            sample_size,
        }
    }

    /// Next, more aggressive pass: sample size and threshold both halved.
    pub fn halved(self) -> Self {
        Self {
            threshold_chars: (self.threshold_chars / 2).max(1),
            sample_size: self.sample_size / 2,
        }
    }
}

/// Bounded stand-in for an oversized payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$xray_summary", rename_all = "snake_case")]
pub enum SummarizedPayload {
    Sequence {
        head: Vec<Value>,
        tail: Vec<Value>,
        total_count: usize,
    },
    Text {
        head: String,
        tail: String,
        total_count: usize,
    },
}

impl SummarizedPayload {
    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// The tagged view the summarizer dispatches on.
#[derive(Debug, Clone, Copy)]
pub enum PayloadShape<'a> {
    Null,
    Scalar(&'a Value),
    Sequence(&'a [Value]),
    Mapping(&'a Map<String, Value>),
}

impl<'a> PayloadShape<'a> {
    pub fn of(value: &'a Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Array(items) => Self::Sequence(items),
            Value::Object(map) => Self::Mapping(map),
            Value::Bool(_) | Value::Number(_) | Value::String(_) => Self::Scalar(value),
        }
    }
}

/// Character length of the compact JSON form of `value`.
pub fn canonical_len(value: &Value) -> usize {
    value.to_string().chars().count()
}

/// `true` if `value` is a summary object produced by this module.
pub fn is_summary(value: &Value) -> bool {
    match value {
        Value::Object(map) => matches!(
            map.get(SUMMARY_TAG).and_then(Value::as_str),
            Some("sequence" | "text")
        ),
        _ => false,
    }
}

/// Summarize `payload` if it exceeds `params.threshold_chars`.
///
/// Returns `Cow::Borrowed` when the payload is kept as-is.
pub fn summarize(payload: &Value, params: SummaryParams) -> Cow<'_, Value> {
    let original_len = canonical_len(payload);
    if original_len <= params.threshold_chars || is_summary(payload) {
        return Cow::Borrowed(payload);
    }

    let reduced = match PayloadShape::of(payload) {
        PayloadShape::Null => None,
        PayloadShape::Sequence(items) => {
            summarize_sequence(items, params.sample_size).map(SummarizedPayload::into_value)
        }
        PayloadShape::Scalar(value) => {
            summarize_text(&scalar_text(value), params.sample_size)
                .map(SummarizedPayload::into_value)
        }
        PayloadShape::Mapping(map) => summarize_mapping(map, params),
    };

    match reduced {
        Some(value) if canonical_len(&value) < original_len => Cow::Owned(value),
        _ => Cow::Borrowed(payload),
    }
}

/// Head/tail sample of a sequence, or `None` if it already fits the sample.
pub fn summarize_sequence(items: &[Value], sample_size: usize) -> Option<SummarizedPayload> {
    if sample_size >= items.len() {
        return None;
    }
    let half = sample_size / 2;
    Some(SummarizedPayload::Sequence {
        head: items[..half].to_vec(),
        tail: items[items.len() - half..].to_vec(),
        total_count: items.len(),
    })
}

/// Head/tail sample of a string, or `None` if head and tail would cover it.
pub fn summarize_text(text: &str, sample_size: usize) -> Option<SummarizedPayload> {
    let total = text.chars().count();
    if sample_size.saturating_mul(2) >= total {
        return None;
    }
    Some(SummarizedPayload::Text {
        head: text.chars().take(sample_size).collect(),
        tail: text.chars().skip(total - sample_size).collect(),
        total_count: total,
    })
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn summarize_mapping(map: &Map<String, Value>, params: SummaryParams) -> Option<Value> {
    let candidate = Value::Object(summarize_children(map, params.sample_size));
    if canonical_len(&candidate) <= params.threshold_chars {
        return Some(candidate);
    }
    summarize_text(&candidate.to_string(), params.sample_size).map(SummarizedPayload::into_value)
}

fn summarize_children(map: &Map<String, Value>, sample_size: usize) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| {
            let child = match PayloadShape::of(value) {
                PayloadShape::Sequence(items) => {
                    summarize_sequence(items, sample_size).map(SummarizedPayload::into_value)
                }
                PayloadShape::Scalar(Value::String(s)) => {
                    summarize_text(s, sample_size).map(SummarizedPayload::into_value)
                }
                PayloadShape::Mapping(inner) if !is_summary(value) => {
                    Some(Value::Object(summarize_children(inner, sample_size)))
                }
                _ => None,
            };
            (key.clone(), child.unwrap_or_else(|| value.clone()))
        })
        .collect()
}
