//! Extraction of a structured verdict from free-form judge output.
//!
//! Judge models wrap their JSON in markdown fences more often than not, and
//! occasionally drop fields or invent winner labels. Parsing is therefore
//! forgiving about shape but strict about the payload being a JSON object.

use serde_json::Value;

use crate::error::{Result, TribunalError};
use crate::judge::{Judgement, Winner};

/// Strip optional markdown fences and parse the judge's verdict.
///
/// Missing scores default to 0, a missing overall score to the truncated mean
/// of the three, a missing winner to [`Winner::Tie`].
pub fn parse_judgement(raw: &str) -> Result<Judgement> {
    let body = strip_fences(raw);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| TribunalError::Parsing(format!("judge response is not valid JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| TribunalError::Parsing("judge response is not a JSON object".into()))?;

    let afm_score = score(object.get("afm_score"));
    let mlx_score = score(object.get("mlx_score"));
    let apple_translation_score = score(object.get("apple_translation_score"));
    let overall_score = match object.get("overall_score").and_then(Value::as_i64) {
        Some(v) => v,
        None => (afm_score + mlx_score + apple_translation_score) / 3,
    };

    let winner = object
        .get("winner")
        .and_then(Value::as_str)
        .map(normalize_winner)
        .unwrap_or(Winner::Tie);
    let explanation = text(object.get("explanation"), "No explanation provided");
    let key_differences = text(object.get("key_differences"), "No differences noted");

    Ok(Judgement {
        overall_score,
        afm_score,
        mlx_score,
        apple_translation_score,
        winner,
        explanation,
        key_differences,
        raw_response: raw.to_string(),
    })
}

fn strip_fences(raw: &str) -> &str {
    let mut body = raw.trim();
    if let Some(rest) = body.strip_prefix("```json") {
        body = rest;
    } else if let Some(rest) = body.strip_prefix("```") {
        body = rest;
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

fn score(value: Option<&Value>) -> i64 {
    value.and_then(Value::as_i64).unwrap_or(0)
}

fn text(value: Option<&Value>, default: &str) -> String {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Map a raw winner label onto one of the four verdicts.
///
/// Checks run in a fixed priority order: the Apple-Translation synonyms
/// contain substrings the foundation-model synonyms would also match, so
/// they must be tested first.
pub fn normalize_winner(raw: &str) -> Winner {
    let label = raw.trim().to_uppercase();
    let apple_translation = ["APPLE_TRANSLATION", "APPLE TRANSLATION", "TRANSLATION C"];
    let afm = ["AFM", "FOUNDATION", "APPLE", "TRANSLATION A"];
    let mlx = ["MLX", "LOCAL", "TRANSLATION B"];
    if label == "C" || apple_translation.iter().any(|s| label.contains(s)) {
        Winner::AppleTranslation
    } else if label == "A" || afm.iter().any(|s| label.contains(s)) {
        Winner::Afm
    } else if label == "B" || mlx.iter().any(|s| label.contains(s)) {
        Winner::Mlx
    } else {
        // Tie synonyms (EQUAL, DRAW, BOTH, ALL) and anything unrecognized.
        Winner::Tie
    }
}
