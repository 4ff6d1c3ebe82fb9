use serde_json::Value;

use blogsmith_core::error::{BlogsmithError, Result};
use blogsmith_core::workflow::Stage;

/// Score and feedback returned by the quality_check stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityReport {
    pub score: u8,
    pub feedback: String,
}

/// Parse the reviewer's reply into a [`QualityReport`].
///
/// The reply must hold a JSON object with an integer `score` in 1..=10 and a
/// string `feedback`, optionally wrapped in a markdown code fence.
pub fn parse_quality_report(text: &str) -> Result<QualityReport> {
    let trimmed = text.trim();
    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => serde_json::from_str(extract_json(trimmed))
            .map_err(|e| malformed(format!("invalid JSON: {}", e)))?,
    };

    let obj = value
        .as_object()
        .ok_or_else(|| malformed("expected a JSON object"))?;

    let raw_score = obj.get("score").ok_or_else(|| malformed("missing key 'score'"))?;
    let score = raw_score
        .as_u64()
        .ok_or_else(|| malformed(format!("score must be an integer, got {}", raw_score)))?;
    if !(1..=10).contains(&score) {
        return Err(malformed(format!("score {} is outside 1-10", score)));
    }

    let feedback = obj
        .get("feedback")
        .ok_or_else(|| malformed("missing key 'feedback'"))?
        .as_str()
        .ok_or_else(|| malformed("feedback must be a string"))?;

    Ok(QualityReport {
        score: score as u8,
        feedback: feedback.to_string(),
    })
}

fn malformed(reason: impl Into<String>) -> BlogsmithError {
    BlogsmithError::MalformedResponse {
        stage: Stage::QualityCheck.name().to_string(),
        reason: reason.into(),
    }
}

/// Extract JSON from text that may be wrapped in a markdown code block.
///
/// Only a fence that both opens and closes the reply is stripped, so backticks
/// inside JSON strings survive. Otherwise the outermost `{...}` is taken.
pub(crate) fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(body) = strip_fence(trimmed) {
        return body;
    }
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                return &trimmed[start..=end];
            }
        }
    }
    trimmed
}

fn strip_fence(text: &str) -> Option<&str> {
    let inner = text.strip_prefix("```")?.strip_suffix("```")?;
    // Drop the info string ("json", "JSON", ...) on the opening line
    let body = match inner.find('\n') {
        Some(nl) if !inner[..nl].contains('{') => &inner[nl + 1..],
        _ => inner.strip_prefix("json").unwrap_or(inner),
    };
    Some(body.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(err: BlogsmithError) -> String {
        match err {
            BlogsmithError::MalformedResponse { stage, reason } => {
                assert_eq!(stage, "quality_check");
                reason
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_plain_object() {
        let report = parse_quality_report(r#"{"score": 8, "feedback": "Solid."}"#).unwrap();
        assert_eq!(report.score, 8);
        assert_eq!(report.feedback, "Solid.");
    }

    #[test]
    fn test_json_fence_is_stripped() {
        let text = "```json\n{\"score\": 5, \"feedback\": \"Needs examples\"}\n```";
        assert_eq!(parse_quality_report(text).unwrap().score, 5);
    }

    #[test]
    fn test_bare_fence_and_surrounding_prose() {
        let text = "Here you go:\n```\n{\"score\": 9, \"feedback\": \"ok\"}\n```\nThanks";
        assert_eq!(parse_quality_report(text).unwrap().score, 9);

        let text = "My review: {\"score\": 7, \"feedback\": \"fine\"} done.";
        assert_eq!(parse_quality_report(text).unwrap().score, 7);
    }

    #[test]
    fn test_not_json() {
        let r = reason(parse_quality_report("Great post, 8/10").unwrap_err());
        assert!(r.starts_with("invalid JSON"));
    }

    #[test]
    fn test_missing_keys() {
        let r = reason(parse_quality_report(r#"{"feedback": "x"}"#).unwrap_err());
        assert!(r.contains("'score'"));
        let r = reason(parse_quality_report(r#"{"score": 6}"#).unwrap_err());
        assert!(r.contains("'feedback'"));
    }

    #[test]
    fn test_score_must_be_integer_in_range() {
        for bad in [r#""8""#, "7.5", "0", "11", "-3"] {
            let text = format!(r#"{{"score": {}, "feedback": "x"}}"#, bad);
            assert!(parse_quality_report(&text).is_err(), "accepted score {}", bad);
        }
    }

    #[test]
    fn test_backticks_inside_feedback() {
        let report =
            parse_quality_report(r#"{"score": 5, "feedback": "Add a ```rust``` example"}"#).unwrap();
        assert_eq!(report.score, 5);
        assert_eq!(report.feedback, "Add a ```rust``` example");

        let text = "```json\n{\"score\": 5, \"feedback\": \"Wrap the snippet in ``` fences\"}\n```";
        let report = parse_quality_report(text).unwrap();
        assert_eq!(report.feedback, "Wrap the snippet in ``` fences");
    }

    #[test]
    fn test_prose_around_fence_with_backticks() {
        let text = "Review:\n```json\n{\"score\": 6, \"feedback\": \"Use ``` blocks\"}\n```\nCheers";
        let report = parse_quality_report(text).unwrap();
        assert_eq!(report.score, 6);
        assert_eq!(report.feedback, "Use ``` blocks");
    }

    #[test]
    fn test_single_line_fence() {
        assert_eq!(extract_json("```{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(extract_json("```json{\"a\":1}```"), "{\"a\":1}");
    }

    #[test]
    fn test_extract_json_passthrough() {
        assert_eq!(extract_json("  []  "), "[]");
    }
}
