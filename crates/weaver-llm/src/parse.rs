//! Strict parsing of structured completions.

use weaver_core::{LlmError, LlmOutput, ResponseFormat};

/// Parse raw completion text into the requested shape.
///
/// Models routinely wrap JSON in markdown fences; those are stripped before
/// the strict parse. Anything else that fails to parse surfaces as
/// [`LlmError::Parse`] carrying the raw text for the diagnostic chain.
pub fn parse_output(raw: &str, format: ResponseFormat) -> Result<LlmOutput, LlmError> {
    match format {
        ResponseFormat::Text => Ok(LlmOutput::Text(raw.to_string())),
        ResponseFormat::Json => {
            let stripped = strip_fences(raw);
            serde_json::from_str(stripped)
                .map(LlmOutput::Json)
                .map_err(|e| LlmError::Parse {
                    message: format!("expected JSON: {e}"),
                    raw: raw.to_string(),
                })
        }
        ResponseFormat::List => {
            let stripped = strip_fences(raw);
            serde_json::from_str::<Vec<String>>(stripped)
                .map(LlmOutput::List)
                .map_err(|e| LlmError::Parse {
                    message: format!("expected a JSON array of strings: {e}"),
                    raw: raw.to_string(),
                })
        }
    }
}

/// Strip a single surrounding markdown code fence, if present.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the optional language tag on the opening fence line.
    match inner.split_once('\n') {
        Some((_lang, rest)) => rest.trim(),
        None => inner.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_passes_through() {
        let out = parse_output("plain answer", ResponseFormat::Text).unwrap();
        assert_eq!(out, LlmOutput::Text("plain answer".into()));
    }

    #[test]
    fn json_parses_strictly() {
        let out = parse_output(r#"{"a": 1}"#, ResponseFormat::Json).unwrap();
        assert_eq!(out.as_json().unwrap()["a"], 1);

        let err = parse_output("not json", ResponseFormat::Json).unwrap_err();
        match err {
            LlmError::Parse { raw, .. } => assert_eq!(raw, "not json"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let raw = "```json\n{\"tags\": []}\n```";
        let out = parse_output(raw, ResponseFormat::Json).unwrap();
        assert!(out.as_json().unwrap()["tags"].is_array());
    }

    #[test]
    fn list_requires_string_array() {
        let out = parse_output(r#"["a", "b"]"#, ResponseFormat::List).unwrap();
        assert_eq!(out, LlmOutput::List(vec!["a".into(), "b".into()]));

        assert!(parse_output(r#"[1, 2]"#, ResponseFormat::List).is_err());
        assert!(parse_output(r#"{"not": "a list"}"#, ResponseFormat::List).is_err());
    }
}
