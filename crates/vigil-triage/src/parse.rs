//! LLM response parsing
//!
//! Strict JSON first, then a first-JSON-object extraction for models that
//! wrap their answer in prose or code fences. Anything else falls back to
//! the deterministic result.

use serde::Deserialize;

use vigil_core::model::RiskLevel;

/// Parsed analysis; every field tolerates absence
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmAnalysis {
    #[serde(default, deserialize_with = "risk_level_lenient")]
    pub risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    #[serde(default)]
    pub iocs: Vec<String>,
    #[serde(default)]
    pub references: Vec<String>,
}

fn risk_level_lenient<'de, D>(deserializer: D) -> Result<Option<RiskLevel>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(RiskLevel::parse))
}

/// Parse the model output. None means unusable.
pub fn parse_analysis(raw: &str) -> Option<LlmAnalysis> {
    let trimmed = raw.trim();

    if let Ok(analysis) = serde_json::from_str::<LlmAnalysis>(trimmed) {
        return Some(analysis);
    }

    let candidate = first_json_object(trimmed)?;
    serde_json::from_str::<LlmAnalysis>(&candidate).ok()
}

/// First balanced `{...}` span, brace-counting outside string literals
fn first_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=start + offset].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_json_parses() {
        let analysis = parse_analysis(
            r#"{"risk_level": "high", "confidence": 0.8, "reasoning": "hash is known malware",
                "recommended_actions": ["isolate host"], "iocs": ["1.2.3.4"], "references": []}"#,
        )
        .unwrap();
        assert_eq!(analysis.risk_level, Some(RiskLevel::High));
        assert_eq!(analysis.confidence, Some(0.8));
        assert_eq!(analysis.recommended_actions, vec!["isolate host"]);
    }

    #[test]
    fn json_embedded_in_prose_is_extracted() {
        let raw = "Here is my assessment:\n```json\n{\"risk_level\": \"critical\", \"reasoning\": \"active exploit\"}\n```\nLet me know if you need more.";
        let analysis = parse_analysis(raw).unwrap();
        assert_eq!(analysis.risk_level, Some(RiskLevel::Critical));
    }

    #[test]
    fn nested_objects_and_braces_in_strings() {
        let raw = r#"note { "risk_level": "low", "reasoning": "saw {braces} in \"text\"", "extra": {"k": 1} } trailing"#;
        let analysis = parse_analysis(raw).unwrap();
        assert_eq!(analysis.risk_level, Some(RiskLevel::Low));
    }

    #[test]
    fn non_json_is_none() {
        assert!(parse_analysis("Sorry, I can't.").is_none());
        assert!(parse_analysis("").is_none());
    }

    #[test]
    fn json_with_extra_fields_still_parses() {
        let analysis = parse_analysis(
            r#"{"risk_level": "medium", "confidence": 0.5, "verdict": "ignore-me", "score": 55}"#,
        )
        .unwrap();
        assert_eq!(analysis.risk_level, Some(RiskLevel::Medium));
    }

    #[test]
    fn missing_required_fields_yield_defaults() {
        let analysis = parse_analysis(r#"{"reasoning": "thin answer"}"#).unwrap();
        assert_eq!(analysis.risk_level, None);
        assert!(analysis.recommended_actions.is_empty());
    }

    #[test]
    fn bogus_risk_level_becomes_none() {
        let analysis = parse_analysis(r#"{"risk_level": "apocalyptic"}"#).unwrap();
        assert_eq!(analysis.risk_level, None);
    }
}
