//! Oracle answer parsing
//!
//! Oracles wrap their JSON payload in narrative text or markdown fences.
//! Only the span from the first `{` to the last `}` is parsed. Three payload
//! shapes are understood:
//! - `{"triples": [...]}` or `{"relations": [...]}` with subject/predicate/object items
//! - `{"entities": [...]}` where every non-name field becomes a triple
//! - a bare `{"subject": ..., "predicate": ..., "object": ...}` object

use kgx_core::{OracleError, Triple};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Confidence assumed when the oracle omits one
pub const DEFAULT_CONFIDENCE: f32 = 0.8;

const NAME_FIELDS: [&str; 4] = ["name", "名称", "姓名", "title"];
const SKIPPED_FIELDS: [&str; 3] = ["type", "confidence", "id"];

/// Triple structure for oracle JSON output
#[derive(Debug, Deserialize)]
struct RawTriple {
    subject: String,
    predicate: String,
    object: String,
    confidence: Option<f32>,
}

/// Parsed oracle answer
#[derive(Debug, Clone)]
pub struct ParsedPayload {
    /// JSON span the triples were read from; this is what gets cached
    pub json: String,
    pub triples: Vec<Triple>,
}

/// Locate the JSON object embedded in a raw oracle answer
pub fn locate_json_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Parse a raw oracle answer into triples
pub fn parse_answer(raw: &str) -> Result<ParsedPayload, OracleError> {
    let span = locate_json_span(raw)
        .ok_or_else(|| OracleError::Parse("no JSON object in oracle answer".to_string()))?;
    let triples = parse_payload(span)?;
    Ok(ParsedPayload {
        json: span.to_string(),
        triples,
    })
}

/// Parse a JSON payload into well-formed triples
pub fn parse_payload(json: &str) -> Result<Vec<Triple>, OracleError> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| OracleError::Parse(format!("invalid JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| OracleError::Parse("payload is not a JSON object".to_string()))?;

    let mut triples = Vec::new();
    let mut recognized = false;

    for key in ["triples", "relations"] {
        if let Some(items) = object.get(key).and_then(Value::as_array) {
            recognized = true;
            triples.extend(items.iter().filter_map(triple_from_value));
        }
    }

    if let Some(entities) = object.get("entities").and_then(Value::as_array) {
        recognized = true;
        for entity in entities.iter().filter_map(Value::as_object) {
            entity_triples(entity, &mut triples);
        }
    }

    if !recognized && object.contains_key("subject") {
        recognized = true;
        triples.extend(triple_from_value(&value));
    }

    if !recognized {
        return Err(OracleError::Parse(
            "payload has no triples, relations or entities".to_string(),
        ));
    }

    Ok(triples.into_iter().filter(Triple::is_well_formed).collect())
}

fn triple_from_value(value: &Value) -> Option<Triple> {
    let raw: RawTriple = serde_json::from_value(value.clone()).ok()?;
    Some(Triple::new(
        raw.subject,
        raw.predicate,
        raw.object,
        raw.confidence.unwrap_or(DEFAULT_CONFIDENCE),
    ))
}

fn entity_triples(entity: &Map<String, Value>, out: &mut Vec<Triple>) {
    let Some(name) = NAME_FIELDS
        .iter()
        .find_map(|field| entity.get(*field).and_then(Value::as_str))
    else {
        return;
    };

    let confidence = entity
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c as f32)
        .unwrap_or(DEFAULT_CONFIDENCE);

    for (field, value) in entity {
        if NAME_FIELDS.contains(&field.as_str()) || SKIPPED_FIELDS.contains(&field.as_str()) {
            continue;
        }
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(text) = scalar_text(item) {
                        out.push(Triple::new(name, field.as_str(), text, confidence));
                    }
                }
            }
            other => {
                if let Some(text) = scalar_text(other) {
                    out.push(Triple::new(name, field.as_str(), text, confidence));
                }
            }
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_json_in_narrative() {
        let raw = "Here you go:\n```json\n{\"triples\": []}\n```\nDone.";
        assert_eq!(locate_json_span(raw), Some("{\"triples\": []}"));
        assert_eq!(locate_json_span("no json here"), None);
        assert_eq!(locate_json_span("} backwards {"), None);
    }

    #[test]
    fn test_parse_triples_payload() {
        let raw = r#"结果如下：{"triples":[
            {"subject":"周杰伦","predicate":"职业","object":"歌手","confidence":0.95},
            {"subject":"周杰伦","predicate":"出生","object":"台湾"},
            {"subject":"","predicate":"职业","object":"演员"},
            {"subject":"周杰伦","predicate":"配偶","object":"昆凌","confidence":1.4}
        ]}"#;

        let parsed = parse_answer(raw).unwrap();

        assert_eq!(parsed.triples.len(), 3);
        assert_eq!(parsed.triples[1].confidence, DEFAULT_CONFIDENCE);
        assert_eq!(parsed.triples[2].confidence, 1.0);
        assert!(parsed.json.starts_with('{'));
    }

    #[test]
    fn test_parse_bare_triple() {
        let triples =
            parse_payload(r#"{"subject":"小明","predicate":"是","object":"学生","confidence":0.9}"#)
                .unwrap();
        assert_eq!(triples, vec![Triple::new("小明", "是", "学生", 0.9)]);
    }

    #[test]
    fn test_parse_relations_payload() {
        let triples = parse_payload(
            r#"{"relations":[{"subject":"Alice","predicate":"spouse","object":"Bob"}]}"#,
        )
        .unwrap();
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].predicate, "spouse");
    }

    #[test]
    fn test_parse_entities_payload() {
        let triples = parse_payload(
            r#"{"entities":[{"name":"周杰伦","type":"person","职业":"歌手",
                "代表作品":["七里香","晴天"],"出生年":1979,"confidence":0.9}]}"#,
        )
        .unwrap();

        assert_eq!(triples.len(), 4);
        assert!(triples.iter().all(|t| t.subject == "周杰伦"));
        assert!(triples
            .iter()
            .any(|t| t.predicate == "出生年" && t.object == "1979"));
        assert!(triples.iter().all(|t| (t.confidence - 0.9).abs() < 1e-6));
    }

    #[test]
    fn test_unrecognized_payload_is_parse_error() {
        assert!(matches!(
            parse_payload(r#"{"answer":"nothing"}"#),
            Err(OracleError::Parse(_))
        ));
        assert!(matches!(
            parse_answer("{not json}"),
            Err(OracleError::Parse(_))
        ));
    }
}
