use super::StoreError;
use crate::models::{PollSnapshot, Question, TallyKey, VoteAssignment, VoteTally};
use chrono::SecondsFormat;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const VOTE_COUNTS_FIELD: &str = "voteCounts";

// Firestore REST typed value: exactly one of these keys per object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String),
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    BytesValue(String),
    ReferenceValue(String),
    GeoPointValue(serde_json::Value),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    #[serde(default)]
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapValue {
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Value {
    fn integer(n: u64) -> Self {
        Value::IntegerValue(n.to_string())
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Value::StringValue(s) => Some(s),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Value::BooleanValue(b) => Some(*b),
            _ => None,
        }
    }

    fn as_integer(&self) -> Option<i64> {
        match self {
            Value::IntegerValue(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::ArrayValue(array) => Some(&array.values),
            _ => None,
        }
    }

    fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::MapValue(map) => Some(&map.fields),
            _ => None,
        }
    }
}

fn non_negative(field: &str, value: &Value) -> Result<u64, StoreError> {
    value
        .as_integer()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| StoreError::Decode(format!("{} is not a non-negative integer", field)))
}

// Web clients incrementing through the JS SDK may leave whole counts stored as doubles.
fn vote_count(field: &str, value: &Value) -> Result<u64, StoreError> {
    match value {
        Value::DoubleValue(d) if *d >= 0.0 && d.fract() == 0.0 && *d <= u64::MAX as f64 => Ok(*d as u64),
        _ => non_negative(field, value),
    }
}

pub fn decode_poll(poll_id: &str, doc: &Document) -> Result<PollSnapshot, StoreError> {
    let fields = &doc.fields;

    let title = fields
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("Unknown Poll")
        .to_string();

    let questions = match fields.get("questions") {
        Some(value) => value
            .as_array()
            .ok_or_else(|| StoreError::Decode("questions is not an array".to_string()))?
            .iter()
            .enumerate()
            .map(|(i, q)| decode_question(i, q))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    let active_question_index = match fields.get("activeQuestionIndex") {
        Some(value) => non_negative("activeQuestionIndex", value)? as usize,
        None => 0,
    };

    let voting_open = fields
        .get("currentQuestionActive")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    // Only canonical `q_o` keys are counted. Anything else (`legacy`, `01_2`) is
    // carried verbatim so the next patch of the whole field writes it back as found.
    let mut vote_counts = VoteTally::new();
    if let Some(counts) = fields.get(VOTE_COUNTS_FIELD).and_then(Value::as_map) {
        for (key, value) in counts {
            match TallyKey::parse_wire_key(key) {
                Some(tally_key) if tally_key.wire_key() == *key => {
                    vote_counts.set(tally_key, vote_count(&format!("voteCounts.{}", key), value)?);
                }
                _ => {
                    debug!("Passing through vote count under unrecognised key '{}' on poll {}", key, poll_id);
                    let raw = serde_json::to_value(value)
                        .map_err(|e| StoreError::Decode(format!("voteCounts.{}: {}", key, e)))?;
                    vote_counts.keep_foreign(key.clone(), raw);
                }
            }
        }
    }

    Ok(PollSnapshot {
        id: poll_id.to_string(),
        title,
        questions,
        active_question_index,
        voting_open,
        vote_counts,
    })
}

fn decode_question(index: usize, value: &Value) -> Result<Question, StoreError> {
    let fields = value
        .as_map()
        .ok_or_else(|| StoreError::Decode(format!("questions[{}] is not a map", index)))?;

    let text = fields
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or("Question")
        .to_string();

    // Options are either bare strings or maps carrying a `text` field
    let options = fields
        .get("options")
        .and_then(Value::as_array)
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(i, option)| match option {
            Value::StringValue(label) => label.clone(),
            Value::MapValue(map) => map
                .fields
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Option {}", i + 1)),
            _ => format!("Option {}", i + 1),
        })
        .collect();

    Ok(Question { text, options })
}

pub fn encode_vote(vote: &VoteAssignment) -> Document {
    let mut fields = BTreeMap::new();
    fields.insert("sessionId".to_string(), Value::StringValue(vote.session_id.clone()));
    fields.insert("questionIndex".to_string(), Value::integer(vote.question_index as u64));
    fields.insert("optionIndex".to_string(), Value::integer(vote.option_index as u64));
    fields.insert(
        "timestamp".to_string(),
        Value::TimestampValue(vote.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    Document { name: None, fields }
}

pub fn encode_vote_counts(counts: &VoteTally) -> Result<Document, StoreError> {
    let mut map = MapValue::default();
    for (key, raw) in counts.foreign() {
        let value = serde_json::from_value(raw.clone())
            .map_err(|e| StoreError::Decode(format!("voteCounts.{}: {}", key, e)))?;
        map.fields.insert(key.to_string(), value);
    }
    for (key, count) in counts.iter() {
        map.fields.insert(key.wire_key(), Value::integer(count));
    }

    let mut fields = BTreeMap::new();
    fields.insert(VOTE_COUNTS_FIELD.to_string(), Value::MapValue(map));
    Ok(Document { name: None, fields })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn poll_json() -> serde_json::Value {
        json!({
            "name": "projects/p/databases/(default)/documents/polls/ABC123",
            "createTime": "2025-01-01T00:00:00Z",
            "fields": {
                "title": {"stringValue": "Team offsite"},
                "activeQuestionIndex": {"integerValue": "1"},
                "currentQuestionActive": {"booleanValue": true},
                "questions": {"arrayValue": {"values": [
                    {"mapValue": {"fields": {
                        "text": {"stringValue": "Where?"},
                        "options": {"arrayValue": {"values": [
                            {"mapValue": {"fields": {"text": {"stringValue": "Beach"}}}},
                            {"mapValue": {"fields": {"text": {"stringValue": "Mountains"}}}}
                        ]}}
                    }}},
                    {"mapValue": {"fields": {
                        "text": {"stringValue": "When?"},
                        "options": {"arrayValue": {"values": [
                            {"stringValue": "May"},
                            {"stringValue": "June"},
                            {"stringValue": "July"}
                        ]}}
                    }}}
                ]}},
                "voteCounts": {"mapValue": {"fields": {
                    "0_0": {"integerValue": "5"},
                    "0_1": {"integerValue": "3"},
                    "legacy": {"integerValue": "9"}
                }}}
            }
        })
    }

    #[test]
    fn decodes_poll_document() {
        let doc: Document = serde_json::from_value(poll_json()).unwrap();
        let poll = decode_poll("ABC123", &doc).unwrap();

        assert_eq!(poll.title, "Team offsite");
        assert_eq!(poll.active_question_index, 1);
        assert!(poll.voting_open);
        assert_eq!(poll.questions.len(), 2);
        assert_eq!(poll.questions[0].options, vec!["Beach", "Mountains"]);
        assert_eq!(poll.questions[1].options, vec!["May", "June", "July"]);
        assert_eq!(poll.vote_counts.get(TallyKey::new(0, 0)), 5);
        assert_eq!(poll.vote_counts.get(TallyKey::new(0, 1)), 3);
        assert_eq!(poll.vote_counts.total(), 8);
        assert_eq!(
            poll.vote_counts.foreign().collect::<Vec<_>>(),
            vec![("legacy", &json!({"integerValue": "9"}))]
        );
    }

    #[test]
    fn merge_writes_back_keys_it_does_not_understand() {
        let doc: Document = serde_json::from_value(json!({"fields": {
            "voteCounts": {"mapValue": {"fields": {
                "0_0": {"integerValue": "5"},
                "0_3": {"integerValue": "0"},
                "legacy": {"integerValue": "9"},
                "01_2": {"integerValue": "4"},
                "1_2": {"integerValue": "6"},
                "note": {"stringValue": "imported"}
            }}}
        }}))
        .unwrap();
        let mut counts = decode_poll("X", &doc).unwrap().vote_counts;

        counts.add(TallyKey::new(0, 0), 1);
        let body = serde_json::to_value(encode_vote_counts(&counts).unwrap()).unwrap();

        assert_eq!(
            body["fields"]["voteCounts"]["mapValue"]["fields"],
            json!({
                "0_0": {"integerValue": "6"},
                "0_3": {"integerValue": "0"},
                "legacy": {"integerValue": "9"},
                "01_2": {"integerValue": "4"},
                "1_2": {"integerValue": "6"},
                "note": {"stringValue": "imported"}
            })
        );
    }

    #[test]
    fn whole_double_counts_are_read_as_integers() {
        let doc: Document = serde_json::from_value(json!({"fields": {
            "voteCounts": {"mapValue": {"fields": {"0_0": {"doubleValue": 3.0}}}}
        }}))
        .unwrap();

        assert_eq!(decode_poll("X", &doc).unwrap().vote_counts.get(TallyKey::new(0, 0)), 3);

        let fractional: Document = serde_json::from_value(json!({"fields": {
            "voteCounts": {"mapValue": {"fields": {"0_0": {"doubleValue": 2.5}}}}
        }}))
        .unwrap();
        assert!(matches!(decode_poll("X", &fractional), Err(StoreError::Decode(_))));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let doc: Document = serde_json::from_value(json!({"fields": {}})).unwrap();
        let poll = decode_poll("X", &doc).unwrap();

        assert_eq!(poll.title, "Unknown Poll");
        assert!(poll.questions.is_empty());
        assert_eq!(poll.active_question_index, 0);
        assert!(!poll.voting_open);
        assert!(poll.vote_counts.is_empty());
    }

    #[test]
    fn rejects_negative_counts() {
        let doc: Document = serde_json::from_value(json!({"fields": {
            "voteCounts": {"mapValue": {"fields": {"0_0": {"integerValue": "-2"}}}}
        }}))
        .unwrap();

        assert!(matches!(decode_poll("X", &doc), Err(StoreError::Decode(_))));
    }

    #[test]
    fn encodes_vote_fields() {
        let vote = VoteAssignment {
            participant_id: 7,
            question_index: 2,
            option_index: 1,
            session_id: "loadtest_ab12_p7_q2_1700000000000_4321".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 6).unwrap(),
        };

        let body = serde_json::to_value(encode_vote(&vote)).unwrap();
        assert_eq!(
            body,
            json!({"fields": {
                "sessionId": {"stringValue": "loadtest_ab12_p7_q2_1700000000000_4321"},
                "questionIndex": {"integerValue": "2"},
                "optionIndex": {"integerValue": "1"},
                "timestamp": {"timestampValue": "2024-03-09T14:05:06.000Z"}
            }})
        );
    }

    #[test]
    fn encoded_counts_decode_to_same_tally() {
        let tally: VoteTally = [(TallyKey::new(2, 1), 4), (TallyKey::new(0, 3), 11)]
            .into_iter()
            .collect();

        let body = serde_json::to_value(encode_vote_counts(&tally).unwrap()).unwrap();
        assert_eq!(body["fields"]["voteCounts"]["mapValue"]["fields"]["2_1"], json!({"integerValue": "4"}));

        let doc: Document = serde_json::from_value(body).unwrap();
        assert_eq!(decode_poll("X", &doc).unwrap().vote_counts, tally);
    }
}
