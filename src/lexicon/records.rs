/// Typed com.atpchess records and their lexicon validation
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{GAME_COLLECTION, MOVE_COLLECTION};

/// Validation error detail
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Reference to a specific version of another record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

/// A com.atpchess.game challenge record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    #[serde(rename = "$type")]
    pub record_type: String,
    pub challenger: String,
    pub challenged: String,
    pub starts_first: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_control: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rated: Option<bool>,
    pub created_at: String,
    /// Unknown fields are preserved, not rejected
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GameRecord {
    pub fn is_rated(&self) -> bool {
        self.rated.unwrap_or(false)
    }
}

/// A com.atpchess.move record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRecord {
    #[serde(rename = "$type")]
    pub record_type: String,
    pub game: StrongRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_move: Option<StrongRef>,
    pub r#move: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fen: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draw_offer: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resignation: Option<bool>,
    pub created_at: String,
    /// Unknown fields are preserved, not rejected
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MoveRecord {
    pub fn is_resignation(&self) -> bool {
        self.resignation.unwrap_or(false)
    }

    pub fn offers_draw(&self) -> bool {
        self.draw_offer.unwrap_or(false)
    }
}

/// Validate a game record against the com.atpchess.game lexicon
pub fn validate_game_record(record: &Value) -> Result<GameRecord, Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !record.is_object() {
        return Err(vec![ValidationError {
            path: "$".to_string(),
            message: "Record must be an object".to_string(),
        }]);
    }

    check_record_type(record, GAME_COLLECTION, &mut errors);
    check_did_field(record, "challenger", &mut errors);
    check_did_field(record, "challenged", &mut errors);
    check_did_field(record, "startsFirst", &mut errors);
    check_datetime_field(record, "createdAt", &mut errors);

    if let Some(time_control) = record.get("timeControl") {
        if !time_control.is_string() {
            errors.push(ValidationError {
                path: "$.timeControl".to_string(),
                message: "Field 'timeControl' must be a string".to_string(),
            });
        }
    }

    if let Some(rated) = record.get("rated") {
        if !rated.is_boolean() {
            errors.push(ValidationError {
                path: "$.rated".to_string(),
                message: "Field 'rated' must be a boolean".to_string(),
            });
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value(record.clone()).map_err(|e| {
        vec![ValidationError {
            path: "$".to_string(),
            message: format!("Malformed game record: {}", e),
        }]
    })
}

/// Validate a move record against the com.atpchess.move lexicon
pub fn validate_move_record(record: &Value) -> Result<MoveRecord, Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !record.is_object() {
        return Err(vec![ValidationError {
            path: "$".to_string(),
            message: "Record must be an object".to_string(),
        }]);
    }

    check_record_type(record, MOVE_COLLECTION, &mut errors);
    check_strong_ref(record, "game", true, &mut errors);
    check_strong_ref(record, "previousMove", false, &mut errors);
    check_datetime_field(record, "createdAt", &mut errors);

    // Move notation: required, 2-10 characters
    match record.get("move") {
        None => errors.push(ValidationError {
            path: "$.move".to_string(),
            message: "Required field 'move' is missing".to_string(),
        }),
        Some(mv) => match mv.as_str() {
            Some(s) if s.len() < 2 => errors.push(ValidationError {
                path: "$.move".to_string(),
                message: format!("Move is shorter than 2 characters: {}", s.len()),
            }),
            Some(s) if s.len() > 10 => errors.push(ValidationError {
                path: "$.move".to_string(),
                message: format!("Move exceeds maximum length of 10 characters: {}", s.len()),
            }),
            Some(_) => {}
            None => errors.push(ValidationError {
                path: "$.move".to_string(),
                message: "Field 'move' must be a string".to_string(),
            }),
        },
    }

    if let Some(fen) = record.get("fen") {
        match fen.as_str() {
            Some(s) if s.len() > 100 => errors.push(ValidationError {
                path: "$.fen".to_string(),
                message: format!("FEN exceeds maximum length of 100 characters: {}", s.len()),
            }),
            Some(_) => {}
            None => errors.push(ValidationError {
                path: "$.fen".to_string(),
                message: "Field 'fen' must be a string".to_string(),
            }),
        }
    }

    if let Some(time_remaining) = record.get("timeRemaining") {
        if !time_remaining.is_i64() {
            errors.push(ValidationError {
                path: "$.timeRemaining".to_string(),
                message: "Field 'timeRemaining' must be an integer".to_string(),
            });
        }
    }

    for field in ["drawOffer", "resignation"] {
        if let Some(value) = record.get(field) {
            if !value.is_boolean() {
                errors.push(ValidationError {
                    path: format!("$.{}", field),
                    message: format!("Field '{}' must be a boolean", field),
                });
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value(record.clone()).map_err(|e| {
        vec![ValidationError {
            path: "$".to_string(),
            message: format!("Malformed move record: {}", e),
        }]
    })
}

fn check_record_type(record: &Value, expected: &str, errors: &mut Vec<ValidationError>) {
    match record.get("$type").and_then(|t| t.as_str()) {
        None => errors.push(ValidationError {
            path: "$.$type".to_string(),
            message: "Record must have a $type field".to_string(),
        }),
        Some(t) if t != expected => errors.push(ValidationError {
            path: "$.$type".to_string(),
            message: format!("Expected $type '{}', got '{}'", expected, t),
        }),
        Some(_) => {}
    }
}

fn check_did_field(record: &Value, field: &str, errors: &mut Vec<ValidationError>) {
    match record.get(field) {
        None => errors.push(ValidationError {
            path: format!("$.{}", field),
            message: format!("Required field '{}' is missing", field),
        }),
        Some(value) => match value.as_str() {
            Some(s) if !s.starts_with("did:") => errors.push(ValidationError {
                path: format!("$.{}", field),
                message: format!("Field '{}' must be a DID", field),
            }),
            Some(_) => {}
            None => errors.push(ValidationError {
                path: format!("$.{}", field),
                message: format!("Field '{}' must be a string (did)", field),
            }),
        },
    }
}

fn check_datetime_field(record: &Value, field: &str, errors: &mut Vec<ValidationError>) {
    match record.get(field) {
        None => errors.push(ValidationError {
            path: format!("$.{}", field),
            message: format!("Required field '{}' is missing", field),
        }),
        Some(value) => match value.as_str() {
            Some(s) if chrono::DateTime::parse_from_rfc3339(s).is_err() => {
                errors.push(ValidationError {
                    path: format!("$.{}", field),
                    message: format!("Field '{}' must be an RFC 3339 datetime", field),
                })
            }
            Some(_) => {}
            None => errors.push(ValidationError {
                path: format!("$.{}", field),
                message: format!("Field '{}' must be a string (datetime)", field),
            }),
        },
    }
}

fn check_strong_ref(record: &Value, field: &str, required: bool, errors: &mut Vec<ValidationError>) {
    let value = match record.get(field) {
        Some(v) => v,
        None => {
            if required {
                errors.push(ValidationError {
                    path: format!("$.{}", field),
                    message: format!("Required field '{}' is missing", field),
                });
            }
            return;
        }
    };

    let obj = match value.as_object() {
        Some(o) => o,
        None => {
            errors.push(ValidationError {
                path: format!("$.{}", field),
                message: format!("Field '{}' must be a strong ref object", field),
            });
            return;
        }
    };

    match obj.get("uri").and_then(|u| u.as_str()) {
        Some(uri) if uri.starts_with("at://") => {}
        Some(_) => errors.push(ValidationError {
            path: format!("$.{}.uri", field),
            message: "Strong ref uri must be an at:// URI".to_string(),
        }),
        None => errors.push(ValidationError {
            path: format!("$.{}.uri", field),
            message: "Strong ref must have a string 'uri'".to_string(),
        }),
    }

    if obj.get("cid").and_then(|c| c.as_str()).is_none() {
        errors.push(ValidationError {
            path: format!("$.{}.cid", field),
            message: "Strong ref must have a string 'cid'".to_string(),
        });
    }
}
