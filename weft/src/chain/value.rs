//! The tagged value flowing between chain tasks.
//!
//! Every task consumes and produces a [`DataValue`] with a declared
//! [`DataType`]. Conversions are explicit and pairwise: where a rule exists
//! it is total, where none exists the conversion fails with `TypeMismatch`.
//! A defined conversion applied to malformed content (e.g. `String` → `Int`
//! on non-numeric text) fails with `BadInput` instead — the rule exists, the
//! data is wrong.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::ChatHistory;
use crate::error::WeftError;

use super::openai_compat::{
    history_from_request, request_from_history, response_from_history, OpenAiChatRequest,
    OpenAiChatResponse,
};

/// Declared type of a chain value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    ChatHistory,
    Json,
    Int,
    Float,
    Bool,
    #[serde(rename = "openai_chat_request")]
    OpenAiChatRequest,
    #[serde(rename = "openai_chat_response")]
    OpenAiChatResponse,
    /// Matches anything; conversion to Any is the identity.
    Any,
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::String => "string",
            DataType::ChatHistory => "chat_history",
            DataType::Json => "json",
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Bool => "bool",
            DataType::OpenAiChatRequest => "openai_chat_request",
            DataType::OpenAiChatResponse => "openai_chat_response",
            DataType::Any => "any",
        };
        f.write_str(name)
    }
}

/// A chain value with its tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DataValue {
    String(String),
    ChatHistory(ChatHistory),
    Json(Value),
    Int(i64),
    Float(f64),
    Bool(bool),
    #[serde(rename = "openai_chat_request")]
    OpenAiChatRequest(OpenAiChatRequest),
    #[serde(rename = "openai_chat_response")]
    OpenAiChatResponse(OpenAiChatResponse),
}

impl DataValue {
    pub fn data_type(&self) -> DataType {
        match self {
            DataValue::String(_) => DataType::String,
            DataValue::ChatHistory(_) => DataType::ChatHistory,
            DataValue::Json(_) => DataType::Json,
            DataValue::Int(_) => DataType::Int,
            DataValue::Float(_) => DataType::Float,
            DataValue::Bool(_) => DataType::Bool,
            DataValue::OpenAiChatRequest(_) => DataType::OpenAiChatRequest,
            DataValue::OpenAiChatResponse(_) => DataType::OpenAiChatResponse,
        }
    }

    /// String rendering used for transition evaluation and macro expansion.
    /// Chat histories render as their last message's content.
    pub fn render(&self) -> String {
        match self {
            DataValue::String(s) => s.clone(),
            DataValue::ChatHistory(h) => {
                h.last().map(|m| m.content.clone()).unwrap_or_default()
            }
            DataValue::Json(v) => v.to_string(),
            DataValue::Int(i) => i.to_string(),
            DataValue::Float(f) => f.to_string(),
            DataValue::Bool(b) => b.to_string(),
            DataValue::OpenAiChatRequest(r) => {
                serde_json::to_string(r).unwrap_or_default()
            }
            DataValue::OpenAiChatResponse(r) => {
                serde_json::to_string(r).unwrap_or_default()
            }
        }
    }

    /// Numeric reading of this value, when it has one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            DataValue::Int(i) => Some(*i as f64),
            DataValue::Float(f) => Some(*f),
            DataValue::Json(Value::Number(n)) => n.as_f64(),
            DataValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn mismatch(&self, target: DataType) -> WeftError {
        WeftError::TypeMismatch {
            from: self.data_type().to_string(),
            to: target.to_string(),
        }
    }

    /// Converts to `target`, applying the pairwise rule table.
    pub fn convert_to(&self, target: DataType) -> Result<DataValue, WeftError> {
        if target == DataType::Any || self.data_type() == target {
            return Ok(self.clone());
        }
        match (self, target) {
            // String ----------------------------------------------------
            (DataValue::String(s), DataType::ChatHistory) => {
                Ok(DataValue::ChatHistory(ChatHistory::from_user(s.clone())))
            }
            (DataValue::String(s), DataType::Json) => Ok(DataValue::Json(
                serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
            )),
            (DataValue::String(s), DataType::Int) => s
                .trim()
                .parse::<i64>()
                .map(DataValue::Int)
                .map_err(|_| WeftError::BadInput(format!("not an integer: {s:?}"))),
            (DataValue::String(s), DataType::Float) => s
                .trim()
                .parse::<f64>()
                .map(DataValue::Float)
                .map_err(|_| WeftError::BadInput(format!("not a number: {s:?}"))),
            (DataValue::String(s), DataType::Bool) => match s.trim().to_lowercase().as_str() {
                "true" => Ok(DataValue::Bool(true)),
                "false" => Ok(DataValue::Bool(false)),
                _ => Err(WeftError::BadInput(format!("not a bool: {s:?}"))),
            },
            (DataValue::String(s), DataType::OpenAiChatRequest) => serde_json::from_str(s)
                .map(DataValue::OpenAiChatRequest)
                .map_err(|e| WeftError::BadInput(format!("not a chat request: {e}"))),

            // Int / Float / Bool ----------------------------------------
            (DataValue::Int(i), DataType::String) => Ok(DataValue::String(i.to_string())),
            (DataValue::Int(i), DataType::Float) => Ok(DataValue::Float(*i as f64)),
            (DataValue::Int(i), DataType::Json) => Ok(DataValue::Json(Value::from(*i))),
            (DataValue::Float(f), DataType::String) => Ok(DataValue::String(f.to_string())),
            (DataValue::Float(f), DataType::Json) => Ok(DataValue::Json(
                serde_json::Number::from_f64(*f)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            (DataValue::Bool(b), DataType::String) => Ok(DataValue::String(b.to_string())),
            (DataValue::Bool(b), DataType::Json) => Ok(DataValue::Json(Value::Bool(*b))),

            // Json ------------------------------------------------------
            (DataValue::Json(v), DataType::String) => Ok(DataValue::String(match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })),
            (DataValue::Json(Value::Number(n)), DataType::Int) => n
                .as_i64()
                .map(DataValue::Int)
                .ok_or_else(|| WeftError::BadInput(format!("not an integer: {n}"))),
            (DataValue::Json(Value::Number(n)), DataType::Float) => n
                .as_f64()
                .map(DataValue::Float)
                .ok_or_else(|| WeftError::BadInput(format!("not a number: {n}"))),
            (DataValue::Json(Value::Bool(b)), DataType::Bool) => Ok(DataValue::Bool(*b)),
            (DataValue::Json(v), DataType::ChatHistory) => serde_json::from_value(v.clone())
                .map(DataValue::ChatHistory)
                .map_err(|e| WeftError::BadInput(format!("not a chat history: {e}"))),
            (DataValue::Json(v), DataType::OpenAiChatRequest) => serde_json::from_value(v.clone())
                .map(DataValue::OpenAiChatRequest)
                .map_err(|e| WeftError::BadInput(format!("not a chat request: {e}"))),

            // ChatHistory -----------------------------------------------
            (DataValue::ChatHistory(h), DataType::String) => Ok(DataValue::String(
                h.last().map(|m| m.content.clone()).unwrap_or_default(),
            )),
            (DataValue::ChatHistory(h), DataType::Json) => serde_json::to_value(h)
                .map(DataValue::Json)
                .map_err(|e| WeftError::BadInput(e.to_string())),
            (DataValue::ChatHistory(h), DataType::OpenAiChatRequest) => {
                Ok(DataValue::OpenAiChatRequest(request_from_history(h)))
            }
            (DataValue::ChatHistory(h), DataType::OpenAiChatResponse) => {
                response_from_history(h).map(DataValue::OpenAiChatResponse)
            }

            // OpenAI request/response -----------------------------------
            (DataValue::OpenAiChatRequest(r), DataType::ChatHistory) => {
                Ok(DataValue::ChatHistory(history_from_request(r)))
            }
            (DataValue::OpenAiChatRequest(r), DataType::Json) => serde_json::to_value(r)
                .map(DataValue::Json)
                .map_err(|e| WeftError::BadInput(e.to_string())),
            (DataValue::OpenAiChatRequest(r), DataType::String) => serde_json::to_string(r)
                .map(DataValue::String)
                .map_err(|e| WeftError::BadInput(e.to_string())),
            (DataValue::OpenAiChatResponse(r), DataType::Json) => serde_json::to_value(r)
                .map(DataValue::Json)
                .map_err(|e| WeftError::BadInput(e.to_string())),
            (DataValue::OpenAiChatResponse(r), DataType::String) => serde_json::to_string(r)
                .map(DataValue::String)
                .map_err(|e| WeftError::BadInput(e.to_string())),

            _ => Err(self.mismatch(target)),
        }
    }

    /// Natural (untagged) JSON form, for callers outside the engine such as
    /// sandbox scripts: scalars as scalars, structured values as objects.
    pub fn to_plain_json(&self) -> Value {
        match self {
            DataValue::String(s) => Value::String(s.clone()),
            DataValue::Int(i) => Value::from(*i),
            DataValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            DataValue::Bool(b) => Value::Bool(*b),
            DataValue::Json(v) => v.clone(),
            DataValue::ChatHistory(h) => serde_json::to_value(h).unwrap_or(Value::Null),
            DataValue::OpenAiChatRequest(r) => serde_json::to_value(r).unwrap_or(Value::Null),
            DataValue::OpenAiChatResponse(r) => serde_json::to_value(r).unwrap_or(Value::Null),
        }
    }

    /// Builds a value from untagged JSON: strings stay strings, everything
    /// else is carried as `Json`.
    pub fn from_plain_json(value: Value) -> DataValue {
        match value {
            Value::String(s) => DataValue::String(s),
            Value::Bool(b) => DataValue::Bool(b),
            Value::Number(n) if n.is_i64() => DataValue::Int(n.as_i64().unwrap_or_default()),
            other => DataValue::Json(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatMessage;

    /// **Scenario**: identity and Any conversions never fail.
    #[test]
    fn identity_and_any() {
        let v = DataValue::Int(7);
        assert_eq!(v.convert_to(DataType::Int).unwrap(), v);
        assert_eq!(v.convert_to(DataType::Any).unwrap(), v);
    }

    /// **Scenario**: string conversions parse or fail with BadInput.
    #[test]
    fn string_parses() {
        assert_eq!(
            DataValue::String("42".into()).convert_to(DataType::Int).unwrap(),
            DataValue::Int(42)
        );
        assert_eq!(
            DataValue::String(" 2.5 ".into())
                .convert_to(DataType::Float)
                .unwrap(),
            DataValue::Float(2.5)
        );
        assert_eq!(
            DataValue::String("TRUE".into())
                .convert_to(DataType::Bool)
                .unwrap(),
            DataValue::Bool(true)
        );
        assert!(matches!(
            DataValue::String("many".into()).convert_to(DataType::Int),
            Err(WeftError::BadInput(_))
        ));
    }

    /// **Scenario**: string → chat history wraps a single user message.
    #[test]
    fn string_to_history() {
        let v = DataValue::String("hello".into())
            .convert_to(DataType::ChatHistory)
            .unwrap();
        match v {
            DataValue::ChatHistory(h) => {
                assert_eq!(h.messages.len(), 1);
                assert_eq!(h.messages[0].content, "hello");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    /// **Scenario**: string → json parses JSON, otherwise wraps the string.
    #[test]
    fn string_to_json_total() {
        assert_eq!(
            DataValue::String("{\"a\":1}".into())
                .convert_to(DataType::Json)
                .unwrap(),
            DataValue::Json(serde_json::json!({"a": 1}))
        );
        assert_eq!(
            DataValue::String("plain".into())
                .convert_to(DataType::Json)
                .unwrap(),
            DataValue::Json(Value::String("plain".into()))
        );
    }

    /// **Scenario**: undefined pairs fail with TypeMismatch naming both sides.
    #[test]
    fn undefined_pair_is_type_mismatch() {
        let err = DataValue::Bool(true)
            .convert_to(DataType::ChatHistory)
            .unwrap_err();
        match err {
            WeftError::TypeMismatch { from, to } => {
                assert_eq!(from, "bool");
                assert_eq!(to, "chat_history");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    /// **Scenario**: history renders as its last message for transitions.
    #[test]
    fn render_history_last_message() {
        let mut h = ChatHistory::from_user("q");
        h.messages.push(ChatMessage::assistant("final answer"));
        assert_eq!(DataValue::ChatHistory(h).render(), "final answer");
    }

    /// **Scenario**: serde representation is tagged and round-trips.
    #[test]
    fn tagged_serde_round_trip() {
        let v = DataValue::Json(serde_json::json!({"k": [1, 2]}));
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.contains("\"type\":\"json\""));
        let back: DataValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
