use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::fmt;
use thiserror::Error;

/// Runtime tag naming how a parameter's value is encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Kind {
    Bool,
    Int,
    Float,
    Text,
    /// A JSON object, carried as its serialized text.
    Map,
    /// Any JSON document, carried as its serialized text.
    Json,
    /// Output-only: the value arrives as a sequence of stream messages
    /// instead of a single inline string.
    Stream,
}

impl Kind {
    fn name(&self) -> &'static str {
        use Kind::*;
        match self {
            Bool => "bool",
            Int => "int",
            Float => "float",
            Text => "text",
            Map => "map",
            Json => "json",
            Stream => "stream",
        }
    }

    /// Parses a raw wire string into a [`Value`] of this kind. A missing
    /// string decodes to the kind's zero value.
    pub fn decode(&self, raw: Option<&str>) -> Result<Value, CodecError> {
        use Kind::*;
        let Some(raw) = raw else { return self.zero() };
        let parse_err = |reason: String| CodecError::Parse {
            kind: *self,
            raw: raw.to_owned(),
            reason,
        };
        Ok(match self {
            Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => return Err(parse_err("not a boolean".to_owned())),
            },
            Int => Value::Int(raw.parse::<i64>().map_err(|e| parse_err(e.to_string()))?),
            Float => Value::Float(raw.parse::<f64>().map_err(|e| parse_err(e.to_string()))?),
            Text => Value::Text(raw.to_owned()),
            Map => Value::Map(serde_json::from_str(raw).map_err(|e| parse_err(e.to_string()))?),
            Json => Value::Json(serde_json::from_str(raw).map_err(|e| parse_err(e.to_string()))?),
            Stream => return Err(CodecError::Stream),
        })
    }

    /// The stand-in for an input the caller omitted entirely.
    pub fn zero(&self) -> Result<Value, CodecError> {
        use Kind::*;
        Ok(match self {
            Bool => Value::Bool(false),
            Int => Value::Int(0),
            Float => Value::Float(0.0),
            Text => Value::Text(String::new()),
            Map => Value::Map(JsonMap::new()),
            Json => Value::Json(JsonValue::Null),
            Stream => return Err(CodecError::Stream),
        })
    }

    /// Renders a [`Value`] of this kind back into its wire string.
    pub fn encode(&self, val: &Value) -> Result<String, CodecError> {
        if *self == Kind::Stream {
            return Err(CodecError::Stream);
        }
        if val.kind() != *self {
            return Err(CodecError::Mismatch {
                expected: *self,
                found: val.kind(),
            });
        }
        let json_err = |e: serde_json::Error| CodecError::Parse {
            kind: *self,
            raw: String::new(),
            reason: e.to_string(),
        };
        Ok(match val {
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(x) => x.to_string(),
            Value::Text(s) => s.clone(),
            Value::Map(m) => serde_json::to_string(m).map_err(json_err)?,
            Value::Json(v) => serde_json::to_string(v).map_err(json_err)?,
        })
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded argument or return value, in native form.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Map(JsonMap<String, JsonValue>),
    Json(JsonValue),
}

impl Value {
    pub fn kind(&self) -> Kind {
        use Value::*;
        match self {
            Bool(_) => Kind::Bool,
            Int(_) => Kind::Int,
            Float(_) => Kind::Float,
            Text(_) => Kind::Text,
            Map(_) => Kind::Map,
            Json(_) => Kind::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
pub enum CodecError {
    #[error("cannot decode {raw:?} as {kind}: {reason}")]
    Parse { kind: Kind, raw: String, reason: String },
    #[error("expected {expected}, found {found}")]
    Mismatch { expected: Kind, found: Kind },
    #[error("expected {expected} values, found {found}")]
    Arity { expected: usize, found: usize },
    #[error("stream outputs have no inline encoding")]
    Stream,
}

pub trait IntoValue {
    fn kind() -> Kind;
    fn into_value(self) -> Value;
}

pub trait FromValue: Sized {
    fn kind() -> Kind;
    fn from_value(val: Value) -> Result<Self, CodecError>;
}

macro_rules! impl_value_conv {
    ($rust_type:ty, $kind:expr, $into_name:pat => $into_expr:expr, $($from_arm:tt)*) => {
        impl IntoValue for $rust_type {
            fn kind() -> Kind {
                $kind
            }

            fn into_value(self) -> Value {
                let $into_name = self;
                $into_expr
            }
        }

        impl FromValue for $rust_type {
            fn kind() -> Kind {
                $kind
            }

            fn from_value(val: Value) -> Result<Self, CodecError> {
                Ok(match val {
                    $($from_arm)*,
                    other => {
                        return Err(CodecError::Mismatch {
                            expected: $kind,
                            found: other.kind(),
                        })
                    }
                })
            }
        }
    };
}

impl_value_conv!(bool, Kind::Bool, b => Value::Bool(b), Value::Bool(b) => b);
impl_value_conv!(i64, Kind::Int, n => Value::Int(n), Value::Int(n) => n);
impl_value_conv!(f64, Kind::Float, x => Value::Float(x), Value::Float(x) => x);
impl_value_conv!(String, Kind::Text, s => Value::Text(s), Value::Text(s) => s);
impl_value_conv!(JsonMap<String, JsonValue>, Kind::Map, m => Value::Map(m), Value::Map(m) => m);
impl_value_conv!(JsonValue, Kind::Json, v => Value::Json(v), Value::Json(v) => v);

/// One declared input or output of a registered function.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Parameter {
    pub name: String,
    pub kind: Kind,
    /// Legal values for inputs restricted to a fixed set. Empty means
    /// unrestricted.
    pub options: Vec<String>,
}

/// The callable shape of a registered function: its declared inputs and
/// outputs, in positional order.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Signature {
    pub inputs: Vec<Parameter>,
    pub outputs: Vec<Parameter>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, name: impl Into<String>, kind: Kind) -> Self {
        self.inputs.push(Parameter {
            name: name.into(),
            kind,
            options: Vec::new(),
        });
        self
    }

    pub fn input_with_options<S, I>(
        mut self,
        name: impl Into<String>,
        kind: Kind,
        options: I,
    ) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        self.inputs.push(Parameter {
            name: name.into(),
            kind,
            options: options.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn output(mut self, name: impl Into<String>, kind: Kind) -> Self {
        self.outputs.push(Parameter {
            name: name.into(),
            kind,
            options: Vec::new(),
        });
        self
    }

    /// True when the single declared output is a stream.
    pub fn is_streaming(&self) -> bool {
        matches!(self.outputs.as_slice(), [p] if p.kind == Kind::Stream)
    }
}

/// One named input as it crosses the wire. `value: None` means the caller
/// omitted the input and the declared kind's zero value applies.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InputValue {
    pub name: String,
    pub value: Option<String>,
}

impl InputValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn absent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

/// One named output of a completed unary call.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OutputValue {
    pub name: String,
    pub kind: Kind,
    pub value: String,
}

/// One element of a streamed result. `is_final` is only known once the
/// producer either yields another message or finishes, so every message
/// but the last arrives with it unset.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StreamMessage {
    pub seq: u64,
    pub is_final: bool,
    pub value: String,
}
