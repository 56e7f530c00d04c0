use crate::types::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Maps a raw option value to its canonical form, or rejects it with a
/// human-readable cause.
pub type Resolver = dyn Fn(Value) -> Result<Value, String> + Send + Sync;

/// Per-(function, parameter) resolvers for inputs whose descriptor
/// declares a fixed option set. Built once at startup alongside the
/// registry; never consulted for unrestricted inputs.
#[derive(Default)]
pub struct OptionTable {
    resolvers: BTreeMap<String, BTreeMap<String, Box<Resolver>>>,
}

impl OptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<F>(
        &mut self,
        function: impl Into<String>,
        parameter: impl Into<String>,
        resolver: F,
    ) where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.resolvers
            .entry(function.into())
            .or_default()
            .insert(parameter.into(), Box::new(resolver));
    }

    pub fn resolve(
        &self,
        function: &str,
        parameter: &str,
        val: Value,
    ) -> Result<Value, OptionError> {
        let resolver = self
            .resolvers
            .get(function)
            .and_then(|params| params.get(parameter))
            .ok_or_else(|| OptionError::Unregistered {
                function: function.to_owned(),
                parameter: parameter.to_owned(),
            })?;
        resolver(val).map_err(OptionError::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptionError {
    /// The descriptor declares options but nothing was registered to
    /// resolve them. A registration bug, not a caller mistake.
    #[error("no option resolver registered for input '{parameter}' of function '{function}'")]
    Unregistered { function: String, parameter: String },
    #[error("{0}")]
    Rejected(String),
}

/// The common resolver: case-insensitive match against a fixed set,
/// canonicalized to the set's spelling.
pub fn one_of<S>(
    allowed: impl IntoIterator<Item = S>,
) -> impl Fn(Value) -> Result<Value, String> + Send + Sync + 'static
where
    S: Into<String>,
{
    let allowed: Vec<String> = allowed.into_iter().map(Into::into).collect();
    move |val| {
        let s = match val {
            Value::Text(s) => s,
            other => return Err(format!("option values are text, got {}", other.kind())),
        };
        match allowed.iter().find(|a| a.eq_ignore_ascii_case(&s)) {
            Some(canon) => Ok(Value::Text(canon.clone())),
            None => Err(format!("'{s}' is not one of [{}]", allowed.join(", "))),
        }
    }
}
