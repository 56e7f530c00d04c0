//! The stock catalog: small, dependency-free functions that exercise
//! every dispatch path and are useful glue in their own right.

use crate::{
    options::one_of,
    registry::{streaming, unary, FunctionError, Registry, RegistryError},
    types::{Kind, Signature},
};
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Chat roles a message history entry may carry.
pub const ROLES: [&str; 3] = ["user", "assistant", "system"];

/// The standard catalog in a fresh registry.
pub fn registry() -> Result<Registry, RegistryError> {
    let mut reg = Registry::new();
    register(&mut reg)?;
    Ok(reg)
}

/// Registers the standard catalog into an existing registry.
pub fn register(reg: &mut Registry) -> Result<(), RegistryError> {
    reg.options_mut().insert("AppendRole", "role", one_of(ROLES));

    reg.register(
        "Concat",
        Signature::new()
            .input("a", Kind::Text)
            .input("b", Kind::Text)
            .input("separator", Kind::Text)
            .output("result", Kind::Text),
        unary(|(a, b, sep): (String, String, String)| async move {
            Ok((format!("{a}{sep}{b}"),))
        }),
    )?;

    reg.register(
        "FillTemplate",
        Signature::new()
            .input("message", Kind::Text)
            .input("variable", Kind::Text)
            .output("message", Kind::Text),
        unary(|(message, variable): (String, String)| async move {
            Ok((message.replace("{{variable}}", &variable),))
        }),
    )?;

    reg.register(
        "GenerateUuid",
        Signature::new().output("uuid", Kind::Text),
        unary(|_: ()| async move { Ok((Uuid::new_v4().simple().to_string(),)) }),
    )?;

    reg.register(
        "ExtractJsonField",
        Signature::new()
            .input("document", Kind::Map)
            .input("path", Kind::Text)
            .output("field", Kind::Text),
        unary(
            |(document, path): (JsonMap<String, JsonValue>, String)| async move {
                Ok((extract_field(&JsonValue::Object(document), &path)?,))
            },
        ),
    )?;

    reg.register(
        "FormatValue",
        Signature::new()
            .input("value", Kind::Json)
            .input("template", Kind::Text)
            .output("formatted", Kind::Text),
        unary(|(value, template): (JsonValue, String)| async move {
            let rendered = render_json(&value)?;
            Ok((template.replacen("{}", &rendered, 1),))
        }),
    )?;

    reg.register(
        "AppendRole",
        Signature::new()
            .input("history", Kind::Json)
            .input_with_options("role", Kind::Text, ROLES)
            .input("content", Kind::Text)
            .output("history", Kind::Json),
        unary(
            |(history, role, content): (JsonValue, String, String)| async move {
                let mut items = match history {
                    // An omitted history decodes to null; start fresh.
                    JsonValue::Null => Vec::new(),
                    JsonValue::Array(items) => items,
                    _ => return Err(FunctionError::failed("history must be a JSON array")),
                };
                items.push(json!({ "role": role, "content": content }));
                Ok((JsonValue::Array(items),))
            },
        ),
    )?;

    reg.register(
        "SplitText",
        Signature::new()
            .input("text", Kind::Text)
            .input("separator", Kind::Text)
            .output("chunks", Kind::Stream),
        streaming(|(text, separator): (String, String)| async move {
            let (tx, rx) = mpsc::channel(64);
            tokio::spawn(async move {
                for chunk in text.split(separator.as_str()).filter(|c| !c.is_empty()) {
                    if tx.send(Ok(chunk.to_owned())).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }),
    )?;

    Ok(())
}

/// Walks a dot-separated path. A text leaf comes back verbatim; anything
/// else is rendered as JSON.
fn extract_field(document: &JsonValue, path: &str) -> Result<String, FunctionError> {
    let mut cursor = document;
    for segment in path.split('.') {
        cursor = cursor.get(segment).ok_or_else(|| {
            FunctionError::failed(format!("no field '{segment}' along path '{path}'"))
        })?;
    }
    render_json(cursor)
}

fn render_json(value: &JsonValue) -> Result<String, FunctionError> {
    match value {
        JsonValue::String(s) => Ok(s.clone()),
        other => serde_json::to_string(other)
            .map_err(|e| FunctionError::failed(format!("value cannot be rendered: {e}"))),
    }
}
