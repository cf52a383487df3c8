//! Schema reflection for handler argument types.
//!
//! Tool and prompt handlers declare a typed argument struct; at registration
//! time the struct's derived `schemars::JsonSchema` implementation is turned
//! into the JSON Schema advertised via `tools/list` and the argument
//! descriptors advertised via `prompts/list`. A field is required when its
//! type is not an `Option`; descriptions come from doc comments or
//! `#[schemars(description = "...")]`; serde renames flow through, so the
//! advertised name is the JSON name.

use crate::error::SchemaError;
use crate::protocol::PromptArgument;
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde_json::{json, Map, Value};

/// Derives the `inputSchema` for a tool argument type.
///
/// The schema is fully expanded (no `$ref`) and carries
/// `additionalProperties: true` so callers may pass extra fields.
pub fn input_schema<T: JsonSchema>() -> Result<Value, SchemaError> {
    let schema = expanded_schema::<T>();
    ensure_object(&schema)?;

    let mut schema = match schema {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    schema.remove("title");
    schema.insert("additionalProperties".into(), json!(true));
    if !schema.contains_key("type") {
        schema.insert("type".into(), json!("object"));
    }
    Ok(Value::Object(schema))
}

/// Derives the prompt argument descriptors for a prompt argument type: one
/// entry per field, in declaration order, each carrying the JSON field name,
/// its description and whether it is required.
///
/// Every field must be a string or optional string.
pub fn prompt_arguments<T: JsonSchema>() -> Result<Vec<PromptArgument>, SchemaError> {
    let schema = expanded_schema::<T>();
    ensure_object(&schema)?;

    let required: Vec<&str> = schema["required"]
        .as_array()
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let empty = Map::new();
    let properties = schema["properties"].as_object().unwrap_or(&empty);

    let mut arguments = Vec::with_capacity(properties.len());
    for (name, property) in properties {
        if !is_string_schema(property) {
            return Err(SchemaError::PromptArgumentNotString(name.clone()));
        }
        arguments.push(PromptArgument {
            name: name.clone(),
            description: property["description"].as_str().map(str::to_owned),
            required: Some(required.contains(&name.as_str())),
        });
    }
    Ok(arguments)
}

/// Generates a draft-07 schema with all subschemas inlined.
fn expanded_schema<T: JsonSchema>() -> Value {
    let settings = SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
    });
    let root = settings.into_generator().into_root_schema_for::<T>();
    serde_json::to_value(root.schema).unwrap_or_else(|_| json!({"type": "object"}))
}

fn ensure_object(schema: &Value) -> Result<(), SchemaError> {
    if schema_has_type(schema, "object") {
        Ok(())
    } else {
        Err(SchemaError::ArgumentsNotObject(
            schema["type"].as_str().map(str::to_owned),
        ))
    }
}

/// Accepts `{"type": "string"}` and the nullable form schemars generates for
/// `Option<String>`, `{"type": ["string", "null"]}`.
fn is_string_schema(schema: &Value) -> bool {
    schema_has_type(schema, "string")
}

fn schema_has_type(schema: &Value, expected: &str) -> bool {
    match &schema["type"] {
        Value::String(t) => t == expected,
        Value::Array(types) => types
            .iter()
            .all(|t| t.as_str() == Some(expected) || t.as_str() == Some("null")),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct HelloArguments {
        /// The name of the thing calling this tool.
        submitter: String,
        #[serde(default)]
        greeting: Option<String>,
    }

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Nested {
        inner: HelloArguments,
        count: u32,
    }

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct PromptContent {
        /// The title to submit.
        title: String,
        #[serde(rename = "desc")]
        description: Option<String>,
    }

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct BadPrompt {
        count: u32,
    }

    #[test]
    fn test_input_schema_required_and_descriptions() {
        let schema = input_schema::<HelloArguments>().unwrap();
        assert_eq!(schema["type"], json!("object"));
        assert_eq!(schema["additionalProperties"], json!(true));
        assert_eq!(schema["required"], json!(["submitter"]));
        assert_eq!(
            schema["properties"]["submitter"]["description"],
            json!("The name of the thing calling this tool.")
        );
        assert!(schema.get("title").is_none());
    }

    #[test]
    fn test_input_schema_is_expanded_without_refs() {
        let schema = input_schema::<Nested>().unwrap();
        let encoded = serde_json::to_string(&schema).unwrap();
        assert!(!encoded.contains("$ref"));
        assert_eq!(
            schema["properties"]["inner"]["properties"]["submitter"]["type"],
            json!("string")
        );
    }

    #[test]
    fn test_input_schema_rejects_non_struct() {
        let err = input_schema::<String>().unwrap_err();
        assert!(matches!(err, SchemaError::ArgumentsNotObject(_)));
    }

    #[test]
    fn test_prompt_arguments_declaration_order_and_required() {
        let arguments = prompt_arguments::<PromptContent>().unwrap();
        assert_eq!(arguments.len(), 2);
        assert_eq!(arguments[0].name, "title");
        assert_eq!(arguments[0].required, Some(true));
        assert_eq!(
            arguments[0].description.as_deref(),
            Some("The title to submit.")
        );
        assert_eq!(arguments[1].required, Some(false));
    }

    #[test]
    fn test_prompt_arguments_use_json_tag_names() {
        let arguments = prompt_arguments::<PromptContent>().unwrap();
        // The serde rename wins over the declared field name.
        assert_eq!(arguments[1].name, "desc");
    }

    #[test]
    fn test_prompt_arguments_reject_non_string_field() {
        let err = prompt_arguments::<BadPrompt>().unwrap_err();
        match err {
            SchemaError::PromptArgumentNotString(field) => assert_eq!(field, "count"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_struct_schema() {
        #[derive(Deserialize, JsonSchema)]
        struct Empty {}
        let schema = input_schema::<Empty>().unwrap();
        assert_eq!(schema["type"], json!("object"));
        assert_eq!(prompt_arguments::<Empty>().unwrap(), vec![]);
    }
}
