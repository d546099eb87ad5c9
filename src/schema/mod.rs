//! Service input schema
//!
//! Generated from a sample of the request table. Each input parameter gets two
//! views: the `internal` struct description the model was trained against and
//! a `swagger` array-of-objects schema with the sample rows as example.

use indexmap::IndexMap;
use polars::prelude::{DataFrame, DataType};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::data::frame_to_rows;
use crate::error::{DeployError, Result};

/// Schema file served alongside a deployed model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub input: BTreeMap<String, InputSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    pub internal: InternalSchema,
    pub swagger: SwaggerSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub fields: Vec<InternalField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalField {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwaggerSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub items: SwaggerItems,
    pub example: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwaggerItems {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: IndexMap<String, SwaggerProperty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwaggerProperty {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub format: Option<String>,
}

/// Engine type name for a column dtype
fn internal_type(dtype: &DataType) -> Result<&'static str> {
    Ok(match dtype {
        DataType::Float64 => "double",
        DataType::Float32 => "float",
        DataType::Int64 | DataType::UInt32 | DataType::UInt64 => "long",
        DataType::Int32 | DataType::UInt16 => "integer",
        DataType::Int16 | DataType::UInt8 => "short",
        DataType::Int8 => "byte",
        DataType::Boolean => "boolean",
        DataType::String => "string",
        DataType::Date => "date",
        DataType::Datetime(_, _) => "timestamp",
        other => {
            return Err(DeployError::SchemaError(format!("Unsupported column type {}", other)));
        }
    })
}

/// Swagger `(type, format)` for an engine type name
fn swagger_type(internal: &str) -> (&'static str, Option<&'static str>) {
    match internal {
        "double" => ("number", Some("double")),
        "float" => ("number", Some("float")),
        "integer" | "short" | "byte" => ("integer", Some("int32")),
        "long" => ("integer", Some("int64")),
        "boolean" => ("boolean", None),
        "date" => ("string", Some("date")),
        "timestamp" => ("string", Some("date-time")),
        _ => ("string", None),
    }
}

/// Describe `sample` as the input parameter `param`
pub fn generate_schema(param: &str, sample: &DataFrame) -> Result<SchemaDocument> {
    if param.is_empty() {
        return Err(DeployError::SchemaError("Input parameter name is empty".to_string()));
    }

    let mut fields = Vec::with_capacity(sample.width());
    let mut properties = IndexMap::with_capacity(sample.width());
    for col in sample.get_columns() {
        let data_type = internal_type(col.dtype())?;
        let (kind, format) = swagger_type(data_type);
        fields.push(InternalField {
            name: col.name().to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            metadata: Map::new(),
        });
        properties.insert(
            col.name().to_string(),
            SwaggerProperty {
                kind: kind.to_string(),
                format: format.map(str::to_string),
            },
        );
    }

    let schema = InputSchema {
        internal: InternalSchema {
            kind: "struct".to_string(),
            fields,
        },
        swagger: SwaggerSchema {
            kind: "array".to_string(),
            items: SwaggerItems {
                kind: "object".to_string(),
                properties,
            },
            example: frame_to_rows(sample)?,
        },
    };

    let mut input = BTreeMap::new();
    input.insert(param.to_string(), schema);
    Ok(SchemaDocument { input })
}

impl SchemaDocument {
    pub fn parameter(&self, name: &str) -> Option<&InputSchema> {
        self.input.get(name)
    }

    /// Write as pretty JSON, replacing any existing file
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "Schema written");
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| DeployError::SchemaError(format!("Cannot read {}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// OpenAPI 3 document for the `/score` route
    pub fn swagger_spec(&self, title: &str) -> Value {
        let mut body_properties = Map::new();
        for (name, schema) in &self.input {
            body_properties.insert(name.clone(), json!(schema.swagger));
        }
        let required: Vec<&String> = self.input.keys().collect();

        json!({
            "openapi": "3.0.0",
            "info": {
                "title": title,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "paths": {
                "/score": {
                    "post": {
                        "summary": "Score rows with the deployed model",
                        "requestBody": {
                            "required": true,
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "properties": body_properties,
                                        "required": required,
                                    }
                                }
                            }
                        },
                        "responses": {
                            "200": {
                                "description": "Comma-separated predictions, or the error message",
                                "content": {
                                    "application/json": {
                                        "schema": {
                                            "type": "object",
                                            "properties": {
                                                "result": { "type": "string", "nullable": true },
                                                "error": { "type": "string" }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn sample() -> DataFrame {
        df!(
            "rooms" => &[3i32, 2, 4],
            "area" => &[120.5, 80.0, 150.25],
            "city" => &["oslo", "bergen", "oslo"]
        )
        .unwrap()
    }

    #[test]
    fn test_generate_schema_views() {
        let doc = generate_schema("input_df", &sample()).unwrap();
        let schema = doc.parameter("input_df").unwrap();

        assert_eq!(schema.internal.kind, "struct");
        assert_eq!(schema.internal.fields.len(), 3);
        assert_eq!(schema.internal.fields[0].name, "rooms");
        assert_eq!(schema.internal.fields[0].data_type, "integer");
        assert!(schema.internal.fields.iter().all(|f| f.nullable));

        let props = &schema.swagger.items.properties;
        assert_eq!(props.len(), 3);
        assert_eq!(props["area"].kind, "number");
        assert_eq!(props["area"].format.as_deref(), Some("double"));
        assert_eq!(props["rooms"].format.as_deref(), Some("int32"));
        assert_eq!(props["city"].format, None);
        assert_eq!(schema.swagger.example.len(), 3);
    }

    #[test]
    fn test_views_keep_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        let df = df!("zone" => &["n"], "area" => &[1.5], "rooms" => &[2i32]).unwrap();
        generate_schema("input_df", &df).unwrap().write(&path).unwrap();

        let schema = SchemaDocument::read(&path).unwrap();
        let input = schema.parameter("input_df").unwrap();
        let internal: Vec<&str> = input.internal.fields.iter().map(|f| f.name.as_str()).collect();
        let swagger: Vec<&str> = input.swagger.items.properties.keys().map(String::as_str).collect();
        let example: Vec<&str> = input.swagger.example[0]
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(internal, vec!["zone", "area", "rooms"]);
        assert_eq!(swagger, internal);
        assert_eq!(example, internal);
    }

    #[test]
    fn test_long_column() {
        let df = df!("id" => &[5_000_000_000i64]).unwrap();
        let doc = generate_schema("input_df", &df).unwrap();
        let schema = doc.parameter("input_df").unwrap();
        assert_eq!(schema.internal.fields[0].data_type, "long");
        assert_eq!(schema.swagger.items.properties["id"].format.as_deref(), Some("int64"));
    }

    #[test]
    fn test_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        let doc = generate_schema("input_df", &sample()).unwrap();
        doc.write(&path).unwrap();
        assert_eq!(SchemaDocument::read(&path).unwrap(), doc);
    }

    #[test]
    fn test_swagger_spec_has_score_route() {
        let doc = generate_schema("rows", &sample()).unwrap();
        let spec = doc.swagger_spec("house prices");
        assert_eq!(spec["info"]["title"], "house prices");
        let body = &spec["paths"]["/score"]["post"]["requestBody"]["content"]["application/json"]["schema"];
        assert_eq!(body["properties"]["rows"]["type"], "array");
        assert_eq!(body["required"][0], "rows");
    }

    #[test]
    fn test_empty_param_rejected() {
        assert!(matches!(generate_schema("", &sample()), Err(DeployError::SchemaError(_))));
    }
}
