//! Allowlisted tool catalog.
//!
//! The catalog is plain data: built-in hospitality defaults, or a TOML file of
//! `[[tools]]` tables with the same shape. It is immutable once loaded and is
//! shared with the admission gate behind an `Arc`.

use concierge_core::config::load_toml;
use concierge_core::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

use crate::tool::ToolDefinition;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeTier {
    #[default]
    Standard,
    Elevated,
}

/// How a present parameter value is checked before dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// Any JSON value, passed through untouched.
    #[default]
    Any,
    Text,
    Phone,
    Email,
    IsoDate,
    Integer,
    /// A string of at least `min_len` characters.
    Secret,
    Array,
    Object,
}

impl ParamKind {
    fn schema(&self) -> Value {
        match self {
            ParamKind::Any => json!({}),
            ParamKind::Text | ParamKind::Phone | ParamKind::Secret => json!({ "type": "string" }),
            ParamKind::Email => json!({ "type": "string", "format": "email" }),
            ParamKind::IsoDate => json!({ "type": "string", "format": "date" }),
            ParamKind::Integer => json!({ "type": "integer" }),
            ParamKind::Array => json!({ "type": "array" }),
            ParamKind::Object => json!({ "type": "object" }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub kind: ParamKind,
    /// Minimum character length (`secret` and `text` kinds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_len: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            required: true,
            kind,
            min_len: None,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    pub fn with_min_len(mut self, min_len: usize) -> Self {
        self.min_len = Some(min_len);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Cross-field validation that a single parameter kind cannot express.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum StructuralRule {
    /// `param` is an array of objects, each carrying every name in `fields`;
    /// when `date_field` is set, that field must be a `YYYY-MM-DD` date.
    RecordArray {
        param: String,
        fields: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        date_field: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    pub max_per_minute: u32,
    #[serde(default)]
    pub tier: PrivilegeTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structural: Option<StructuralRule>,
    #[serde(default)]
    pub disabled: bool,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, max_per_minute: u32) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            max_per_minute,
            tier: PrivilegeTier::Standard,
            structural: None,
            disabled: false,
        }
    }

    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn elevated(mut self) -> Self {
        self.tier = PrivilegeTier::Elevated;
        self
    }

    pub fn with_structural(mut self, rule: StructuralRule) -> Self {
        self.structural = Some(rule);
        self
    }

    pub fn required_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| p.required)
    }

    /// Backend-facing definition with a JSON Schema object for the input.
    pub fn definition(&self) -> ToolDefinition {
        let mut properties = Map::new();
        for param in &self.params {
            let mut schema = param.kind.schema();
            if let Some(StructuralRule::RecordArray { param: target, fields, .. }) = &self.structural {
                if target == &param.name {
                    schema = json!({
                        "type": "array",
                        "items": { "type": "object", "required": fields },
                    });
                }
            }
            if let (Some(desc), Value::Object(obj)) = (&param.description, &mut schema) {
                obj.insert("description".to_string(), Value::String(desc.clone()));
            }
            properties.insert(param.name.clone(), schema);
        }
        let required: Vec<&str> = self.required_params().map(|p| p.name.as_str()).collect();

        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("duplicate tool name in catalog: {0}")]
    DuplicateName(String),
    #[error("tool '{0}' has a zero per-minute ceiling")]
    ZeroCeiling(String),
    #[error("tool '{tool}' structural rule targets unknown parameter '{param}'")]
    UnknownRuleTarget { tool: String, param: String },
    #[error("failed to parse catalog: {0}")]
    Parse(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Clone)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    /// Build a catalog, rejecting duplicate names and zero ceilings.
    pub fn new(tools: Vec<ToolDescriptor>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(tools.len());
        for (i, tool) in tools.iter().enumerate() {
            if tool.max_per_minute == 0 {
                return Err(CatalogError::ZeroCeiling(tool.name.clone()));
            }
            if let Some(StructuralRule::RecordArray { param, .. }) = &tool.structural {
                if !tool.params.iter().any(|p| &p.name == param) {
                    return Err(CatalogError::UnknownRuleTarget {
                        tool: tool.name.clone(),
                        param: param.clone(),
                    });
                }
            }
            if index.insert(tool.name.clone(), i).is_some() {
                return Err(CatalogError::DuplicateName(tool.name.clone()));
            }
        }
        Ok(Self { tools, index })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(raw).map_err(|e| CatalogError::Parse(e.to_string()))?;
        Self::new(file.tools)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let file: CatalogFile = load_toml(path)?;
        Self::new(file.tools)
    }

    /// Mark the named tools disabled. Unknown names are logged and ignored.
    pub fn with_disabled(mut self, names: &[String]) -> Self {
        for name in names {
            match self.index.get(name) {
                Some(&i) => self.tools[i].disabled = true,
                None => warn!(tool = %name, "cannot disable tool missing from catalog"),
            }
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions offered to the backend. Disabled tools are withheld.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|t| !t.disabled)
            .map(ToolDescriptor::definition)
            .collect()
    }

    /// The property-management tool set served by the hotel MCP server.
    pub fn hospitality() -> Self {
        use ParamKind::*;

        let tools = vec![
            // Property & rooms
            ToolDescriptor::new("get_property_settings", "Get property settings", 20)
                .with_param(ParamSpec::optional("api_lng", Text))
                .with_param(ParamSpec::optional("names", Any)),
            ToolDescriptor::new("get_rooms_details", "Get room details", 20)
                .with_param(ParamSpec::optional("api_lng", Text))
                .with_param(ParamSpec::optional("room_id", Any)),
            // Availability
            ToolDescriptor::new("get_availability", "Get availability for a date range", 20)
                .with_param(ParamSpec::required("date_from", IsoDate))
                .with_param(ParamSpec::required("date_to", Any))
                .with_param(ParamSpec::required("sysres", Any)),
            ToolDescriptor::new("update_availability", "Update room availability", 10)
                .with_param(ParamSpec::required("values", Any))
                .with_structural(StructuralRule::RecordArray {
                    param: "values".to_string(),
                    fields: ["date", "room_id", "avail", "qty", "is_opened"]
                        .map(String::from)
                        .to_vec(),
                    date_field: Some("date".to_string()),
                })
                .elevated(),
            // Bookings
            ToolDescriptor::new("get_bookings", "List all bookings", 15),
            ToolDescriptor::new("get_booking_offers", "Get booking offers", 20)
                .with_param(ParamSpec::required("date_from", IsoDate))
                .with_param(ParamSpec::required("nights", Any))
                .with_param(ParamSpec::optional("bm_code", Any))
                .with_param(ParamSpec::optional("api_lng", Text))
                .with_param(ParamSpec::optional("guests", Any))
                .with_param(ParamSpec::optional("currency", Text)),
            ToolDescriptor::new("ack_booking", "Acknowledge a booking", 10)
                .with_param(ParamSpec::required("booking_id", Any))
                .with_param(ParamSpec::required("revision_id", Any)),
            ToolDescriptor::new("post_room_assignment", "Assign a room to a booking", 10)
                .with_param(ParamSpec::required("booking_id", Any))
                .with_param(ParamSpec::required("revision_id", Any)),
            // External data
            ToolDescriptor::new("post_external_property_data", "Send external property data", 5)
                .with_param(ParamSpec::required("data", Any))
                .elevated(),
            // API key management
            ToolDescriptor::new("set_quendoo_api_key", "Set the property API key", 5)
                .with_param(ParamSpec::required("api_key", Secret).with_min_len(10))
                .elevated(),
            ToolDescriptor::new("get_quendoo_api_key_status", "Check API key status", 10),
            ToolDescriptor::new("cleanup_quendoo_api_key", "Remove the cached API key", 5).elevated(),
            // Communication
            ToolDescriptor::new("make_call", "Place a voice call", 3)
                .with_param(ParamSpec::required("phone", Phone))
                .with_param(ParamSpec::required("message", Text))
                .elevated(),
            ToolDescriptor::new("send_quendoo_email", "Send an email", 5)
                .with_param(ParamSpec::required("to", Email))
                .with_param(ParamSpec::required("subject", Text))
                .with_param(ParamSpec::required("message", Text)),
        ];

        let index = tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();
        Self { tools, index }
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::hospitality()
    }
}
