use serde::{Deserialize, Serialize};

/// Validated caller context for one turn. Authentication happens upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    /// Property / hotel identifier the conversation belongs to.
    pub tenant_id: String,
    /// Whether the caller may invoke elevated-tier tools.
    pub is_elevated: bool,
    /// Network address of the caller, when known (used for per-caller limits).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_address: Option<String>,
}

impl TenantContext {
    pub fn standard(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            is_elevated: false,
            caller_address: None,
        }
    }

    pub fn elevated(tenant_id: impl Into<String>) -> Self {
        Self {
            is_elevated: true,
            ..Self::standard(tenant_id)
        }
    }

    pub fn with_caller_address(mut self, address: impl Into<String>) -> Self {
        self.caller_address = Some(address.into());
        self
    }
}
