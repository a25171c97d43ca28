//! Tool admission gate.
//!
//! Every tool call the backend requests passes through [`AdmissionGate::validate`]
//! before it may reach an executor. Checks run in a fixed order and stop at the
//! first failure: catalog, disabled, privilege, required parameters, rate
//! limit, then value shapes and structural rules.

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info};

use crate::catalog::{ParamKind, ParamSpec, PrivilegeTier, StructuralRule, ToolCatalog, ToolDescriptor};
use crate::rate_limit::{tool_key, RateDecision, RateLimitError, RateLimitStore, ONE_MINUTE};

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+\d\s\-()]{7,}$").expect("phone pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allow,
    Deny(DenyReason),
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmissionDecision::Allow)
    }

    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            AdmissionDecision::Allow => None,
            AdmissionDecision::Deny(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    UnknownTool { tool: String },
    ToolDisabled { tool: String },
    InsufficientPrivilege { tool: String },
    MissingParameter { field: String },
    RateLimited { tool: String, retry_after: Duration },
    InvalidParameter { field: String, reason: String },
}

impl DenyReason {
    /// Stable machine-readable code, e.g. `missing_parameter:phone`.
    pub fn code(&self) -> String {
        match self {
            DenyReason::UnknownTool { .. } => "unknown_tool".to_string(),
            DenyReason::ToolDisabled { .. } => "tool_disabled".to_string(),
            DenyReason::InsufficientPrivilege { .. } => "insufficient_privilege".to_string(),
            DenyReason::MissingParameter { field } => format!("missing_parameter:{field}"),
            DenyReason::RateLimited { .. } => "rate_limited".to_string(),
            DenyReason::InvalidParameter { field, .. } => format!("invalid_parameter:{field}"),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, DenyReason::RateLimited { .. })
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::UnknownTool { tool } => write!(f, "Tool '{tool}' is not in approved tool list"),
            DenyReason::ToolDisabled { tool } => write!(f, "Tool '{tool}' is currently disabled"),
            DenyReason::InsufficientPrivilege { tool } => {
                write!(f, "Tool '{tool}' requires elevated privileges")
            }
            DenyReason::MissingParameter { field } => write!(f, "Missing required parameter: {field}"),
            DenyReason::RateLimited { tool, .. } => write!(f, "Rate limit exceeded for tool: {tool}"),
            DenyReason::InvalidParameter { field, reason } => {
                write!(f, "Invalid parameter '{field}': {reason}")
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error(transparent)]
    Store(#[from] RateLimitError),
}

#[derive(Debug, Default)]
pub struct GateStats {
    total_validations: AtomicU64,
    allowed: AtomicU64,
    blocked_unknown: AtomicU64,
    blocked_rate_limit: AtomicU64,
    blocked_invalid_args: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GateStatsSnapshot {
    pub total_validations: u64,
    pub allowed: u64,
    pub blocked_unknown: u64,
    pub blocked_rate_limit: u64,
    pub blocked_invalid_args: u64,
}

impl GateStats {
    fn record(&self, decision: &AdmissionDecision) {
        self.total_validations.fetch_add(1, Ordering::Relaxed);
        let counter = match decision {
            AdmissionDecision::Allow => &self.allowed,
            AdmissionDecision::Deny(
                DenyReason::UnknownTool { .. }
                | DenyReason::ToolDisabled { .. }
                | DenyReason::InsufficientPrivilege { .. },
            ) => &self.blocked_unknown,
            AdmissionDecision::Deny(DenyReason::RateLimited { .. }) => &self.blocked_rate_limit,
            AdmissionDecision::Deny(
                DenyReason::MissingParameter { .. } | DenyReason::InvalidParameter { .. },
            ) => &self.blocked_invalid_args,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GateStatsSnapshot {
        GateStatsSnapshot {
            total_validations: self.total_validations.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            blocked_unknown: self.blocked_unknown.load(Ordering::Relaxed),
            blocked_rate_limit: self.blocked_rate_limit.load(Ordering::Relaxed),
            blocked_invalid_args: self.blocked_invalid_args.load(Ordering::Relaxed),
        }
    }
}

pub struct AdmissionGate {
    catalog: Arc<ToolCatalog>,
    store: Arc<dyn RateLimitStore>,
    stats: GateStats,
}

impl AdmissionGate {
    pub fn new(catalog: Arc<ToolCatalog>, store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            catalog,
            store,
            stats: GateStats::default(),
        }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn stats(&self) -> GateStatsSnapshot {
        self.stats.snapshot()
    }

    /// Decide whether one requested call may run. Only a rate-limit store
    /// failure is an error; every policy outcome is a decision.
    pub fn validate(
        &self,
        tool_name: &str,
        args: &Value,
        is_elevated: bool,
    ) -> Result<AdmissionDecision, GateError> {
        let decision = self.decide(tool_name, args, is_elevated)?;
        self.stats.record(&decision);
        match &decision {
            AdmissionDecision::Allow => debug!(tool = %tool_name, "tool call admitted"),
            AdmissionDecision::Deny(reason) => {
                info!(tool = %tool_name, reason = %reason.code(), "tool call denied")
            }
        }
        Ok(decision)
    }

    fn decide(&self, tool_name: &str, args: &Value, is_elevated: bool) -> Result<AdmissionDecision, GateError> {
        let tool = match self.catalog.get(tool_name) {
            Some(tool) => tool,
            None => {
                return Ok(AdmissionDecision::Deny(DenyReason::UnknownTool {
                    tool: tool_name.to_string(),
                }))
            }
        };

        if tool.disabled {
            return Ok(AdmissionDecision::Deny(DenyReason::ToolDisabled {
                tool: tool.name.clone(),
            }));
        }

        if tool.tier == PrivilegeTier::Elevated && !is_elevated {
            return Ok(AdmissionDecision::Deny(DenyReason::InsufficientPrivilege {
                tool: tool.name.clone(),
            }));
        }

        for param in tool.required_params() {
            if present(args, &param.name).is_none() {
                return Ok(AdmissionDecision::Deny(DenyReason::MissingParameter {
                    field: param.name.clone(),
                }));
            }
        }

        if let RateDecision::Limited { retry_after } =
            self.store.check(&tool_key(&tool.name), tool.max_per_minute, ONE_MINUTE)?
        {
            return Ok(AdmissionDecision::Deny(DenyReason::RateLimited {
                tool: tool.name.clone(),
                retry_after,
            }));
        }

        if let Err((field, reason)) = check_values(tool, args) {
            return Ok(AdmissionDecision::Deny(DenyReason::InvalidParameter { field, reason }));
        }

        Ok(AdmissionDecision::Allow)
    }
}

/// A parameter counts as present when it exists and is not JSON null.
fn present<'a>(args: &'a Value, name: &str) -> Option<&'a Value> {
    args.get(name).filter(|v| !v.is_null())
}

fn check_values(tool: &ToolDescriptor, args: &Value) -> Result<(), (String, String)> {
    for param in &tool.params {
        if let Some(value) = present(args, &param.name) {
            check_kind(param, value).map_err(|reason| (param.name.clone(), reason))?;
        }
    }

    match &tool.structural {
        Some(StructuralRule::RecordArray { param, fields, date_field }) => match present(args, param) {
            Some(value) => check_record_array(value, fields, date_field.as_deref())
                .map_err(|reason| (param.clone(), reason)),
            None => Ok(()),
        },
        None => Ok(()),
    }
}

fn check_kind(param: &ParamSpec, value: &Value) -> Result<(), String> {
    let as_str = || value.as_str().ok_or_else(|| "must be a string".to_string());

    match param.kind {
        ParamKind::Any => Ok(()),
        ParamKind::Text | ParamKind::Secret => {
            let s = as_str()?;
            match param.min_len {
                Some(min) if s.chars().count() < min => {
                    Err(format!("must be at least {min} characters"))
                }
                _ => Ok(()),
            }
        }
        ParamKind::Phone => {
            if PHONE_RE.is_match(as_str()?) {
                Ok(())
            } else {
                Err("must be a phone number".to_string())
            }
        }
        ParamKind::Email => {
            if is_email(as_str()?) {
                Ok(())
            } else {
                Err("must be an email address".to_string())
            }
        }
        ParamKind::IsoDate => {
            if is_iso_date(as_str()?) {
                Ok(())
            } else {
                Err("Date must be in YYYY-MM-DD format".to_string())
            }
        }
        ParamKind::Integer => {
            if value.is_i64() || value.is_u64() {
                Ok(())
            } else {
                Err("must be an integer".to_string())
            }
        }
        ParamKind::Array if !value.is_array() => Err("must be an array".to_string()),
        ParamKind::Object if !value.is_object() => Err("must be an object".to_string()),
        ParamKind::Array | ParamKind::Object => Ok(()),
    }
}

fn check_record_array(value: &Value, fields: &[String], date_field: Option<&str>) -> Result<(), String> {
    let items = value.as_array().ok_or_else(|| "must be an array".to_string())?;
    for item in items {
        let record = item
            .as_object()
            .ok_or_else(|| "every element must be an object".to_string())?;
        if let Some(missing) = fields.iter().find(|f| !record.contains_key(f.as_str())) {
            return Err(format!("Missing required field '{missing}' in array element"));
        }
        if let Some(date_field) = date_field {
            let valid = record
                .get(date_field)
                .and_then(Value::as_str)
                .is_some_and(is_iso_date);
            if !valid {
                return Err("Date must be in YYYY-MM-DD format".to_string());
            }
        }
    }
    Ok(())
}

/// `YYYY-MM-DD` with zero-padded fields naming a real calendar day.
pub fn is_iso_date(s: &str) -> bool {
    let b = s.as_bytes();
    let shaped = b.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && b.iter()
            .enumerate()
            .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit());
    shaped && NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// One `@`, a non-empty local part, a dotted domain, no whitespace.
pub fn is_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = s.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        _ => false,
    }
}
