//! Artifact JSON schema
//!
//! This is the wire contract with the host content-blocking engine:
//!
//! ```json
//! [{"trigger": {"url-filter": "...", "resource-type": ["script"],
//!               "if-domain": ["*example.com"], "unless-domain": ["..."]},
//!   "action": {"type": "css-display-none", "selector": ".ad"}}]
//! ```
//!
//! Optional keys are omitted rather than emitted as `null`. Field order is
//! fixed by the struct declarations below, so equal rule collections always
//! serialize to identical bytes.

use serde::{Deserialize, Serialize};

use crate::types::{Action, ResourceType, Rule, Trigger};

/// Error type for artifact (de)serialization.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Malformed artifact JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unknown action type: {0}")]
    UnknownAction(String),
    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),
    #[error("css-display-none action without selector")]
    MissingSelector,
    #[error("Empty url-filter in rule {0}")]
    EmptyUrlFilter(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRule {
    pub trigger: WireTrigger,
    pub action: WireAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTrigger {
    #[serde(rename = "url-filter")]
    pub url_filter: String,
    #[serde(rename = "resource-type", default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<Vec<String>>,
    #[serde(rename = "if-domain", default, skip_serializing_if = "Option::is_none")]
    pub if_domain: Option<Vec<String>>,
    #[serde(rename = "unless-domain", default, skip_serializing_if = "Option::is_none")]
    pub unless_domain: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

impl From<&Rule> for WireRule {
    fn from(rule: &Rule) -> Self {
        let resource_type = if rule.trigger.resource_types.is_empty() {
            None
        } else {
            Some(
                rule.trigger
                    .resource_types
                    .wire_names()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            )
        };

        let selector = match &rule.action {
            Action::CssHide { selector } => Some(selector.clone()),
            _ => None,
        };

        Self {
            trigger: WireTrigger {
                url_filter: rule.trigger.url_pattern.clone(),
                resource_type,
                if_domain: rule.trigger.if_domains.clone(),
                unless_domain: rule.trigger.unless_domains.clone(),
            },
            action: WireAction {
                kind: rule.action.wire_type().to_string(),
                selector,
            },
        }
    }
}

impl TryFrom<WireRule> for Rule {
    type Error = SchemaError;

    fn try_from(wire: WireRule) -> Result<Self, Self::Error> {
        let mut resource_types = ResourceType::empty();
        for name in wire.trigger.resource_type.unwrap_or_default() {
            resource_types |= ResourceType::from_wire_name(&name)
                .ok_or(SchemaError::UnknownResourceType(name))?;
        }

        let action = match wire.action.kind.as_str() {
            "block" => Action::Block,
            "css-display-none" => Action::CssHide {
                selector: wire.action.selector.ok_or(SchemaError::MissingSelector)?,
            },
            "ignore-previous-rules" => Action::IgnorePreviousRules,
            "make-https" => Action::MakeHttps,
            other => return Err(SchemaError::UnknownAction(other.to_string())),
        };

        Ok(Rule {
            trigger: Trigger {
                url_pattern: wire.trigger.url_filter,
                resource_types,
                if_domains: wire.trigger.if_domain,
                unless_domains: wire.trigger.unless_domain,
            },
            action,
        })
    }
}

/// Serialize an ordered rule collection into the artifact payload.
pub fn rules_to_json(rules: &[Rule]) -> Result<String, SchemaError> {
    let wire: Vec<WireRule> = rules.iter().map(WireRule::from).collect();
    Ok(serde_json::to_string(&wire)?)
}

/// Parse an artifact payload back into rules, validating action and
/// resource-type names.
pub fn rules_from_json(json: &str) -> Result<Vec<Rule>, SchemaError> {
    let wire: Vec<WireRule> = serde_json::from_str(json)?;
    wire.into_iter()
        .enumerate()
        .map(|(index, rule)| {
            if rule.trigger.url_filter.is_empty() {
                return Err(SchemaError::EmptyUrlFilter(index));
            }
            Rule::try_from(rule)
        })
        .collect()
}
