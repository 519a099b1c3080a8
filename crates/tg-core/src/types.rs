//! Core type definitions for TabGuard
//!
//! These types model one trigger/action rule of the declarative content
//! blocker format and are shared by the compiler, the runtime and the
//! reference evaluator.

// =============================================================================
// Resource Types (bit mask for trigger filtering)
// =============================================================================

bitflags::bitflags! {
    /// Resource type bit mask. An empty mask means "all resource types".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct ResourceType: u16 {
        const DOCUMENT = 1 << 0;
        const IMAGE = 1 << 1;
        const STYLE_SHEET = 1 << 2;
        const SCRIPT = 1 << 3;
        const FONT = 1 << 4;
        const RAW = 1 << 5;
        const SVG_DOCUMENT = 1 << 6;
        const MEDIA = 1 << 7;
        const POPUP = 1 << 8;
    }
}

/// Wire names in the order they are emitted.
const RESOURCE_TYPE_NAMES: [(ResourceType, &str); 9] = [
    (ResourceType::DOCUMENT, "document"),
    (ResourceType::IMAGE, "image"),
    (ResourceType::STYLE_SHEET, "style-sheet"),
    (ResourceType::SCRIPT, "script"),
    (ResourceType::FONT, "font"),
    (ResourceType::RAW, "raw"),
    (ResourceType::SVG_DOCUMENT, "svg-document"),
    (ResourceType::MEDIA, "media"),
    (ResourceType::POPUP, "popup"),
];

impl ResourceType {
    /// Parse a single wire name (`"style-sheet"`, `"script"`, ...).
    pub fn from_wire_name(name: &str) -> Option<Self> {
        RESOURCE_TYPE_NAMES
            .iter()
            .find(|(_, wire)| *wire == name)
            .map(|(ty, _)| *ty)
    }

    /// Parse a filter-list modifier (`$script`, `$stylesheet`, ...).
    pub fn from_modifier(name: &str) -> Option<Self> {
        match name {
            "script" => Some(Self::SCRIPT),
            "image" => Some(Self::IMAGE),
            "stylesheet" => Some(Self::STYLE_SHEET),
            "document" => Some(Self::DOCUMENT),
            _ => None,
        }
    }

    /// Wire names for every set bit, in canonical order.
    pub fn wire_names(self) -> Vec<&'static str> {
        RESOURCE_TYPE_NAMES
            .iter()
            .filter(|(ty, _)| self.contains(*ty))
            .map(|(_, wire)| *wire)
            .collect()
    }

    /// Whether a request of type `request` is covered by this mask.
    #[inline]
    pub fn covers(self, request: ResourceType) -> bool {
        self.is_empty() || self.intersects(request)
    }
}

// =============================================================================
// Rules
// =============================================================================

/// Trigger half of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Trigger {
    /// Regular expression matched against the request URL
    pub url_pattern: String,
    /// Resource types the rule applies to (empty = all)
    pub resource_types: ResourceType,
    /// Page domains the rule is limited to
    pub if_domains: Option<Vec<String>>,
    /// Page domains the rule never applies on
    pub unless_domains: Option<Vec<String>>,
}

impl Trigger {
    pub fn url(pattern: impl Into<String>) -> Self {
        Self {
            url_pattern: pattern.into(),
            resource_types: ResourceType::empty(),
            if_domains: None,
            unless_domains: None,
        }
    }
}

/// Action half of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    /// Cancel the request
    Block,
    /// Hide elements matching the selector
    CssHide { selector: String },
    /// Drop every earlier matching action for this request
    IgnorePreviousRules,
    /// Upgrade the request to https
    MakeHttps,
}

impl Action {
    pub fn wire_type(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::CssHide { .. } => "css-display-none",
            Self::IgnorePreviousRules => "ignore-previous-rules",
            Self::MakeHttps => "make-https",
        }
    }
}

/// One trigger + action pair. Rule collections are ordered; later
/// `IgnorePreviousRules` rules suppress earlier matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    pub trigger: Trigger,
    pub action: Action,
}

impl Rule {
    pub fn block(trigger: Trigger) -> Self {
        Self { trigger, action: Action::Block }
    }

    pub fn css_hide(trigger: Trigger, selector: impl Into<String>) -> Self {
        Self {
            trigger,
            action: Action::CssHide { selector: selector.into() },
        }
    }

    pub fn exception(trigger: Trigger) -> Self {
        Self { trigger, action: Action::IgnorePreviousRules }
    }

    /// Exception rules are the ones that must be duplicated into every shard.
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.action == Action::IgnorePreviousRules
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// A request handed to the reference evaluator.
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    /// Full request URL
    pub url: &'a str,
    /// Host of the page that issued the request
    pub page_host: &'a str,
    /// Request type
    pub resource_type: ResourceType,
}

/// Final decision for an evaluated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDecision {
    Allow,
    Block,
}

/// Result of evaluating a request against an ordered rule collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub decision: MatchDecision,
    /// Index of the last rule that changed the outcome, if any
    pub rule_index: Option<usize>,
    /// Selectors still in effect after exceptions were applied
    pub hidden_selectors: Vec<String>,
    pub upgrade_https: bool,
}

impl Default for MatchResult {
    fn default() -> Self {
        Self {
            decision: MatchDecision::Allow,
            rule_index: None,
            hidden_selectors: Vec::new(),
            upgrade_https: false,
        }
    }
}
