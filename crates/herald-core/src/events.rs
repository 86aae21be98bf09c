//! Domain events that can be turned into chat notifications.
//!
//! Events describe what happened in the wave pipeline: stories moving
//! through validation gates, agents starting and exiting, budget and safety
//! alerts. Each known kind is a typed variant of [`EventKind`]; anything the
//! portal emits that this version does not know about is preserved as
//! [`EventKind::Other`] so it still reaches the generic renderer.
//!
//! # Wire shape
//!
//! ```text
//! {
//!   "kind": "story_started",
//!   "severity": "info",                  // optional, defaults to info
//!   "conversation_key": "STORY-12",      // optional
//!   "channel_hint": "budget",            // optional
//!   "fields": { "story_id": "STORY-12", "title": "Add login" }
//! }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{CoreError, Result};

/// Version of the event kind set understood by this build.
pub const EVENT_SCHEMA_VERSION: u32 = 1;

/// Names of every typed event kind, in declaration order.
pub const EVENT_KINDS: &[&str] = &[
    "wave_started",
    "wave_completed",
    "story_started",
    "story_progress",
    "gate_transition",
    "story_completed",
    "story_failed",
    "agent_spawned",
    "agent_exited",
    "budget_alert",
    "safety_violation",
    "escalation",
];

/// Older tags the portal still emits, mapped to their current names.
pub const KIND_ALIASES: &[(&str, &str)] =
    &[("story_start", "story_started"), ("story_complete", "story_completed")];

/// Current name for a kind tag, resolving [`KIND_ALIASES`].
pub fn canonical_kind(kind: &str) -> &str {
    KIND_ALIASES
        .iter()
        .find_map(|(alias, name)| (*alias == kind).then_some(*name))
        .unwrap_or(kind)
}

/// How urgent an event is.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Routine progress.
    #[default]
    Info,
    /// Something needs attention soon.
    Warning,
    /// Something is broken right now.
    Critical,
}

impl Severity {
    /// Emoji prefix used in rendered text.
    pub fn icon(self) -> &'static str {
        match self {
            Self::Info => ":information_source:",
            Self::Warning => ":warning:",
            Self::Critical => ":rotating_light:",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Logical destination of a message. Transports map roles to concrete
/// channel IDs or webhook URLs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    /// General progress feed.
    #[default]
    Default,
    /// Failures, safety violations and anything critical.
    Alerts,
    /// Spend tracking.
    Budget,
}

impl ChannelRole {
    /// Channel a severity maps to when a summary is posted outside a thread.
    pub fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Info => Self::Default,
            Severity::Warning | Severity::Critical => Self::Alerts,
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Alerts => write!(f, "alerts"),
            Self::Budget => write!(f, "budget"),
        }
    }
}

/// Outcome reported by a validation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    /// Gate started evaluating.
    Running,
    /// Gate passed.
    Passed,
    /// Gate rejected the change.
    Failed,
    /// Gate was skipped.
    Skipped,
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Whether an event closes out its conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    /// The story finished; its thread is released after the final reply.
    Completed,
    /// The story failed; the thread stays open for a retry wave.
    Failed,
}

/// What happened. One variant per known event kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "fields", rename_all = "snake_case")]
pub enum EventKind {
    /// A wave of stories was dispatched to agents.
    WaveStarted {
        /// Wave identifier.
        wave_id: String,
        /// Number of stories in the wave.
        story_count: u32,
    },
    /// Every story in a wave reached a final state.
    WaveCompleted {
        /// Wave identifier.
        wave_id: String,
        /// Stories that passed all gates.
        passed: u32,
        /// Stories that failed.
        failed: u32,
    },
    /// An agent picked up a story.
    #[serde(alias = "story_start")]
    StoryStarted {
        /// Story identifier.
        story_id: String,
        /// Story title.
        title: String,
        /// Agent working on the story.
        #[serde(default)]
        agent: Option<String>,
    },
    /// Free-form progress line for a story.
    StoryProgress {
        /// Story identifier.
        story_id: String,
        /// Progress message.
        message: String,
    },
    /// A validation gate changed state for a story.
    GateTransition {
        /// Story identifier.
        story_id: String,
        /// Gate name.
        gate: String,
        /// New gate status.
        status: GateStatus,
        /// Extra detail from the gate.
        #[serde(default)]
        detail: Option<String>,
    },
    /// A story passed every gate.
    #[serde(alias = "story_complete")]
    StoryCompleted {
        /// Story identifier.
        story_id: String,
        /// Closing summary.
        #[serde(default)]
        summary: Option<String>,
        /// Pull request opened for the story.
        #[serde(default)]
        pr_url: Option<String>,
    },
    /// A story was abandoned.
    StoryFailed {
        /// Story identifier.
        story_id: String,
        /// Why it failed.
        reason: String,
        /// Gate that rejected it.
        #[serde(default)]
        gate: Option<String>,
    },
    /// An agent process was spawned.
    AgentSpawned {
        /// Agent identifier.
        agent_id: String,
        /// Story the agent works on.
        #[serde(default)]
        story_id: Option<String>,
    },
    /// An agent process exited.
    AgentExited {
        /// Agent identifier.
        agent_id: String,
        /// Story the agent worked on.
        #[serde(default)]
        story_id: Option<String>,
        /// Process exit code.
        #[serde(default)]
        exit_code: Option<i32>,
    },
    /// Spend crossed a threshold.
    BudgetAlert {
        /// What the budget covers (wave, story, day).
        scope: String,
        /// Amount spent so far.
        spent_usd: f64,
        /// Configured limit.
        limit_usd: f64,
    },
    /// An agent tripped a safety rule.
    SafetyViolation {
        /// Offending agent.
        agent_id: String,
        /// Rule that was violated.
        rule: String,
        /// What the agent attempted.
        detail: String,
        /// Story the agent was working on.
        #[serde(default)]
        story_id: Option<String>,
    },
    /// A human needs to step in.
    Escalation {
        /// Story identifier.
        story_id: String,
        /// Why a human is needed.
        reason: String,
    },
    /// A kind this build does not know. Rendered generically.
    #[serde(skip)]
    Other {
        /// Kind tag as received.
        kind: String,
        /// Raw fields.
        fields: Map<String, Value>,
    },
}

impl EventKind {
    /// Kind tag, e.g. `story_started`.
    pub fn name(&self) -> &str {
        match self {
            Self::WaveStarted { .. } => "wave_started",
            Self::WaveCompleted { .. } => "wave_completed",
            Self::StoryStarted { .. } => "story_started",
            Self::StoryProgress { .. } => "story_progress",
            Self::GateTransition { .. } => "gate_transition",
            Self::StoryCompleted { .. } => "story_completed",
            Self::StoryFailed { .. } => "story_failed",
            Self::AgentSpawned { .. } => "agent_spawned",
            Self::AgentExited { .. } => "agent_exited",
            Self::BudgetAlert { .. } => "budget_alert",
            Self::SafetyViolation { .. } => "safety_violation",
            Self::Escalation { .. } => "escalation",
            Self::Other { kind, .. } => kind.as_str(),
        }
    }

    /// Channel a kind is posted to when neither a hint nor severity says
    /// otherwise.
    ///
    /// Decided by the kind tag, so a known kind that arrived as
    /// [`EventKind::Other`] routes like its typed form.
    pub fn default_channel(&self) -> ChannelRole {
        match self.name() {
            "budget_alert" => ChannelRole::Budget,
            "safety_violation" | "escalation" | "story_failed" => ChannelRole::Alerts,
            _ => ChannelRole::Default,
        }
    }

    /// Whether this kind ends its conversation. Decided by the kind tag.
    pub fn terminal(&self) -> Option<Terminal> {
        match self.name() {
            "story_completed" => Some(Terminal::Completed),
            "story_failed" => Some(Terminal::Failed),
            _ => None,
        }
    }

    /// Builds a kind from its tag and fields.
    ///
    /// Aliased tags are resolved first. Known tags whose fields do not
    /// match the typed shape are kept as [`EventKind::Other`] rather than
    /// rejected.
    pub fn from_parts(kind: &str, fields: Map<String, Value>) -> Self {
        let kind = canonical_kind(kind);
        if EVENT_KINDS.contains(&kind) {
            let tagged = json!({ "kind": kind, "fields": Value::Object(fields.clone()) });
            if let Ok(parsed) = serde_json::from_value::<Self>(tagged) {
                return parsed;
            }
        }
        Self::Other { kind: kind.to_string(), fields }
    }

    /// Fields as a JSON object.
    pub fn fields(&self) -> Map<String, Value> {
        if let Self::Other { fields, .. } = self {
            return fields.clone();
        }
        match serde_json::to_value(self) {
            Ok(Value::Object(mut tagged)) => match tagged.remove("fields") {
                Some(Value::Object(fields)) => fields,
                _ => Map::new(),
            },
            _ => Map::new(),
        }
    }
}

/// A domain event submitted for notification. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    kind: EventKind,
    severity: Severity,
    conversation_key: Option<String>,
    channel_hint: Option<ChannelRole>,
}

impl Event {
    /// Creates an info-level event with no conversation.
    pub fn new(kind: EventKind) -> Self {
        Self { kind, severity: Severity::Info, conversation_key: None, channel_hint: None }
    }

    /// Sets the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Groups the event into the conversation identified by `key`.
    #[must_use]
    pub fn in_conversation(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.conversation_key = if key.trim().is_empty() { None } else { Some(key) };
        self
    }

    /// Overrides the kind's default channel.
    #[must_use]
    pub fn with_channel_hint(mut self, role: ChannelRole) -> Self {
        self.channel_hint = Some(role);
        self
    }

    /// What happened.
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// How urgent it is.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Conversation this event belongs to, if any.
    pub fn conversation_key(&self) -> Option<&str> {
        self.conversation_key.as_deref()
    }

    /// Caller-supplied channel preference.
    pub fn channel_hint(&self) -> Option<ChannelRole> {
        self.channel_hint
    }

    /// Channel this event is routed to.
    ///
    /// Critical events always go to alerts. Otherwise the hint wins over
    /// the kind's default.
    pub fn channel(&self) -> ChannelRole {
        if self.severity == Severity::Critical {
            return ChannelRole::Alerts;
        }
        self.channel_hint.unwrap_or_else(|| self.kind.default_channel())
    }

    /// Parses the wire shape documented at module level.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object =
            value.as_object().ok_or_else(|| CoreError::invalid("event must be an object"))?;

        let kind = object
            .get("kind")
            .and_then(Value::as_str)
            .filter(|kind| !kind.trim().is_empty())
            .ok_or_else(|| CoreError::invalid("event is missing a `kind` string"))?;

        let fields = match object.get("fields") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(fields)) => fields.clone(),
            Some(_) => return Err(CoreError::invalid("`fields` must be an object")),
        };

        let severity = match object.get("severity") {
            None | Some(Value::Null) => Severity::Info,
            Some(raw) => serde_json::from_value(raw.clone())?,
        };

        let channel_hint = match object.get("channel_hint") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(serde_json::from_value(raw.clone())?),
        };

        let mut event = Self::new(EventKind::from_parts(kind, fields)).with_severity(severity);
        event.channel_hint = channel_hint;
        if let Some(key) = object.get("conversation_key").and_then(Value::as_str) {
            event = event.in_conversation(key);
        }
        Ok(event)
    }

    /// Serializes to the wire shape documented at module level.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("kind".into(), json!(self.kind.name()));
        object.insert("severity".into(), json!(self.severity));
        if let Some(key) = &self.conversation_key {
            object.insert("conversation_key".into(), json!(key));
        }
        if let Some(hint) = self.channel_hint {
            object.insert("channel_hint".into(), json!(hint));
        }
        object.insert("fields".into(), Value::Object(self.kind.fields()));
        Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story_started() -> EventKind {
        EventKind::StoryStarted {
            story_id: "STORY-12".into(),
            title: "Add login".into(),
            agent: Some("agent-1".into()),
        }
    }

    #[test]
    fn critical_overrides_kind_default_and_hint() {
        let event = Event::new(story_started())
            .with_channel_hint(ChannelRole::Budget)
            .with_severity(Severity::Critical);
        assert_eq!(event.kind().default_channel(), ChannelRole::Default);
        assert_eq!(event.channel(), ChannelRole::Alerts);
    }

    #[test]
    fn hint_overrides_kind_default() {
        let event = Event::new(story_started()).with_channel_hint(ChannelRole::Budget);
        assert_eq!(event.channel(), ChannelRole::Budget);

        let budget = Event::new(EventKind::BudgetAlert {
            scope: "wave-3".into(),
            spent_usd: 80.0,
            limit_usd: 100.0,
        });
        assert_eq!(budget.channel(), ChannelRole::Budget);
    }

    #[test]
    fn parses_known_kind() {
        let raw = json!({
            "kind": "story_started",
            "conversation_key": "STORY-12",
            "fields": { "story_id": "STORY-12", "title": "Add login" }
        });
        let event = Event::from_json(&raw).unwrap();
        assert_eq!(event.conversation_key(), Some("STORY-12"));
        assert_eq!(event.severity(), Severity::Info);
        assert!(matches!(event.kind(), EventKind::StoryStarted { agent: None, .. }));
    }

    #[test]
    fn unknown_kind_is_preserved() {
        let raw = json!({
            "kind": "deploy_preview_ready",
            "severity": "warning",
            "fields": { "url": "https://preview.example.com" }
        });
        let event = Event::from_json(&raw).unwrap();
        match event.kind() {
            EventKind::Other { kind, fields } => {
                assert_eq!(kind, "deploy_preview_ready");
                assert_eq!(fields["url"], "https://preview.example.com");
            },
            other => panic!("expected Other, got {other:?}"),
        }
        assert_eq!(event.severity(), Severity::Warning);
    }

    #[test]
    fn known_kind_with_wrong_fields_falls_back_to_other() {
        let raw = json!({ "kind": "story_started", "fields": { "story": 12 } });
        let event = Event::from_json(&raw).unwrap();
        assert_eq!(event.kind().name(), "story_started");
        assert!(matches!(event.kind(), EventKind::Other { .. }));
    }

    #[test]
    fn rejects_missing_kind() {
        assert!(Event::from_json(&json!({ "fields": {} })).is_err());
        assert!(Event::from_json(&json!("story_started")).is_err());
    }

    #[test]
    fn blank_conversation_key_is_ignored() {
        let event = Event::new(story_started()).in_conversation("  ");
        assert_eq!(event.conversation_key(), None);
    }

    #[test]
    fn json_shape_is_stable() {
        let event = Event::new(story_started()).in_conversation("STORY-12");
        let value = event.to_json();
        assert_eq!(value["kind"], "story_started");
        assert_eq!(value["fields"]["title"], "Add login");
        assert_eq!(Event::from_json(&value).unwrap(), event);
    }

    #[test]
    fn terminal_kinds() {
        let done = EventKind::StoryCompleted { story_id: "S".into(), summary: None, pr_url: None };
        let failed =
            EventKind::StoryFailed { story_id: "S".into(), reason: "lint".into(), gate: None };
        assert_eq!(done.terminal(), Some(Terminal::Completed));
        assert_eq!(failed.terminal(), Some(Terminal::Failed));
        assert_eq!(story_started().terminal(), None);
    }

    #[test]
    fn known_kinds_without_fields_keep_their_routing() {
        let done = Event::from_json(&json!({
            "kind": "story_completed",
            "conversation_key": "STORY-12",
        }))
        .unwrap();
        assert!(matches!(done.kind(), EventKind::Other { .. }));
        assert_eq!(done.kind().terminal(), Some(Terminal::Completed));

        let failed = Event::from_json(&json!({ "kind": "story_failed" })).unwrap();
        assert_eq!(failed.kind().terminal(), Some(Terminal::Failed));
        assert_eq!(failed.channel(), ChannelRole::Alerts);

        let budget = Event::from_json(&json!({ "kind": "budget_alert" })).unwrap();
        assert_eq!(budget.channel(), ChannelRole::Budget);
    }

    #[test]
    fn short_story_tags_are_aliases() {
        let started = Event::from_json(&json!({
            "kind": "story_start",
            "fields": { "story_id": "STORY-12", "title": "Add login" }
        }))
        .unwrap();
        assert!(matches!(started.kind(), EventKind::StoryStarted { .. }));

        let done = Event::from_json(&json!({ "kind": "story_complete" })).unwrap();
        assert_eq!(done.kind().name(), "story_completed");
        assert_eq!(done.kind().terminal(), Some(Terminal::Completed));

        assert_eq!(canonical_kind("story_progress"), "story_progress");
    }

    #[test]
    fn every_listed_kind_parses_to_a_typed_variant_name() {
        for kind in EVENT_KINDS {
            let parsed = EventKind::from_parts(kind, Map::new());
            assert_eq!(parsed.name(), *kind);
        }
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn critical_always_routes_to_alerts(
                kind in "[a-z_]{1,20}",
                hint in prop_oneof![
                    Just(None),
                    Just(Some(ChannelRole::Default)),
                    Just(Some(ChannelRole::Budget)),
                ],
            ) {
                let mut event = Event::new(EventKind::from_parts(&kind, Map::new()))
                    .with_severity(Severity::Critical);
                if let Some(hint) = hint {
                    event = event.with_channel_hint(hint);
                }
                prop_assert_eq!(event.channel(), ChannelRole::Alerts);
            }

            #[test]
            fn unknown_kinds_keep_their_name_and_fields(
                kind in "x_[a-z]{1,12}",
                value in any::<i64>(),
            ) {
                let raw = json!({ "kind": kind, "fields": { "n": value } });
                let event = Event::from_json(&raw).unwrap();
                prop_assert_eq!(event.kind().name(), kind.as_str());
                prop_assert_eq!(&event.kind().fields()["n"], &json!(value));
            }

            #[test]
            fn blank_conversation_keys_are_dropped(key in "[ \t]{0,5}") {
                let event = Event::new(EventKind::from_parts("x_kind", Map::new()))
                    .in_conversation(key);
                prop_assert!(event.conversation_key().is_none());
            }
        }
    }
}
