//! Turns events into transport-agnostic chat messages.
//!
//! Every message carries a plain-text fallback and, for transports that
//! understand them, Block Kit style blocks:
//!
//! ```text
//! header   ":rotating_light: Story failed: STORY-12"
//! section  "*Reason:* lint gate rejected the change"
//! section  fields  [Gate]
//! context  "critical · story_failed"
//! ```
//!
//! The match over [`EventKind`] is exhaustive; a new kind does not compile
//! until it has a rendering. Kinds this build does not know render through
//! the generic layout.

use std::fmt::Write as _;

use herald_core::{ChannelRole, Event, EventKind};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Header blocks reject text longer than this.
const MAX_HEADER_CHARS: usize = 150;

/// A message ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedMessage {
    /// Plain-text body, also used as the notification fallback.
    pub text: String,
    /// Structured content for rich transports.
    pub blocks: Option<Value>,
    /// Channel the message is routed to.
    pub channel: ChannelRole,
}

impl RenderedMessage {
    /// Plain-text message with no blocks.
    pub fn plain(text: impl Into<String>, channel: ChannelRole) -> Self {
        Self { text: text.into(), blocks: None, channel }
    }

    /// Message with caller-built blocks.
    pub fn rich(text: impl Into<String>, blocks: Value, channel: ChannelRole) -> Self {
        Self { text: text.into(), blocks: Some(blocks), channel }
    }

    /// Body posted to a webhook, `{text, blocks?}`.
    pub fn webhook_payload(&self) -> Value {
        let mut payload = json!({ "text": self.text });
        if let Some(blocks) = &self.blocks {
            payload["blocks"] = blocks.clone();
        }
        payload
    }
}

/// What a kind contributes to its message.
struct Layout {
    title: String,
    body: Option<String>,
    fields: Vec<(String, String)>,
}

impl Layout {
    fn new(title: impl Into<String>) -> Self {
        Self { title: title.into(), body: None, fields: Vec::new() }
    }

    fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    fn field(mut self, label: &str, value: impl ToString) -> Self {
        self.fields.push((label.to_string(), value.to_string()));
        self
    }

    fn optional(self, label: &str, value: Option<&impl ToString>) -> Self {
        match value {
            Some(value) => self.field(label, value.to_string()),
            None => self,
        }
    }
}

/// Renders an event into the message posted for it.
pub fn render(event: &Event) -> RenderedMessage {
    let layout = layout(event.kind());
    let severity = event.severity();
    let headline = format!("{} {}", severity.icon(), layout.title);

    let mut text = headline.clone();
    if let Some(body) = &layout.body {
        text.push('\n');
        text.push_str(body);
    }
    for (label, value) in &layout.fields {
        let _ = write!(text, "\n{label}: {value}");
    }

    let mut blocks = vec![json!({
        "type": "header",
        "text": { "type": "plain_text", "text": clip(&headline, MAX_HEADER_CHARS), "emoji": true },
    })];
    if let Some(body) = &layout.body {
        blocks.push(json!({ "type": "section", "text": { "type": "mrkdwn", "text": body } }));
    }
    if !layout.fields.is_empty() {
        let fields: Vec<Value> = layout
            .fields
            .iter()
            .map(|(label, value)| {
                json!({ "type": "mrkdwn", "text": format!("*{label}:*\n{value}") })
            })
            .collect();
        blocks.push(json!({ "type": "section", "fields": fields }));
    }
    blocks.push(json!({
        "type": "context",
        "elements": [{ "type": "mrkdwn", "text": format!("{severity} · {}", event.kind().name()) }],
    }));

    RenderedMessage { text, blocks: Some(Value::Array(blocks)), channel: event.channel() }
}

/// One-line summary posted outside the thread when a conversation ends or
/// escalates.
pub fn render_summary(event: &Event, channel: ChannelRole) -> RenderedMessage {
    let layout = layout(event.kind());
    let mut text = format!("{} {}", event.severity().icon(), layout.title);
    if let Some(key) = event.conversation_key() {
        let _ = write!(text, " ({key})");
    }
    if let Some(body) = layout.body.as_deref().and_then(|body| body.lines().next()) {
        text.push_str(" - ");
        text.push_str(body);
    }
    RenderedMessage::plain(text, channel)
}

fn layout(kind: &EventKind) -> Layout {
    match kind {
        EventKind::WaveStarted { wave_id, story_count } => {
            Layout::new(format!("Wave {wave_id} started")).field("Stories", story_count)
        },
        EventKind::WaveCompleted { wave_id, passed, failed } => {
            Layout::new(format!("Wave {wave_id} completed"))
                .field("Passed", passed)
                .field("Failed", failed)
        },
        EventKind::StoryStarted { story_id, title, agent } => {
            Layout::new(format!("Story started: {story_id}"))
                .body(title.clone())
                .optional("Agent", agent.as_ref())
        },
        EventKind::StoryProgress { story_id, message } => {
            Layout::new(format!("Progress on {story_id}")).body(message.clone())
        },
        EventKind::GateTransition { story_id, gate, status, detail } => {
            let layout = Layout::new(format!("Gate {gate} {status} for {story_id}"));
            match detail {
                Some(detail) => layout.body(detail.clone()),
                None => layout,
            }
        },
        EventKind::StoryCompleted { story_id, summary, pr_url } => {
            let layout = Layout::new(format!("Story completed: {story_id}"));
            let layout = match summary {
                Some(summary) => layout.body(summary.clone()),
                None => layout,
            };
            layout.optional("Pull request", pr_url.as_ref())
        },
        EventKind::StoryFailed { story_id, reason, gate } => {
            Layout::new(format!("Story failed: {story_id}"))
                .body(format!("*Reason:* {reason}"))
                .optional("Gate", gate.as_ref())
        },
        EventKind::AgentSpawned { agent_id, story_id } => {
            Layout::new(format!("Agent {agent_id} spawned")).optional("Story", story_id.as_ref())
        },
        EventKind::AgentExited { agent_id, story_id, exit_code } => {
            Layout::new(format!("Agent {agent_id} exited"))
                .optional("Story", story_id.as_ref())
                .optional("Exit code", exit_code.as_ref())
        },
        EventKind::BudgetAlert { scope, spent_usd, limit_usd } => {
            let percent = if *limit_usd > 0.0 { spent_usd / limit_usd * 100.0 } else { 100.0 };
            Layout::new(format!("Budget alert: {scope}"))
                .body(format!("${spent_usd:.2} of ${limit_usd:.2} spent ({percent:.0}%)"))
        },
        EventKind::SafetyViolation { agent_id, rule, detail, story_id } => {
            Layout::new(format!("Safety violation by {agent_id}"))
                .body(detail.clone())
                .field("Rule", rule)
                .optional("Story", story_id.as_ref())
        },
        EventKind::Escalation { story_id, reason } => {
            Layout::new(format!("Escalation: {story_id} needs a human")).body(reason.clone())
        },
        EventKind::Other { kind, fields } => generic_layout(kind, fields),
    }
}

fn generic_layout(kind: &str, fields: &Map<String, Value>) -> Layout {
    let mut keys: Vec<&String> = fields.keys().collect();
    keys.sort();
    keys.into_iter().fold(Layout::new(humanize(kind)), |layout, key| {
        let value = match &fields[key] {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        layout.field(key, value)
    })
}

/// `gate_transition` becomes `Gate transition`.
fn humanize(kind: &str) -> String {
    let spaced = kind.replace(['_', '-'], " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Event".to_string(),
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max_chars - 1).collect();
    clipped.push('…');
    clipped
}
