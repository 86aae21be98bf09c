//! Event builders with sensible defaults.
//!
//! Every story-scoped builder puts the event in the `story-{id}`
//! conversation, matching how the portal keys its threads.

use herald_core::{Event, EventKind, GateStatus, Severity};

/// Conversation key used for a story.
pub fn story_key(story_id: &str) -> String {
    format!("story-{story_id}")
}

/// `wave_started` with no conversation.
pub fn wave_started(wave_id: &str, story_count: u32) -> Event {
    Event::new(EventKind::WaveStarted { wave_id: wave_id.to_string(), story_count })
}

/// `story_started` in the story's conversation.
pub fn story_started(story_id: &str) -> Event {
    Event::new(EventKind::StoryStarted {
        story_id: story_id.to_string(),
        title: format!("Implement {story_id}"),
        agent: Some("agent-1".to_string()),
    })
    .in_conversation(story_key(story_id))
}

/// `story_progress` in the story's conversation.
pub fn story_progress(story_id: &str, message: &str) -> Event {
    Event::new(EventKind::StoryProgress {
        story_id: story_id.to_string(),
        message: message.to_string(),
    })
    .in_conversation(story_key(story_id))
}

/// `gate_transition` in the story's conversation.
pub fn gate_transition(story_id: &str, gate: &str, status: GateStatus) -> Event {
    let severity = if status == GateStatus::Failed { Severity::Warning } else { Severity::Info };
    Event::new(EventKind::GateTransition {
        story_id: story_id.to_string(),
        gate: gate.to_string(),
        status,
        detail: None,
    })
    .with_severity(severity)
    .in_conversation(story_key(story_id))
}

/// `story_completed` in the story's conversation.
pub fn story_completed(story_id: &str) -> Event {
    Event::new(EventKind::StoryCompleted {
        story_id: story_id.to_string(),
        summary: Some("all gates passed".to_string()),
        pr_url: None,
    })
    .in_conversation(story_key(story_id))
}

/// Warning-level `story_failed` in the story's conversation.
pub fn story_failed(story_id: &str, reason: &str) -> Event {
    Event::new(EventKind::StoryFailed {
        story_id: story_id.to_string(),
        reason: reason.to_string(),
        gate: None,
    })
    .with_severity(Severity::Warning)
    .in_conversation(story_key(story_id))
}

/// Critical `safety_violation` in the story's conversation.
pub fn safety_violation(story_id: &str, detail: &str) -> Event {
    Event::new(EventKind::SafetyViolation {
        agent_id: "agent-1".to_string(),
        rule: "no-force-push".to_string(),
        detail: detail.to_string(),
        story_id: Some(story_id.to_string()),
    })
    .with_severity(Severity::Critical)
    .in_conversation(story_key(story_id))
}

/// Warning-level `budget_alert` with no conversation.
pub fn budget_alert(spent_usd: f64, limit_usd: f64) -> Event {
    Event::new(EventKind::BudgetAlert { scope: "wave".to_string(), spent_usd, limit_usd })
        .with_severity(Severity::Warning)
}
