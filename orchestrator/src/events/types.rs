//! Event types for orchestrator activity streaming: the vocabulary emitted
//! by the state actor, phase engine, review subsystem, agent lifecycle, and
//! health daemon for any in-process subscriber (the future WebSocket
//! integrator, the event logger below).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AgentStatus, PhaseStatus, VerdictValue};

/// Core event enum - the vocabulary of orchestrator activity.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    TaskCreated {
        task_id: String,
        description: String,
    },
    TaskTransitioned {
        task_id: String,
        status: String,
    },
    PhaseTransitioned {
        task_id: String,
        phase_index: i64,
        status: PhaseStatus,
    },
    AgentSpawned {
        task_id: String,
        agent_id: String,
        agent_type: String,
        phase_index: i64,
    },
    AgentProgress {
        task_id: String,
        agent_id: String,
        status: String,
        progress: u8,
    },
    AgentTerminal {
        task_id: String,
        agent_id: String,
        status: AgentStatus,
        reason: Option<String>,
    },
    FindingReported {
        task_id: String,
        agent_id: String,
        phase_index: i64,
        severity: String,
    },
    ReviewTriggered {
        task_id: String,
        phase_index: i64,
        review_id: String,
        num_reviewers: u32,
    },
    VerdictSubmitted {
        task_id: String,
        review_id: String,
        reviewer_agent_id: String,
        verdict: VerdictValue,
    },
    ReviewFinalized {
        task_id: String,
        review_id: String,
        verdict: VerdictValue,
    },
    HandoverCreated {
        task_id: String,
        from_phase_index: i64,
    },
    HealthScanFailure {
        task_id: String,
        agent_id: String,
        reason: String,
    },
    Error {
        task_id: String,
        context: String,
        message: String,
    },
    Warning {
        task_id: String,
        context: String,
        message: String,
    },
}

impl Event {
    pub fn task_id(&self) -> &str {
        match self {
            Event::TaskCreated { task_id, .. }
            | Event::TaskTransitioned { task_id, .. }
            | Event::PhaseTransitioned { task_id, .. }
            | Event::AgentSpawned { task_id, .. }
            | Event::AgentProgress { task_id, .. }
            | Event::AgentTerminal { task_id, .. }
            | Event::FindingReported { task_id, .. }
            | Event::ReviewTriggered { task_id, .. }
            | Event::VerdictSubmitted { task_id, .. }
            | Event::ReviewFinalized { task_id, .. }
            | Event::HandoverCreated { task_id, .. }
            | Event::HealthScanFailure { task_id, .. }
            | Event::Error { task_id, .. }
            | Event::Warning { task_id, .. } => task_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Event::TaskCreated { .. } => "TaskCreated",
            Event::TaskTransitioned { .. } => "TaskTransitioned",
            Event::PhaseTransitioned { .. } => "PhaseTransitioned",
            Event::AgentSpawned { .. } => "AgentSpawned",
            Event::AgentProgress { .. } => "AgentProgress",
            Event::AgentTerminal { .. } => "AgentTerminal",
            Event::FindingReported { .. } => "FindingReported",
            Event::ReviewTriggered { .. } => "ReviewTriggered",
            Event::VerdictSubmitted { .. } => "VerdictSubmitted",
            Event::ReviewFinalized { .. } => "ReviewFinalized",
            Event::HandoverCreated { .. } => "HandoverCreated",
            Event::HealthScanFailure { .. } => "HealthScanFailure",
            Event::Error { .. } => "Error",
            Event::Warning { .. } => "Warning",
        }
    }
}

/// A timestamped event log entry for file persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

impl EventLogEntry {
    pub fn new(event: Event) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_accessor_covers_every_variant() {
        let event = Event::TaskCreated {
            task_id: "TASK-1".into(),
            description: "desc".into(),
        };
        assert_eq!(event.task_id(), "TASK-1");
        assert_eq!(event.event_type(), "TaskCreated");
    }

    #[test]
    fn event_roundtrips_through_json() {
        let event = Event::ReviewFinalized {
            task_id: "TASK-1".into(),
            review_id: "r1".into(),
            verdict: VerdictValue::Approved,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("ReviewFinalized"));
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.task_id(), "TASK-1");
    }
}
