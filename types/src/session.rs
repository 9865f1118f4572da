//! Governance frames and the protocol stack.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: String,
    pub to: String,
    pub trigger: String,
    pub time: i64,
}

/// One active execution of a protocol. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceInstance {
    pub protocol_id: String,
    pub current_state: String,
    pub objective: String,
    pub start_time: i64,
    pub last_transition: i64,
    #[serde(default)]
    pub history: Vec<TransitionRecord>,
}

impl GovernanceInstance {
    #[must_use]
    pub fn new(
        protocol_id: impl Into<String>,
        initial_state: impl Into<String>,
        objective: impl Into<String>,
        now: i64,
    ) -> Self {
        Self {
            protocol_id: protocol_id.into(),
            current_state: initial_state.into(),
            objective: objective.into(),
            start_time: now,
            last_transition: now,
            history: Vec::new(),
        }
    }

    pub fn transition(&mut self, trigger: &str, target: &str, now: i64) {
        self.history.push(TransitionRecord {
            from: std::mem::replace(&mut self.current_state, target.to_string()),
            to: target.to_string(),
            trigger: trigger.to_string(),
            time: now,
        });
        self.last_transition = now;
    }
}

/// LIFO stack of frames. The top frame is the last element.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct ProtocolStack {
    frames: Vec<GovernanceInstance>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawStack {
    Frames(Vec<GovernanceInstance>),
    Legacy(GovernanceInstance),
}

impl<'de> Deserialize<'de> for ProtocolStack {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let frames = match RawStack::deserialize(deserializer)? {
            RawStack::Frames(frames) => frames,
            RawStack::Legacy(frame) => vec![frame],
        };
        Ok(Self { frames })
    }
}

impl ProtocolStack {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn top(&self) -> Option<&GovernanceInstance> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut GovernanceInstance> {
        self.frames.last_mut()
    }

    /// The frame directly below the top, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&GovernanceInstance> {
        self.frames.len().checked_sub(2).map(|idx| &self.frames[idx])
    }

    pub fn push(&mut self, frame: GovernanceInstance) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<GovernanceInstance> {
        self.frames.pop()
    }

    pub fn frames(&self) -> &[GovernanceInstance] {
        &self.frames
    }
}
