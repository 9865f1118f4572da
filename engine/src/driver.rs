//! The protocol stack driver.
//!
//! Meta-states are IDLE (empty stack) and ACTIVE (top frame's
//! `current_state`). Every mutating operation loads the stack, runs all of its
//! checks, and only then persists in a fixed order: stack, journal, audit
//! trail. A failed check returns before the first write.
//!
//! `next` enforces only the requirements named by the chosen transition's
//! gates. `close` enforces every requirement of the current state.

use std::path::PathBuf;

use thiserror::Error;
use warden_config::{WardenConfig, WardenPaths};
use warden_context::{FileStateStore, IntentError, IntentResolver, StateStore, StoreError};
use warden_core::{
    Clock, GateContext, ProtocolLibrary, RegistryError, SystemClock, Verdict, evaluate,
    evaluate_all, load_library,
};
use warden_types::{
    AuditRecord, AuditTrail, EnterInteraction, EntrySource, GovernanceInstance,
    InitialStateError, Intent, JournalEntry, NO_PROTOCOL, ProtocolDefinition,
};

use crate::runner::{CommandOutput, CommandRunner, RunnerError, ShellRunner};

const ACK_MARKER: &str = "_ACK";
const DELIVERABLE_MARKER: &str = "DLR_";
const DEFAULT_ACK_INSTRUCTION: &str =
    "Director must acknowledge the deliverable before state advancement.";
const NO_JOURNAL_SIGNATURE: &str = "00000000";
const SIGNATURE_LEN: usize = 12;

fn list_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(id, reason)| format!("  - {id}: {reason}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("protocol '{0}' not found in library")]
    UnknownProtocol(String),
    #[error("objective must not be empty")]
    EmptyObjective,
    #[error("missing command string")]
    EmptyCommand,
    #[error("no active governance cycle")]
    NoActiveCycle,
    #[error("protocol '{protocol_id}' has no state '{state}'")]
    UnknownState { protocol_id: String, state: String },
    #[error("state '{state}' has no transition '{trigger}' (available: {})", .available.join(", "))]
    UnknownTrigger {
        state: String,
        trigger: String,
        available: Vec<String>,
    },
    #[error("state '{state}' declares no transitions")]
    NoTransitions { state: String },
    #[error("external acknowledgement required to leave '{state}': {instruction}")]
    AckRequired { state: String, instruction: String },
    #[error("gate check failed for '{trigger}':\n{}", list_failures(.failures))]
    GateFailed {
        trigger: String,
        failures: Vec<(String, String)>,
    },
    #[error("cannot close governance cycle, unmet requirements:\n{}", list_failures(.failures))]
    CloseBlocked { failures: Vec<(String, String)> },
    #[error("command does not map to a registered intent: {command}")]
    UnknownIntent { command: String },
    #[error("frame references unknown protocol '{protocol_id}' and no protocol is titled '{objective}'")]
    OrphanedFrame {
        protocol_id: String,
        objective: String,
    },
    #[error("protocol '{id}' is invalid: {source}")]
    InvalidProtocol {
        id: String,
        source: InitialStateError,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Intent(#[from] IntentError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSettings {
    pub grace_ms: i64,
    /// Relative requirement paths resolve against this directory.
    pub target_root: PathBuf,
}

impl DriverSettings {
    #[must_use]
    pub fn new(target_root: impl Into<PathBuf>) -> Self {
        Self {
            grace_ms: warden_config::DEFAULT_GRACE_WINDOW_MS,
            target_root: target_root.into(),
        }
    }

    #[must_use]
    pub fn from_config(paths: &WardenPaths, config: &WardenConfig) -> Self {
        Self {
            grace_ms: config.gates.grace_window_ms,
            target_root: paths.target().to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementStatus {
    pub id: String,
    pub kind: String,
    pub verdict: Verdict,
    pub instruction: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionView {
    pub trigger: String,
    pub target: String,
    pub gates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub protocol_id: String,
    pub title: String,
    pub version: String,
    pub objective: String,
    pub current_state: String,
    pub description: Option<String>,
    pub depth: usize,
    /// Journal entry count.
    pub events: usize,
    pub requirements: Vec<RequirementStatus>,
    /// The first failing requirement's instruction, in declaration order.
    pub next_action: Option<String>,
    pub transitions: Vec<TransitionView>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Idle,
    Active(StatusReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOutcome {
    pub protocol_id: String,
    pub title: String,
    pub initial_state: String,
    pub depth: usize,
    pub status: StatusReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextOutcome {
    pub trigger: String,
    pub from: String,
    pub to: String,
    /// Guidance for the entered state. When present the caller stops at a
    /// turn boundary and `status` is `None`.
    pub halt: Option<EnterInteraction>,
    pub status: Option<StatusReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub command: String,
    pub protocol_id: String,
    pub intent: Option<Intent>,
    pub source: EntrySource,
    pub justification: Option<String>,
    pub output: CommandOutput,
    /// Output lines carrying a deliverable marker, acknowledgements signed.
    pub deliverables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    Idle,
    Closed {
        protocol_id: String,
        remaining_depth: usize,
        parent_status: Option<StatusReport>,
    },
}

/// Resolves the frame's protocol, rebinding an orphaned frame to the protocol
/// titled after its objective.
fn resolve_protocol<'l>(
    library: &'l ProtocolLibrary,
    frame: &mut GovernanceInstance,
) -> Result<&'l ProtocolDefinition, DriverError> {
    if let Some(protocol) = library.get(&frame.protocol_id) {
        return Ok(protocol);
    }
    match library.find_by_title(&frame.objective) {
        Some((id, protocol)) => {
            tracing::warn!(
                orphan = %frame.protocol_id,
                rebound = id,
                "Rebinding orphaned frame by objective"
            );
            frame.protocol_id = id.to_string();
            Ok(protocol)
        }
        None => Err(DriverError::OrphanedFrame {
            protocol_id: frame.protocol_id.clone(),
            objective: frame.objective.clone(),
        }),
    }
}

fn journal(
    store: &mut dyn StateStore,
    intents: &IntentResolver,
    command: String,
    source: EntrySource,
    protocol: &str,
    now: i64,
) -> Result<(), DriverError> {
    let intent = intents.resolve(&command);
    let entry = JournalEntry::new(now, command, source, protocol).with_intent(intent);
    store.append_entry(&entry)?;
    Ok(())
}

pub struct Driver {
    library: ProtocolLibrary,
    store: Box<dyn StateStore>,
    intents: IntentResolver,
    clock: Box<dyn Clock>,
    runner: Box<dyn CommandRunner>,
    settings: DriverSettings,
}

impl Driver {
    #[must_use]
    pub fn new(
        library: ProtocolLibrary,
        store: Box<dyn StateStore>,
        settings: DriverSettings,
    ) -> Self {
        Self {
            library,
            store,
            intents: IntentResolver::default(),
            clock: Box::new(SystemClock),
            runner: Box::new(ShellRunner::default()),
            settings,
        }
    }

    /// The live driver for `paths`: library, session files, intent patterns
    /// and shell from configuration.
    pub fn open(paths: &WardenPaths, config: &WardenConfig) -> Result<Self, DriverError> {
        let library = load_library(paths)?;
        let intents = IntentResolver::load(&paths.intent_patterns())?;
        let store = FileStateStore::new(paths.session().clone());
        tracing::debug!(
            protocols = library.protocols.len(),
            patterns = intents.len(),
            state = %paths.session().stack.display(),
            "Driver opened"
        );
        Ok(Self::new(
            library,
            Box::new(store),
            DriverSettings::from_config(paths, config),
        )
        .with_intents(intents)
        .with_runner(ShellRunner::new(&config.exec)))
    }

    pub fn with_intents(mut self, intents: IntentResolver) -> Self {
        self.intents = intents;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_runner(mut self, runner: impl CommandRunner + 'static) -> Self {
        self.runner = Box::new(runner);
        self
    }

    #[must_use]
    pub fn library(&self) -> &ProtocolLibrary {
        &self.library
    }

    #[must_use]
    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    fn gate_context<'a>(
        &'a self,
        frame: &'a GovernanceInstance,
        entries: &'a [JournalEntry],
        audit: Option<&'a AuditTrail>,
    ) -> GateContext<'a> {
        GateContext {
            frame,
            entries,
            audit,
            target_root: &self.settings.target_root,
            grace_ms: self.settings.grace_ms,
        }
    }

    pub fn init(&mut self, protocol_id: &str, objective: &str) -> Result<InitOutcome, DriverError> {
        if objective.trim().is_empty() {
            return Err(DriverError::EmptyObjective);
        }
        let protocol = self
            .library
            .get(protocol_id)
            .ok_or_else(|| DriverError::UnknownProtocol(protocol_id.to_string()))?;
        let initial = protocol
            .initial_state()
            .map_err(|source| DriverError::InvalidProtocol {
                id: protocol_id.to_string(),
                source,
            })?
            .to_string();
        let title = protocol.meta.title.clone();

        let mut stack = self.store.load_stack()?;
        let now = self.clock.now_ms();
        stack.push(GovernanceInstance::new(protocol_id, &initial, objective, now));
        let depth = stack.depth();

        self.store.save_stack(&stack)?;
        journal(
            self.store.as_mut(),
            &self.intents,
            format!("warden init {protocol_id} \"{objective}\""),
            EntrySource::ManualInit,
            protocol_id,
            now,
        )?;
        self.store
            .append_audit(AuditRecord::initialize(now, protocol_id, objective, depth))?;
        tracing::info!(protocol = protocol_id, state = %initial, depth, "Governance initialized");

        let Status::Active(status) = self.status()? else {
            return Err(DriverError::NoActiveCycle);
        };
        Ok(InitOutcome {
            protocol_id: protocol_id.to_string(),
            title,
            initial_state: initial,
            depth,
            status,
        })
    }

    /// Read-only. Re-evaluates every requirement of the current state.
    pub fn status(&self) -> Result<Status, DriverError> {
        let mut stack = self.store.load_stack()?;
        let depth = stack.depth();
        let Some(frame) = stack.top_mut() else {
            return Ok(Status::Idle);
        };
        let protocol = resolve_protocol(&self.library, frame)?;
        let entries = self.store.entries()?;
        let audit = self.store.audit_trail()?;
        self.report(protocol, frame, depth, &entries, audit.as_ref())
            .map(Status::Active)
    }

    fn report(
        &self,
        protocol: &ProtocolDefinition,
        frame: &GovernanceInstance,
        depth: usize,
        entries: &[JournalEntry],
        audit: Option<&AuditTrail>,
    ) -> Result<StatusReport, DriverError> {
        let state = protocol
            .state(&frame.current_state)
            .ok_or_else(|| DriverError::UnknownState {
                protocol_id: frame.protocol_id.clone(),
                state: frame.current_state.clone(),
            })?;
        let ctx = self.gate_context(frame, entries, audit);

        let requirements: Vec<RequirementStatus> = state
            .requirements
            .iter()
            .map(|(id, req)| RequirementStatus {
                id: id.to_string(),
                kind: req.kind().to_string(),
                verdict: evaluate(req, &ctx),
                instruction: req.instruction.clone(),
            })
            .collect();
        let next_action = requirements
            .iter()
            .find(|r| !r.verdict.is_pass())
            .map(|r| {
                r.instruction
                    .clone()
                    .unwrap_or_else(|| format!("Satisfy requirement '{}'", r.id))
            });
        let transitions = state
            .transitions
            .iter()
            .map(|(trigger, spec)| TransitionView {
                trigger: trigger.to_string(),
                target: spec.target().to_string(),
                gates: spec.gates().to_vec(),
            })
            .collect();

        Ok(StatusReport {
            protocol_id: frame.protocol_id.clone(),
            title: protocol.meta.title.clone(),
            version: protocol.meta.version.clone(),
            objective: frame.objective.clone(),
            current_state: frame.current_state.clone(),
            description: state.description.clone(),
            depth,
            events: entries.len(),
            requirements,
            next_action,
            transitions,
        })
    }

    /// Advances the top frame along `trigger`, or the first declared
    /// transition when `None`.
    pub fn next(&mut self, trigger: Option<&str>) -> Result<NextOutcome, DriverError> {
        let mut stack = self.store.load_stack()?;
        let depth = stack.depth();
        let frame = stack.top_mut().ok_or(DriverError::NoActiveCycle)?;
        let protocol = resolve_protocol(&self.library, frame)?;
        let state = protocol
            .state(&frame.current_state)
            .ok_or_else(|| DriverError::UnknownState {
                protocol_id: frame.protocol_id.clone(),
                state: frame.current_state.clone(),
            })?;

        let trigger = match trigger {
            Some(trigger) => trigger.to_string(),
            None => state
                .transitions
                .keys()
                .next()
                .map(ToString::to_string)
                .ok_or_else(|| DriverError::NoTransitions {
                    state: frame.current_state.clone(),
                })?,
        };
        let spec = state
            .transitions
            .get(&trigger)
            .ok_or_else(|| DriverError::UnknownTrigger {
                state: frame.current_state.clone(),
                trigger: trigger.clone(),
                available: state.transitions.keys().map(ToString::to_string).collect(),
            })?;
        let target = spec.target().to_string();
        let target_state = protocol
            .state(&target)
            .ok_or_else(|| DriverError::UnknownState {
                protocol_id: frame.protocol_id.clone(),
                state: target.clone(),
            })?;

        let entries = self.store.entries()?;
        let audit = self.store.audit_trail()?;

        if let Some(exit) = state.on_exit().filter(|exit| exit.require_external_ack) {
            let acknowledged = entries
                .iter()
                .any(|e| e.command.contains(ACK_MARKER) && e.timestamp > frame.last_transition);
            if !acknowledged {
                return Err(DriverError::AckRequired {
                    state: frame.current_state.clone(),
                    instruction: exit
                        .instruction
                        .clone()
                        .unwrap_or_else(|| DEFAULT_ACK_INSTRUCTION.to_string()),
                });
            }
        }

        let ctx = self.gate_context(frame, &entries, audit.as_ref());
        let failures: Vec<(String, String)> = spec
            .gates()
            .iter()
            .filter_map(|gate| match state.requirements.get(gate) {
                Some(req) => evaluate(req, &ctx)
                    .reason()
                    .map(|reason| (gate.clone(), reason.to_string())),
                None => Some((
                    gate.clone(),
                    format!("Gate '{gate}' names no requirement declared on this state."),
                )),
            })
            .collect();
        if !failures.is_empty() {
            tracing::info!(trigger = %trigger, failed = failures.len(), "Gate check failed");
            return Err(DriverError::GateFailed { trigger, failures });
        }

        let halt = target_state.on_enter().cloned();
        let now = self.clock.now_ms();
        let from = frame.current_state.clone();
        let protocol_id = frame.protocol_id.clone();
        frame.transition(&trigger, &target, now);

        self.store.save_stack(&stack)?;
        journal(
            self.store.as_mut(),
            &self.intents,
            format!("warden next {trigger}"),
            EntrySource::ManualTransition,
            &protocol_id,
            now,
        )?;
        self.store
            .append_audit(AuditRecord::transition(now, &protocol_id, &from, &target))?;
        tracing::info!(protocol = %protocol_id, from = %from, to = %target, "Transition");

        let status = if halt.is_some() {
            None
        } else {
            let entries = self.store.entries()?;
            let audit = self.store.audit_trail()?;
            let frame = stack.top().ok_or(DriverError::NoActiveCycle)?;
            Some(self.report(protocol, frame, depth, &entries, audit.as_ref())?)
        };

        Ok(NextOutcome {
            trigger,
            from,
            to: target,
            halt,
            status,
        })
    }

    fn journal_signature(&self) -> Result<String, DriverError> {
        Ok(match self.store.journal_bytes()? {
            Some(bytes) => warden_utils::short_digest(&bytes, SIGNATURE_LEN),
            None => NO_JOURNAL_SIGNATURE.to_string(),
        })
    }

    /// Runs `command` through the runner after intent classification.
    ///
    /// An unclassified command without a justification is refused before
    /// anything runs or is journaled. A command that fails to spawn leaves
    /// the journal untouched.
    pub fn exec(
        &mut self,
        command: &str,
        justification: Option<&str>,
    ) -> Result<ExecOutcome, DriverError> {
        if command.trim().is_empty() {
            return Err(DriverError::EmptyCommand);
        }
        let justification = justification
            .map(str::trim)
            .filter(|j| !j.is_empty())
            .map(ToString::to_string);
        let intent = self.intents.resolve(command);
        if intent.is_none() && justification.is_none() {
            tracing::info!(command, "Refused unclassified command");
            return Err(DriverError::UnknownIntent {
                command: command.to_string(),
            });
        }

        let protocol_id = self
            .store
            .load_stack()?
            .top()
            .map_or_else(|| NO_PROTOCOL.to_string(), |f| f.protocol_id.clone());
        let source = if intent.is_some() {
            EntrySource::AgentExec
        } else {
            EntrySource::ShadowAction
        };

        let started = self.clock.now_ms();
        let output = self.runner.run(command)?;
        let entry = JournalEntry::new(started, command, source, &protocol_id)
            .with_intent(intent.clone())
            .with_justification(justification.clone());
        self.store.append_entry(&entry)?;
        let text = output.combined();

        let mut deliverables = Vec::new();
        let mut signature = None;
        for line in text.lines().filter(|l| l.contains(DELIVERABLE_MARKER)) {
            let mut shown = line.trim().to_string();
            if line.contains(ACK_MARKER) {
                if signature.is_none() {
                    signature = Some(self.journal_signature()?);
                }
                if let Some(sig) = &signature {
                    shown.push_str(&format!(" | [AUTOSIGN] hash_ref: {sig}"));
                }
            }
            deliverables.push(shown);
        }

        if !text.trim().is_empty() {
            let result = JournalEntry::new(
                self.clock.now_ms(),
                format!("[RESULT] {command}"),
                source,
                &protocol_id,
            )
            .with_output(text)
            .with_intent(intent.clone());
            self.store.append_entry(&result)?;
        }
        tracing::info!(
            command,
            source = source.as_str(),
            success = output.success,
            "Command executed"
        );

        Ok(ExecOutcome {
            command: command.to_string(),
            protocol_id,
            intent,
            source,
            justification,
            output,
            deliverables,
        })
    }

    /// Pops the top frame once every current-state requirement passes.
    /// Closing the last frame deletes the session.
    pub fn close(&mut self) -> Result<CloseOutcome, DriverError> {
        let mut stack = self.store.load_stack()?;
        let Some(frame) = stack.top_mut() else {
            return Ok(CloseOutcome::Idle);
        };
        let protocol = resolve_protocol(&self.library, frame)?;
        let state = protocol
            .state(&frame.current_state)
            .ok_or_else(|| DriverError::UnknownState {
                protocol_id: frame.protocol_id.clone(),
                state: frame.current_state.clone(),
            })?;
        let entries = self.store.entries()?;
        let audit = self.store.audit_trail()?;
        let ctx = self.gate_context(frame, &entries, audit.as_ref());
        let failures = evaluate_all(state.requirements.iter(), &ctx);
        if !failures.is_empty() {
            return Err(DriverError::CloseBlocked { failures });
        }

        let protocol_id = frame.protocol_id.clone();
        stack.pop();
        let remaining_depth = stack.depth();

        if stack.is_empty() {
            self.store.purge()?;
            tracing::info!(protocol = %protocol_id, "Final governance cycle closed");
            return Ok(CloseOutcome::Closed {
                protocol_id,
                remaining_depth,
                parent_status: None,
            });
        }

        let now = self.clock.now_ms();
        self.store.save_stack(&stack)?;
        journal(
            self.store.as_mut(),
            &self.intents,
            "warden close".to_string(),
            EntrySource::ManualClose,
            &protocol_id,
            now,
        )?;
        self.store
            .append_audit(AuditRecord::close(now, &protocol_id, remaining_depth))?;
        tracing::info!(protocol = %protocol_id, remaining_depth, "Sub-cycle closed");

        let parent_status = match self.status() {
            Ok(Status::Active(report)) => Some(report),
            Ok(Status::Idle) => None,
            Err(e) => {
                tracing::warn!("Parent status unavailable after close: {e}");
                None
            }
        };
        Ok(CloseOutcome::Closed {
            protocol_id,
            remaining_depth,
            parent_status,
        })
    }
}
