//! Extension points: pre-command hooks, raw-mode hooks and named event
//! providers.
//!
//! Everything here is a list of `Rc<dyn Trait>` invoked in registration
//! order. Callers clone the relevant list before invoking so hook bodies
//! can take `&mut Server` freely; a single thread of control makes this
//! safe and cheap.

use std::collections::HashMap;
use std::rc::Rc;

use crate::modes::{Change, ModeSubject};
use crate::server::Server;
use crate::state::UserId;

/// Three-way hook verdict, mirroring the usual module-result convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModResult {
    /// No opinion; keep asking.
    Passthru,
    /// Explicitly allowed; later access checks are skipped.
    Allow,
    /// Rejected; the operation stops.
    Deny,
}

/// Runs before command dispatch. May rewrite the parameter vector and
/// tags (Shun's command cleaning) or deny execution outright.
pub trait PreCommandHook {
    fn on_pre_command(
        &self,
        server: &mut Server,
        source: UserId,
        verb: &str,
        params: &mut Vec<String>,
        tags: &mut Vec<(String, Option<String>)>,
    ) -> ModResult;
}

/// Runs for every mode change before access checks.
pub trait RawModeHook {
    fn on_raw_mode(
        &self,
        server: &mut Server,
        source: UserId,
        subject: &ModeSubject,
        change: &mut Change,
    ) -> ModResult;
}

/// A named multicast event. `args` meaning is provider-specific.
#[derive(Debug)]
pub struct Event {
    pub name: &'static str,
    pub source: UserId,
    pub args: Vec<String>,
}

/// First non-passthrough listener result wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventResult {
    Passthru,
    /// A listener consumed the event (and did whatever it does).
    Handled,
    /// A listener rejected the operation, with a reason for the caller
    /// to surface.
    Deny(String),
}

pub trait EventListener {
    fn on_event(&self, server: &mut Server, event: &mut Event) -> EventResult;
}

/// Registry for all three hook kinds.
#[derive(Default)]
pub struct EventRegistry {
    pre_command: Vec<Rc<dyn PreCommandHook>>,
    raw_mode: Vec<Rc<dyn RawModeHook>>,
    providers: HashMap<&'static str, Vec<Rc<dyn EventListener>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_pre_command(&mut self, hook: Rc<dyn PreCommandHook>) {
        self.pre_command.push(hook);
    }

    pub fn register_raw_mode(&mut self, hook: Rc<dyn RawModeHook>) {
        self.raw_mode.push(hook);
    }

    pub fn subscribe(&mut self, name: &'static str, listener: Rc<dyn EventListener>) {
        self.providers.entry(name).or_default().push(listener);
    }

    /// Cloned snapshot, in registration order.
    pub fn pre_command_hooks(&self) -> Vec<Rc<dyn PreCommandHook>> {
        self.pre_command.to_vec()
    }

    pub fn raw_mode_hooks(&self) -> Vec<Rc<dyn RawModeHook>> {
        self.raw_mode.to_vec()
    }

    pub fn listeners(&self, name: &str) -> Vec<Rc<dyn EventListener>> {
        self.providers.get(name).map(|v| v.to_vec()).unwrap_or_default()
    }
}
