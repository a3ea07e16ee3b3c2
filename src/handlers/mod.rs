//! Command registry and the dispatch pipeline.
//!
//! A command is registered with its verb, argument bounds, access
//! level, pre-registration flag, translation vector and routing
//! descriptor. Dispatch validates a parsed message against the sender's
//! session state, runs pre-command hooks, splits comma lists, executes
//! the handler and queues peer propagation on success.

mod away;
mod channels;
mod connection;
mod messaging;
mod modecmd;
mod oper;

pub use channels::join_channel;
pub use oper::emit_xline_stats;

use std::collections::HashMap;
use std::rc::Rc;

use crate::events::ModResult;
use crate::message::Message;
use crate::numeric;
use crate::server::{Routing, Server};
use crate::state::UserId;

/// Who may invoke a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdAccess {
    Anyone,
    Registered,
    Operator,
    /// Peer servers and services only; local clients are refused.
    Server,
}

/// The two-valued handler outcome. Failure suppresses propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdResult {
    Success,
    Failure,
}

/// How each argument is rewritten when forwarding to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translate {
    /// Pass through unchanged.
    Text,
    /// Replace a nickname with the owning user's UUID.
    Nick,
}

pub trait CommandHandler {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult;
}

/// Registration record for one verb.
pub struct CommandEntry {
    pub verb: &'static str,
    pub min_params: usize,
    pub max_params: Option<usize>,
    pub access: CmdAccess,
    pub works_before_reg: bool,
    pub translation: Vec<Translate>,
    pub routing: Routing,
    /// Argument position accepting a comma list; dispatch re-invokes
    /// the handler once per token.
    pub comma_position: Option<usize>,
    pub handler: Rc<dyn CommandHandler>,
}

impl CommandEntry {
    pub fn new(verb: &'static str, min_params: usize, handler: Rc<dyn CommandHandler>) -> Self {
        Self {
            verb,
            min_params,
            max_params: None,
            access: CmdAccess::Registered,
            works_before_reg: false,
            translation: Vec::new(),
            routing: Routing::LocalOnly,
            comma_position: None,
            handler,
        }
    }

    pub fn access(mut self, access: CmdAccess) -> Self {
        self.access = access;
        self
    }

    pub fn pre_reg(mut self) -> Self {
        self.works_before_reg = true;
        self
    }

    pub fn routing(mut self, routing: Routing) -> Self {
        self.routing = routing;
        self
    }

    pub fn translation(mut self, translation: Vec<Translate>) -> Self {
        self.translation = translation;
        self
    }

    pub fn comma_list(mut self, position: usize) -> Self {
        self.comma_position = Some(position);
        self
    }
}

/// Verb-keyed command table.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Rc<CommandEntry>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry: CommandEntry) {
        self.commands.insert(entry.verb.to_string(), Rc::new(entry));
    }

    pub fn get(&self, verb: &str) -> Option<Rc<CommandEntry>> {
        self.commands.get(verb).cloned()
    }

    pub fn unregister(&mut self, verb: &str) -> bool {
        self.commands.remove(verb).is_some()
    }

    pub fn verbs(&self) -> Vec<String> {
        let mut v: Vec<String> = self.commands.keys().cloned().collect();
        v.sort();
        v
    }
}

/// Register every core command.
pub fn register_core_commands(registry: &mut CommandRegistry) {
    connection::register(registry);
    away::register(registry);
    channels::register(registry);
    messaging::register(registry);
    modecmd::register(registry);
    oper::register(registry);
}

/// The per-message pipeline.
pub fn dispatch(server: &mut Server, source: UserId, msg: Message) {
    let verb = msg.verb.clone();
    let mut params = msg.params.clone();
    let mut tags = msg.tags.clone();

    // Pre-command hooks may rewrite or refuse (Shun gating).
    for hook in server.events.pre_command_hooks() {
        match hook.on_pre_command(server, source, &verb, &mut params, &mut tags) {
            ModResult::Deny => return,
            _ => {}
        }
    }

    let Some(entry) = server.commands.get(&verb) else {
        server.send_numeric(source, numeric::ERR_UNKNOWNCOMMAND, &[&verb], Some("Unknown command"));
        return;
    };

    if params.len() < entry.min_params {
        server.send_numeric(
            source,
            numeric::ERR_NEEDMOREPARAMS,
            &[entry.verb],
            Some("Not enough parameters"),
        );
        return;
    }
    if let Some(max) = entry.max_params {
        params.truncate(max);
    }

    let (registered, local, is_oper, service) = server
        .users
        .get(source)
        .map(|u| (u.registered(), u.local, u.is_oper(), u.service))
        .unwrap_or((false, true, false, false));

    if !entry.works_before_reg && !registered {
        server.send_numeric(
            source,
            numeric::ERR_NOTREGISTERED,
            &[],
            Some("You have not registered"),
        );
        return;
    }
    match entry.access {
        CmdAccess::Anyone | CmdAccess::Registered => {}
        CmdAccess::Operator => {
            if !is_oper {
                server.send_numeric(
                    source,
                    numeric::ERR_NOPRIVILEGES,
                    &[],
                    Some("Permission Denied - You do not have the required operator privileges"),
                );
                return;
            }
        }
        CmdAccess::Server => {
            if local && !service {
                server.send_numeric(
                    source,
                    numeric::ERR_NOPRIVILEGES,
                    &[],
                    Some("Permission Denied - Server-sourced commands may not be issued by users"),
                );
                return;
            }
        }
    }

    let now = server.now();
    if let Some(user) = server.users.get_mut(source) {
        user.last_activity = now;
    }

    // Comma loop-call: one execution per token, failures aggregated.
    if let Some(pos) = entry.comma_position {
        if params.get(pos).map(|p| p.contains(',')).unwrap_or(false) {
            let tokens: Vec<String> = params[pos]
                .split(',')
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            for token in tokens {
                let mut sub = params.clone();
                sub[pos] = token;
                run_one(server, source, &entry, &sub);
            }
            return;
        }
    }

    run_one(server, source, &entry, &params);
}

fn run_one(
    server: &mut Server,
    source: UserId,
    entry: &CommandEntry,
    params: &[String],
) -> CmdResult {
    let result = entry.handler.handle(server, source, params);

    if result == CmdResult::Success && entry.routing != Routing::LocalOnly {
        let translated = translate_params(server, &entry.translation, params);
        let broadcast = matches!(entry.routing, Routing::Broadcast);
        server.propagate(source, entry.verb, translated, broadcast);
    }
    result
}

/// Apply the translation vector for peer forwarding: positions marked
/// `Nick` become UUIDs when the nick resolves.
fn translate_params(server: &Server, translation: &[Translate], params: &[String]) -> Vec<String> {
    params
        .iter()
        .enumerate()
        .map(|(i, p)| match translation.get(i) {
            Some(Translate::Nick) => server
                .users
                .find_nick(p)
                .and_then(|id| server.users.get(id))
                .map(|u| u.uuid.clone())
                .unwrap_or_else(|| p.clone()),
            _ => p.clone(),
        })
        .collect()
}
