//! The server engine: one value owning all live state, driven from a
//! single task.
//!
//! Handlers, timers, watchers and hooks all run synchronously against
//! `&mut Server`; there are no suspension points inside command
//! execution and no locks. The network edge interacts with the engine
//! only through [`Server::handle_line`] and friends plus the per-user
//! send queues drained by [`Server::drain_sendq`].

use crate::clock::{TimerAction, TimerManager};
use crate::config::Config;
use crate::error::ConfigError;
use crate::events::{Event, EventRegistry, EventResult};
use crate::handlers::CommandRegistry;
use crate::logging::{LogLevel, LogManager};
use crate::message::Message;
use crate::modes::{ModeRegistry, ModeSubject, ModeTarget};
use crate::numeric;
use crate::security::XLineManager;
use crate::state::{ChannelStore, RegPhase, UidGenerator, User, UserId, UserStore};
use crate::util::irc_fold;

/// How a successfully executed command is forwarded to peer servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    LocalOnly,
    Broadcast,
    /// Route towards the server owning the entity named by this
    /// parameter index.
    Unicast(usize),
}

/// A propagation intent queued for the (external) link layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMessage {
    pub source_uuid: String,
    pub verb: String,
    pub params: Vec<String>,
    /// Target server glob for encapsulated payloads, empty otherwise.
    pub target: String,
    pub broadcast: bool,
}

pub struct Server {
    pub config: Config,
    pub logs: LogManager,
    pub timers: TimerManager<Server>,
    pub users: UserStore,
    pub channels: ChannelStore,
    pub modes: ModeRegistry,
    pub xlines: XLineManager,
    pub commands: CommandRegistry,
    pub events: EventRegistry,
    /// Propagation intents for the link layer, drained externally.
    pub peer_queue: Vec<PeerMessage>,
    uid_gen: UidGenerator,
    now: u64,
    server_user: UserId,
    cull: Vec<UserId>,
}

impl Server {
    /// Build an engine from a parsed config: registries populated with
    /// the core modes, x-line factories, commands and modules.
    pub fn new(config: Config) -> Server {
        let mut uid_gen = UidGenerator::new(config.server.sid.clone());
        let mut users = UserStore::new();

        // The engine's own identity, used as the source of
        // server-originated changes. Not a real connection.
        let server_name = config.server.name.clone();
        let server_uuid = uid_gen.next_uid();
        let server_user = users.create(|id| {
            let mut u = User::new(id, server_uuid, "127.0.0.1".into(), server_name.clone(), 0, false);
            u.ident = "server".into();
            u.realname = config.server.description.clone();
            u.phase = RegPhase::All;
            u.service = true;
            u
        });
        users.set_nick(server_user, &server_name);

        let mut server = Server {
            config,
            logs: LogManager::new(),
            timers: TimerManager::new(),
            users,
            channels: ChannelStore::new(),
            modes: ModeRegistry::new(),
            xlines: XLineManager::new(),
            commands: CommandRegistry::new(),
            events: EventRegistry::new(),
            peer_queue: Vec::new(),
            uid_gen,
            now: 0,
            server_user,
            cull: Vec::new(),
        };

        crate::modes::register_core_modes(&mut server.modes);
        crate::security::register_core_factories(&mut server.xlines);
        crate::handlers::register_core_commands(&mut server.commands);
        crate::modules::register_core_modules(&mut server);

        // X-line expiry rides the timer wheel, once per second.
        server.timers.add_timer(0, 1, true, Box::new(|s: &mut Server, now| {
            for line in s.xlines.expire(now) {
                if let Some(text) = line.expiry_text(now) {
                    s.snotice('x', &text);
                }
            }
            TimerAction::Continue
        }));

        server.logs.log("SERVER", LogLevel::Sparse, "engine initialised");
        server
    }

    /// The engine's monotonic second counter.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// The engine's own identity; source of server-originated changes.
    pub fn server_user(&self) -> UserId {
        self.server_user
    }

    pub fn server_name(&self) -> String {
        self.config.server.name.clone()
    }

    /// Advance the clock: fire timers, expire x-lines, run the cull
    /// pass. Called once per second by the runner (and directly by
    /// tests).
    pub fn tick(&mut self, now: u64) {
        self.now = self.now.max(now);

        let mut wheel = self.timers.split();
        for mut timer in wheel.due(now) {
            let action = (timer.callback)(self, now);
            if timer.repeating && action == TimerAction::Continue {
                wheel.rearm(timer, now);
            }
        }
        wheel.merge(std::mem::take(&mut self.timers));
        self.timers = wheel;

        self.cull_pass();
    }

    /// Destroy entities marked dead. Runs at the end of each loop
    /// iteration so references held during the iteration stayed valid.
    pub fn cull_pass(&mut self) {
        let dead = std::mem::take(&mut self.cull);
        for id in dead {
            if let Some(user) = self.users.remove(id) {
                self.logs.log(
                    "CULLLIST",
                    LogLevel::Debug,
                    &format!("culled user {} ({})", user.nick, user.uuid),
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // User lifecycle
    // ------------------------------------------------------------------

    /// Register a new local connection. Z-lines apply immediately; the
    /// returned id is dead-on-arrival if one matched (the rejection
    /// notice is queued on the send queue).
    pub fn accept_connection(&mut self, ip: &str, host: &str) -> UserId {
        let uuid = self.uid_gen.next_uid();
        let now = self.now;
        let (ip, host) = (ip.to_string(), host.to_string());
        let id = self
            .users
            .create(|id| User::new(id, uuid, ip, host, now, true));

        if self.xlines.matches_user("E", self.users.get(id).expect("just created")).is_none() {
            if let Some(line) = self
                .xlines
                .matches_user("Z", self.users.get(id).expect("just created"))
            {
                let reason = line.props().reason.clone();
                self.quit_user(id, &format!("Z-lined: {reason}"));
            }
        }
        id
    }

    /// Mark a user gone: QUIT to common channels, membership teardown,
    /// unindex, defer destruction to the cull pass.
    pub fn quit_user(&mut self, id: UserId, reason: &str) {
        let Some(user) = self.users.get(id) else {
            return;
        };
        if user.dead {
            return;
        }

        let prefix = self.user_prefix(id);
        let line = format!(":{prefix} QUIT :{reason}");
        self.write_common_channels(id, &line, false);
        if let Some(user) = self.users.get_mut(id) {
            user.send(format!("ERROR :Closing connection: {reason}"));
        }

        let channels: Vec<String> = self
            .users
            .get(id)
            .map(|u| u.channels.iter().cloned().collect())
            .unwrap_or_default();
        for chan in channels {
            self.remove_membership(id, &chan);
        }

        let nick = self.users.get(id).map(|u| u.nick.clone()).unwrap_or_default();
        self.logs.log(
            "USERS",
            LogLevel::Verbose,
            &format!("{nick} quit: {reason}"),
        );
        self.users.mark_dead(id);
        self.cull.push(id);
    }

    /// Drop one membership edge; destroys the channel when the last
    /// member leaves.
    pub fn remove_membership(&mut self, id: UserId, chan_folded: &str) {
        if let Some(user) = self.users.get_mut(id) {
            user.channels.remove(chan_folded);
        }
        let emptied = match self.channels.get_mut(chan_folded) {
            Some(chan) => {
                chan.members.remove(&id);
                chan.members.is_empty()
            }
            None => false,
        };
        if emptied {
            let mut event = Event {
                name: "channel/destroy",
                source: self.server_user,
                args: vec![chan_folded.to_string()],
            };
            self.fire_event(&mut event);
            self.channels.remove(chan_folded);
        }
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    /// The prefix other users see for lines from `id`; the server's own
    /// identity speaks as the bare server name.
    pub fn user_prefix(&self, id: UserId) -> String {
        if id == self.server_user {
            return self.config.server.name.clone();
        }
        self.users
            .get(id)
            .map(|u| u.hostmask())
            .unwrap_or_else(|| self.config.server.name.clone())
    }

    pub fn user_nick(&self, id: UserId) -> String {
        self.users
            .get(id)
            .map(|u| {
                if u.nick == "*" && !u.registered() {
                    "*".to_string()
                } else {
                    u.nick.clone()
                }
            })
            .unwrap_or_else(|| "*".into())
    }

    /// Queue a numeric reply to a user.
    pub fn send_numeric(&mut self, id: UserId, code: u16, params: &[&str], trailing: Option<&str>) {
        let nick = self.user_nick(id);
        let line = numeric::reply(&self.config.server.name, code, &nick, params, trailing);
        if let Some(user) = self.users.get_mut(id) {
            user.send(line);
        }
    }

    /// Queue a server NOTICE to a user.
    pub fn send_notice(&mut self, id: UserId, text: &str) {
        let nick = self.user_nick(id);
        let server = self.config.server.name.clone();
        if let Some(user) = self.users.get_mut(id) {
            user.send(format!(":{server} NOTICE {nick} :{text}"));
        }
    }

    /// One constructed line to every local member of a channel.
    pub fn write_channel(&mut self, chan_folded: &str, line: &str, exclude: Option<UserId>) {
        let members: Vec<UserId> = self
            .channels
            .get(chan_folded)
            .map(|c| c.members.keys().copied().collect())
            .unwrap_or_default();
        for id in members {
            if Some(id) == exclude {
                continue;
            }
            if let Some(user) = self.users.get_mut(id) {
                user.send(line.to_string());
            }
        }
    }

    /// One line to every user sharing a channel with `id`, once each.
    pub fn write_common_channels(&mut self, id: UserId, line: &str, include_self: bool) {
        let mut seen: Vec<UserId> = Vec::new();
        let channels: Vec<String> = self
            .users
            .get(id)
            .map(|u| u.channels.iter().cloned().collect())
            .unwrap_or_default();
        for chan in channels {
            let members: Vec<UserId> = self
                .channels
                .get(&chan)
                .map(|c| c.members.keys().copied().collect())
                .unwrap_or_default();
            for member in members {
                if member == id || seen.contains(&member) {
                    continue;
                }
                seen.push(member);
                if let Some(user) = self.users.get_mut(member) {
                    user.send(line.to_string());
                }
            }
        }
        if include_self {
            if let Some(user) = self.users.get_mut(id) {
                user.send(line.to_string());
            }
        }
    }

    /// Server notice: fan out to the log and to local opers subscribed
    /// to the snomask letter.
    pub fn snotice(&mut self, mask: char, text: &str) {
        self.logs
            .log("SNOTICE", LogLevel::Default, &format!("[{mask}] {text}"));

        let server = self.config.server.name.clone();
        let recipients: Vec<UserId> = self
            .users
            .iter()
            .filter(|u| u.local && u.is_oper() && u.snomasks.contains(&mask))
            .map(|u| u.id)
            .collect();
        for id in recipients {
            let nick = self.user_nick(id);
            if let Some(user) = self.users.get_mut(id) {
                user.send(format!(":{server} NOTICE {nick} :*** {text}"));
            }
        }
    }

    /// Drain every local user's send queue: `(user, lines)` pairs for
    /// the transport to write.
    pub fn drain_sendq(&mut self) -> Vec<(UserId, Vec<String>)> {
        let mut out = Vec::new();
        for user in self.users.iter_mut() {
            if !user.sendq.is_empty() {
                out.push((user.id, user.sendq.drain(..).collect()));
            }
        }
        out
    }

    /// Test/diagnostic helper: this user's queued lines.
    pub fn take_output(&mut self, id: UserId) -> Vec<String> {
        self.users
            .get_mut(id)
            .map(|u| u.sendq.drain(..).collect())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Events and dispatch
    // ------------------------------------------------------------------

    /// Invoke subscribed listeners in registration order; first
    /// non-passthrough result wins.
    pub fn fire_event(&mut self, event: &mut Event) -> EventResult {
        for listener in self.events.listeners(event.name) {
            match listener.on_event(self, event) {
                EventResult::Passthru => continue,
                other => return other,
            }
        }
        EventResult::Passthru
    }

    /// Parse and dispatch one line from a connection.
    pub fn handle_line(&mut self, source: UserId, line: &str) {
        if self.logs.raw_log() {
            self.logs
                .log("USERINPUT", LogLevel::Rawio, &format!("{:?} {line}", source));
        }
        match Message::parse(line) {
            Ok(msg) => crate::handlers::dispatch(self, source, msg),
            Err(crate::message::ParseError::Empty) => {}
            Err(err) => {
                self.logs.log(
                    "USERINPUT",
                    LogLevel::Debug,
                    &format!("unparseable line from {source:?}: {err}"),
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // X-line application
    // ------------------------------------------------------------------

    /// Add an x-line, announce it, and apply it to connected users when
    /// the kind auto-applies. E-line exemptions are honoured.
    pub fn add_xline(
        &mut self,
        line: Box<dyn crate::security::XLine>,
        setter: UserId,
    ) -> Result<(), crate::error::XLineError> {
        let kind = line.kind().to_string();
        let display = line.displayable();
        let duration = line.props().duration;
        let reason = line.props().reason.clone();
        self.xlines.add_line(line)?;

        let setter_nick = self.user_nick(setter);
        if duration == 0 {
            self.snotice(
                'x',
                &format!("{setter_nick} added permanent {kind}-line for {display}: {reason}"),
            );
        } else {
            self.snotice(
                'x',
                &format!(
                    "{setter_nick} added timed {kind}-line for {display}, expires in {}: {reason}",
                    crate::util::duration_string(duration)
                ),
            );
        }
        self.logs.log(
            "XLINE",
            LogLevel::Default,
            &format!("{setter_nick} added {kind}-line on {display}"),
        );

        if self.xlines.auto_applies(&kind) {
            self.apply_xline_to_users(&kind);
        }
        Ok(())
    }

    /// Walk the user table and disconnect everyone matching an active
    /// line of this kind, unless exempted.
    fn apply_xline_to_users(&mut self, kind: &str) {
        let victims: Vec<(UserId, String)> = self
            .users
            .iter()
            .filter(|u| u.local && !u.dead && !u.service)
            .filter(|u| self.xlines.matches_user("E", u).is_none())
            .filter_map(|u| {
                self.xlines
                    .matches_user(kind, u)
                    .map(|l| (u.id, l.props().reason.clone()))
            })
            .collect();
        for (id, reason) in victims {
            self.quit_user(id, &format!("{kind}-lined: {reason}"));
        }
    }

    /// Gate run when a connection finishes registering: K/G/Z-lines
    /// unless an E-line exempts. True means the user survived.
    pub fn check_connect_xlines(&mut self, id: UserId) -> bool {
        let Some(user) = self.users.get(id) else {
            return false;
        };
        if self.xlines.matches_user("E", user).is_some() {
            return true;
        }
        for kind in ["K", "G", "Z"] {
            if let Some(line) = self.xlines.matches_user(kind, user) {
                let reason = line.props().reason.clone();
                self.quit_user(id, &format!("{kind}-lined: {reason}"));
                return false;
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Propagation intents
    // ------------------------------------------------------------------

    /// Queue a command for peer propagation, after argument translation.
    pub fn propagate(&mut self, source: UserId, verb: &str, params: Vec<String>, broadcast: bool) {
        let source_uuid = self
            .users
            .get(source)
            .map(|u| u.uuid.clone())
            .unwrap_or_default();
        self.peer_queue.push(PeerMessage {
            source_uuid,
            verb: verb.to_string(),
            params,
            target: String::new(),
            broadcast,
        });
    }

    /// Encapsulation primitive used by services protocols: deliver
    /// `subcommand` to servers matching `target_glob`.
    pub fn send_encapsulated_data(&mut self, target_glob: &str, subcommand: &str, params: Vec<String>) {
        let mut full = vec![target_glob.to_string(), subcommand.to_string()];
        full.extend(params);
        self.peer_queue.push(PeerMessage {
            source_uuid: self.users.get(self.server_user).map(|u| u.uuid.clone()).unwrap_or_default(),
            verb: "ENCAP".into(),
            params: full,
            target: target_glob.to_string(),
            broadcast: false,
        });
    }

    // ------------------------------------------------------------------
    // Mode registry maintenance
    // ------------------------------------------------------------------

    /// Delete a mode handler: every entity holding the mode sees an
    /// internal `-mode` change first, then the slot is freed.
    pub fn del_mode(&mut self, mode: crate::modes::ModeRef) -> bool {
        let Some(handler) = self.modes.try_get(mode) else {
            return false;
        };
        let target = handler.target;
        let letter = handler.letter;
        let id = handler.id;
        let is_prefix = handler.is_prefix();
        let is_list = handler.is_list();
        let needs_unset_param = handler.needs_param(false);
        let server_user = self.server_user;

        match target {
            ModeTarget::User => {
                for uid in self.users.ids() {
                    let Some(id) = id else { break };
                    let set = self.users.get(uid).map(|u| u.modes.is_set(id)).unwrap_or(false);
                    if set {
                        let mut changes = crate::modes::ChangeList::new();
                        changes.push_remove(mode, "");
                        crate::modes::process(
                            self,
                            server_user,
                            &ModeSubject::User(uid),
                            &mut changes,
                            crate::modes::ProcessFlags { local_only: true, ..Default::default() },
                        );
                    }
                }
            }
            ModeTarget::Channel => {
                // Snapshot: removals may empty (and destroy) channels.
                for name in self.channels.names() {
                    let mut changes = crate::modes::ChangeList::new();
                    if is_prefix {
                        let holders: Vec<String> = self
                            .channels
                            .get(&name)
                            .map(|c| {
                                c.members
                                    .iter()
                                    .filter(|(_, m)| m.has_prefix(letter))
                                    .filter_map(|(uid, _)| self.users.get(*uid).map(|u| u.nick.clone()))
                                    .collect()
                            })
                            .unwrap_or_default();
                        for nick in holders {
                            changes.push_remove(mode, nick);
                        }
                    } else if is_list {
                        let masks: Vec<String> = self
                            .channels
                            .get(&name)
                            .map(|c| c.list(letter).iter().map(|e| e.mask.clone()).collect())
                            .unwrap_or_default();
                        for mask in masks {
                            changes.push_remove(mode, mask);
                        }
                    } else if let Some(id) = id {
                        let (set, param) = self
                            .channels
                            .get(&name)
                            .map(|c| {
                                (
                                    c.modes.is_set(id),
                                    c.modes.param(id).unwrap_or("").to_string(),
                                )
                            })
                            .unwrap_or((false, String::new()));
                        if set {
                            changes.push_remove(mode, if needs_unset_param { param } else { String::new() });
                        }
                    }

                    if !changes.is_empty() {
                        crate::modes::process(
                            self,
                            server_user,
                            &ModeSubject::Channel(irc_fold(&name)),
                            &mut changes,
                            crate::modes::ProcessFlags { local_only: true, ..Default::default() },
                        );
                    }
                }
            }
        }

        self.modes.remove(mode).is_some()
    }

    // ------------------------------------------------------------------
    // Rehash
    // ------------------------------------------------------------------

    /// Re-read the config file. On failure the previous configuration
    /// stays in place and the error is returned for reporting.
    pub fn rehash(&mut self) -> Result<(), ConfigError> {
        let path = self.config.path().to_path_buf();
        match Config::load(&path) {
            Ok(config) => {
                self.config = config;
                self.logs.log("CONFIG", LogLevel::Sparse, "rehash complete");
                let mut event = Event {
                    name: "config/rehash",
                    source: self.server_user,
                    args: Vec::new(),
                };
                self.fire_event(&mut event);
                Ok(())
            }
            Err(err) => {
                self.logs.log(
                    "CONFIG",
                    LogLevel::Sparse,
                    &format!("rehash failed, keeping previous configuration: {err}"),
                );
                Err(err)
            }
        }
    }
}
