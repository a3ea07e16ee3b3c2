//! SHUN: prevent a user from executing commands without disconnecting
//! them.
//!
//! A shun is an x-line matched against the full `nick!ident@host` mask.
//! Enforcement happens in a pre-command hook: shunned users may only
//! run the configured command whitelist, and a few commands have their
//! parameters cleaned (AWAY and QUIT lose their message, PART keeps
//! only the channel). Configured by `<shun>`:
//!
//! ```text
//! <shun enabledcommands="ADMIN OPER PING PONG QUIT"
//!       cleanedcommands="AWAY PART QUIT"
//!       allowtags="no" allowconnect="no" notifyuser="yes">
//! ```

use std::rc::Rc;

use crate::error::XLineError;
use crate::events::{Event, EventListener, EventResult, ModResult, PreCommandHook};
use crate::handlers::{CmdAccess, CmdResult, CommandEntry, CommandHandler};
use crate::modes::clean_mask;
use crate::security::{XLine, XLineFactory, XLineProps};
use crate::server::{Routing, Server};
use crate::state::{User, UserId};
use crate::util::{parse_duration, wildcard_match};

/// A shun entry: a cleaned `nick!ident@host` mask.
struct ShunLine {
    props: XLineProps,
    mask: String,
}

impl XLine for ShunLine {
    fn kind(&self) -> &'static str {
        "SHUN"
    }

    fn props(&self) -> &XLineProps {
        &self.props
    }

    fn matches_user(&self, user: &User) -> bool {
        let masks = [
            user.hostmask(),
            format!("{}!{}@{}", user.nick, user.ident, user.real_host),
            format!("{}!{}@{}", user.nick, user.ident, user.ip),
        ];
        masks.iter().any(|m| wildcard_match(&self.mask, m))
    }

    fn matches_str(&self, s: &str) -> bool {
        wildcard_match(&self.mask, s) || self.mask.eq_ignore_ascii_case(s)
    }

    fn displayable(&self) -> String {
        self.mask.clone()
    }
}

struct ShunFactory;

impl XLineFactory for ShunFactory {
    fn kind(&self) -> &'static str {
        "SHUN"
    }

    fn generate(&self, props: XLineProps, pattern: &str) -> Result<Box<dyn XLine>, XLineError> {
        if pattern.is_empty() {
            return Err(XLineError::BadPattern { kind: "SHUN".into(), mask: pattern.into() });
        }
        Ok(Box::new(ShunLine { props, mask: clean_mask(pattern) }))
    }

    /// A shun gates commands; it never disconnects on add.
    fn auto_apply(&self) -> bool {
        false
    }
}

/// The command gate.
struct ShunHook;

impl ShunHook {
    fn is_shunned(&self, server: &Server, source: UserId, allow_connect: bool) -> bool {
        let Some(user) = server.users.get(source) else {
            return false;
        };
        if !user.local || user.service {
            return false;
        }
        // Not-yet-registered users may be exempted from shuns.
        if allow_connect && !user.registered() {
            return false;
        }
        if user.is_oper() {
            return false;
        }
        server.xlines.matches_user("SHUN", user).is_some()
    }
}

impl PreCommandHook for ShunHook {
    fn on_pre_command(
        &self,
        server: &mut Server,
        source: UserId,
        verb: &str,
        params: &mut Vec<String>,
        tags: &mut Vec<(String, Option<String>)>,
    ) -> ModResult {
        let tag = server.config.value("shun");
        let allow_connect = tag.get_bool("allowconnect", false);
        if !self.is_shunned(server, source, allow_connect) {
            return ModResult::Passthru;
        }

        let enabled = tag.get_string("enabledcommands", "ADMIN OPER PING PONG QUIT");
        let cleaned = tag.get_string("cleanedcommands", "AWAY PART QUIT");
        let allow_tags = tag.get_bool("allowtags", false);
        let notify = tag.get_bool("notifyuser", true);

        let listed = |list: &str| list.split_whitespace().any(|c| c.eq_ignore_ascii_case(verb));

        if !listed(&enabled) {
            if notify {
                server.send_notice(
                    source,
                    &format!("*** {verb} command not processed as you have been blocked from issuing commands."),
                );
            }
            return ModResult::Deny;
        }

        if !allow_tags {
            // Client-only tags are dropped from shunned users.
            tags.retain(|(name, _)| !name.starts_with('+'));
        }

        if listed(&cleaned) {
            match verb.to_ascii_uppercase().as_str() {
                // AWAY only for unsetting, QUIT without a message.
                "AWAY" | "QUIT" => params.clear(),
                // PART keeps the channel but drops the message.
                "PART" => params.truncate(1),
                _ => {}
            }
        }

        ModResult::Passthru
    }
}

/// `SHUN <nick|mask> [<duration>] :<reason>` / `SHUN <mask>` to remove.
struct ShunCommand;

impl CommandHandler for ShunCommand {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        // A connected nick shuns the address, not the nick.
        let target = match server.users.find_nick(&params[0]).and_then(|id| server.users.get(id)) {
            Some(user) if user.registered() => format!("*!*@{}", user.ip),
            _ => params[0].clone(),
        };
        let nick = server.user_nick(source);

        if params.len() == 1 {
            let removed = server
                .xlines
                .del_line("SHUN", &params[0])
                .or_else(|| server.xlines.del_line("SHUN", &target));
            return match removed {
                Some(line) => {
                    server.snotice(
                        'x',
                        &format!("{nick} removed SHUN on {}: {}", line.displayable(), line.props().reason),
                    );
                    CmdResult::Success
                }
                None => {
                    server.send_notice(source, &format!("*** Shun {} not found on the list.", params[0]));
                    CmdResult::Failure
                }
            };
        }

        let (duration, reason) = if params.len() > 2 {
            let Some(duration) = parse_duration(&params[1]) else {
                server.send_notice(source, "*** Invalid duration for SHUN.");
                return CmdResult::Failure;
            };
            (duration, params[2].clone())
        } else {
            (0, params[1].clone())
        };

        let props = XLineProps { set_time: server.now(), duration, source: nick, reason };
        let line = match server.xlines.make_line("SHUN", props, &target) {
            Ok(line) => line,
            Err(err) => {
                server.send_notice(source, &format!("*** {err}"));
                return CmdResult::Failure;
            }
        };
        match server.add_xline(line, source) {
            Ok(()) => CmdResult::Success,
            Err(_) => {
                server.send_notice(source, &format!("*** Shun for {target} already exists."));
                CmdResult::Failure
            }
        }
    }
}

/// `STATS H` lists active shuns.
struct ShunStats;

impl EventListener for ShunStats {
    fn on_event(&self, server: &mut Server, event: &mut Event) -> EventResult {
        if event.args.first().map(String::as_str) != Some("H") {
            return EventResult::Passthru;
        }
        crate::handlers::emit_xline_stats(server, event.source, "SHUN");
        EventResult::Handled
    }
}

pub fn init(server: &mut Server) {
    server.xlines.register_factory(Rc::new(ShunFactory));
    server.events.register_pre_command(Rc::new(ShunHook));
    server.events.subscribe("server/stats", Rc::new(ShunStats));
    server.commands.register(
        CommandEntry::new("SHUN", 1, Rc::new(ShunCommand))
            .access(CmdAccess::Operator)
            .routing(Routing::Broadcast),
    );
}
