//! Connection registration and session commands: NICK, USER, PASS,
//! PING, PONG, QUIT, OPER.

use std::rc::Rc;

use crate::events::{Event, EventResult};
use crate::logging::LogLevel;
use crate::modes::ModeTarget;
use crate::numeric;
use crate::server::Server;
use crate::state::{OperInfo, RegPhase, UserId};
use crate::util::{irc_eq, is_valid_ident, is_valid_nick, wildcard_match};

use super::{CmdAccess, CmdResult, CommandEntry, CommandHandler, CommandRegistry};

pub fn register(registry: &mut CommandRegistry) {
    registry.register(
        CommandEntry::new("NICK", 0, Rc::new(NickHandler))
            .access(CmdAccess::Anyone)
            .pre_reg(),
    );
    registry.register(
        CommandEntry::new("USER", 4, Rc::new(UserHandler))
            .access(CmdAccess::Anyone)
            .pre_reg(),
    );
    registry.register(
        CommandEntry::new("PASS", 1, Rc::new(PassHandler))
            .access(CmdAccess::Anyone)
            .pre_reg(),
    );
    registry.register(
        CommandEntry::new("PING", 0, Rc::new(PingHandler))
            .access(CmdAccess::Anyone)
            .pre_reg(),
    );
    registry.register(
        CommandEntry::new("PONG", 0, Rc::new(PongHandler))
            .access(CmdAccess::Anyone)
            .pre_reg(),
    );
    registry.register(
        CommandEntry::new("QUIT", 0, Rc::new(QuitHandler))
            .access(CmdAccess::Anyone)
            .pre_reg(),
    );
    registry.register(CommandEntry::new("OPER", 2, Rc::new(OperHandler)));
}

struct NickHandler;

impl CommandHandler for NickHandler {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        let Some(new_nick) = params.first().filter(|n| !n.is_empty()) else {
            server.send_numeric(
                source,
                numeric::ERR_NONICKNAMEGIVEN,
                &[],
                Some("No nickname given"),
            );
            return CmdResult::Failure;
        };

        if !is_valid_nick(new_nick, server.config.limits.max_nick) {
            server.send_numeric(
                source,
                numeric::ERR_ERRONEUSNICKNAME,
                &[new_nick],
                Some("Erroneous nickname"),
            );
            return CmdResult::Failure;
        }

        // Pre-nick listeners (SVSHOLD) report their own numerics.
        let mut event = Event {
            name: "user/pre-nick",
            source,
            args: vec![new_nick.clone()],
        };
        if matches!(server.fire_event(&mut event), EventResult::Deny(_)) {
            return CmdResult::Failure;
        }

        let current_nick = server.user_nick(source);
        if let Some(holder) = server.users.find_nick(new_nick) {
            // A pure case change of one's own nick is allowed.
            if holder != source {
                server.send_numeric(
                    source,
                    numeric::ERR_NICKNAMEINUSE,
                    &[new_nick],
                    Some("Nickname is already in use"),
                );
                return CmdResult::Failure;
            }
            if current_nick == *new_nick {
                return CmdResult::Success;
            }
        }

        let was_registered = server
            .users
            .get(source)
            .map(|u| u.registered())
            .unwrap_or(false);

        if was_registered {
            let prefix = server.user_prefix(source);
            let line = format!(":{prefix} NICK :{new_nick}");
            server.write_common_channels(source, &line, true);
        }

        server.users.set_nick(source, new_nick);

        if !was_registered {
            if let Some(user) = server.users.get_mut(source) {
                user.phase = match user.phase {
                    RegPhase::None | RegPhase::Nick => RegPhase::Nick,
                    RegPhase::User | RegPhase::All => user.phase,
                };
            }
            try_complete_registration(server, source);
        }
        CmdResult::Success
    }
}

struct UserHandler;

impl CommandHandler for UserHandler {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        if server.users.get(source).map(|u| u.registered()).unwrap_or(false) {
            server.send_numeric(
                source,
                numeric::ERR_ALREADYREGISTERED,
                &[],
                Some("You may not reregister"),
            );
            return CmdResult::Failure;
        }

        let ident = &params[0];
        let realname = &params[3];
        if !is_valid_ident(ident, server.config.limits.max_user) {
            server.send_numeric(
                source,
                numeric::ERR_NEEDMOREPARAMS,
                &["USER"],
                Some("Your username is not valid"),
            );
            return CmdResult::Failure;
        }

        if let Some(user) = server.users.get_mut(source) {
            user.ident = ident.clone();
            user.realname = realname.clone();
            user.phase = match user.phase {
                RegPhase::None | RegPhase::User => RegPhase::User,
                RegPhase::Nick | RegPhase::All => user.phase,
            };
        }
        try_complete_registration(server, source);
        CmdResult::Success
    }
}

struct PassHandler;

impl CommandHandler for PassHandler {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        if server.users.get(source).map(|u| u.registered()).unwrap_or(false) {
            server.send_numeric(
                source,
                numeric::ERR_ALREADYREGISTERED,
                &[],
                Some("You may not reregister"),
            );
            return CmdResult::Failure;
        }
        if let Some(user) = server.users.get_mut(source) {
            user.password = Some(params[0].clone());
        }
        CmdResult::Success
    }
}

struct PingHandler;

impl CommandHandler for PingHandler {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        let Some(token) = params.first() else {
            server.send_numeric(source, numeric::ERR_NOORIGIN, &[], Some("No origin specified"));
            return CmdResult::Failure;
        };
        let name = server.server_name();
        let line = format!(":{name} PONG {name} :{token}");
        if let Some(user) = server.users.get_mut(source) {
            user.send(line);
        }
        CmdResult::Success
    }
}

struct PongHandler;

impl CommandHandler for PongHandler {
    fn handle(&self, _server: &mut Server, _source: UserId, _params: &[String]) -> CmdResult {
        // Activity is stamped by the dispatcher; nothing else to do.
        CmdResult::Success
    }
}

struct QuitHandler;

impl CommandHandler for QuitHandler {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        let reason = params
            .first()
            .map(|r| format!("Quit: {r}"))
            .unwrap_or_else(|| "Client exited".to_string());
        server.quit_user(source, &reason);
        CmdResult::Success
    }
}

struct OperHandler;

impl CommandHandler for OperHandler {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        let (name, password) = (&params[0], &params[1]);
        let ident_host = server
            .users
            .get(source)
            .map(|u| format!("{}@{}", u.ident, u.real_host))
            .unwrap_or_default();

        let block = server.config.opers.iter().find(|o| {
            irc_eq(&o.name, name)
                && o.password == *password
                && (o.hosts.is_empty() || o.hosts.iter().any(|h| wildcard_match(h, &ident_host)))
        });

        let Some(block) = block.cloned() else {
            let nick = server.user_nick(source);
            server.send_numeric(
                source,
                numeric::ERR_PASSWDMISMATCH,
                &[],
                Some("Invalid oper credentials"),
            );
            server.snotice('o', &format!("Failed OPER attempt as {name} by {nick} ({ident_host})"));
            return CmdResult::Failure;
        };

        let info = Rc::new(OperInfo { name: block.name.clone(), oper_type: block.oper_type.clone() });
        let oper_mode = server.modes.find_name("oper", ModeTarget::User);
        if let Some(user) = server.users.get_mut(source) {
            user.oper = Some(info);
            if let Some(id) = oper_mode.and_then(|m| server.modes.try_get(m)).and_then(|h| h.id) {
                user.modes.set(id, true);
            }
        }

        let nick = server.user_nick(source);
        let prefix = server.user_prefix(source);
        if let Some(user) = server.users.get_mut(source) {
            user.send(format!(":{prefix} MODE {nick} +o"));
        }
        server.send_numeric(
            source,
            numeric::RPL_YOUREOPER,
            &[],
            Some(&format!("You are now an IRC operator of type {}", block.oper_type)),
        );
        server.snotice(
            'o',
            &format!("{nick} ({ident_host}) is now an IRC operator of type {}", block.oper_type),
        );
        server.logs.log(
            "OPER",
            LogLevel::Default,
            &format!("{nick} opered up using block {}", block.name),
        );
        CmdResult::Success
    }
}

/// Promote to fully-registered once both NICK and USER are in, gate on
/// connect x-lines, then send the welcome burst.
fn try_complete_registration(server: &mut Server, source: UserId) {
    let ready = server
        .users
        .get(source)
        .map(|u| !u.registered() && u.nick != "*" && !u.ident.is_empty())
        .unwrap_or(false);
    if !ready {
        return;
    }

    if let Some(user) = server.users.get_mut(source) {
        user.phase = RegPhase::All;
    }

    if !server.check_connect_xlines(source) {
        return;
    }

    let network = server.config.server.network.clone();
    let name = server.server_name();
    let mask = server.user_prefix(source);
    let nick = server.user_nick(source);

    server.send_numeric(
        source,
        numeric::RPL_WELCOME,
        &[],
        Some(&format!("Welcome to the {network} IRC Network {mask}")),
    );
    server.send_numeric(
        source,
        numeric::RPL_YOURHOST,
        &[],
        Some(&format!("Your host is {name}, running version ferrod-{}", env!("CARGO_PKG_VERSION"))),
    );
    server.send_numeric(
        source,
        numeric::RPL_CREATED,
        &[],
        Some("This server was created for you"),
    );

    let user_modes = mode_letters(server, ModeTarget::User);
    let chan_modes = mode_letters(server, ModeTarget::Channel);
    server.send_numeric(
        source,
        numeric::RPL_MYINFO,
        &[&name, concat!("ferrod-", env!("CARGO_PKG_VERSION")), &user_modes, &chan_modes],
        None,
    );

    server.logs.log(
        "USERS",
        LogLevel::Verbose,
        &format!("{nick} completed registration"),
    );
}

fn mode_letters(server: &Server, target: ModeTarget) -> String {
    let mut letters: Vec<char> = server
        .modes
        .all(target)
        .into_iter()
        .map(|m| server.modes.get(m).letter)
        .collect();
    letters.sort_unstable();
    letters.into_iter().collect()
}
