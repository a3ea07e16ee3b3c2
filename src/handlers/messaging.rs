//! PRIVMSG and NOTICE delivery.

use std::rc::Rc;

use crate::modes::ModeTarget;
use crate::numeric;
use crate::server::{Routing, Server};
use crate::state::UserId;
use crate::util::irc_fold;

use super::{CmdResult, CommandEntry, CommandHandler, CommandRegistry, Translate};

pub fn register(registry: &mut CommandRegistry) {
    registry.register(
        CommandEntry::new("PRIVMSG", 2, Rc::new(MessageHandler { notice: false }))
            .routing(Routing::Unicast(0))
            .translation(vec![Translate::Nick, Translate::Text])
            .comma_list(0),
    );
    registry.register(
        CommandEntry::new("NOTICE", 2, Rc::new(MessageHandler { notice: true }))
            .routing(Routing::Unicast(0))
            .translation(vec![Translate::Nick, Translate::Text])
            .comma_list(0),
    );
}

struct MessageHandler {
    /// NOTICE semantics: never generate error replies.
    notice: bool,
}

impl MessageHandler {
    fn verb(&self) -> &'static str {
        if self.notice {
            "NOTICE"
        } else {
            "PRIVMSG"
        }
    }

    fn reject(&self, server: &mut Server, source: UserId, code: u16, params: &[&str], text: &str) -> CmdResult {
        if !self.notice {
            server.send_numeric(source, code, params, Some(text));
        }
        CmdResult::Failure
    }
}

impl CommandHandler for MessageHandler {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        let target = &params[0];
        let text = &params[1];
        if text.is_empty() {
            return self.reject(server, source, numeric::ERR_NOTEXTTOSEND, &[], "No text to send");
        }

        if target.starts_with('#') {
            self.to_channel(server, source, target, text)
        } else {
            self.to_user(server, source, target, text)
        }
    }
}

impl MessageHandler {
    fn to_channel(&self, server: &mut Server, source: UserId, target: &str, text: &str) -> CmdResult {
        let folded = irc_fold(target);
        let Some(display) = server.channels.get(&folded).map(|c| c.name.clone()) else {
            return self.reject(server, source, numeric::ERR_NOSUCHCHANNEL, &[target], "No such channel");
        };

        let is_member = server
            .channels
            .get(&folded)
            .map(|c| c.has_member(source))
            .unwrap_or(false);

        let flag_set = |name: &str| {
            server
                .modes
                .find_name(name, ModeTarget::Channel)
                .and_then(|m| server.modes.get(m).id)
                .map(|id| {
                    server
                        .channels
                        .get(&folded)
                        .map(|c| c.modes.is_set(id))
                        .unwrap_or(false)
                })
                .unwrap_or(false)
        };
        let no_external = flag_set("noextmsg");
        let moderated = flag_set("moderated");

        if !is_member && no_external {
            return self.reject(
                server,
                source,
                numeric::ERR_CANNOTSENDTOCHAN,
                &[&display],
                "Cannot send to channel (no external messages)",
            );
        }

        let rank = server
            .channels
            .get(&folded)
            .and_then(|c| c.member(source))
            .map(|m| server.modes.rank_of(&m.prefixes))
            .unwrap_or(0);

        if moderated && rank == 0 {
            return self.reject(
                server,
                source,
                numeric::ERR_CANNOTSENDTOCHAN,
                &[&display],
                "Cannot send to channel (+m)",
            );
        }

        if rank == 0 && super::channels::matching_ban(server, source, &folded).is_some() {
            return self.reject(
                server,
                source,
                numeric::ERR_CANNOTSENDTOCHAN,
                &[&display],
                "Cannot send to channel (you're banned)",
            );
        }

        let prefix = server.user_prefix(source);
        let line = format!(":{prefix} {} {display} :{text}", self.verb());
        server.write_channel(&folded, &line, Some(source));
        CmdResult::Success
    }

    fn to_user(&self, server: &mut Server, source: UserId, target: &str, text: &str) -> CmdResult {
        let Some(target_id) = server.users.find_nick(target) else {
            return self.reject(server, source, numeric::ERR_NOSUCHNICK, &[target], "No such nick");
        };

        let prefix = server.user_prefix(source);
        let target_nick = server.user_nick(target_id);
        let line = format!(":{prefix} {} {target_nick} :{text}", self.verb());
        if let Some(user) = server.users.get_mut(target_id) {
            user.send(line);
        }

        // Away auto-reply, PRIVMSG only.
        if !self.notice {
            let away = server.users.get(target_id).and_then(|u| u.away.clone());
            if let Some(message) = away {
                server.send_numeric(source, numeric::RPL_AWAY, &[&target_nick], Some(&message));
            }
        }
        CmdResult::Success
    }
}
