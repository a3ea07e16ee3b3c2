//! The MODE command: display and change user or channel modes.

use std::rc::Rc;

use crate::modes::{self, ModeSubject, ModeTarget, ProcessFlags};
use crate::numeric;
use crate::server::{Routing, Server};
use crate::state::UserId;
use crate::util::{irc_eq, irc_fold};

use super::{CmdResult, CommandEntry, CommandHandler, CommandRegistry};

pub fn register(registry: &mut CommandRegistry) {
    registry.register(CommandEntry::new("MODE", 1, Rc::new(ModeHandler)).routing(Routing::Broadcast));
}

struct ModeHandler;

impl CommandHandler for ModeHandler {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        let target = &params[0];
        if target.starts_with('#') {
            self.channel_mode(server, source, target, &params[1..])
        } else {
            self.user_mode(server, source, target, &params[1..])
        }
    }
}

impl ModeHandler {
    fn channel_mode(
        &self,
        server: &mut Server,
        source: UserId,
        target: &str,
        args: &[String],
    ) -> CmdResult {
        let folded = irc_fold(target);
        let Some(display) = server.channels.get(&folded).map(|c| c.name.clone()) else {
            server.send_numeric(source, numeric::ERR_NOSUCHCHANNEL, &[target], Some("No such channel"));
            return CmdResult::Failure;
        };

        if args.is_empty() {
            self.show_channel_modes(server, source, &folded, &display);
            return CmdResult::Success;
        }

        let mut changes = modes::modes_from_params(server, source, ModeTarget::Channel, args);
        if changes.is_empty() {
            return CmdResult::Failure;
        }

        // A list mode with no parameter is a query, not a change.
        let mut kept = modes::ChangeList::new();
        for i in 0..changes.len() {
            let change = changes.get(i).expect("index in range").clone();
            let is_list_query = change.param.is_empty()
                && server
                    .modes
                    .try_get(change.mode)
                    .map(|h| h.is_list())
                    .unwrap_or(false);
            if is_list_query {
                self.show_list(server, source, &folded, &display, change.mode);
            } else {
                kept.push(change.mode, change.adding, change.param);
            }
        }
        if kept.is_empty() {
            return CmdResult::Success;
        }

        let local = server.users.get(source).map(|u| u.local).unwrap_or(false);
        let subject = ModeSubject::Channel(folded);
        modes::process(
            server,
            source,
            &subject,
            &mut kept,
            ProcessFlags { check_access: local, ..Default::default() },
        );
        CmdResult::Success
    }

    fn show_channel_modes(&self, server: &mut Server, source: UserId, folded: &str, display: &str) {
        let Some(chan) = server.channels.get(folded) else {
            return;
        };
        let mut letters = String::from("+");
        let mut params: Vec<String> = Vec::new();
        let is_member = chan.has_member(source);

        let mut handlers: Vec<(char, Option<String>)> = Vec::new();
        for mode in server.modes.all(ModeTarget::Channel) {
            let h = server.modes.get(mode);
            let Some(id) = h.id else { continue };
            if chan.modes.is_set(id) {
                let param = chan.modes.param(id).map(str::to_string);
                handlers.push((h.letter, param));
            }
        }
        handlers.sort_by_key(|&(letter, _)| letter);
        for (letter, param) in handlers {
            letters.push(letter);
            if let Some(param) = param {
                // Keys are secret to non-members.
                if letter == 'k' && !is_member {
                    params.push("<key>".into());
                } else {
                    params.push(param);
                }
            }
        }

        let created = chan.created.to_string();
        let mut reply_params: Vec<&str> = vec![display, &letters];
        let param_refs: Vec<&str> = params.iter().map(String::as_str).collect();
        reply_params.extend(param_refs);
        server.send_numeric(source, numeric::RPL_CHANNELMODEIS, &reply_params, None);
        server.send_numeric(source, numeric::RPL_CREATIONTIME, &[display, &created], None);
    }

    fn show_list(
        &self,
        server: &mut Server,
        source: UserId,
        folded: &str,
        display: &str,
        mode: modes::ModeRef,
    ) {
        let letter = server.modes.get(mode).letter;
        let entries: Vec<(String, String, u64)> = server
            .channels
            .get(folded)
            .map(|c| {
                c.list(letter)
                    .iter()
                    .map(|e| (e.mask.clone(), e.set_by.clone(), e.set_at))
                    .collect()
            })
            .unwrap_or_default();
        for (mask, set_by, set_at) in entries {
            server.send_numeric(
                source,
                numeric::RPL_BANLIST,
                &[display, &mask, &set_by, &set_at.to_string()],
                None,
            );
        }
        server.send_numeric(
            source,
            numeric::RPL_ENDOFBANLIST,
            &[display],
            Some("End of channel ban list"),
        );
    }

    fn user_mode(
        &self,
        server: &mut Server,
        source: UserId,
        target: &str,
        args: &[String],
    ) -> CmdResult {
        let Some(target_id) = server.users.find_nick(target) else {
            server.send_numeric(source, numeric::ERR_NOSUCHNICK, &[target], Some("No such nick"));
            return CmdResult::Failure;
        };

        let source_nick = server.user_nick(source);
        let is_self = irc_eq(&source_nick, target) || target_id == source;
        let source_is_server = source == server.server_user()
            || server.users.get(source).map(|u| u.service).unwrap_or(false);
        if !is_self && !source_is_server {
            server.send_numeric(
                source,
                numeric::ERR_USERSDONTMATCH,
                &[],
                Some("Can't change mode for other users"),
            );
            return CmdResult::Failure;
        }

        if args.is_empty() {
            let mut letters = String::from("+");
            let mut set: Vec<char> = Vec::new();
            if let Some(user) = server.users.get(target_id) {
                for mode in server.modes.all(ModeTarget::User) {
                    let h = server.modes.get(mode);
                    if let Some(id) = h.id {
                        if user.modes.is_set(id) {
                            set.push(h.letter);
                        }
                    }
                }
            }
            set.sort_unstable();
            letters.extend(set);
            server.send_numeric(source, numeric::RPL_UMODEIS, &[&letters], None);
            return CmdResult::Success;
        }

        let mut changes = modes::modes_from_params(server, source, ModeTarget::User, args);
        if changes.is_empty() {
            return CmdResult::Failure;
        }
        let subject = ModeSubject::User(target_id);
        modes::process(server, source, &subject, &mut changes, ProcessFlags::default());
        CmdResult::Success
    }
}
