//! Channel membership commands: JOIN, PART, TOPIC, NAMES, KICK, INVITE.

use std::rc::Rc;

use crate::events::{Event, EventResult};
use crate::modes::{ModeTarget, HALFOP_RANK};
use crate::numeric;
use crate::server::{Routing, Server};
use crate::state::{Membership, Topic, UserId};
use crate::util::{irc_fold, is_valid_channel_name, wildcard_match};

use super::{CmdResult, CommandEntry, CommandHandler, CommandRegistry, Translate};

pub fn register(registry: &mut CommandRegistry) {
    registry.register(
        CommandEntry::new("JOIN", 1, Rc::new(JoinHandler)).routing(Routing::Broadcast),
    );
    registry.register(
        CommandEntry::new("PART", 1, Rc::new(PartHandler))
            .routing(Routing::Broadcast)
            .comma_list(0),
    );
    registry.register(CommandEntry::new("TOPIC", 1, Rc::new(TopicHandler)).routing(Routing::Broadcast));
    registry.register(CommandEntry::new("NAMES", 1, Rc::new(NamesHandler)).comma_list(0));
    registry.register(
        CommandEntry::new("KICK", 2, Rc::new(KickHandler))
            .routing(Routing::Broadcast)
            .translation(vec![Translate::Text, Translate::Nick, Translate::Text]),
    );
    registry.register(
        CommandEntry::new("INVITE", 2, Rc::new(InviteHandler))
            .routing(Routing::Unicast(0))
            .translation(vec![Translate::Nick, Translate::Text]),
    );
}

/// Masks a ban entry is matched against: displayed, real and IP forms.
fn ban_masks(server: &Server, source: UserId) -> Vec<String> {
    server
        .users
        .get(source)
        .map(|u| {
            vec![
                u.hostmask(),
                format!("{}!{}@{}", u.nick, u.ident, u.real_host),
                format!("{}!{}@{}", u.nick, u.ident, u.ip),
            ]
        })
        .unwrap_or_default()
}

/// First ban mask matching the user, honouring `+e` exceptions.
pub fn matching_ban(server: &Server, source: UserId, chan_folded: &str) -> Option<String> {
    let chan = server.channels.get(chan_folded)?;
    let masks = ban_masks(server, source);
    let excepted = chan
        .list('e')
        .iter()
        .any(|e| masks.iter().any(|m| wildcard_match(&e.mask, m)));
    if excepted {
        return None;
    }
    chan.list('b')
        .iter()
        .find(|b| masks.iter().any(|m| wildcard_match(&b.mask, m)))
        .map(|b| b.mask.clone())
}

struct JoinHandler;

impl CommandHandler for JoinHandler {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        // JOIN pairs its comma lists (channels with keys), so the
        // generic loop-call is not used here.
        let channels: Vec<&str> = params[0].split(',').filter(|c| !c.is_empty()).collect();
        let keys: Vec<&str> = params
            .get(1)
            .map(|k| k.split(',').collect())
            .unwrap_or_default();

        let mut result = CmdResult::Failure;
        for (i, chan) in channels.iter().enumerate() {
            let key = keys.get(i).copied().unwrap_or("");
            if join_channel(server, source, chan, key, true) == CmdResult::Success {
                result = CmdResult::Success;
            }
        }
        result
    }
}

/// The join protocol: validation, access checks, membership creation
/// and the burst of JOIN/topic/names. `follow_redirects` is cleared
/// when a ban-redirect module re-enters to place the user in the
/// target channel.
pub fn join_channel(
    server: &mut Server,
    source: UserId,
    name: &str,
    key: &str,
    follow_redirects: bool,
) -> CmdResult {
    if !is_valid_channel_name(name, server.config.limits.max_channel) {
        server.send_numeric(source, numeric::ERR_NOSUCHCHANNEL, &[name], Some("Invalid channel name"));
        return CmdResult::Failure;
    }

    let folded = irc_fold(name);
    let exists = server.channels.contains(&folded);

    if server
        .users
        .get(source)
        .map(|u| u.channels.contains(&folded))
        .unwrap_or(false)
    {
        return CmdResult::Success;
    }

    // Creation policy listeners (restrictchans) send their own numerics.
    let mut event = Event {
        name: "channel/pre-join",
        source,
        args: vec![name.to_string(), if exists { "1".into() } else { "0".into() }],
    };
    if matches!(server.fire_event(&mut event), EventResult::Deny(_)) {
        return CmdResult::Failure;
    }

    if exists {
        let modes = &server.modes;
        let find_id = |n: &str| {
            modes
                .find_name(n, ModeTarget::Channel)
                .and_then(|m| modes.get(m).id)
        };
        let key_id = find_id("key");
        let limit_id = find_id("limit");
        let invite_id = find_id("inviteonly");

        let chan = server.channels.get(&folded).expect("checked exists");
        let display = chan.name.clone();

        if let Some(id) = key_id {
            if chan.modes.is_set(id) && chan.modes.param(id) != Some(key) {
                server.send_numeric(
                    source,
                    numeric::ERR_BADCHANNELKEY,
                    &[&display],
                    Some("Cannot join channel (+k)"),
                );
                return CmdResult::Failure;
            }
        }

        if let Some(id) = limit_id {
            let chan = server.channels.get(&folded).expect("checked exists");
            if chan.modes.is_set(id) {
                let limit: usize = chan
                    .modes
                    .param(id)
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(usize::MAX);
                if chan.members.len() >= limit {
                    server.send_numeric(
                        source,
                        numeric::ERR_CHANNELISFULL,
                        &[&display],
                        Some("Cannot join channel (+l)"),
                    );
                    return CmdResult::Failure;
                }
            }
        }

        if let Some(id) = invite_id {
            let chan = server.channels.get(&folded).expect("checked exists");
            if chan.modes.is_set(id) {
                let invited = server
                    .users
                    .get(source)
                    .and_then(|u| u.ext.get::<Vec<String>>("invites"))
                    .map(|list| list.contains(&folded))
                    .unwrap_or(false);
                let invexed = {
                    let masks = ban_masks(server, source);
                    chan.list('I')
                        .iter()
                        .any(|e| masks.iter().any(|m| wildcard_match(&e.mask, m)))
                };
                if !invited && !invexed {
                    server.send_numeric(
                        source,
                        numeric::ERR_INVITEONLYCHAN,
                        &[&display],
                        Some("Cannot join channel (+i)"),
                    );
                    return CmdResult::Failure;
                }
            }
        }

        if matching_ban(server, source, &folded).is_some() {
            if follow_redirects {
                let mut event = Event {
                    name: "channel/banned",
                    source,
                    args: vec![name.to_string()],
                };
                if matches!(server.fire_event(&mut event), EventResult::Handled) {
                    return CmdResult::Failure;
                }
            }
            server.send_numeric(
                source,
                numeric::ERR_BANNEDFROMCHAN,
                &[&display],
                Some("Cannot join channel (+b)"),
            );
            return CmdResult::Failure;
        }
    }

    // All checks passed; create the edge. The first member founds the
    // channel and gets op.
    let now = server.now();
    let creating = !exists;
    {
        let chan = server.channels.get_or_create(name, now);
        let mut membership = Membership::new(now);
        if creating {
            membership.prefixes.push('o');
        }
        chan.members.insert(source, membership);
    }
    if let Some(user) = server.users.get_mut(source) {
        user.channels.insert(folded.clone());
        user.ext.get_or_insert_with("invites", Vec::<String>::new).retain(|c| c != &folded);
    }

    let prefix = server.user_prefix(source);
    let display = server
        .channels
        .get(&folded)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| name.to_string());
    server.write_channel(&folded, &format!(":{prefix} JOIN :{display}"), None);

    let topic = server.channels.get(&folded).and_then(|c| c.topic.clone());
    if let Some(topic) = topic {
        server.send_numeric(source, numeric::RPL_TOPIC, &[&display], Some(&topic.text));
        server.send_numeric(
            source,
            numeric::RPL_TOPICWHOTIME,
            &[&display, &topic.set_by, &topic.set_at.to_string()],
            None,
        );
    }
    send_names(server, source, &folded);
    CmdResult::Success
}

/// 353/366 burst for one channel.
fn send_names(server: &mut Server, source: UserId, chan_folded: &str) {
    let Some(chan) = server.channels.get(chan_folded) else {
        return;
    };
    let display = chan.name.clone();

    let mut names = Vec::new();
    for (uid, membership) in &chan.members {
        let Some(member) = server.users.get(*uid) else {
            continue;
        };
        if member.dead {
            continue;
        }
        let sigil = server
            .modes
            .ordered_prefixes(&membership.prefixes)
            .first()
            .and_then(|&l| server.modes.find(l, ModeTarget::Channel))
            .map(|m| match server.modes.get(m).kind {
                crate::modes::ModeKind::Prefix { prefix, .. } => prefix.to_string(),
                _ => String::new(),
            })
            .unwrap_or_default();
        names.push(format!("{sigil}{}", member.nick));
    }

    server.send_numeric(
        source,
        numeric::RPL_NAMREPLY,
        &["=", &display],
        Some(&names.join(" ")),
    );
    server.send_numeric(
        source,
        numeric::RPL_ENDOFNAMES,
        &[&display],
        Some("End of /NAMES list"),
    );
}

struct PartHandler;

impl CommandHandler for PartHandler {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        let name = &params[0];
        let folded = irc_fold(name);

        if !server.channels.contains(&folded) {
            server.send_numeric(source, numeric::ERR_NOSUCHCHANNEL, &[name], Some("No such channel"));
            return CmdResult::Failure;
        }
        let member = server
            .users
            .get(source)
            .map(|u| u.channels.contains(&folded))
            .unwrap_or(false);
        if !member {
            server.send_numeric(
                source,
                numeric::ERR_NOTONCHANNEL,
                &[name],
                Some("You're not on that channel"),
            );
            return CmdResult::Failure;
        }

        let prefix = server.user_prefix(source);
        let display = server
            .channels
            .get(&folded)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| name.clone());
        let line = match params.get(1).filter(|r| !r.is_empty()) {
            Some(reason) => format!(":{prefix} PART {display} :{reason}"),
            None => format!(":{prefix} PART {display}"),
        };
        server.write_channel(&folded, &line, None);
        server.remove_membership(source, &folded);
        CmdResult::Success
    }
}

struct TopicHandler;

impl CommandHandler for TopicHandler {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        let name = &params[0];
        let folded = irc_fold(name);
        let Some(display) = server.channels.get(&folded).map(|c| c.name.clone()) else {
            server.send_numeric(source, numeric::ERR_NOSUCHCHANNEL, &[name], Some("No such channel"));
            return CmdResult::Failure;
        };

        // Query form.
        if params.len() == 1 {
            let topic = server.channels.get(&folded).and_then(|c| c.topic.clone());
            match topic {
                Some(topic) => {
                    server.send_numeric(source, numeric::RPL_TOPIC, &[&display], Some(&topic.text));
                    server.send_numeric(
                        source,
                        numeric::RPL_TOPICWHOTIME,
                        &[&display, &topic.set_by, &topic.set_at.to_string()],
                        None,
                    );
                }
                None => {
                    server.send_numeric(
                        source,
                        numeric::RPL_NOTOPIC,
                        &[&display],
                        Some("No topic is set"),
                    );
                }
            }
            return CmdResult::Success;
        }

        let member = server
            .channels
            .get(&folded)
            .map(|c| c.has_member(source))
            .unwrap_or(false);
        if !member {
            server.send_numeric(
                source,
                numeric::ERR_NOTONCHANNEL,
                &[&display],
                Some("You're not on that channel"),
            );
            return CmdResult::Failure;
        }

        // +t restricts topic changes to halfop and above.
        let locked = server
            .modes
            .find_name("topiclock", ModeTarget::Channel)
            .and_then(|m| server.modes.get(m).id)
            .map(|id| server.channels.get(&folded).map(|c| c.modes.is_set(id)).unwrap_or(false))
            .unwrap_or(false);
        if locked {
            let rank = server
                .channels
                .get(&folded)
                .and_then(|c| c.member(source))
                .map(|m| server.modes.rank_of(&m.prefixes))
                .unwrap_or(0);
            if rank < HALFOP_RANK {
                server.send_numeric(
                    source,
                    numeric::ERR_CHANOPRIVSNEEDED,
                    &[&display],
                    Some("You do not have access to change the topic on this channel"),
                );
                return CmdResult::Failure;
            }
        }

        let mut text = params[1].clone();
        text.truncate(server.config.limits.max_topic);
        let setter = server.user_nick(source);
        let now = server.now();
        if let Some(chan) = server.channels.get_mut(&folded) {
            chan.topic = if text.is_empty() {
                None
            } else {
                Some(Topic { text: text.clone(), set_by: setter, set_at: now })
            };
        }

        let prefix = server.user_prefix(source);
        server.write_channel(&folded, &format!(":{prefix} TOPIC {display} :{text}"), None);
        CmdResult::Success
    }
}

struct NamesHandler;

impl CommandHandler for NamesHandler {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        let folded = irc_fold(&params[0]);
        if server.channels.contains(&folded) {
            send_names(server, source, &folded);
            CmdResult::Success
        } else {
            server.send_numeric(
                source,
                numeric::RPL_ENDOFNAMES,
                &[&params[0]],
                Some("End of /NAMES list"),
            );
            CmdResult::Failure
        }
    }
}

struct KickHandler;

impl CommandHandler for KickHandler {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        let name = &params[0];
        let folded = irc_fold(name);
        let Some(display) = server.channels.get(&folded).map(|c| c.name.clone()) else {
            server.send_numeric(source, numeric::ERR_NOSUCHCHANNEL, &[name], Some("No such channel"));
            return CmdResult::Failure;
        };

        if !server.channels.get(&folded).map(|c| c.has_member(source)).unwrap_or(false) {
            server.send_numeric(
                source,
                numeric::ERR_NOTONCHANNEL,
                &[&display],
                Some("You're not on that channel"),
            );
            return CmdResult::Failure;
        }

        let Some(target) = server.users.find_nick(&params[1]) else {
            server.send_numeric(source, numeric::ERR_NOSUCHNICK, &[&params[1]], Some("No such nick"));
            return CmdResult::Failure;
        };
        if !server.channels.get(&folded).map(|c| c.has_member(target)).unwrap_or(false) {
            let target_nick = server.user_nick(target);
            server.send_numeric(
                source,
                numeric::ERR_USERNOTINCHANNEL,
                &[&target_nick, &display],
                Some("They aren't on that channel"),
            );
            return CmdResult::Failure;
        }

        let our_rank = server
            .channels
            .get(&folded)
            .and_then(|c| c.member(source))
            .map(|m| server.modes.rank_of(&m.prefixes))
            .unwrap_or(0);
        let their_rank = server
            .channels
            .get(&folded)
            .and_then(|c| c.member(target))
            .map(|m| server.modes.rank_of(&m.prefixes))
            .unwrap_or(0);
        if our_rank < HALFOP_RANK || (their_rank > our_rank && source != target) {
            server.send_numeric(
                source,
                numeric::ERR_CHANOPRIVSNEEDED,
                &[&display],
                Some("You do not have access to kick that user"),
            );
            return CmdResult::Failure;
        }

        let target_nick = server.user_nick(target);
        let reason = params.get(2).cloned().unwrap_or_else(|| target_nick.clone());
        let prefix = server.user_prefix(source);
        server.write_channel(
            &folded,
            &format!(":{prefix} KICK {display} {target_nick} :{reason}"),
            None,
        );
        server.remove_membership(target, &folded);
        CmdResult::Success
    }
}

struct InviteHandler;

impl CommandHandler for InviteHandler {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        let Some(target) = server.users.find_nick(&params[0]) else {
            server.send_numeric(source, numeric::ERR_NOSUCHNICK, &[&params[0]], Some("No such nick"));
            return CmdResult::Failure;
        };
        let folded = irc_fold(&params[1]);
        let Some(display) = server.channels.get(&folded).map(|c| c.name.clone()) else {
            server.send_numeric(
                source,
                numeric::ERR_NOSUCHCHANNEL,
                &[&params[1]],
                Some("No such channel"),
            );
            return CmdResult::Failure;
        };

        if !server.channels.get(&folded).map(|c| c.has_member(source)).unwrap_or(false) {
            server.send_numeric(
                source,
                numeric::ERR_NOTONCHANNEL,
                &[&display],
                Some("You're not on that channel"),
            );
            return CmdResult::Failure;
        }
        let target_nick = server.user_nick(target);
        if server.channels.get(&folded).map(|c| c.has_member(target)).unwrap_or(false) {
            server.send_numeric(
                source,
                numeric::ERR_USERONCHANNEL,
                &[&target_nick, &display],
                Some("is already on channel"),
            );
            return CmdResult::Failure;
        }

        if let Some(user) = server.users.get_mut(target) {
            let invites = user.ext.get_or_insert_with("invites", Vec::<String>::new);
            if !invites.contains(&folded) {
                invites.push(folded.clone());
            }
        }

        server.send_numeric(source, numeric::RPL_INVITING, &[&target_nick, &display], None);
        let prefix = server.user_prefix(source);
        if let Some(user) = server.users.get_mut(target) {
            user.send(format!(":{prefix} INVITE {target_nick} :{display}"));
        }
        CmdResult::Success
    }
}
