//! Ban redirects: `MODE #a +b nick!user@host#b` stores a normal ban
//! plus a redirect, and a user refused entry by that ban is sent to
//! `#b` instead.
//!
//! The redirect table lives in a channel extension keyed by the cleaned
//! ban mask; the ban list itself stores only the mask, so every other
//! consumer of the list sees ordinary bans.

use std::cell::Cell;
use std::rc::Rc;

use crate::events::{Event, EventListener, EventResult};
use crate::handlers::join_channel;
use crate::modes::{Change, ModeSubject, ModeTarget, ModeWatcher, OP_RANK};
use crate::numeric;
use crate::server::Server;
use crate::state::UserId;
use crate::util::{irc_eq, irc_fold, is_valid_channel_name, wildcard_match};

const EXT_KEY: &str = "banredirect";

#[derive(Debug, Clone, PartialEq, Eq)]
struct RedirectEntry {
    /// Display-case target channel.
    target: String,
    /// The cleaned ban mask this redirect belongs to.
    mask: String,
}

type RedirectList = Vec<RedirectEntry>;

/// Split `nick!user@host#chan` (with any component absent) into the
/// mask parts and the redirect channel.
fn split_redirect_mask(param: &str) -> (String, String, String, String) {
    #[derive(PartialEq, Clone, Copy)]
    enum Part {
        Nick,
        Ident,
        Host,
        Chan,
    }

    let mut parts = [String::new(), String::new(), String::new(), String::new()];
    let mut current = Part::Nick;
    let mut start = 0;
    let chars: Vec<char> = param.chars().collect();

    let index = |p: Part| match p {
        Part::Nick => 0,
        Part::Ident => 1,
        Part::Host => 2,
        Part::Chan => 3,
    };

    for (i, &c) in chars.iter().enumerate() {
        match c {
            '!' if current == Part::Nick => {
                parts[index(current)] = chars[start..i].iter().collect();
                current = Part::Ident;
                start = i + 1;
            }
            '@' if matches!(current, Part::Nick | Part::Ident) => {
                parts[index(current)] = chars[start..i].iter().collect();
                current = Part::Host;
                start = i + 1;
            }
            '#' if current != Part::Chan => {
                parts[index(current)] = chars[start..i].iter().collect();
                current = Part::Chan;
                start = i;
            }
            _ => {}
        }
    }
    if parts[index(current)].is_empty() {
        parts[index(current)] = chars[start..].iter().collect();
    }

    let [mut nick, mut ident, mut host, chan] = parts;

    // `nick@host` means `*!nick@host`, and a bare dotted/colon token is
    // a host rather than a nick.
    if !nick.is_empty() && !host.is_empty() && ident.is_empty() {
        std::mem::swap(&mut nick, &mut ident);
    }
    if !nick.is_empty() && ident.is_empty() && host.is_empty() && (nick.contains('.') || nick.contains(':')) {
        std::mem::swap(&mut nick, &mut host);
    }

    let fill = |s: String| if s.is_empty() { "*".to_string() } else { s };
    (fill(nick), fill(ident), fill(host), chan)
}

/// Watches `+b`/`-b`, peeling the redirect suffix off the mask and
/// maintaining the side table.
struct RedirectWatcher;

impl ModeWatcher for RedirectWatcher {
    fn before_mode(
        &self,
        server: &mut Server,
        source: UserId,
        subject: &ModeSubject,
        change: &mut Change,
    ) -> bool {
        let ModeSubject::Channel(chan_folded) = subject else {
            return true;
        };
        if change.param.is_empty() {
            return true;
        }
        // Ext-bans are opaque; plain masks without a redirect pass
        // through to the normal ban handler.
        if change.param.chars().nth(1) == Some(':') {
            return true;
        }
        if !change.param.contains('#') {
            return true;
        }

        let (nick, ident, host, redirect) = split_redirect_mask(&change.param);
        let cleaned = format!("{nick}!{ident}@{host}");

        if redirect.is_empty() {
            change.param = cleaned;
            return true;
        }

        let source_local = server.users.get(source).map(|u| u.local).unwrap_or(false);
        if change.adding && source_local {
            if !is_valid_channel_name(&redirect, server.config.limits.max_channel) {
                let display = channel_display(server, chan_folded);
                server.send_numeric(
                    source,
                    numeric::ERR_NOSUCHCHANNEL,
                    &[&display],
                    Some(&format!("Invalid channel name in redirection ({redirect})")),
                );
                return false;
            }
            if !server.channels.contains(&redirect) {
                server.send_numeric(
                    source,
                    numeric::ERR_BANREDIRECT,
                    &[],
                    Some(&format!("Target channel {redirect} must exist to be set as a redirect.")),
                );
                return false;
            }
            let rank = server
                .channels
                .get(&redirect)
                .and_then(|c| c.member(source))
                .map(|m| server.modes.rank_of(&m.prefixes))
                .unwrap_or(0);
            if rank < OP_RANK {
                server.send_numeric(
                    source,
                    numeric::ERR_BANREDIRECT,
                    &[],
                    Some(&format!("You must be opped on {redirect} to set it as a redirect.")),
                );
                return false;
            }
            if irc_eq(&irc_fold(&redirect), chan_folded) {
                let display = channel_display(server, chan_folded);
                server.send_numeric(
                    source,
                    numeric::ERR_BANREDIRECT,
                    &[&display],
                    Some("You cannot set a ban redirection to the channel the ban is on"),
                );
                return false;
            }
        }

        let Some(chan) = server.channels.get_mut(chan_folded) else {
            return true;
        };
        let list = chan.ext.get_or_insert_with(EXT_KEY, RedirectList::new);
        if change.adding {
            let entry = RedirectEntry { target: redirect, mask: cleaned.clone() };
            if !list.contains(&entry) {
                list.push(entry);
            }
        } else {
            list.retain(|e| !(irc_eq(&e.target, &redirect) && e.mask.eq_ignore_ascii_case(&cleaned)));
            if list.is_empty() {
                chan.ext.unset(EXT_KEY);
            }
        }

        // The ban handler stores only the mask.
        change.param = cleaned;
        true
    }
}

fn channel_display(server: &Server, folded: &str) -> String {
    server
        .channels
        .get(folded)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| folded.to_string())
}

/// Handles the banned-on-join event: announce the ban and the transfer,
/// then place the user in the target channel. The guard stops a
/// redirect chain from looping back through us.
struct RedirectOnJoin {
    in_redirect: Cell<bool>,
}

impl EventListener for RedirectOnJoin {
    fn on_event(&self, server: &mut Server, event: &mut Event) -> EventResult {
        if self.in_redirect.get() {
            return EventResult::Passthru;
        }
        let Some(chan_name) = event.args.first().cloned() else {
            return EventResult::Passthru;
        };
        let folded = irc_fold(&chan_name);

        let masks: Vec<String> = server
            .users
            .get(event.source)
            .map(|u| {
                vec![
                    u.hostmask(),
                    format!("{}!{}@{}", u.nick, u.ident, u.real_host),
                    format!("{}!{}@{}", u.nick, u.ident, u.ip),
                ]
            })
            .unwrap_or_default();

        let target = server
            .channels
            .get(&folded)
            .and_then(|c| c.ext.get::<RedirectList>(EXT_KEY))
            .and_then(|list| {
                list.iter()
                    .find(|e| masks.iter().any(|m| wildcard_match(&e.mask, m)))
                    .map(|e| e.target.clone())
            });
        let Some(target) = target else {
            return EventResult::Passthru;
        };

        let display = channel_display(server, &folded);
        server.send_numeric(
            event.source,
            numeric::ERR_BANNEDFROMCHAN,
            &[&display],
            Some("Cannot join channel (+b)"),
        );
        server.send_numeric(
            event.source,
            numeric::RPL_LINKCHANNEL,
            &[&display, &target],
            Some("You are banned from this channel, so you are automatically being transferred to the redirected channel."),
        );

        self.in_redirect.set(true);
        join_channel(server, event.source, &target, "", false);
        self.in_redirect.set(false);
        EventResult::Handled
    }
}

pub fn init(server: &mut Server) {
    server
        .modes
        .add_watcher(ModeTarget::Channel, "ban", Rc::new(RedirectWatcher));
    server.events.subscribe(
        "channel/banned",
        Rc::new(RedirectOnJoin { in_redirect: Cell::new(false) }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_full_mask_with_redirect() {
        let (n, i, h, c) = split_redirect_mask("nick!user@host#dest");
        assert_eq!((n.as_str(), i.as_str(), h.as_str(), c.as_str()), ("nick", "user", "host", "#dest"));
    }

    #[test]
    fn fills_missing_components() {
        let (n, i, h, c) = split_redirect_mask("nick#dest");
        assert_eq!((n.as_str(), i.as_str(), h.as_str(), c.as_str()), ("nick", "*", "*", "#dest"));

        let (n, i, h, c) = split_redirect_mask("nick!user#dest");
        assert_eq!((n.as_str(), i.as_str(), h.as_str(), c.as_str()), ("nick", "user", "*", "#dest"));
    }

    #[test]
    fn user_at_host_swaps_into_ident() {
        let (n, i, h, c) = split_redirect_mask("user@host#dest");
        assert_eq!((n.as_str(), i.as_str(), h.as_str(), c.as_str()), ("*", "user", "host", "#dest"));
    }

    #[test]
    fn dotted_token_is_a_host() {
        let (n, i, h, c) = split_redirect_mask("irc.example.com#dest");
        assert_eq!((n.as_str(), i.as_str(), h.as_str(), c.as_str()), ("*", "*", "irc.example.com", "#dest"));
    }

    #[test]
    fn no_redirect_channel() {
        let (n, i, h, c) = split_redirect_mask("nick!user@host");
        assert_eq!((n.as_str(), i.as_str(), h.as_str(), c.as_str()), ("nick", "user", "host", ""));
    }
}
