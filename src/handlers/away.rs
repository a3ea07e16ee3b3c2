//! AWAY status handling.

use std::rc::Rc;

use crate::events::Event;
use crate::numeric;
use crate::server::{Routing, Server};
use crate::state::UserId;

use super::{CmdResult, CommandEntry, CommandHandler, CommandRegistry};

pub fn register(registry: &mut CommandRegistry) {
    registry.register(CommandEntry::new("AWAY", 0, Rc::new(AwayHandler)).routing(Routing::Broadcast));
}

/// `AWAY [:message]` - a message marks the user away, no argument (or an
/// empty one) clears it.
struct AwayHandler;

impl CommandHandler for AwayHandler {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        let message = params.first().filter(|m| !m.is_empty()).cloned();
        let now = server.now();
        let max_away = server.config.limits.max_away;

        match message {
            Some(mut text) => {
                text.truncate(max_away);
                if let Some(user) = server.users.get_mut(source) {
                    user.away = Some(text.clone());
                    user.away_time = now;
                }
                server.send_numeric(
                    source,
                    numeric::RPL_NOWAWAY,
                    &[],
                    Some("You have been marked as being away"),
                );
                let mut event = Event { name: "event/away", source, args: vec![text] };
                server.fire_event(&mut event);
            }
            None => {
                if let Some(user) = server.users.get_mut(source) {
                    user.away = None;
                    user.away_time = 0;
                }
                server.send_numeric(
                    source,
                    numeric::RPL_UNAWAY,
                    &[],
                    Some("You are no longer marked as being away"),
                );
                let mut event = Event { name: "event/away", source, args: Vec::new() };
                server.fire_event(&mut event);
            }
        }
        CmdResult::Success
    }
}
