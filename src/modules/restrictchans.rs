//! Restrict channel creation to operators.
//!
//! With `<restrictchans>` present, only opers may found new channels.
//! `<allowchannel name="#mask">` tags exempt matching names, and
//! `<restrictchans allowregistered="yes">` exempts users identified to
//! an account (recorded by services in the `account` attachment).

use std::rc::Rc;

use crate::events::{Event, EventListener, EventResult};
use crate::numeric;
use crate::server::Server;
use crate::util::wildcard_match;

struct CreateGate;

impl EventListener for CreateGate {
    fn on_event(&self, server: &mut Server, event: &mut Event) -> EventResult {
        // Only channel creation is gated.
        if event.args.get(1).map(String::as_str) != Some("0") {
            return EventResult::Passthru;
        }
        if server.config.values("restrictchans").is_empty() {
            return EventResult::Passthru;
        }
        let Some(name) = event.args.first().cloned() else {
            return EventResult::Passthru;
        };

        let Some(user) = server.users.get(event.source) else {
            return EventResult::Passthru;
        };
        if user.is_oper() {
            return EventResult::Passthru;
        }

        let allow_registered = server
            .config
            .value("restrictchans")
            .get_bool("allowregistered", false);
        if allow_registered && user.ext.contains("account") {
            return EventResult::Passthru;
        }

        let allowed = server.config.values("allowchannel").iter().any(|tag| {
            let mask = tag.get_string("name", "");
            !mask.is_empty() && wildcard_match(&mask, &name)
        });
        if allowed {
            return EventResult::Passthru;
        }

        server.send_numeric(
            event.source,
            numeric::ERR_BANNEDFROMCHAN,
            &[&name],
            Some("Only IRC operators may create new channels"),
        );
        EventResult::Deny("channel creation restricted".into())
    }
}

pub fn init(server: &mut Server) {
    server.events.subscribe("channel/pre-join", Rc::new(CreateGate));
}
