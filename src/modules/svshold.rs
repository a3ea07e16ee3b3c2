//! SVSHOLD: services-reserved nicknames.
//!
//! Services broadcast `SVSHOLD <nick> <duration> :<reason>` to reserve
//! a nickname; a lone nick argument lifts the hold. A local client
//! trying to take a held nick is refused with 432. `<svshold
//! silent="no">` makes set/expiry notices loud.

use std::cell::Cell;
use std::rc::Rc;

use crate::error::XLineError;
use crate::events::{Event, EventListener, EventResult};
use crate::handlers::{CmdAccess, CmdResult, CommandEntry, CommandHandler};
use crate::numeric;
use crate::security::{NickLine, XLine, XLineFactory, XLineProps};
use crate::server::{Routing, Server};
use crate::state::UserId;
use crate::util::parse_duration;

struct SvsholdFactory {
    silent: Rc<Cell<bool>>,
}

impl XLineFactory for SvsholdFactory {
    fn kind(&self) -> &'static str {
        "SVSHOLD"
    }

    fn generate(&self, props: XLineProps, pattern: &str) -> Result<Box<dyn XLine>, XLineError> {
        Ok(Box::new(NickLine::new("SVSHOLD", props, pattern, self.silent.get())?))
    }

    fn auto_apply(&self) -> bool {
        false
    }
}

/// `SVSHOLD <nick> [<duration> :<reason>]`, services only.
struct SvsholdCommand {
    silent: Rc<Cell<bool>>,
}

impl CommandHandler for SvsholdCommand {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        let nick = server.user_nick(source);

        if params.len() == 1 {
            return match server.xlines.del_line("SVSHOLD", &params[0]) {
                Some(line) => {
                    if !self.silent.get() {
                        server.snotice(
                            'x',
                            &format!("{nick} removed SVSHOLD on {}: {}", line.displayable(), line.props().reason),
                        );
                    }
                    CmdResult::Success
                }
                None => {
                    server.send_notice(source, &format!("*** SVSHOLD {} not found on the list.", params[0]));
                    CmdResult::Failure
                }
            };
        }

        if params.len() < 3 {
            return CmdResult::Failure;
        }
        let Some(duration) = parse_duration(&params[1]) else {
            server.send_notice(source, "*** Invalid duration for SVSHOLD.");
            return CmdResult::Failure;
        };

        let props = XLineProps {
            set_time: server.now(),
            duration,
            source: nick.clone(),
            reason: params[2].clone(),
        };
        let line = match server.xlines.make_line("SVSHOLD", props, &params[0]) {
            Ok(line) => line,
            Err(_) => return CmdResult::Failure,
        };
        if server.xlines.add_line(line).is_err() {
            return CmdResult::Failure;
        }
        if !self.silent.get() {
            server.snotice(
                'x',
                &format!("{nick} added SVSHOLD for {}: {}", params[0], params[2]),
            );
        }
        CmdResult::Success
    }
}

/// Refuses held nicks on NICK.
struct HoldNickCheck;

impl EventListener for HoldNickCheck {
    fn on_event(&self, server: &mut Server, event: &mut Event) -> EventResult {
        let Some(new_nick) = event.args.first().cloned() else {
            return EventResult::Passthru;
        };
        let reason = server
            .xlines
            .matches_str("SVSHOLD", &new_nick)
            .map(|line| line.props().reason.clone());
        match reason {
            Some(reason) => {
                server.send_numeric(
                    event.source,
                    numeric::ERR_ERRONEUSNICKNAME,
                    &[&new_nick],
                    Some(&format!("Services reserved nickname: {reason}")),
                );
                EventResult::Deny(reason)
            }
            None => EventResult::Passthru,
        }
    }
}

/// `STATS S` lists active holds.
struct SvsholdStats;

impl EventListener for SvsholdStats {
    fn on_event(&self, server: &mut Server, event: &mut Event) -> EventResult {
        if event.args.first().map(String::as_str) != Some("S") {
            return EventResult::Passthru;
        }
        crate::handlers::emit_xline_stats(server, event.source, "SVSHOLD");
        EventResult::Handled
    }
}

/// Re-reads `<svshold silent>` at init and on rehash.
struct SvsholdConfig {
    silent: Rc<Cell<bool>>,
}

impl EventListener for SvsholdConfig {
    fn on_event(&self, server: &mut Server, _event: &mut Event) -> EventResult {
        self.silent.set(server.config.value("svshold").get_bool("silent", true));
        EventResult::Passthru
    }
}

pub fn init(server: &mut Server) {
    let silent = Rc::new(Cell::new(
        server.config.value("svshold").get_bool("silent", true),
    ));

    server
        .xlines
        .register_factory(Rc::new(SvsholdFactory { silent: silent.clone() }));
    server.events.subscribe("user/pre-nick", Rc::new(HoldNickCheck));
    server.events.subscribe("server/stats", Rc::new(SvsholdStats));
    server
        .events
        .subscribe("config/rehash", Rc::new(SvsholdConfig { silent: silent.clone() }));
    server.commands.register(
        CommandEntry::new("SVSHOLD", 1, Rc::new(SvsholdCommand { silent }))
            .access(CmdAccess::Server)
            .routing(Routing::Broadcast),
    );
}
