//! Operator administration: the X-line commands, STATS and REHASH.

use std::rc::Rc;

use crate::events::Event;
use crate::numeric;
use crate::security::XLineProps;
use crate::server::{Routing, Server};
use crate::state::UserId;
use crate::util::{duration_string, parse_duration};

use super::{CmdAccess, CmdResult, CommandEntry, CommandHandler, CommandRegistry};

pub fn register(registry: &mut CommandRegistry) {
    for (verb, kind) in [
        ("KLINE", "K"),
        ("GLINE", "G"),
        ("ZLINE", "Z"),
        ("ELINE", "E"),
    ] {
        registry.register(
            CommandEntry::new(verb, 1, Rc::new(XLineCommand { kind }))
                .access(CmdAccess::Operator)
                .routing(Routing::Broadcast),
        );
    }
    registry.register(CommandEntry::new("STATS", 1, Rc::new(StatsHandler)).access(CmdAccess::Operator));
    registry.register(CommandEntry::new("REHASH", 0, Rc::new(RehashHandler)).access(CmdAccess::Operator));
}

/// Shared implementation for `KLINE`/`GLINE`/`ZLINE`/`ELINE`:
/// `<mask> [<duration> :<reason>]` adds, a lone mask removes.
pub struct XLineCommand {
    pub kind: &'static str,
}

impl XLineCommand {
    /// A nick argument is turned into the form the kind matches on.
    fn resolve_mask(&self, server: &Server, mask: &str) -> String {
        if mask.contains('@') || mask.contains('.') || mask.contains(':') || mask.contains('*') {
            return mask.to_string();
        }
        match server.users.find_nick(mask).and_then(|id| server.users.get(id)) {
            Some(user) if user.registered() => match self.kind {
                "Z" => user.ip.clone(),
                _ => format!("{}@{}", user.ident, user.ip),
            },
            _ => mask.to_string(),
        }
    }
}

impl CommandHandler for XLineCommand {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        let mask = self.resolve_mask(server, &params[0]);
        let nick = server.user_nick(source);

        if params.len() == 1 {
            // Removal form.
            let removed = server
                .xlines
                .del_line(self.kind, &mask)
                .or_else(|| server.xlines.del_line(self.kind, &params[0]));
            return match removed {
                Some(line) => {
                    server.snotice(
                        'x',
                        &format!(
                            "{nick} removed {}-line on {}: {}",
                            self.kind,
                            line.displayable(),
                            line.props().reason
                        ),
                    );
                    CmdResult::Success
                }
                None => {
                    server.send_notice(
                        source,
                        &format!("*** {}-line {} not found on the list.", self.kind, params[0]),
                    );
                    CmdResult::Failure
                }
            };
        }

        // Add form. Two parameters mean a permanent line with a reason.
        let (duration, reason) = if params.len() >= 3 {
            let Some(duration) = parse_duration(&params[1]) else {
                server.send_notice(source, &format!("*** Invalid duration for {}-line.", self.kind));
                return CmdResult::Failure;
            };
            (duration, params[2].clone())
        } else {
            (0, params[1].clone())
        };

        let props = XLineProps {
            set_time: server.now(),
            duration,
            source: nick.clone(),
            reason,
        };
        let line = match server.xlines.make_line(self.kind, props, &mask) {
            Ok(line) => line,
            Err(err) => {
                server.send_notice(source, &format!("*** {err}"));
                return CmdResult::Failure;
            }
        };
        match server.add_xline(line, source) {
            Ok(()) => CmdResult::Success,
            Err(_) => {
                server.send_notice(
                    source,
                    &format!("*** {}-line for {mask} already exists.", self.kind),
                );
                CmdResult::Failure
            }
        }
    }
}

/// `STATS <symbol>`: enumerate an x-line kind. Modules hook further
/// symbols through the `server/stats` event.
struct StatsHandler;

impl CommandHandler for StatsHandler {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        let symbol = params[0].chars().next().unwrap_or(' ');

        let kind = match symbol {
            'k' | 'K' => Some("K"),
            'g' | 'G' => Some("G"),
            'z' | 'Z' => Some("Z"),
            'e' | 'E' => Some("E"),
            _ => None,
        };

        match kind {
            Some(kind) => emit_xline_stats(server, source, kind),
            None => {
                let mut event = Event {
                    name: "server/stats",
                    source,
                    args: vec![symbol.to_string()],
                };
                server.fire_event(&mut event);
            }
        }

        server.send_numeric(
            source,
            numeric::RPL_ENDOFSTATS,
            &[&symbol.to_string()],
            Some("End of /STATS report"),
        );
        CmdResult::Success
    }
}

/// One 223 row per active line of the kind.
pub fn emit_xline_stats(server: &mut Server, source: UserId, kind: &str) {
    for (display, set_time, duration, setter, reason) in server.xlines.stats(kind) {
        server.send_numeric(
            source,
            numeric::RPL_STATSXLINE,
            &[
                kind,
                &display,
                &set_time.to_string(),
                &duration_string(duration),
                &setter,
            ],
            Some(&reason),
        );
    }
}

struct RehashHandler;

impl CommandHandler for RehashHandler {
    fn handle(&self, server: &mut Server, source: UserId, _params: &[String]) -> CmdResult {
        let path = server.config.path().display().to_string();
        let nick = server.user_nick(source);
        server.send_numeric(
            source,
            numeric::RPL_REHASHING,
            &[&path],
            Some("Rehashing"),
        );
        server.snotice('a', &format!("{nick} is rehashing the server configuration"));
        match server.rehash() {
            Ok(()) => CmdResult::Success,
            Err(err) => {
                server.send_notice(source, &format!("*** Rehash failed: {err}"));
                CmdResult::Failure
            }
        }
    }
}
