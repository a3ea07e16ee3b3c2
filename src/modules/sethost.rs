//! SETHOST: let operators change their displayed hostname.
//!
//! The accepted character set comes from `<hostname charmap="...">`.

use std::rc::Rc;

use crate::handlers::{CmdAccess, CmdResult, CommandEntry, CommandHandler};
use crate::server::Server;
use crate::state::UserId;

const DEFAULT_CHARMAP: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz.-_/0123456789";

struct SethostCommand;

impl CommandHandler for SethostCommand {
    fn handle(&self, server: &mut Server, source: UserId, params: &[String]) -> CmdResult {
        let host = &params[0];

        if host.len() > server.config.limits.max_host {
            server.send_notice(source, "*** SETHOST: Host too long");
            return CmdResult::Failure;
        }

        let charmap = server
            .config
            .value("hostname")
            .get_string_bounded("charmap", DEFAULT_CHARMAP, 1, 255);
        if host.chars().any(|c| !charmap.contains(c)) {
            server.send_notice(source, "*** SETHOST: Invalid characters in hostname");
            return CmdResult::Failure;
        }

        let nick = server.user_nick(source);
        if let Some(user) = server.users.get_mut(source) {
            user.display_host = host.clone();
        }
        server.snotice(
            'a',
            &format!("{nick} used SETHOST to change their displayed host to {host}"),
        );
        CmdResult::Success
    }
}

pub fn init(server: &mut Server) {
    server
        .commands
        .register(CommandEntry::new("SETHOST", 1, Rc::new(SethostCommand)).access(CmdAccess::Operator));
}
