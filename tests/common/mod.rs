//! Shared helpers for driving the engine without sockets.
#![allow(dead_code)]

use ferrod::config::Config;
use ferrod::server::Server;
use ferrod::state::{RegPhase, UserId};

pub const BASE_CONFIG: &str = "<server name=\"irc.test.net\" network=\"TestNet\" id=\"001\">\n\
     <oper name=\"root\" password=\"letmein\" host=\"*@*\" type=\"netadmin\">\n";

/// Engine with the base config plus `extra` tags appended.
pub fn test_server_with(extra: &str) -> Server {
    let config = Config::from_text(&format!("{BASE_CONFIG}{extra}")).expect("test config parses");
    Server::new(config)
}

pub fn test_server() -> Server {
    test_server_with("")
}

/// Connect and fully register a local client, discarding the burst.
pub fn connect(server: &mut Server, nick: &str) -> UserId {
    let id = server.accept_connection("127.0.0.1", "localhost");
    server.handle_line(id, &format!("NICK {nick}"));
    server.handle_line(id, &format!("USER {} 0 * :Test User", nick.to_ascii_lowercase()));
    server.take_output(id);
    id
}

/// Promote a connected user through OPER, discarding output.
pub fn oper_up(server: &mut Server, id: UserId) {
    server.handle_line(id, "OPER root letmein");
    let out = server.take_output(id);
    assert!(
        out.iter().any(|l| l.contains(" 381 ")),
        "oper up failed: {out:?}"
    );
}

/// Introduce a remote services pseudo-client (for server-only verbs).
pub fn connect_service(server: &mut Server, nick: &str) -> UserId {
    let now = server.now();
    let id = server.users.create(|id| {
        let mut u = ferrod::state::User::new(
            id,
            format!("9SV{:06}", id.0),
            "10.0.0.9".into(),
            "services.test.net".into(),
            now,
            false,
        );
        u.ident = "services".into();
        u.phase = RegPhase::All;
        u.service = true;
        u
    });
    server.users.set_nick(id, nick);
    id
}

/// Assert some queued line contains `needle`, returning it.
pub fn expect_line(server: &mut Server, id: UserId, needle: &str) -> String {
    let out = server.take_output(id);
    out.iter()
        .find(|l| l.contains(needle))
        .cloned()
        .unwrap_or_else(|| panic!("no line containing {needle:?} in {out:?}"))
}
