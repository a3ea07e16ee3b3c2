//! X-line behaviour through the engine: add/remove commands, automatic
//! application, exemptions and expiry.

mod common;

use common::*;

#[test]
fn kline_disconnects_matching_users_on_add() {
    let mut server = test_server();
    let oper = connect(&mut server, "root");
    oper_up(&mut server, oper);
    let victim = connect(&mut server, "victim");

    server.handle_line(oper, "KLINE *@localhost :go away");
    // The oper matches too, but E-lines are checked first; without one
    // everyone matching is dropped, so exempt the oper up front in
    // realistic setups. Here only the victim's fate is asserted.
    assert!(server.users.get(victim).unwrap().dead);
    let out = server.take_output(victim);
    assert!(out.iter().any(|l| l.contains("go away")), "{out:?}");
}

#[test]
fn eline_exempts_from_kline() {
    let mut server = test_server();
    let oper = connect(&mut server, "root");
    oper_up(&mut server, oper);
    let keeper = connect(&mut server, "keeper");

    server.handle_line(oper, "ELINE *@localhost :staff");
    server.handle_line(oper, "KLINE *@localhost :sweep");
    server.take_output(oper);

    assert!(!server.users.get(keeper).unwrap().dead);
    assert!(!server.users.get(oper).unwrap().dead);
}

#[test]
fn kline_blocks_registration() {
    let mut server = test_server();
    let oper = connect(&mut server, "root");
    oper_up(&mut server, oper);
    server.handle_line(oper, "ELINE root@* :me");
    server.handle_line(oper, "KLINE *@localhost :not welcome");
    server.take_output(oper);

    let id = server.accept_connection("127.0.0.1", "localhost");
    server.handle_line(id, "NICK late");
    server.handle_line(id, "USER late 0 * :Late");
    let out = server.take_output(id);
    assert!(
        !out.iter().any(|l| l.contains(" 001 ")),
        "no welcome for k-lined user: {out:?}"
    );
    assert!(server.users.get(id).unwrap().dead);
}

#[test]
fn zline_rejects_at_accept_time() {
    let mut server = test_server();
    let oper = connect(&mut server, "root");
    oper_up(&mut server, oper);
    server.handle_line(oper, "ZLINE 10.6.0.0/16 :bad network");
    server.take_output(oper);

    let id = server.accept_connection("10.6.1.2", "10.6.1.2");
    assert!(server.users.get(id).unwrap().dead);

    let ok = server.accept_connection("10.7.1.2", "10.7.1.2");
    assert!(!server.users.get(ok).unwrap().dead);
}

// Property: a timed line disappears once the clock passes its expiry;
// a permanent one never does.
#[test]
fn timed_xline_expires_permanent_stays() {
    let mut server = test_server();
    server.tick(1000);
    let oper = connect(&mut server, "root");
    oper_up(&mut server, oper);

    server.handle_line(oper, "KLINE timed@nowhere.example 5 :short");
    server.handle_line(oper, "KLINE perm@nowhere.example :forever");
    server.take_output(oper);
    assert_eq!(server.xlines.lines("K").len(), 2);

    server.tick(1004);
    assert_eq!(server.xlines.lines("K").len(), 2, "not yet due");

    server.tick(1006);
    let remaining = server.xlines.lines("K");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].displayable(), "perm@nowhere.example");

    server.tick(1_000_000);
    assert_eq!(server.xlines.lines("K").len(), 1);
}

#[test]
fn duplicate_and_removal_paths() {
    let mut server = test_server();
    let oper = connect(&mut server, "root");
    oper_up(&mut server, oper);

    server.handle_line(oper, "KLINE dup@spam.example :one");
    server.take_output(oper);
    server.handle_line(oper, "KLINE dup@spam.example :two");
    let notice = expect_line(&mut server, oper, "NOTICE");
    assert!(notice.contains("already exists"), "{notice}");

    // Removal form: a lone mask.
    server.handle_line(oper, "KLINE dup@spam.example");
    server.take_output(oper);
    assert!(server.xlines.lines("K").is_empty());

    server.handle_line(oper, "KLINE dup@spam.example");
    let notice = expect_line(&mut server, oper, "NOTICE");
    assert!(notice.contains("not found"), "{notice}");
}

#[test]
fn xline_commands_require_oper() {
    let mut server = test_server();
    let user = connect(&mut server, "alice");
    server.handle_line(user, "KLINE *@*.example :nope");
    expect_line(&mut server, user, " 481 ");
    assert!(server.xlines.lines("K").is_empty());
}

#[test]
fn invalid_duration_is_refused() {
    let mut server = test_server();
    let oper = connect(&mut server, "root");
    oper_up(&mut server, oper);
    server.handle_line(oper, "KLINE x@y.example soon :never");
    let notice = expect_line(&mut server, oper, "NOTICE");
    assert!(notice.contains("Invalid duration"), "{notice}");
    assert!(server.xlines.lines("K").is_empty());
}

#[test]
fn stats_enumerates_lines_and_shun_symbol() {
    let mut server = test_server();
    let oper = connect(&mut server, "root");
    oper_up(&mut server, oper);
    server.handle_line(oper, "ELINE root@* :me");
    server.handle_line(oper, "KLINE stats@target.example 1h :because");
    server.handle_line(oper, "SHUN *!*@shunned.example :quiet");
    server.take_output(oper);

    server.handle_line(oper, "STATS k");
    let out = server.take_output(oper);
    let row = out.iter().find(|l| l.contains(" 223 ")).expect("223 row");
    assert!(row.contains("stats@target.example"), "{row}");
    assert!(row.contains("because"), "{row}");
    assert!(row.contains("1h"), "{row}");
    assert!(out.iter().any(|l| l.contains(" 219 ")), "{out:?}");

    server.handle_line(oper, "STATS H");
    let out = server.take_output(oper);
    assert!(
        out.iter().any(|l| l.contains(" 223 ") && l.contains("*!*@shunned.example")),
        "{out:?}"
    );
}

#[test]
fn nick_target_resolves_to_address() {
    let mut server = test_server();
    let oper = connect(&mut server, "root");
    oper_up(&mut server, oper);
    server.handle_line(oper, "ELINE root@* :me");
    let victim = connect(&mut server, "target");
    let victim_ip = server.users.get(victim).unwrap().ip.clone();

    server.handle_line(oper, "ZLINE target :addressed");
    server.take_output(oper);
    let lines = server.xlines.lines("Z");
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].displayable(), victim_ip);
}
