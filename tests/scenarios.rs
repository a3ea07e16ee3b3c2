//! End-to-end command scenarios driven through the dispatch pipeline.

mod common;

use common::*;

#[test]
fn registration_sends_welcome_burst() {
    let mut server = test_server();
    let id = server.accept_connection("127.0.0.1", "localhost");
    server.handle_line(id, "NICK alice");
    assert!(server.take_output(id).is_empty(), "no burst before USER");

    server.handle_line(id, "USER alice 0 * :Alice");
    let out = server.take_output(id);
    assert!(out.iter().any(|l| l.contains(" 001 alice ")), "{out:?}");
    assert!(out.iter().any(|l| l.contains(" 004 ")));
    let welcome = out.iter().find(|l| l.contains(" 001 ")).unwrap();
    assert!(welcome.contains("TestNet"));
    assert!(welcome.contains("alice!alice@localhost"));
}

#[test]
fn nick_collision_rejected_case_insensitively() {
    let mut server = test_server();
    connect(&mut server, "Alice");
    let other = server.accept_connection("127.0.0.1", "localhost");
    server.handle_line(other, "NICK ALICE");
    let line = expect_line(&mut server, other, " 433 ");
    assert!(line.contains("ALICE"));
}

#[test]
fn unknown_command_and_param_count_numerics() {
    let mut server = test_server();
    let id = connect(&mut server, "alice");

    server.handle_line(id, "FROBNICATE x");
    expect_line(&mut server, id, " 421 ");

    server.handle_line(id, "KICK #only");
    expect_line(&mut server, id, " 461 ");
}

#[test]
fn commands_require_registration() {
    let mut server = test_server();
    let id = server.accept_connection("127.0.0.1", "localhost");
    server.handle_line(id, "JOIN #test");
    expect_line(&mut server, id, " 451 ");
}

// S1: AWAY with a message marks away, without clears.
#[test]
fn away_toggle() {
    let mut server = test_server();
    let id = connect(&mut server, "alice");

    server.handle_line(id, "AWAY :gone");
    let line = expect_line(&mut server, id, " 306 ");
    assert!(line.contains("You have been marked as being away"));
    assert_eq!(
        server.users.get(id).unwrap().away.as_deref(),
        Some("gone")
    );

    server.handle_line(id, "AWAY");
    let line = expect_line(&mut server, id, " 305 ");
    assert!(line.contains("You are no longer marked as being away"));
    assert!(server.users.get(id).unwrap().away.is_none());
}

// Away users auto-reply to PRIVMSG with 301.
#[test]
fn away_autoreply_on_privmsg() {
    let mut server = test_server();
    let alice = connect(&mut server, "alice");
    let bob = connect(&mut server, "bob");

    server.handle_line(bob, "AWAY :lunch");
    server.take_output(bob);

    server.handle_line(alice, "PRIVMSG bob :hi");
    let line = expect_line(&mut server, alice, " 301 ");
    assert!(line.contains("lunch"));
    let delivered = expect_line(&mut server, bob, "PRIVMSG");
    assert!(delivered.contains(":hi"));
}

// S2: shunned users may only run the enabled whitelist; QUIT is
// accepted but loses its message.
#[test]
fn shun_gates_and_cleans_commands() {
    let mut server = test_server_with(
        "<shun enabledcommands=\"ADMIN OPER PING PONG QUIT\" cleanedcommands=\"AWAY PART QUIT\">\n",
    );
    let oper = connect(&mut server, "root");
    oper_up(&mut server, oper);
    let victim = connect(&mut server, "victim");
    let watcher = connect(&mut server, "watcher");
    server.handle_line(victim, "JOIN #shared");
    server.handle_line(watcher, "JOIN #shared");
    server.take_output(victim);
    server.take_output(watcher);

    server.handle_line(oper, "SHUN *!*@127.0.0.1 :begone");
    server.take_output(oper);

    server.handle_line(victim, "WHOIS foo");
    let notice = expect_line(&mut server, victim, "NOTICE");
    assert!(
        notice.contains("*** WHOIS command not processed"),
        "{notice}"
    );

    // QUIT passes the gate but the reason is stripped.
    server.handle_line(victim, "QUIT :bye bye");
    let quit = expect_line(&mut server, watcher, "QUIT");
    assert!(!quit.contains("bye bye"), "{quit}");
    assert!(server.users.get(victim).unwrap().dead);
}

#[test]
fn shun_exempts_opers() {
    let mut server = test_server_with("<shun>\n");
    let oper = connect(&mut server, "root");
    oper_up(&mut server, oper);

    server.handle_line(oper, "SHUN *!*@127.0.0.1 :oops");
    server.take_output(oper);

    // The oper matches the mask but is exempt.
    server.handle_line(oper, "AWAY :still here");
    expect_line(&mut server, oper, " 306 ");
}

// S3: a ban with a redirect suffix stores the plain mask and transfers
// matching joiners, with the 474/470 pair.
#[test]
fn ban_redirect_transfers_banned_joiner() {
    let mut server = test_server();
    let alice = connect(&mut server, "alice");
    server.handle_line(alice, "JOIN #a");
    server.handle_line(alice, "JOIN #b");
    server.take_output(alice);

    server.handle_line(alice, "MODE #a +b victim!*@*#b");
    let mode = expect_line(&mut server, alice, "MODE #a");
    // The announced (and stored) ban does not carry the redirect.
    assert!(mode.contains("+b victim!*@*"), "{mode}");
    assert!(!mode.contains("#b"), "{mode}");
    let bans = server.channels.get("#a").unwrap().list('b');
    assert_eq!(bans.len(), 1);
    assert_eq!(bans[0].mask, "victim!*@*");

    let victim = connect(&mut server, "victim");
    server.handle_line(victim, "JOIN #a");
    let out = server.take_output(victim);
    assert!(out.iter().any(|l| l.contains(" 474 ")), "{out:?}");
    let redirect = out.iter().find(|l| l.contains(" 470 ")).expect("470 sent");
    assert!(redirect.contains("#a") && redirect.contains("#b"), "{redirect}");
    assert!(out.iter().any(|l| l.contains("JOIN :#b")), "{out:?}");
    assert!(server.channels.get("#b").unwrap().has_member(victim));
    assert!(!server.channels.get("#a").unwrap().has_member(victim));
}

#[test]
fn ban_redirect_requires_op_on_target() {
    let mut server = test_server();
    let alice = connect(&mut server, "alice");
    let bob = connect(&mut server, "bob");
    server.handle_line(alice, "JOIN #a");
    server.handle_line(bob, "JOIN #b");
    server.take_output(alice);
    server.take_output(bob);

    // Alice is op on #a but not a member of #b.
    server.handle_line(alice, "MODE #a +b victim!*@*#b");
    let line = expect_line(&mut server, alice, " 690 ");
    assert!(line.contains("must be opped on #b"), "{line}");
    assert!(server.channels.get("#a").unwrap().list('b').is_empty());
}

// S4: SETHOST validates against <hostname charmap>.
#[test]
fn sethost_charmap_validation() {
    let mut server = test_server_with(
        "<hostname charmap=\"abcdefghijklmnopqrstuvwxyz.-_0123456789\">\n",
    );
    let oper = connect(&mut server, "root");
    oper_up(&mut server, oper);

    server.handle_line(oper, "SETHOST Foo.Bar");
    let notice = expect_line(&mut server, oper, "NOTICE");
    assert!(notice.contains("*** SETHOST: Invalid characters in hostname"));

    server.handle_line(oper, "SETHOST foo.bar");
    server.take_output(oper);
    assert_eq!(server.users.get(oper).unwrap().display_host, "foo.bar");
}

#[test]
fn sethost_requires_oper() {
    let mut server = test_server();
    let id = connect(&mut server, "alice");
    server.handle_line(id, "SETHOST foo.bar");
    expect_line(&mut server, id, " 481 ");
}

// S5: a services SVSHOLD blocks local NICK changes with 432.
#[test]
fn svshold_blocks_held_nick() {
    let mut server = test_server();
    let services = connect_service(&mut server, "NickServ");
    server.handle_line(services, "SVSHOLD Alice 3600 :reserved");

    let id = connect(&mut server, "bob");
    server.handle_line(id, "NICK Alice");
    let line = expect_line(&mut server, id, " 432 ");
    assert!(line.contains("Alice"));
    assert!(line.contains("Services reserved nickname: reserved"), "{line}");
    assert_eq!(server.user_nick(id), "bob");
}

#[test]
fn svshold_refused_from_local_users() {
    let mut server = test_server();
    let oper = connect(&mut server, "root");
    oper_up(&mut server, oper);
    server.handle_line(oper, "SVSHOLD Alice 3600 :mine now");
    expect_line(&mut server, oper, " 481 ");
    assert!(server.xlines.lines("SVSHOLD").is_empty());
}

#[test]
fn svshold_expires_with_the_clock() {
    let mut server = test_server();
    server.tick(1000);
    let services = connect_service(&mut server, "NickServ");
    server.handle_line(services, "SVSHOLD Alice 5 :reserved");
    assert_eq!(server.xlines.lines("SVSHOLD").len(), 1);

    server.tick(1006);
    assert!(server.xlines.lines("SVSHOLD").is_empty());

    let id = connect(&mut server, "bob");
    server.handle_line(id, "NICK Alice");
    server.take_output(id);
    assert_eq!(server.user_nick(id), "Alice");
}

#[test]
fn restrictchans_limits_creation_to_opers() {
    let mut server = test_server_with(
        "<restrictchans>\n<allowchannel name=\"#free*\">\n",
    );
    let user = connect(&mut server, "alice");

    server.handle_line(user, "JOIN #locked");
    let line = expect_line(&mut server, user, " 474 ");
    assert!(line.contains("Only IRC operators may create new channels"));

    // Allowed mask passes.
    server.handle_line(user, "JOIN #freedom");
    server.take_output(user);
    assert!(server.channels.contains("#freedom"));

    // Existing channels are joinable by anyone.
    let oper = connect(&mut server, "root");
    oper_up(&mut server, oper);
    server.handle_line(oper, "JOIN #locked");
    server.take_output(oper);
    server.handle_line(user, "JOIN #locked");
    server.take_output(user);
    assert!(server.channels.get("#locked").unwrap().has_member(user));
}

#[test]
fn quit_broadcasts_to_common_channels() {
    let mut server = test_server();
    let alice = connect(&mut server, "alice");
    let bob = connect(&mut server, "bob");
    server.handle_line(alice, "JOIN #room");
    server.handle_line(bob, "JOIN #room");
    server.take_output(alice);
    server.take_output(bob);

    server.handle_line(alice, "QUIT :done here");
    let quit = expect_line(&mut server, bob, "QUIT");
    assert!(quit.contains("Quit: done here"));

    // The channel forgets the member; the cull pass reclaims storage.
    assert!(!server.channels.get("#room").unwrap().has_member(alice));
    assert!(server.users.get(alice).unwrap().dead);
    server.cull_pass();
    assert!(server.users.get(alice).is_none());
}

#[test]
fn ping_pong_round_trip() {
    let mut server = test_server();
    let id = connect(&mut server, "alice");
    server.handle_line(id, "PING :token123");
    let pong = expect_line(&mut server, id, "PONG");
    assert!(pong.contains("token123"));

    server.handle_line(id, "PING");
    expect_line(&mut server, id, " 409 ");
}
