//! The TCP edge: accept connections, frame CRLF lines, shuttle queued
//! events into the engine task and queued output back to sockets.
//!
//! This is deliberately the thinnest possible socket engine. All
//! protocol work happens inside [`Server`] on one task; connection
//! tasks only move bytes. Everything engine-side is `Rc`-based and
//! non-`Send`, so the whole daemon runs on a current-thread runtime
//! with a `LocalSet`.

mod codec;

pub use codec::LineCodec;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;

use crate::server::Server;
use crate::state::UserId;

/// Events the transport feeds into the engine.
#[derive(Debug)]
pub enum EngineEvent {
    Accept {
        conn: u64,
        addr: SocketAddr,
        tx: mpsc::UnboundedSender<String>,
    },
    Line {
        conn: u64,
        line: String,
    },
    Closed {
        conn: u64,
    },
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Accept loop plus the engine loop. Runs until the listener errors or
/// the process is stopped.
pub async fn run(mut server: Server, listener: TcpListener) -> std::io::Result<()> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<EngineEvent>();

    let accept_tx = events_tx.clone();
    tokio::task::spawn_local(async move {
        let mut next_conn: u64 = 0;
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let conn = next_conn;
                    next_conn += 1;
                    spawn_connection(conn, stream, addr, accept_tx.clone());
                }
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                }
            }
        }
    });

    let mut conns: HashMap<u64, mpsc::UnboundedSender<String>> = HashMap::new();
    let mut users: HashMap<u64, UserId> = HashMap::new();

    server.tick(unix_now());
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = events_rx.recv() => {
                match event {
                    Some(EngineEvent::Accept { conn, addr, tx }) => {
                        let ip = addr.ip().to_string();
                        let id = server.accept_connection(&ip, &ip);
                        conns.insert(conn, tx);
                        users.insert(conn, id);
                        tracing::debug!(conn, %addr, "connection accepted");
                    }
                    Some(EngineEvent::Line { conn, line }) => {
                        if let Some(&id) = users.get(&conn) {
                            server.handle_line(id, &line);
                        }
                    }
                    Some(EngineEvent::Closed { conn }) => {
                        if let Some(id) = users.remove(&conn) {
                            server.quit_user(id, "Connection closed");
                        }
                        conns.remove(&conn);
                    }
                    None => break,
                }
            }
            _ = interval.tick() => {
                server.tick(unix_now());
            }
        }

        // Drain send queues to sockets, then drop writers for users the
        // engine has destroyed so their connections close.
        flush_output(&mut server, &users, &conns);
        let gone: Vec<u64> = users
            .iter()
            .filter(|(_, id)| server.users.get(**id).map(|u| u.dead).unwrap_or(true))
            .map(|(conn, _)| *conn)
            .collect();
        server.cull_pass();
        for conn in gone {
            users.remove(&conn);
            conns.remove(&conn);
        }

        // Propagation intents have no link layer attached; surface them
        // for diagnostics rather than dropping silently.
        for peer in server.peer_queue.drain(..) {
            tracing::trace!(verb = %peer.verb, broadcast = peer.broadcast, "unrouted peer message");
        }
    }

    Ok(())
}

fn flush_output(
    server: &mut Server,
    users: &HashMap<u64, UserId>,
    conns: &HashMap<u64, mpsc::UnboundedSender<String>>,
) {
    let output = server.drain_sendq();
    if output.is_empty() {
        return;
    }
    let by_user: HashMap<UserId, u64> = users.iter().map(|(c, u)| (*u, *c)).collect();
    for (id, lines) in output {
        let Some(tx) = by_user.get(&id).and_then(|c| conns.get(c)) else {
            continue;
        };
        for line in lines {
            let _ = tx.send(line);
        }
    }
}

/// One reader task and one writer task per connection.
fn spawn_connection(
    conn: u64,
    stream: TcpStream,
    addr: SocketAddr,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    if events.send(EngineEvent::Accept { conn, addr, tx }).is_err() {
        return;
    }

    let reader_events = events.clone();
    tokio::task::spawn_local(async move {
        let mut lines = FramedRead::new(read_half, LineCodec::new());
        while let Some(item) = lines.next().await {
            match item {
                Ok(line) => {
                    if reader_events
                        .send(EngineEvent::Line { conn, line })
                        .is_err()
                    {
                        return;
                    }
                }
                Err(err) => {
                    tracing::debug!(conn, error = %err, "read error");
                    break;
                }
            }
        }
        let _ = reader_events.send(EngineEvent::Closed { conn });
    });

    tokio::task::spawn_local(async move {
        while let Some(line) = rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if write_half.write_all(b"\r\n").await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });
}
