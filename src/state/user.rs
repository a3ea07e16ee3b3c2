//! User-related types and state.

use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use std::rc::Rc;

use crate::extensible::Extensions;
use crate::modes::ModeSet;

/// Stable store key for a user. Survives nick changes; dies with the
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(pub u64);

/// Connection registration phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegPhase {
    /// Nothing received yet.
    None,
    /// NICK seen, USER outstanding.
    Nick,
    /// USER seen, NICK outstanding.
    User,
    /// Fully registered.
    All,
}

/// Operator credentials a user authenticated against.
#[derive(Debug, Clone)]
pub struct OperInfo {
    pub name: String,
    pub oper_type: String,
}

/// A connected identity, local or remote.
#[derive(Debug)]
pub struct User {
    pub id: UserId,
    /// Connection-stable wire identifier (SID + base36 counter).
    pub uuid: String,
    /// Display-case nickname; `*` until NICK is accepted.
    pub nick: String,
    pub ident: String,
    pub realname: String,
    /// Hostname as resolved from the connection.
    pub real_host: String,
    /// Hostname shown to other users; may be rewritten (SETHOST).
    pub display_host: String,
    pub ip: String,
    pub phase: RegPhase,
    /// Connection start, engine seconds.
    pub signon: u64,
    pub last_activity: u64,
    /// Away message; `None` means not away.
    pub away: Option<String>,
    pub away_time: u64,
    pub oper: Option<Rc<OperInfo>>,
    pub modes: ModeSet,
    /// Server-notice categories this user receives (+s parameter).
    pub snomasks: HashSet<char>,
    /// Folded names of joined channels.
    pub channels: HashSet<String>,
    pub ext: Extensions,
    /// False for users introduced by a peer server.
    pub local: bool,
    /// True when the owning server is a services pseudoserver.
    pub service: bool,
    /// Marked on quit; storage is reclaimed by the cull pass.
    pub dead: bool,
    /// PASS argument held until registration completes.
    pub password: Option<String>,
    /// Outbound lines awaiting the send-queue drain.
    pub sendq: VecDeque<String>,
}

impl User {
    pub fn new(id: UserId, uuid: String, ip: String, host: String, now: u64, local: bool) -> Self {
        Self {
            id,
            uuid,
            nick: "*".into(),
            ident: String::new(),
            realname: String::new(),
            real_host: host.clone(),
            display_host: host,
            ip,
            phase: RegPhase::None,
            signon: now,
            last_activity: now,
            away: None,
            away_time: 0,
            oper: None,
            modes: ModeSet::default(),
            snomasks: HashSet::new(),
            channels: HashSet::new(),
            ext: Extensions::new(),
            local,
            service: false,
            dead: false,
            password: None,
            sendq: VecDeque::new(),
        }
    }

    pub fn registered(&self) -> bool {
        self.phase == RegPhase::All
    }

    pub fn is_oper(&self) -> bool {
        self.oper.is_some()
    }

    pub fn is_away(&self) -> bool {
        self.away.is_some()
    }

    /// `nick!ident@displayed-host`, the mask other users see.
    pub fn hostmask(&self) -> String {
        format!("{}!{}@{}", self.nick, self.ident, self.display_host)
    }

    /// `ident@real-host`, the form K-lines match against.
    pub fn ident_host(&self) -> String {
        format!("{}@{}", self.ident, self.real_host)
    }

    pub fn parsed_ip(&self) -> Option<IpAddr> {
        self.ip.parse().ok()
    }

    /// Queue one outbound line for this user, if local and alive.
    pub fn send(&mut self, line: impl Into<String>) {
        if self.local && !self.dead {
            self.sendq.push_back(line.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        let mut u = User::new(UserId(1), "001AAAAAA".into(), "10.0.0.1".into(), "host.example.com".into(), 100, true);
        u.nick = "Alice".into();
        u.ident = "alice".into();
        u
    }

    #[test]
    fn hostmask_uses_display_host() {
        let mut u = user();
        u.display_host = "cloak/alice".into();
        assert_eq!(u.hostmask(), "Alice!alice@cloak/alice");
        assert_eq!(u.ident_host(), "alice@host.example.com");
    }

    #[test]
    fn send_drops_for_dead_or_remote() {
        let mut u = user();
        u.send("one");
        u.dead = true;
        u.send("two");
        assert_eq!(u.sendq.len(), 1);

        let mut remote = User::new(UserId(2), "002AAAAAA".into(), "::1".into(), "h".into(), 0, false);
        remote.send("x");
        assert!(remote.sendq.is_empty());
    }

    #[test]
    fn ip_parses_v4_and_v6() {
        let u = user();
        assert!(u.parsed_ip().unwrap().is_ipv4());
        let mut v6 = user();
        v6.ip = "2001:db8::1".into();
        assert!(v6.parsed_ip().unwrap().is_ipv6());
    }
}
