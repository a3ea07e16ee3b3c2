//! X-lines: expirable, string-matched access records.
//!
//! Each kind (`K`, `Z`, `G`, `E`, `SHUN`, `SVSHOLD`) has a factory that
//! builds entries from a pattern and declares whether adding one should
//! sweep the connected-user table. The manager keeps per-kind containers
//! in insertion order (matching is first-hit on a typically small N)
//! plus an expiry heap keyed by `set_time + duration`; permanent lines
//! (duration 0) never enter the heap.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::net::IpAddr;
use std::rc::Rc;

use ipnet::IpNet;

use crate::error::XLineError;
use crate::state::User;
use crate::util::{duration_string, wildcard_match};

/// Fields shared by every X-line.
#[derive(Debug, Clone)]
pub struct XLineProps {
    pub set_time: u64,
    /// Seconds; 0 means permanent.
    pub duration: u64,
    /// Who set it (nick or server name).
    pub source: String,
    pub reason: String,
}

impl XLineProps {
    /// Absolute expiry second, or `None` for permanent lines.
    pub fn expiry(&self) -> Option<u64> {
        (self.duration > 0).then(|| self.set_time + self.duration)
    }
}

/// One active access record.
pub trait XLine {
    fn kind(&self) -> &'static str;
    fn props(&self) -> &XLineProps;

    /// Whether this line applies to a connected user.
    fn matches_user(&self, user: &User) -> bool;

    /// Whether this line matches a free-form string (nick, mask, ...).
    fn matches_str(&self, s: &str) -> bool;

    /// The identity shown in stats output and used for removal.
    fn displayable(&self) -> String;

    /// Snotice text when the line expires; `None` suppresses it.
    fn expiry_text(&self, now: u64) -> Option<String> {
        let props = self.props();
        Some(format!(
            "Removing expired {} {} (set by {} {} ago): {}",
            self.kind(),
            self.displayable(),
            props.source,
            duration_string(now.saturating_sub(props.set_time)),
            props.reason
        ))
    }
}

/// Builds entries of one kind.
pub trait XLineFactory {
    fn kind(&self) -> &'static str;

    fn generate(&self, props: XLineProps, pattern: &str) -> Result<Box<dyn XLine>, XLineError>;

    /// Whether a freshly added line is applied to the existing user
    /// table (disconnecting matches) or only gates future actions.
    fn auto_apply(&self) -> bool {
        true
    }
}

/// `ident@host` pattern; used by K-, G-, E-lines and shuns. Matches the
/// real host, the displayed host and the IP.
pub struct IdentHostLine {
    kind: &'static str,
    props: XLineProps,
    ident: String,
    host: String,
}

impl IdentHostLine {
    pub fn new(kind: &'static str, props: XLineProps, pattern: &str) -> Result<Self, XLineError> {
        let (ident, host) = match pattern.split_once('@') {
            Some((i, h)) if !h.is_empty() => (if i.is_empty() { "*" } else { i }, h),
            // A bare pattern is a host mask for any ident.
            None if !pattern.is_empty() => ("*", pattern),
            _ => {
                return Err(XLineError::BadPattern {
                    kind: kind.to_string(),
                    mask: pattern.to_string(),
                })
            }
        };
        Ok(Self {
            kind,
            props,
            ident: ident.to_string(),
            host: host.to_string(),
        })
    }
}

impl XLine for IdentHostLine {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn props(&self) -> &XLineProps {
        &self.props
    }

    fn matches_user(&self, user: &User) -> bool {
        wildcard_match(&self.ident, &user.ident)
            && (wildcard_match(&self.host, &user.real_host)
                || wildcard_match(&self.host, &user.display_host)
                || wildcard_match(&self.host, &user.ip))
    }

    fn matches_str(&self, s: &str) -> bool {
        wildcard_match(&self.displayable(), s)
    }

    fn displayable(&self) -> String {
        format!("{}@{}", self.ident, self.host)
    }
}

/// IP or CIDR pattern for Z-lines. CIDR forms use real prefix matching;
/// anything else falls back to a wildcard match on the IP string.
pub struct ZLine {
    props: XLineProps,
    pattern: String,
    net: Option<IpNet>,
}

impl ZLine {
    pub fn new(props: XLineProps, pattern: &str) -> Result<Self, XLineError> {
        if pattern.is_empty() || pattern.contains('@') {
            return Err(XLineError::BadPattern { kind: "Z".into(), mask: pattern.into() });
        }
        let net = pattern
            .parse::<IpNet>()
            .ok()
            .or_else(|| pattern.parse::<IpAddr>().ok().map(IpNet::from));
        Ok(Self { props, pattern: pattern.to_string(), net })
    }

    fn matches_ip(&self, ip: &str) -> bool {
        match (&self.net, ip.parse::<IpAddr>()) {
            (Some(net), Ok(addr)) => net.contains(&addr),
            _ => wildcard_match(&self.pattern, ip),
        }
    }
}

impl XLine for ZLine {
    fn kind(&self) -> &'static str {
        "Z"
    }

    fn props(&self) -> &XLineProps {
        &self.props
    }

    fn matches_user(&self, user: &User) -> bool {
        self.matches_ip(&user.ip)
    }

    fn matches_str(&self, s: &str) -> bool {
        self.matches_ip(s)
    }

    fn displayable(&self) -> String {
        self.pattern.clone()
    }
}

/// Nickname glob, used by SVSHOLD. Matched on pre-NICK, never against
/// connected state, so `auto_apply` is off for its factory.
pub struct NickLine {
    kind: &'static str,
    props: XLineProps,
    nick: String,
    /// Suppress the expiry snotice (`<svshold silent>`).
    pub silent: bool,
}

impl NickLine {
    pub fn new(kind: &'static str, props: XLineProps, nick: &str, silent: bool) -> Result<Self, XLineError> {
        if nick.is_empty() {
            return Err(XLineError::BadPattern { kind: kind.to_string(), mask: nick.to_string() });
        }
        Ok(Self { kind, props, nick: nick.to_string(), silent })
    }
}

impl XLine for NickLine {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn props(&self) -> &XLineProps {
        &self.props
    }

    fn matches_user(&self, user: &User) -> bool {
        wildcard_match(&self.nick, &user.nick)
    }

    fn matches_str(&self, s: &str) -> bool {
        wildcard_match(&self.nick, s)
    }

    fn displayable(&self) -> String {
        self.nick.clone()
    }

    fn expiry_text(&self, now: u64) -> Option<String> {
        if self.silent {
            return None;
        }
        let props = self.props();
        Some(format!(
            "Removing expired {} {} (set by {} {} ago): {}",
            self.kind(),
            self.displayable(),
            props.source,
            duration_string(now.saturating_sub(props.set_time)),
            props.reason
        ))
    }
}

/// The matched-set store for every kind.
#[derive(Default)]
pub struct XLineManager {
    factories: HashMap<String, Rc<dyn XLineFactory>>,
    lines: HashMap<String, Vec<Box<dyn XLine>>>,
    /// `(expiry, kind, displayable)`; min-heap via Reverse. Entries can
    /// go stale when a line is deleted early, so expiry re-checks.
    expiry: BinaryHeap<Reverse<(u64, String, String)>>,
}

impl XLineManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_factory(&mut self, factory: Rc<dyn XLineFactory>) {
        self.factories.insert(factory.kind().to_string(), factory);
    }

    pub fn unregister_factory(&mut self, kind: &str) -> bool {
        self.factories.remove(kind).is_some()
    }

    pub fn has_factory(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Whether adding a `kind` line sweeps the user table.
    pub fn auto_applies(&self, kind: &str) -> bool {
        self.factories.get(kind).map(|f| f.auto_apply()).unwrap_or(false)
    }

    /// Build a line through the kind's factory.
    pub fn make_line(
        &self,
        kind: &str,
        props: XLineProps,
        pattern: &str,
    ) -> Result<Box<dyn XLine>, XLineError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| XLineError::UnknownKind { kind: kind.to_string() })?;
        factory.generate(props, pattern)
    }

    /// Insert a line; fails when an equivalent one (same kind and
    /// displayable) already exists.
    pub fn add_line(&mut self, line: Box<dyn XLine>) -> Result<(), XLineError> {
        let kind = line.kind().to_string();
        let display = line.displayable();
        let container = self.lines.entry(kind.clone()).or_default();
        if container
            .iter()
            .any(|l| l.displayable().eq_ignore_ascii_case(&display))
        {
            return Err(XLineError::Duplicate { kind, mask: display });
        }
        if let Some(expiry) = line.props().expiry() {
            self.expiry.push(Reverse((expiry, kind, display)));
        }
        container.push(line);
        Ok(())
    }

    /// Remove a line by displayable. Returns the removed entry.
    pub fn del_line(&mut self, kind: &str, mask: &str) -> Option<Box<dyn XLine>> {
        let container = self.lines.get_mut(kind)?;
        let idx = container
            .iter()
            .position(|l| l.displayable().eq_ignore_ascii_case(mask))?;
        let line = container.remove(idx);
        if container.is_empty() {
            self.lines.remove(kind);
        }
        Some(line)
    }

    /// Drop every line of one kind (module unload).
    pub fn del_all(&mut self, kind: &str) -> usize {
        self.lines.remove(kind).map(|v| v.len()).unwrap_or(0)
    }

    /// First line of `kind` matching this user.
    pub fn matches_user(&self, kind: &str, user: &User) -> Option<&dyn XLine> {
        self.lines
            .get(kind)?
            .iter()
            .find(|l| l.matches_user(user))
            .map(Box::as_ref)
    }

    /// First line of `kind` matching a string.
    pub fn matches_str(&self, kind: &str, s: &str) -> Option<&dyn XLine> {
        self.lines
            .get(kind)?
            .iter()
            .find(|l| l.matches_str(s))
            .map(Box::as_ref)
    }

    /// Active lines of one kind, insertion order.
    pub fn lines(&self, kind: &str) -> &[Box<dyn XLine>] {
        self.lines.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.lines.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Drain the expiry heap up to `now`, removing and returning the
    /// lines that actually expired. Stale heap entries (for lines
    /// already deleted) are discarded silently.
    pub fn expire(&mut self, now: u64) -> Vec<Box<dyn XLine>> {
        let mut expired = Vec::new();
        while let Some(Reverse((trigger, _, _))) = self.expiry.peek() {
            if *trigger > now {
                break;
            }
            let Reverse((trigger, kind, display)) = self.expiry.pop().expect("peeked");
            let still_due = self
                .lines
                .get(&kind)
                .and_then(|c| {
                    c.iter()
                        .find(|l| l.displayable().eq_ignore_ascii_case(&display))
                })
                .map(|l| l.props().expiry() == Some(trigger))
                .unwrap_or(false);
            if still_due {
                if let Some(line) = self.del_line(&kind, &display) {
                    expired.push(line);
                }
            }
        }
        expired
    }

    /// Enumerate one kind into stats rows:
    /// `(displayable, set_time, duration, source, reason)`.
    pub fn stats(&self, kind: &str) -> Vec<(String, u64, u64, String, String)> {
        self.lines(kind)
            .iter()
            .map(|l| {
                let p = l.props();
                (
                    l.displayable(),
                    p.set_time,
                    p.duration,
                    p.source.clone(),
                    p.reason.clone(),
                )
            })
            .collect()
    }
}

struct IdentHostFactory {
    kind: &'static str,
    auto_apply: bool,
}

impl XLineFactory for IdentHostFactory {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn generate(&self, props: XLineProps, pattern: &str) -> Result<Box<dyn XLine>, XLineError> {
        Ok(Box::new(IdentHostLine::new(self.kind, props, pattern)?))
    }

    fn auto_apply(&self) -> bool {
        self.auto_apply
    }
}

struct ZLineFactory;

impl XLineFactory for ZLineFactory {
    fn kind(&self) -> &'static str {
        "Z"
    }

    fn generate(&self, props: XLineProps, pattern: &str) -> Result<Box<dyn XLine>, XLineError> {
        Ok(Box::new(ZLine::new(props, pattern)?))
    }
}

/// Register the kinds every server carries: K, G, Z and the E
/// exemption. Shun and SVSHOLD factories come from their modules.
pub fn register_core_factories(manager: &mut XLineManager) {
    manager.register_factory(Rc::new(IdentHostFactory { kind: "K", auto_apply: true }));
    manager.register_factory(Rc::new(IdentHostFactory { kind: "G", auto_apply: true }));
    // Exemptions only gate other lines; nothing to sweep.
    manager.register_factory(Rc::new(IdentHostFactory { kind: "E", auto_apply: false }));
    manager.register_factory(Rc::new(ZLineFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{User, UserId};

    fn props(set_time: u64, duration: u64) -> XLineProps {
        XLineProps {
            set_time,
            duration,
            source: "oper".into(),
            reason: "testing".into(),
        }
    }

    fn user(ident: &str, host: &str, ip: &str) -> User {
        let mut u = User::new(UserId(1), "001AAAAAA".into(), ip.into(), host.into(), 0, true);
        u.nick = "Target".into();
        u.ident = ident.into();
        u
    }

    fn manager() -> XLineManager {
        let mut m = XLineManager::new();
        register_core_factories(&mut m);
        m
    }

    #[test]
    fn kline_matches_ident_and_host() {
        let line = IdentHostLine::new("K", props(0, 0), "bad*@*.example.com").unwrap();
        assert!(line.matches_user(&user("baduser", "shell.example.com", "10.0.0.1")));
        assert!(!line.matches_user(&user("gooduser", "shell.example.com", "10.0.0.1")));
        assert!(!line.matches_user(&user("baduser", "other.net", "10.0.0.1")));
    }

    #[test]
    fn bare_pattern_is_a_host_mask() {
        let line = IdentHostLine::new("K", props(0, 0), "*.example.com").unwrap();
        assert_eq!(line.displayable(), "*@*.example.com");
        assert!(line.matches_user(&user("anyone", "x.example.com", "10.0.0.1")));
    }

    #[test]
    fn zline_cidr_and_wildcard() {
        let cidr = ZLine::new(props(0, 0), "10.1.0.0/16").unwrap();
        assert!(cidr.matches_str("10.1.2.3"));
        assert!(!cidr.matches_str("10.2.0.1"));

        let exact = ZLine::new(props(0, 0), "192.168.0.7").unwrap();
        assert!(exact.matches_str("192.168.0.7"));
        assert!(!exact.matches_str("192.168.0.8"));

        let glob = ZLine::new(props(0, 0), "10.9.*").unwrap();
        assert!(glob.matches_str("10.9.4.4"));

        let v6 = ZLine::new(props(0, 0), "2001:db8::/32").unwrap();
        assert!(v6.matches_str("2001:db8::1"));
        assert!(!v6.matches_str("2001:db9::1"));
    }

    #[test]
    fn duplicate_add_fails() {
        let mut m = manager();
        m.add_line(m.make_line("K", props(0, 0), "x@spam.net").unwrap()).unwrap();
        let err = m
            .add_line(m.make_line("K", props(5, 0), "X@SPAM.net").unwrap())
            .unwrap_err();
        assert!(matches!(err, XLineError::Duplicate { .. }));
        assert_eq!(m.lines("K").len(), 1);
    }

    #[test]
    fn del_line_by_displayable() {
        let mut m = manager();
        m.add_line(m.make_line("K", props(0, 0), "x@spam.net").unwrap()).unwrap();
        assert!(m.del_line("K", "x@spam.net").is_some());
        assert!(m.del_line("K", "x@spam.net").is_none());
        assert!(m.lines("K").is_empty());
    }

    #[test]
    fn timed_line_expires_and_permanent_does_not() {
        let mut m = manager();
        m.add_line(m.make_line("K", props(100, 5), "t@timed.net").unwrap()).unwrap();
        m.add_line(m.make_line("K", props(100, 0), "p@perm.net").unwrap()).unwrap();

        assert!(m.expire(104).is_empty());
        let expired = m.expire(106);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].displayable(), "t@timed.net");

        assert_eq!(m.lines("K").len(), 1);
        assert!(m.expire(1_000_000).is_empty());
        assert_eq!(m.lines("K").len(), 1);
    }

    #[test]
    fn deleted_line_leaves_stale_heap_entry_harmless() {
        let mut m = manager();
        m.add_line(m.make_line("K", props(0, 10), "a@b.net").unwrap()).unwrap();
        m.del_line("K", "a@b.net").unwrap();
        assert!(m.expire(20).is_empty());
    }

    #[test]
    fn first_match_wins_in_insertion_order() {
        let mut m = manager();
        m.add_line(m.make_line("K", props(0, 0), "*@*.example.com").unwrap()).unwrap();
        m.add_line(m.make_line("K", props(0, 0), "baduser@*").unwrap()).unwrap();

        let u = user("baduser", "shell.example.com", "1.2.3.4");
        let hit = m.matches_user("K", &u).unwrap();
        assert_eq!(hit.displayable(), "*@*.example.com");
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let m = manager();
        assert!(matches!(
            m.make_line("Q", props(0, 0), "x"),
            Err(XLineError::UnknownKind { .. })
        ));
    }

    #[test]
    fn stats_enumerates_fields() {
        let mut m = manager();
        m.add_line(m.make_line("Z", props(7, 60), "10.0.0.0/8").unwrap()).unwrap();
        let rows = m.stats("Z");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "10.0.0.0/8");
        assert_eq!(rows[0].1, 7);
        assert_eq!(rows[0].2, 60);
        assert_eq!(rows[0].3, "oper");
    }
}
