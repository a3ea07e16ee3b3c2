//! The mode processor: validation, access checks, watcher hooks and
//! application of [`ChangeList`]s, plus the MODE broadcast.

use std::rc::Rc;

use crate::events::ModResult;
use crate::numeric;
use crate::server::Server;
use crate::state::UserId;
use crate::util::irc_fold;

use super::{Change, ChangeList, ModeBehavior, ModeKind, ModeRef, ModeSubject, ModeTarget};

/// Mode parameters longer than this are cropped when setting.
pub const MODE_PARAM_MAX: usize = 250;

/// How a change list should be processed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessFlags {
    /// Enforce membership-rank ACLs (on for client-originated changes,
    /// off for server-originated ones).
    pub check_access: bool,
    /// Server-merge semantics: a parameter mode already set locally asks
    /// its handler who wins.
    pub merge: bool,
    /// Do not queue the result for propagation to peers.
    pub local_only: bool,
}

/// Flat copy of the handler fields the pipeline needs, so no registry
/// borrow is held while the server is mutated.
struct Descriptor {
    name: String,
    letter: char,
    target: ModeTarget,
    kind: ModeKind,
    id: Option<super::ModeId>,
    set_rank: u32,
    unset_rank: u32,
    oper_only: bool,
    behavior: Option<Rc<dyn ModeBehavior>>,
}

fn describe(server: &Server, mode: ModeRef) -> Option<Descriptor> {
    let h = server.modes.try_get(mode)?;
    Some(Descriptor {
        name: h.name.clone(),
        letter: h.letter,
        target: h.target,
        kind: h.kind.clone(),
        id: h.id,
        set_rank: h.set_rank,
        unset_rank: h.unset_rank,
        oper_only: h.oper_only,
        behavior: h.behavior.clone(),
    })
}

/// Translate `MODE` arguments (mode string plus trailing parameters)
/// into a change list, reporting unknown letters as numerics.
pub fn modes_from_params(
    server: &mut Server,
    source: UserId,
    target: ModeTarget,
    params: &[String],
) -> ChangeList {
    let mut changes = ChangeList::new();
    let Some(modestring) = params.first() else {
        return changes;
    };

    let mut adding = true;
    let mut param_at = 1;
    for letter in modestring.chars() {
        match letter {
            '+' => adding = true,
            '-' => adding = false,
            _ => match server.modes.find(letter, target) {
                Some(mode) => {
                    let needs_param = server.modes.get(mode).needs_param(adding);
                    let param = if needs_param && param_at < params.len() {
                        let p = params[param_at].clone();
                        param_at += 1;
                        p
                    } else {
                        String::new()
                    };
                    changes.push(mode, adding, param);
                }
                None => {
                    let (code, kind) = match target {
                        ModeTarget::Channel => (numeric::ERR_UNKNOWNMODE, "channel"),
                        ModeTarget::User => (numeric::ERR_UNKNOWNSNOMASK, "user"),
                    };
                    server.send_numeric(
                        source,
                        code,
                        &[&letter.to_string()],
                        Some(&format!("is not a recognised {kind} mode.")),
                    );
                }
            },
        }
    }
    changes
}

/// Process an entire change list. Each pass applies at most
/// `<limits:maxmodes>` changes and broadcasts one MODE event, then the
/// remainder is attempted again.
pub fn process(
    server: &mut Server,
    source: UserId,
    subject: &ModeSubject,
    changelist: &mut ChangeList,
    flags: ProcessFlags,
) {
    let mut processed = 0;
    loop {
        let n = process_single(server, source, subject, changelist, flags, processed);
        processed += n;
        if n == 0 || processed >= changelist.len() {
            break;
        }
    }
}

/// One capped pass starting at `begin`. Returns how many entries were
/// consumed (applied or rejected); entries past the cap are left for a
/// subsequent call.
pub fn process_single(
    server: &mut Server,
    source: UserId,
    subject: &ModeSubject,
    changelist: &mut ChangeList,
    flags: ProcessFlags,
    begin: usize,
) -> usize {
    let max_modes = server.config.limits.max_modes;
    let mut applied: Vec<(Change, bool)> = Vec::new();
    let mut consumed = 0;

    for i in begin..changelist.len() {
        consumed += 1;

        let Some(desc) = describe(server, changelist.get(i).expect("index in range").mode) else {
            // Stale reference, e.g. a restore of a mode deleted meanwhile.
            continue;
        };

        let needs_param = {
            let change = changelist.get_mut(i).expect("index in range");
            let needs = desc_needs_param(&desc, change.adding);
            if needs && change.adding && change.param.len() > MODE_PARAM_MAX {
                let mut cut = MODE_PARAM_MAX;
                while !change.param.is_char_boundary(cut) {
                    cut -= 1;
                }
                change.param.truncate(cut);
            }
            needs
        };

        if needs_param {
            let change = changelist.get(i).expect("index in range").clone();
            if change.param.is_empty() {
                on_parameter_missing(server, source, subject, &desc);
                continue;
            }
            if change.param.starts_with(':') || change.param.contains(' ') {
                on_parameter_invalid(server, source, subject, &desc);
                continue;
            }
            if flags.merge && !should_apply_merged(server, subject, &desc, &change.param) {
                continue;
            }
        }

        let allowed = try_mode(
            server,
            source,
            subject,
            changelist.get_mut(i).expect("index in range"),
            &desc,
            !flags.check_access,
        );
        if !allowed {
            continue;
        }

        let change = changelist.get(i).expect("index in range").clone();
        applied.push((change, needs_param));

        if applied.len() >= max_modes {
            break;
        }
    }

    if !applied.is_empty() {
        announce(server, source, subject, &applied);
    }

    consumed
}

fn desc_needs_param(desc: &Descriptor, adding: bool) -> bool {
    match &desc.kind {
        ModeKind::Flag => false,
        ModeKind::Param { set_only } => adding || !set_only,
        ModeKind::List | ModeKind::Prefix { .. } => true,
    }
}

fn on_parameter_missing(server: &mut Server, source: UserId, subject: &ModeSubject, desc: &Descriptor) {
    let target = subject_display(server, subject);
    server.send_numeric(
        source,
        numeric::ERR_INVALIDMODEPARAM,
        &[&target, &desc.letter.to_string(), "*"],
        Some(&format!("You must specify a parameter for the {} mode.", desc.name)),
    );
}

fn on_parameter_invalid(server: &mut Server, source: UserId, subject: &ModeSubject, desc: &Descriptor) {
    let target = subject_display(server, subject);
    server.send_numeric(
        source,
        numeric::ERR_INVALIDMODEPARAM,
        &[&target, &desc.letter.to_string(), "*"],
        Some("Invalid parameter for this mode."),
    );
}

fn subject_display(server: &Server, subject: &ModeSubject) -> String {
    match subject {
        ModeSubject::Channel(name) => server
            .channels
            .get(name)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| name.clone()),
        ModeSubject::User(id) => server
            .users
            .get(*id)
            .map(|u| u.nick.clone())
            .unwrap_or_else(|| "*".into()),
    }
}

/// Merge tie-break: apply the incoming parameter unless the mode is
/// already set here and its handler says ours wins.
fn should_apply_merged(
    server: &Server,
    subject: &ModeSubject,
    desc: &Descriptor,
    theirs: &str,
) -> bool {
    let ModeSubject::Channel(name) = subject else {
        return true;
    };
    if desc.id.is_none() || matches!(desc.kind, ModeKind::List) {
        return true;
    }
    let Some(chan) = server.channels.get(name) else {
        return true;
    };
    let id = desc.id.expect("checked above");
    if !chan.modes.is_set(id) {
        return true;
    }
    let ours = chan.modes.param(id).unwrap_or("");
    match &desc.behavior {
        Some(b) => b.resolve_conflict(theirs, ours),
        None => theirs < ours,
    }
}

/// The per-change protocol: hooks, ACL, oper gate, state application.
fn try_mode(
    server: &mut Server,
    source: UserId,
    subject: &ModeSubject,
    change: &mut Change,
    desc: &Descriptor,
    skip_acl: bool,
) -> bool {
    let source_local = server.users.get(source).map(|u| u.local).unwrap_or(false);

    let mut raw_result = ModResult::Passthru;
    for hook in server.events.raw_mode_hooks() {
        match hook.on_raw_mode(server, source, subject, change) {
            ModResult::Passthru => {}
            other => {
                raw_result = other;
                break;
            }
        }
    }
    if source_local && raw_result == ModResult::Deny {
        return false;
    }

    if let ModeSubject::Channel(chan_name) = subject {
        if !skip_acl && raw_result != ModResult::Allow {
            let self_remove = match desc.kind {
                ModeKind::Prefix { self_remove, .. } => {
                    let source_nick = server
                        .users
                        .get(source)
                        .map(|u| u.nick.clone())
                        .unwrap_or_default();
                    self_remove && !change.adding && crate::util::irc_eq(&source_nick, &change.param)
                }
                _ => false,
            };

            if !self_remove && !check_rank(server, source, chan_name, change.adding, desc) {
                return false;
            }
        }
    }

    let watchers = server.modes.watchers_for(desc.target, &desc.name);
    let needs_param = desc_needs_param(desc, change.adding);
    for watcher in &watchers {
        if !watcher.before_mode(server, source, subject, change) {
            return false;
        }
        // A watcher emptied a required parameter; abort.
        if needs_param && change.param.is_empty() {
            return false;
        }
    }

    let oper_gate_applies = match subject {
        ModeSubject::Channel(_) => true,
        ModeSubject::User(_) => change.adding,
    };
    if oper_gate_applies && source_local && desc.oper_only {
        let is_oper = server.users.get(source).map(|u| u.is_oper()).unwrap_or(false);
        if !is_oper {
            let kind = match desc.target {
                ModeTarget::Channel => "channel",
                ModeTarget::User => "user",
            };
            let dir = if change.adding { "set" } else { "unset" };
            server.send_numeric(
                source,
                numeric::ERR_NOPRIVILEGES,
                &[],
                Some(&format!(
                    "Permission Denied - Only operators may {dir} {kind} mode {}",
                    desc.letter
                )),
            );
            return false;
        }
    }

    if let Some(behavior) = &desc.behavior {
        if !behavior.before_apply(server, source, subject, change) {
            return false;
        }
    }

    if !apply_change(server, source, subject, change, desc) {
        return false;
    }

    if needs_param && change.param.is_empty() {
        return false;
    }

    for watcher in &watchers {
        watcher.after_mode(server, source, subject, change);
    }

    true
}

/// Rank ACL against the source's best prefix on the channel, naming the
/// cheapest sufficient prefix mode in the rejection.
fn check_rank(
    server: &mut Server,
    source: UserId,
    chan_name: &str,
    adding: bool,
    desc: &Descriptor,
) -> bool {
    let needed = if adding { desc.set_rank } else { desc.unset_rank };
    if needed == 0 {
        return true;
    }

    let our_rank = server
        .channels
        .get(chan_name)
        .and_then(|c| c.member(source))
        .map(|m| server.modes.rank_of(&m.prefixes))
        .unwrap_or(0);
    if our_rank >= needed {
        return true;
    }

    // Cheapest prefix mode that would have sufficed.
    let mut needed_name: Option<(u32, String)> = None;
    for pm in server.modes.prefix_modes() {
        let h = server.modes.get(pm);
        let rank = h.prefix_rank();
        if rank >= needed && needed_name.as_ref().map(|(r, _)| rank < *r).unwrap_or(true) {
            needed_name = Some((rank, h.name.clone()));
        }
    }

    let display = subject_display(server, &ModeSubject::Channel(chan_name.to_string()));
    let dir = if adding { "" } else { "un" };
    let text = match needed_name {
        Some((_, name)) => format!(
            "You must have channel {name} access or above to {dir}set channel mode {}",
            desc.letter
        ),
        None => format!("You cannot {dir}set channel mode {}", desc.letter),
    };
    server.send_numeric(source, numeric::ERR_CHANOPRIVSNEEDED, &[&display], Some(&text));
    false
}

/// Variant-specific state transition. Returns false to deny.
fn apply_change(
    server: &mut Server,
    source: UserId,
    subject: &ModeSubject,
    change: &mut Change,
    desc: &Descriptor,
) -> bool {
    match (&desc.kind, subject) {
        (ModeKind::Flag, ModeSubject::User(target)) | (ModeKind::Param { .. }, ModeSubject::User(target)) => {
            let id = desc.id.expect("user modes always take an id");
            let Some(user) = server.users.get_mut(*target) else {
                return false;
            };
            if matches!(desc.kind, ModeKind::Flag) {
                if user.modes.is_set(id) == change.adding {
                    return false;
                }
                user.modes.set(id, change.adding);
            } else if change.adding {
                if user.modes.param(id) == Some(change.param.as_str()) {
                    return false;
                }
                user.modes.set_param(id, change.param.clone());
            } else {
                if !user.modes.is_set(id) {
                    return false;
                }
                user.modes.set(id, false);
            }
            true
        }

        (ModeKind::Flag, ModeSubject::Channel(name)) => {
            let id = desc.id.expect("flag channel modes take an id");
            let Some(chan) = server.channels.get_mut(name) else {
                return false;
            };
            if chan.modes.is_set(id) == change.adding {
                return false;
            }
            chan.modes.set(id, change.adding);
            true
        }

        (ModeKind::Param { .. }, ModeSubject::Channel(name)) => {
            let id = desc.id.expect("param channel modes take an id");
            let Some(chan) = server.channels.get_mut(name) else {
                return false;
            };
            if change.adding {
                if chan.modes.param(id) == Some(change.param.as_str()) {
                    return false;
                }
                chan.modes.set_param(id, change.param.clone());
            } else {
                if !chan.modes.is_set(id) {
                    return false;
                }
                chan.modes.set(id, false);
            }
            true
        }

        (ModeKind::List, ModeSubject::Channel(name)) => {
            change.param = clean_mask(&change.param);
            let max_bans = server.config.limits.max_bans;
            let now = server.now();
            let setter = server
                .users
                .get(source)
                .map(|u| u.nick.clone())
                .unwrap_or_else(|| "*".into());

            let display = subject_display(server, subject);
            let Some(chan) = server.channels.get_mut(name) else {
                return false;
            };
            if change.adding {
                if chan.list(desc.letter).len() >= max_bans {
                    let letter = desc.letter.to_string();
                    server.send_numeric(
                        source,
                        numeric::ERR_BANLISTFULL,
                        &[&display, &letter],
                        Some(&format!(
                            "Channel {} list is full (maximum entries for this channel is {max_bans})",
                            desc.name
                        )),
                    );
                    return false;
                }
                chan.list_add(
                    desc.letter,
                    crate::state::ListEntry { mask: change.param.clone(), set_by: setter, set_at: now },
                )
            } else {
                chan.list_remove(desc.letter, &change.param)
            }
        }

        (ModeKind::Prefix { .. }, ModeSubject::Channel(name)) => {
            let target = if server.users.get(source).map(|u| u.local).unwrap_or(false) {
                server.users.find_nick(&change.param)
            } else {
                server
                    .users
                    .find_uuid(&change.param)
                    .or_else(|| server.users.find_nick(&change.param))
            };
            let Some(target) = target else {
                let param = change.param.clone();
                server.send_numeric(
                    source,
                    numeric::ERR_NOSUCHNICK,
                    &[&param],
                    Some("No such nick"),
                );
                return false;
            };

            // Normalise the parameter to the target's display nick.
            change.param = server
                .users
                .get(target)
                .map(|u| u.nick.clone())
                .unwrap_or_else(|| change.param.clone());

            let letter = desc.letter;
            match server.channels.get_mut(name).and_then(|c| c.member_mut(target)) {
                Some(member) => member.set_prefix(letter, change.adding),
                None => false,
            }
        }

        // A list or prefix mode aimed at a user cannot be registered.
        _ => false,
    }
}

/// Build and deliver the single MODE event for the applied changes.
fn announce(
    server: &mut Server,
    source: UserId,
    subject: &ModeSubject,
    applied: &[(Change, bool)],
) {
    let mut modestr = String::new();
    let mut params: Vec<String> = Vec::new();
    let mut sign: Option<bool> = None;
    for (change, takes_param) in applied {
        if sign != Some(change.adding) {
            modestr.push(if change.adding { '+' } else { '-' });
            sign = Some(change.adding);
        }
        if let Some(h) = server.modes.try_get(change.mode) {
            modestr.push(h.letter);
        }
        if *takes_param && !change.param.is_empty() {
            params.push(change.param.clone());
        }
    }

    let prefix = server.user_prefix(source);
    let target = subject_display(server, subject);
    let mut line = format!(":{prefix} MODE {target} {modestr}");
    for p in &params {
        line.push(' ');
        line.push_str(p);
    }

    match subject {
        ModeSubject::Channel(name) => {
            let name = irc_fold(name);
            server.write_channel(&name, &line, None);
        }
        ModeSubject::User(id) => {
            if let Some(user) = server.users.get_mut(*id) {
                user.send(line);
            }
        }
    }
}

/// Normalise a ban-style mask to `nick!ident@host`, inserting `*` where
/// components are missing. `X:`-shaped ext-ban masks pass through
/// untouched.
pub fn clean_mask(mask: &str) -> String {
    let chars: Vec<char> = mask.chars().collect();
    if chars.len() >= 2 && chars[1] == ':' {
        return mask.to_string();
    }

    let has_pling = mask.contains('!');
    let has_at = mask.contains('@');
    let has_dot = mask.contains('.');
    let has_colons = mask.contains("::");

    if !has_pling && !has_at {
        if !has_dot && !has_colons && !mask.starts_with(':') {
            // No separators at all: a bare nick.
            format!("{mask}!*@*")
        } else {
            // Dotted or colon-delimited: a host or address.
            format!("*!*@{mask}")
        }
    } else if !has_pling && has_at {
        format!("*!{mask}")
    } else if has_pling && !has_at {
        format!("{mask}@*")
    } else {
        mask.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_mask_shapes() {
        assert_eq!(clean_mask("nick"), "nick!*@*");
        assert_eq!(clean_mask("host.example.com"), "*!*@host.example.com");
        assert_eq!(clean_mask("2001:db8::1"), "*!*@2001:db8::1");
        assert_eq!(clean_mask("user@host"), "*!user@host");
        assert_eq!(clean_mask("nick!user"), "nick!user@*");
        assert_eq!(clean_mask("nick!user@host"), "nick!user@host");
    }

    #[test]
    fn clean_mask_extban_passthrough() {
        assert_eq!(clean_mask("a:payload"), "a:payload");
        assert_eq!(clean_mask("U:"), "U:");
    }

    #[test]
    fn clean_mask_is_idempotent() {
        for mask in ["nick", "host.example.com", "user@host", "nick!user", "a:x", "*!*@*"] {
            let once = clean_mask(mask);
            assert_eq!(clean_mask(&once), once, "not idempotent for {mask}");
        }
    }
}
