//! The core mode set registered at startup.

use std::rc::Rc;

use crate::server::Server;
use crate::state::UserId;

use super::{
    Change, ModeBehavior, ModeHandler, ModeRegistry, ModeSubject, ModeTarget, HALFOP_RANK, OP_RANK,
    VOICE_RANK,
};

/// `+k`: refuse keys that would break the wire format, crop to 32.
struct KeyBehavior;

impl ModeBehavior for KeyBehavior {
    fn before_apply(
        &self,
        _server: &mut Server,
        _source: UserId,
        _subject: &ModeSubject,
        change: &mut Change,
    ) -> bool {
        if !change.adding {
            return true;
        }
        if change.param.contains(',') {
            return false;
        }
        if change.param.len() > 32 {
            change.param.truncate(32);
        }
        !change.param.is_empty()
    }
}

/// `+l`: the parameter must be a positive integer; normalised to its
/// canonical decimal form.
struct LimitBehavior;

impl ModeBehavior for LimitBehavior {
    fn before_apply(
        &self,
        _server: &mut Server,
        _source: UserId,
        _subject: &ModeSubject,
        change: &mut Change,
    ) -> bool {
        if !change.adding {
            return true;
        }
        match change.param.parse::<u32>() {
            Ok(limit) if limit > 0 => {
                change.param = limit.to_string();
                true
            }
            _ => false,
        }
    }
}

/// `+o` (user): only ever granted through OPER; a local client asking
/// for it via MODE is refused. Removal is always allowed.
struct OperUserModeBehavior;

impl ModeBehavior for OperUserModeBehavior {
    fn before_apply(
        &self,
        server: &mut Server,
        source: UserId,
        _subject: &ModeSubject,
        change: &mut Change,
    ) -> bool {
        if !change.adding {
            return true;
        }
        // Adding is reserved to the engine itself (OPER handler runs as
        // the server identity).
        !server.users.get(source).map(|u| u.local).unwrap_or(true)
            || source == server.server_user()
    }
}

/// `+s` (user): snomask parameter, e.g. `+xa` or `-x`. Normalised to
/// the sorted set of resulting letters; unknown characters are dropped.
struct SnomaskBehavior;

impl ModeBehavior for SnomaskBehavior {
    fn before_apply(
        &self,
        server: &mut Server,
        _source: UserId,
        subject: &ModeSubject,
        change: &mut Change,
    ) -> bool {
        if !change.adding {
            // Clearing +s also clears the mask set.
            if let ModeSubject::User(target) = subject {
                if let Some(user) = server.users.get_mut(*target) {
                    user.snomasks.clear();
                }
            }
            return true;
        }

        let ModeSubject::User(target) = subject else {
            return false;
        };
        let Some(user) = server.users.get_mut(*target) else {
            return false;
        };

        let mut adding = true;
        for c in change.param.chars() {
            match c {
                '+' => adding = true,
                '-' => adding = false,
                c if c.is_ascii_alphabetic() => {
                    if adding {
                        user.snomasks.insert(c);
                    } else {
                        user.snomasks.remove(&c);
                    }
                }
                _ => {}
            }
        }

        let mut letters: Vec<char> = user.snomasks.iter().copied().collect();
        letters.sort_unstable();
        if letters.is_empty() {
            return false;
        }
        change.param = format!("+{}", letters.into_iter().collect::<String>());
        true
    }
}

/// Register the built-in user and channel modes. Panics only on
/// programmer error (duplicate registration at startup).
pub fn register_core_modes(registry: &mut ModeRegistry) {
    // Channel list modes.
    registry.add(ModeHandler::list("ban", 'b')).expect("core mode");
    registry.add(ModeHandler::list("banexception", 'e')).expect("core mode");
    registry.add(ModeHandler::list("invex", 'I')).expect("core mode");

    // Channel parameter modes.
    registry
        .add(
            ModeHandler::param("key", 'k', ModeTarget::Channel, false)
                .with_behavior(Rc::new(KeyBehavior)),
        )
        .expect("core mode");
    registry
        .add(
            ModeHandler::param("limit", 'l', ModeTarget::Channel, true)
                .with_behavior(Rc::new(LimitBehavior)),
        )
        .expect("core mode");

    // Channel flags.
    registry.add(ModeHandler::flag("inviteonly", 'i', ModeTarget::Channel)).expect("core mode");
    registry.add(ModeHandler::flag("moderated", 'm', ModeTarget::Channel)).expect("core mode");
    registry.add(ModeHandler::flag("noextmsg", 'n', ModeTarget::Channel)).expect("core mode");
    registry.add(ModeHandler::flag("private", 'p', ModeTarget::Channel)).expect("core mode");
    registry.add(ModeHandler::flag("secret", 's', ModeTarget::Channel)).expect("core mode");
    registry.add(ModeHandler::flag("topiclock", 't', ModeTarget::Channel)).expect("core mode");

    // Prefix modes. Voice can be handed out by halfops; the rest need op.
    registry
        .add(ModeHandler::prefix("op", 'o', '@', OP_RANK, OP_RANK))
        .expect("core mode");
    registry
        .add(ModeHandler::prefix("halfop", 'h', '%', HALFOP_RANK, OP_RANK))
        .expect("core mode");
    registry
        .add(ModeHandler::prefix("voice", 'v', '+', VOICE_RANK, HALFOP_RANK))
        .expect("core mode");

    // User modes.
    registry.add(ModeHandler::flag("invisible", 'i', ModeTarget::User)).expect("core mode");
    registry.add(ModeHandler::flag("wallops", 'w', ModeTarget::User)).expect("core mode");
    registry
        .add(
            ModeHandler::flag("oper", 'o', ModeTarget::User)
                .with_behavior(Rc::new(OperUserModeBehavior)),
        )
        .expect("core mode");
    registry
        .add(
            ModeHandler::param("snomask", 's', ModeTarget::User, true)
                .oper_only()
                .with_behavior(Rc::new(SnomaskBehavior)),
        )
        .expect("core mode");
}
