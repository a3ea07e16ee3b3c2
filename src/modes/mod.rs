//! The mode system: typed registry of single-character modes, change
//! lists, and the processing pipeline that applies them.
//!
//! A mode is one ASCII letter on a user or channel. Four variants exist:
//! simple flags, parameter modes (always or set-only), list modes (sets
//! of masks) and prefix modes (rank + sigil on a membership). Handlers
//! are registered into [`ModeRegistry`]; [`process`] applies an ordered
//! [`ChangeList`] with access checks, watcher hooks and the per-line cap.

mod builtin;
mod process;
mod registry;

pub use builtin::register_core_modes;
pub use process::{
    clean_mask, modes_from_params, process, process_single, ProcessFlags, MODE_PARAM_MAX,
};
pub use registry::{letter_index, ModeRegistry, ModeRef};

use std::collections::HashMap;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::server::Server;
use crate::state::UserId;

/// Which entity kind a mode applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeTarget {
    User,
    Channel,
}

/// Size of the dense id space per target kind.
pub const MODEID_MAX: usize = 64;

/// Dense per-target id, allocated for user modes and flag/parameter
/// channel modes. List and prefix modes store their state elsewhere and
/// take no id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModeId(pub u8);

/// Membership rank conferred by the built-in prefix modes.
pub const VOICE_RANK: u32 = 10_000;
pub const HALFOP_RANK: u32 = 20_000;
pub const OP_RANK: u32 = 30_000;

/// The four mode variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeKind {
    /// On/off bit.
    Flag,
    /// Stored parameter; `set_only` modes need a parameter only when
    /// setting.
    Param { set_only: bool },
    /// Set of {mask, setter, time} entries.
    List,
    /// Rank + sigil on memberships; the parameter is a nick.
    Prefix { prefix: char, rank: u32, self_remove: bool },
}

/// Per-mode policy hooks. The defaults do nothing; built-in and module
/// modes override what they need.
pub trait ModeBehavior {
    /// Runs before the generic state change. May rewrite the parameter
    /// (validation, normalisation); returning false denies the change.
    fn before_apply(
        &self,
        _server: &mut Server,
        _source: UserId,
        _subject: &ModeSubject,
        _change: &mut Change,
    ) -> bool {
        true
    }

    /// Server-merge conflict resolution for parameter modes: return true
    /// when the incoming parameter should replace ours. The default is
    /// the lexicographic tie-break.
    fn resolve_conflict(&self, theirs: &str, ours: &str) -> bool {
        theirs < ours
    }
}

/// Registry entry for one mode.
pub struct ModeHandler {
    pub name: String,
    pub letter: char,
    pub target: ModeTarget,
    pub kind: ModeKind,
    pub id: Option<ModeId>,
    /// Minimum membership rank needed to set / unset a channel mode.
    pub set_rank: u32,
    pub unset_rank: u32,
    pub oper_only: bool,
    pub behavior: Option<Rc<dyn ModeBehavior>>,
}

impl ModeHandler {
    pub fn flag(name: &str, letter: char, target: ModeTarget) -> Self {
        Self {
            name: name.into(),
            letter,
            target,
            kind: ModeKind::Flag,
            id: None,
            set_rank: HALFOP_RANK,
            unset_rank: HALFOP_RANK,
            oper_only: false,
            behavior: None,
        }
    }

    pub fn param(name: &str, letter: char, target: ModeTarget, set_only: bool) -> Self {
        Self {
            kind: ModeKind::Param { set_only },
            ..Self::flag(name, letter, target)
        }
    }

    pub fn list(name: &str, letter: char) -> Self {
        Self {
            kind: ModeKind::List,
            ..Self::flag(name, letter, ModeTarget::Channel)
        }
    }

    pub fn prefix(name: &str, letter: char, prefix: char, rank: u32, set_rank: u32) -> Self {
        Self {
            kind: ModeKind::Prefix { prefix, rank, self_remove: true },
            set_rank,
            unset_rank: set_rank,
            ..Self::flag(name, letter, ModeTarget::Channel)
        }
    }

    pub fn oper_only(mut self) -> Self {
        self.oper_only = true;
        self
    }

    pub fn ranks(mut self, set: u32, unset: u32) -> Self {
        self.set_rank = set;
        self.unset_rank = unset;
        self
    }

    pub fn with_behavior(mut self, behavior: Rc<dyn ModeBehavior>) -> Self {
        self.behavior = Some(behavior);
        self
    }

    /// Whether a change in the given direction needs a parameter.
    pub fn needs_param(&self, adding: bool) -> bool {
        match &self.kind {
            ModeKind::Flag => false,
            ModeKind::Param { set_only } => adding || !set_only,
            ModeKind::List | ModeKind::Prefix { .. } => true,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, ModeKind::List)
    }

    pub fn is_prefix(&self) -> bool {
        matches!(self.kind, ModeKind::Prefix { .. })
    }

    pub fn prefix_rank(&self) -> u32 {
        match self.kind {
            ModeKind::Prefix { rank, .. } => rank,
            _ => 0,
        }
    }
}

/// What a change is aimed at. Channels are referred to by folded name;
/// the channel may cease to exist mid-list, so each step re-resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeSubject {
    User(UserId),
    Channel(String),
}

/// One requested mode change.
#[derive(Debug, Clone)]
pub struct Change {
    pub mode: ModeRef,
    pub adding: bool,
    pub param: String,
}

/// An ordered sequence of changes. Most MODE lines carry only a few.
#[derive(Default)]
pub struct ChangeList {
    changes: SmallVec<[Change; 8]>,
}

impl ChangeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mode: ModeRef, adding: bool, param: impl Into<String>) {
        self.changes.push(Change { mode, adding, param: param.into() });
    }

    pub fn push_add(&mut self, mode: ModeRef, param: impl Into<String>) {
        self.push(mode, true, param);
    }

    pub fn push_remove(&mut self, mode: ModeRef, param: impl Into<String>) {
        self.push(mode, false, param);
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Change> {
        self.changes.get(i)
    }

    pub fn get_mut(&mut self, i: usize) -> Option<&mut Change> {
        self.changes.get_mut(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }
}

/// Observer registered against a mode name. `before_mode` may veto or
/// rewrite; `after_mode` sees what was applied.
pub trait ModeWatcher {
    fn before_mode(
        &self,
        _server: &mut Server,
        _source: UserId,
        _subject: &ModeSubject,
        _change: &mut Change,
    ) -> bool {
        true
    }

    fn after_mode(
        &self,
        _server: &mut Server,
        _source: UserId,
        _subject: &ModeSubject,
        _change: &Change,
    ) {
    }
}

/// Per-mode flag/parameter state carried by users and channels, keyed by
/// dense id.
#[derive(Debug, Default)]
pub struct ModeSet {
    bits: u64,
    params: HashMap<u8, String>,
}

impl ModeSet {
    pub fn is_set(&self, id: ModeId) -> bool {
        self.bits & (1 << id.0) != 0
    }

    pub fn set(&mut self, id: ModeId, on: bool) {
        if on {
            self.bits |= 1 << id.0;
        } else {
            self.bits &= !(1 << id.0);
            self.params.remove(&id.0);
        }
    }

    pub fn param(&self, id: ModeId) -> Option<&str> {
        self.params.get(&id.0).map(String::as_str)
    }

    pub fn set_param(&mut self, id: ModeId, param: impl Into<String>) {
        self.bits |= 1 << id.0;
        self.params.insert(id.0, param.into());
    }

    /// Ids currently set, ascending.
    pub fn set_ids(&self) -> Vec<ModeId> {
        (0..MODEID_MAX as u8)
            .filter(|&i| self.bits & (1 << i) != 0)
            .map(ModeId)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_set_bit_and_param() {
        let mut set = ModeSet::default();
        let id = ModeId(3);
        assert!(!set.is_set(id));

        set.set_param(id, "secret");
        assert!(set.is_set(id));
        assert_eq!(set.param(id), Some("secret"));

        set.set(id, false);
        assert!(!set.is_set(id));
        assert_eq!(set.param(id), None);
    }

    #[test]
    fn needs_param_by_variant() {
        let flag = ModeHandler::flag("moderated", 'm', ModeTarget::Channel);
        assert!(!flag.needs_param(true));

        let key = ModeHandler::param("key", 'k', ModeTarget::Channel, false);
        assert!(key.needs_param(true));
        assert!(key.needs_param(false));

        let limit = ModeHandler::param("limit", 'l', ModeTarget::Channel, true);
        assert!(limit.needs_param(true));
        assert!(!limit.needs_param(false));

        let ban = ModeHandler::list("ban", 'b');
        assert!(ban.needs_param(true) && ban.needs_param(false));
    }

    #[test]
    fn set_ids_enumerates_bits() {
        let mut set = ModeSet::default();
        set.set(ModeId(0), true);
        set.set(ModeId(5), true);
        assert_eq!(set.set_ids(), vec![ModeId(0), ModeId(5)]);
    }
}
