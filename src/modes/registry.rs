//! Character-to-handler tables and the mode watcher list.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::ModeRegistryError;

use super::{ModeHandler, ModeId, ModeKind, ModeTarget, ModeWatcher, MODEID_MAX};

/// Stable reference to a registered handler slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModeRef(pub(crate) usize);

/// `A..Z` then `a..z`, 52 slots per target kind.
pub fn letter_index(letter: char) -> Option<usize> {
    match letter {
        'A'..='Z' => Some(letter as usize - 'A' as usize),
        'a'..='z' => Some(letter as usize - 'a' as usize + 26),
        _ => None,
    }
}

const fn target_index(target: ModeTarget) -> usize {
    match target {
        ModeTarget::User => 0,
        ModeTarget::Channel => 1,
    }
}

/// Registry of mode handlers for both target kinds.
///
/// Slots are never shifted, so a [`ModeRef`] stays valid until its
/// handler is deleted; freed slots (and freed dense ids) are reused by
/// later registrations.
pub struct ModeRegistry {
    handlers: Vec<Option<ModeHandler>>,
    by_letter: [[Option<usize>; 52]; 2],
    by_name: [HashMap<String, usize>; 2],
    ids: [[Option<usize>; MODEID_MAX]; 2],
    prefix_modes: Vec<usize>,
    list_modes: Vec<usize>,
    watchers: HashMap<(ModeTarget, String), Vec<Rc<dyn ModeWatcher>>>,
}

impl Default for ModeRegistry {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            by_letter: [[None; 52]; 2],
            by_name: [HashMap::new(), HashMap::new()],
            ids: [[None; MODEID_MAX]; 2],
            prefix_modes: Vec::new(),
            list_modes: Vec::new(),
            watchers: HashMap::new(),
        }
    }
}

impl ModeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self, target: ModeTarget, name: &str) -> Result<ModeId, ModeRegistryError> {
        let table = &self.ids[target_index(target)];
        for (i, slot) in table.iter().enumerate() {
            if slot.is_none() {
                return Ok(ModeId(i as u8));
            }
        }
        Err(ModeRegistryError::OutOfModeIds { name: name.to_string() })
    }

    /// Register a handler, enforcing letter, name and prefix uniqueness.
    pub fn add(&mut self, mut handler: ModeHandler) -> Result<ModeRef, ModeRegistryError> {
        let ti = target_index(handler.target);

        let li = letter_index(handler.letter).ok_or_else(|| ModeRegistryError::InvalidLetter {
            name: handler.name.clone(),
            letter: handler.letter,
        })?;

        if let ModeKind::Prefix { prefix, .. } = handler.kind {
            // ',' breaks mode param lists, ':' breaks the wire format and
            // '#' collides with channel names in NAMES output.
            if prefix as u32 > 126 || matches!(prefix, ',' | ':' | '#') {
                return Err(ModeRegistryError::InvalidPrefix {
                    name: handler.name.clone(),
                    prefix,
                });
            }
            if let Some(other) = self.find_prefix(prefix) {
                return Err(ModeRegistryError::PrefixInUse {
                    name: handler.name.clone(),
                    other: self.get(other).name.clone(),
                    prefix,
                });
            }
        }

        if let Some(&slot) = self.by_letter[ti][li].as_ref() {
            return Err(ModeRegistryError::LetterInUse {
                name: handler.name.clone(),
                other: self.handlers[slot].as_ref().expect("occupied slot").name.clone(),
                letter: handler.letter,
            });
        }

        if let Some(&slot) = self.by_name[ti].get(&handler.name) {
            return Err(ModeRegistryError::NameInUse {
                name: handler.name.clone(),
                letter: self.handlers[slot].as_ref().expect("occupied slot").letter,
            });
        }

        // User modes and flag/parameter channel modes take a dense id.
        let wants_id = handler.target == ModeTarget::User
            || matches!(handler.kind, ModeKind::Flag | ModeKind::Param { .. });
        if wants_id {
            handler.id = Some(self.allocate_id(handler.target, &handler.name)?);
        }

        let slot = match self.handlers.iter().position(Option::is_none) {
            Some(free) => free,
            None => {
                self.handlers.push(None);
                self.handlers.len() - 1
            }
        };

        self.by_letter[ti][li] = Some(slot);
        self.by_name[ti].insert(handler.name.clone(), slot);
        if let Some(id) = handler.id {
            self.ids[ti][id.0 as usize] = Some(slot);
        }
        match handler.kind {
            ModeKind::Prefix { .. } => self.prefix_modes.push(slot),
            ModeKind::List => self.list_modes.push(slot),
            _ => {}
        }

        self.handlers[slot] = Some(handler);
        Ok(ModeRef(slot))
    }

    /// Free a slot. The caller (the server) has already walked affected
    /// entities and emitted the `-mode` changes.
    pub fn remove(&mut self, mode: ModeRef) -> Option<ModeHandler> {
        let handler = self.handlers.get_mut(mode.0)?.take()?;
        let ti = target_index(handler.target);
        if let Some(li) = letter_index(handler.letter) {
            self.by_letter[ti][li] = None;
        }
        self.by_name[ti].remove(&handler.name);
        if let Some(id) = handler.id {
            self.ids[ti][id.0 as usize] = None;
        }
        self.prefix_modes.retain(|&s| s != mode.0);
        self.list_modes.retain(|&s| s != mode.0);
        Some(handler)
    }

    pub fn get(&self, mode: ModeRef) -> &ModeHandler {
        self.handlers[mode.0].as_ref().expect("live mode reference")
    }

    pub fn try_get(&self, mode: ModeRef) -> Option<&ModeHandler> {
        self.handlers.get(mode.0)?.as_ref()
    }

    pub fn find(&self, letter: char, target: ModeTarget) -> Option<ModeRef> {
        let li = letter_index(letter)?;
        self.by_letter[target_index(target)][li].map(ModeRef)
    }

    pub fn find_name(&self, name: &str, target: ModeTarget) -> Option<ModeRef> {
        self.by_name[target_index(target)].get(name).copied().map(ModeRef)
    }

    /// Locate a prefix mode by its sigil.
    pub fn find_prefix(&self, prefix: char) -> Option<ModeRef> {
        self.prefix_modes
            .iter()
            .copied()
            .find(|&slot| {
                matches!(
                    self.handlers[slot].as_ref().map(|h| &h.kind),
                    Some(ModeKind::Prefix { prefix: p, .. }) if *p == prefix
                )
            })
            .map(ModeRef)
    }

    /// Prefix modes, highest rank first.
    pub fn prefix_modes(&self) -> Vec<ModeRef> {
        let mut slots = self.prefix_modes.clone();
        slots.sort_by_key(|&s| {
            std::cmp::Reverse(self.handlers[s].as_ref().map(|h| h.prefix_rank()).unwrap_or(0))
        });
        slots.into_iter().map(ModeRef).collect()
    }

    pub fn list_modes(&self) -> Vec<ModeRef> {
        self.list_modes.iter().copied().map(ModeRef).collect()
    }

    /// Every registered handler for one target kind.
    pub fn all(&self, target: ModeTarget) -> Vec<ModeRef> {
        self.by_name[target_index(target)]
            .values()
            .copied()
            .map(ModeRef)
            .collect()
    }

    /// Highest prefix rank conferred by a set of held prefix letters.
    pub fn rank_of(&self, prefixes: &[char]) -> u32 {
        prefixes
            .iter()
            .filter_map(|&letter| self.find(letter, ModeTarget::Channel))
            .map(|m| self.get(m).prefix_rank())
            .max()
            .unwrap_or(0)
    }

    /// Held prefix letters ordered by descending rank, for NAMES output.
    pub fn ordered_prefixes(&self, prefixes: &[char]) -> Vec<char> {
        let mut held: Vec<(u32, char)> = prefixes
            .iter()
            .filter_map(|&letter| {
                let m = self.find(letter, ModeTarget::Channel)?;
                Some((self.get(m).prefix_rank(), letter))
            })
            .collect();
        held.sort_by_key(|&(rank, _)| std::cmp::Reverse(rank));
        held.into_iter().map(|(_, l)| l).collect()
    }

    pub fn add_watcher(&mut self, target: ModeTarget, name: &str, watcher: Rc<dyn ModeWatcher>) {
        self.watchers
            .entry((target, name.to_string()))
            .or_default()
            .push(watcher);
    }

    /// Watchers for a mode, in registration order.
    pub fn watchers_for(&self, target: ModeTarget, name: &str) -> Vec<Rc<dyn ModeWatcher>> {
        self.watchers
            .get(&(target, name.to_string()))
            .map(|v| v.to_vec())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::{ModeHandler, OP_RANK};

    #[test]
    fn letter_index_layout() {
        assert_eq!(letter_index('A'), Some(0));
        assert_eq!(letter_index('Z'), Some(25));
        assert_eq!(letter_index('a'), Some(26));
        assert_eq!(letter_index('z'), Some(51));
        assert_eq!(letter_index('1'), None);
        assert_eq!(letter_index('@'), None);
    }

    #[test]
    fn add_and_find_by_letter_and_name() {
        let mut reg = ModeRegistry::new();
        let m = reg.add(ModeHandler::flag("moderated", 'm', ModeTarget::Channel)).unwrap();
        assert_eq!(reg.find('m', ModeTarget::Channel), Some(m));
        assert_eq!(reg.find_name("moderated", ModeTarget::Channel), Some(m));
        // Same letter on the other target kind is a different slot.
        assert_eq!(reg.find('m', ModeTarget::User), None);
    }

    #[test]
    fn duplicate_letter_name_and_prefix_fail() {
        let mut reg = ModeRegistry::new();
        reg.add(ModeHandler::flag("moderated", 'm', ModeTarget::Channel)).unwrap();
        reg.add(ModeHandler::prefix("op", 'o', '@', OP_RANK, OP_RANK)).unwrap();

        assert!(matches!(
            reg.add(ModeHandler::flag("other", 'm', ModeTarget::Channel)),
            Err(ModeRegistryError::LetterInUse { .. })
        ));
        assert!(matches!(
            reg.add(ModeHandler::flag("moderated", 'M', ModeTarget::Channel)),
            Err(ModeRegistryError::NameInUse { .. })
        ));
        assert!(matches!(
            reg.add(ModeHandler::prefix("op2", 'q', '@', OP_RANK, OP_RANK)),
            Err(ModeRegistryError::PrefixInUse { .. })
        ));
    }

    #[test]
    fn reserved_prefix_chars_rejected() {
        let mut reg = ModeRegistry::new();
        for bad in [',', ':', '#'] {
            assert!(matches!(
                reg.add(ModeHandler::prefix("p", 'p', bad, 1, 1)),
                Err(ModeRegistryError::InvalidPrefix { .. })
            ));
        }
    }

    #[test]
    fn non_alpha_letter_rejected() {
        let mut reg = ModeRegistry::new();
        assert!(matches!(
            reg.add(ModeHandler::flag("bad", '5', ModeTarget::Channel)),
            Err(ModeRegistryError::InvalidLetter { .. })
        ));
    }

    #[test]
    fn id_allocation_skips_list_and_prefix() {
        let mut reg = ModeRegistry::new();
        let flag = reg.add(ModeHandler::flag("secret", 's', ModeTarget::Channel)).unwrap();
        let ban = reg.add(ModeHandler::list("ban", 'b')).unwrap();
        let op = reg.add(ModeHandler::prefix("op", 'o', '@', OP_RANK, OP_RANK)).unwrap();
        let umode = reg.add(ModeHandler::flag("invisible", 'i', ModeTarget::User)).unwrap();

        assert!(reg.get(flag).id.is_some());
        assert!(reg.get(ban).id.is_none());
        assert!(reg.get(op).id.is_none());
        assert!(reg.get(umode).id.is_some());
    }

    #[test]
    fn freed_id_is_reused_and_stable_until_then() {
        let mut reg = ModeRegistry::new();
        let a = reg.add(ModeHandler::flag("alpha", 'a', ModeTarget::Channel)).unwrap();
        let b = reg.add(ModeHandler::flag("beta", 'c', ModeTarget::Channel)).unwrap();
        let a_id = reg.get(a).id.unwrap();
        let b_id = reg.get(b).id.unwrap();
        assert_ne!(a_id, b_id);

        reg.remove(a);
        // The other handler keeps its id; the freed one is handed out again.
        assert_eq!(reg.get(b).id, Some(b_id));
        let c = reg.add(ModeHandler::flag("gamma", 'g', ModeTarget::Channel)).unwrap();
        assert_eq!(reg.get(c).id, Some(a_id));
    }

    #[test]
    fn rank_lookup_from_prefix_letters() {
        let mut reg = ModeRegistry::new();
        reg.add(ModeHandler::prefix("op", 'o', '@', OP_RANK, OP_RANK)).unwrap();
        reg.add(ModeHandler::prefix("voice", 'v', '+', 10_000, 20_000)).unwrap();

        assert_eq!(reg.rank_of(&['v']), 10_000);
        assert_eq!(reg.rank_of(&['v', 'o']), OP_RANK);
        assert_eq!(reg.rank_of(&[]), 0);
        assert_eq!(reg.ordered_prefixes(&['v', 'o']), vec!['o', 'v']);
    }
}
