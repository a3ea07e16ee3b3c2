//! Channel-related types and state.

use std::collections::BTreeMap;

use crate::extensible::Extensions;
use crate::modes::ModeSet;

use super::UserId;

/// An entry in a list mode (bans, exceptions, invex).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub mask: String,
    pub set_by: String,
    pub set_at: u64,
}

/// Channel topic with metadata.
#[derive(Debug, Clone)]
pub struct Topic {
    pub text: String,
    pub set_by: String,
    pub set_at: u64,
}

/// The (user, channel) edge. Lives exactly as long as the user is in the
/// channel's member map.
#[derive(Debug, Default)]
pub struct Membership {
    pub joined: u64,
    /// Prefix-mode letters held, unordered; rank ordering comes from the
    /// mode registry when displayed.
    pub prefixes: Vec<char>,
    pub ext: Extensions,
}

impl Membership {
    pub fn new(joined: u64) -> Self {
        Self { joined, prefixes: Vec::new(), ext: Extensions::new() }
    }

    pub fn has_prefix(&self, letter: char) -> bool {
        self.prefixes.contains(&letter)
    }

    /// Toggle one prefix letter. Returns false when nothing changed
    /// (already held on add, absent on remove).
    pub fn set_prefix(&mut self, letter: char, adding: bool) -> bool {
        let held = self.has_prefix(letter);
        if adding == held {
            return false;
        }
        if adding {
            self.prefixes.push(letter);
        } else {
            self.prefixes.retain(|&c| c != letter);
        }
        true
    }
}

/// A joined conversation. Destroyed when the last member leaves.
#[derive(Debug)]
pub struct Channel {
    /// Display-case name; the store key is the folded form.
    pub name: String,
    pub created: u64,
    pub topic: Option<Topic>,
    pub modes: ModeSet,
    /// Per-list-mode entries, keyed by mode letter.
    pub lists: std::collections::HashMap<char, Vec<ListEntry>>,
    /// Members keyed by id; iteration order is join order because ids
    /// are allocated monotonically.
    pub members: BTreeMap<UserId, Membership>,
    pub ext: Extensions,
}

impl Channel {
    pub fn new(name: impl Into<String>, created: u64) -> Self {
        Self {
            name: name.into(),
            created,
            topic: None,
            modes: ModeSet::default(),
            lists: std::collections::HashMap::new(),
            members: BTreeMap::new(),
            ext: Extensions::new(),
        }
    }

    pub fn has_member(&self, id: UserId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn member(&self, id: UserId) -> Option<&Membership> {
        self.members.get(&id)
    }

    pub fn member_mut(&mut self, id: UserId) -> Option<&mut Membership> {
        self.members.get_mut(&id)
    }

    pub fn list(&self, letter: char) -> &[ListEntry] {
        self.lists.get(&letter).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append a list entry unless the mask is already present.
    pub fn list_add(&mut self, letter: char, entry: ListEntry) -> bool {
        let list = self.lists.entry(letter).or_default();
        if list.iter().any(|e| e.mask.eq_ignore_ascii_case(&entry.mask)) {
            return false;
        }
        list.push(entry);
        true
    }

    /// Remove a list entry by mask. Returns whether one was removed.
    pub fn list_remove(&mut self, letter: char, mask: &str) -> bool {
        match self.lists.get_mut(&letter) {
            Some(list) => {
                let before = list.len();
                list.retain(|e| !e.mask.eq_ignore_ascii_case(mask));
                if list.is_empty() {
                    self.lists.remove(&letter);
                }
                before != self.lists.get(&letter).map(Vec::len).unwrap_or(0)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_prefix_toggle() {
        let mut m = Membership::new(1);
        assert!(m.set_prefix('o', true));
        assert!(!m.set_prefix('o', true));
        assert!(m.has_prefix('o'));
        assert!(m.set_prefix('o', false));
        assert!(!m.set_prefix('o', false));
    }

    #[test]
    fn list_add_dedups_by_mask() {
        let mut c = Channel::new("#test", 1);
        let entry = ListEntry { mask: "*!*@spam.example".into(), set_by: "alice".into(), set_at: 1 };
        assert!(c.list_add('b', entry.clone()));
        assert!(!c.list_add('b', ListEntry { mask: "*!*@SPAM.example".into(), ..entry }));
        assert_eq!(c.list('b').len(), 1);
    }

    #[test]
    fn list_remove_clears_empty_lists() {
        let mut c = Channel::new("#test", 1);
        c.list_add('b', ListEntry { mask: "a!b@c".into(), set_by: "x".into(), set_at: 0 });
        assert!(c.list_remove('b', "A!B@C"));
        assert!(c.list('b').is_empty());
        assert!(!c.list_remove('b', "a!b@c"));
    }
}
