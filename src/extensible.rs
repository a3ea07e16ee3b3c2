//! Named opaque attachments on users, channels and memberships.
//!
//! A module owns an attachment by picking a name (`"banredirect"`) and a
//! concrete type; the entity never inspects the payload. Attachments die
//! with their entity, so cleanup is the drop of the map plus whatever
//! the owning module does on the destroy events.

use std::any::Any;
use std::collections::HashMap;

/// String-keyed typed attachment map.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<String, Box<dyn Any>>,
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions")
            .field("keys", &self.map.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the attachment under `name`.
    pub fn set<T: Any>(&mut self, name: &str, value: T) {
        self.map.insert(name.to_string(), Box::new(value));
    }

    /// Typed read access; `None` if absent or of a different type.
    pub fn get<T: Any>(&self, name: &str) -> Option<&T> {
        self.map.get(name)?.downcast_ref()
    }

    /// Typed write access.
    pub fn get_mut<T: Any>(&mut self, name: &str) -> Option<&mut T> {
        self.map.get_mut(name)?.downcast_mut()
    }

    /// Fetch-or-create, for accumulating attachments.
    pub fn get_or_insert_with<T: Any>(&mut self, name: &str, default: impl FnOnce() -> T) -> &mut T {
        self.map
            .entry(name.to_string())
            .or_insert_with(|| Box::new(default()))
            .downcast_mut()
            .expect("attachment type is stable per name")
    }

    /// Remove the attachment. Returns whether one existed.
    pub fn unset(&mut self, name: &str) -> bool {
        self.map.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_unset_round_trip() {
        let mut ext = Extensions::new();
        ext.set("counter", 41u32);
        assert_eq!(ext.get::<u32>("counter"), Some(&41));

        *ext.get_mut::<u32>("counter").unwrap() += 1;
        assert_eq!(ext.get::<u32>("counter"), Some(&42));

        assert!(ext.unset("counter"));
        assert!(!ext.unset("counter"));
        assert_eq!(ext.get::<u32>("counter"), None);
    }

    #[test]
    fn wrong_type_reads_as_none() {
        let mut ext = Extensions::new();
        ext.set("key", "text".to_string());
        assert_eq!(ext.get::<u32>("key"), None);
        assert!(ext.get::<String>("key").is_some());
    }

    #[test]
    fn get_or_insert_with_accumulates() {
        let mut ext = Extensions::new();
        ext.get_or_insert_with("list", Vec::<String>::new).push("a".into());
        ext.get_or_insert_with("list", Vec::<String>::new).push("b".into());
        assert_eq!(ext.get::<Vec<String>>("list").unwrap().len(), 2);
    }
}
