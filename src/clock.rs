//! Monotonic second counter and scheduled callbacks.
//!
//! The manager is generic over the context handed to callbacks so the
//! engine can pass `&mut Server` while tests pass something simpler.
//!
//! The owning context drives a tick by taking the wheel out of itself,
//! popping due timers, firing each callback against `&mut self`, and
//! merging the wheel back afterwards. Callbacks may therefore schedule
//! new timers (they land on the fresh wheel left in place) or cancel
//! pending ones without invalidating the tick in progress:
//!
//! ```ignore
//! let mut wheel = self.timers.split();
//! for mut t in wheel.due(now) {
//!     if (t.callback)(self, now) == TimerAction::Continue && t.repeating {
//!         wheel.rearm(t, now);
//!     }
//! }
//! wheel.merge(std::mem::take(&mut self.timers));
//! self.timers = wheel;
//! ```

use std::collections::BTreeMap;

/// Handle for cancelling a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// What a fired callback wants done with a repeating timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Continue,
    Stop,
}

pub type TimerCallback<C> = Box<dyn FnMut(&mut C, u64) -> TimerAction>;

/// A timer popped off the wheel, ready to fire.
pub struct DueTimer<C> {
    pub id: TimerId,
    pub interval: u64,
    pub repeating: bool,
    pub callback: TimerCallback<C>,
}

struct Entry<C> {
    id: TimerId,
    interval: u64,
    repeating: bool,
    callback: TimerCallback<C>,
}

/// Timers keyed by `(trigger, seq)`; `seq` increases per insertion, which
/// gives insertion-order firing for timers sharing a trigger second.
pub struct TimerManager<C> {
    timers: BTreeMap<(u64, u64), Entry<C>>,
    next_seq: u64,
    next_id: u64,
}

impl<C> Default for TimerManager<C> {
    fn default() -> Self {
        Self {
            timers: BTreeMap::new(),
            next_seq: 0,
            next_id: 0,
        }
    }
}

impl<C> TimerManager<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `callback` to fire at `now + delay`. A repeating timer is
    /// re-armed at `fire_time + delay` for as long as the callback returns
    /// [`TimerAction::Continue`].
    pub fn add_timer(
        &mut self,
        now: u64,
        delay: u64,
        repeating: bool,
        callback: TimerCallback<C>,
    ) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.insert(now + delay, Entry { id, interval: delay, repeating, callback });
        id
    }

    fn insert(&mut self, trigger: u64, entry: Entry<C>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timers.insert((trigger, seq), entry);
    }

    /// Cancel a pending timer by identity.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let key = self
            .timers
            .iter()
            .find(|(_, e)| e.id == id)
            .map(|(k, _)| *k);
        match key {
            Some(k) => {
                self.timers.remove(&k);
                true
            }
            None => false,
        }
    }

    /// Pop every timer with `trigger <= now`, in trigger-then-insertion
    /// order. The caller invokes the callbacks and hands repeating timers
    /// back via [`TimerManager::rearm`].
    pub fn due(&mut self, now: u64) -> Vec<DueTimer<C>> {
        let mut fired = Vec::new();
        while let Some((&key, _)) = self.timers.iter().next() {
            if key.0 > now {
                break;
            }
            let entry = self.timers.remove(&key).expect("key just observed");
            fired.push(DueTimer {
                id: entry.id,
                interval: entry.interval,
                repeating: entry.repeating,
                callback: entry.callback,
            });
        }
        fired
    }

    /// Re-insert a fired repeating timer for its next trigger.
    pub fn rearm(&mut self, timer: DueTimer<C>, now: u64) {
        let trigger = now + timer.interval;
        self.insert(
            trigger,
            Entry {
                id: timer.id,
                interval: timer.interval,
                repeating: timer.repeating,
                callback: timer.callback,
            },
        );
    }

    /// Detach the pending entries for a tick, leaving an empty wheel in
    /// place that continues the identity counters, so callbacks adding
    /// timers mid-tick cannot collide with already-issued [`TimerId`]s.
    pub fn split(&mut self) -> TimerManager<C> {
        TimerManager {
            timers: std::mem::take(&mut self.timers),
            next_seq: self.next_seq,
            next_id: self.next_id,
        }
    }

    /// Fold another wheel's pending timers into this one, keeping their
    /// triggers. Counters advance past the other wheel's so identities
    /// stay unique across the merge.
    pub fn merge(&mut self, other: TimerManager<C>) {
        self.next_id = self.next_id.max(other.next_id);
        self.next_seq = self.next_seq.max(other.next_seq);
        for ((trigger, _), entry) in other.timers {
            self.insert(trigger, entry);
        }
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Trace {
        fired: Vec<&'static str>,
        timers: TimerManager<Trace>,
    }

    impl Trace {
        fn new() -> Self {
            Self { fired: Vec::new(), timers: TimerManager::new() }
        }

        // The engine's tick pattern, in miniature.
        fn tick(&mut self, now: u64) {
            let mut wheel = self.timers.split();
            for mut t in wheel.due(now) {
                let action = (t.callback)(self, now);
                if t.repeating && action == TimerAction::Continue {
                    wheel.rearm(t, now);
                }
            }
            wheel.merge(std::mem::take(&mut self.timers));
            self.timers = wheel;
        }
    }

    #[test]
    fn same_second_timers_fire_in_insertion_order() {
        let mut trace = Trace::new();
        trace.timers.add_timer(0, 5, false, Box::new(|t: &mut Trace, _| {
            t.fired.push("a");
            TimerAction::Stop
        }));
        trace.timers.add_timer(0, 5, false, Box::new(|t: &mut Trace, _| {
            t.fired.push("b");
            TimerAction::Stop
        }));

        trace.tick(4);
        assert!(trace.fired.is_empty());
        trace.tick(5);
        assert_eq!(trace.fired, vec!["a", "b"]);
        assert!(trace.timers.is_empty());
    }

    #[test]
    fn repeating_timer_rearms_until_stopped() {
        let mut trace = Trace::new();
        trace.timers.add_timer(0, 2, true, Box::new(|t: &mut Trace, _| {
            t.fired.push("tick");
            if t.fired.len() == 3 { TimerAction::Stop } else { TimerAction::Continue }
        }));

        for now in 1..=10 {
            trace.tick(now);
        }
        // Fires at 2, 4 and 6, then stops.
        assert_eq!(trace.fired.len(), 3);
        assert!(trace.timers.is_empty());
    }

    #[test]
    fn callback_may_schedule_followup() {
        let mut trace = Trace::new();
        trace.timers.add_timer(0, 1, false, Box::new(|t: &mut Trace, now| {
            t.fired.push("first");
            t.timers.add_timer(now, 2, false, Box::new(|t: &mut Trace, _| {
                t.fired.push("second");
                TimerAction::Stop
            }));
            TimerAction::Stop
        }));

        trace.tick(1);
        assert_eq!(trace.fired, vec!["first"]);
        trace.tick(2);
        assert_eq!(trace.fired, vec!["first"]);
        trace.tick(3);
        assert_eq!(trace.fired, vec!["first", "second"]);
    }

    #[test]
    fn cancel_removes_pending_timer() {
        let mut trace = Trace::new();
        let id = trace.timers.add_timer(0, 3, false, Box::new(|t: &mut Trace, _| {
            t.fired.push("x");
            TimerAction::Stop
        }));
        assert!(trace.timers.cancel(id));
        assert!(!trace.timers.cancel(id));
        trace.tick(10);
        assert!(trace.fired.is_empty());
    }

    #[test]
    fn late_tick_fires_everything_due() {
        let mut trace = Trace::new();
        trace.timers.add_timer(0, 1, false, Box::new(|t: &mut Trace, _| {
            t.fired.push("one");
            TimerAction::Stop
        }));
        trace.timers.add_timer(0, 4, false, Box::new(|t: &mut Trace, _| {
            t.fired.push("four");
            TimerAction::Stop
        }));
        trace.tick(100);
        assert_eq!(trace.fired, vec!["one", "four"]);
    }
}
