//! Card presence per reader, with a learnable set of known cards
//!
//! A [`PresenceTracker`] turns the raw reads of a poll round into debounced [`Presence`]
//! states and only hands back a snapshot when something changed.
use heapless::Vec;

use crate::{elapsed, interface::Interface, nfc_a::Uid, Instant, Millis, Pn5180};

/// Bounded set of learned UIDs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownCards<const N: usize> {
    cards: Vec<Uid, N>,
}

impl<const N: usize> KnownCards<N> {
    pub fn new() -> Self {
        Self { cards: Vec::new() }
    }

    pub fn contains(&self, uid: &Uid) -> bool {
        self.cards.contains(uid)
    }

    /// Remembers `uid`, gives it back if the set is full
    ///
    /// Returns `false` if it was already known.
    pub fn add(&mut self, uid: Uid) -> Result<bool, Uid> {
        if self.contains(&uid) {
            return Ok(false);
        }
        self.cards.push(uid).map(|_| true)
    }

    /// Replaces every known card by `uid`
    pub fn learn(&mut self, uid: Uid) {
        self.cards.clear();
        // can't be full after clear, unless N is 0
        let _ = self.cards.push(uid);
    }

    pub fn wipe(&mut self) {
        self.cards.clear()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Uid> {
        self.cards.iter()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Presence {
    pub uid: Option<Uid>,
    pub present: bool,
    /// The card is one of the reader's known cards
    pub known: bool,
}

struct Slot<const N: usize> {
    known: KnownCards<N>,
    accepted: Option<Uid>,
    pending: Option<(Option<Uid>, Instant)>,
}

impl<const N: usize> Slot<N> {
    fn new() -> Self {
        Self {
            known: KnownCards::new(),
            accepted: None,
            pending: None,
        }
    }

    fn process(&mut self, latest: Option<Uid>, now: Instant, debounce: Millis) {
        if latest == self.accepted {
            self.pending = None;
            return;
        }
        match self.pending {
            Some((pending, since)) if pending == latest => {
                if elapsed(since, now) >= debounce {
                    self.accepted = latest;
                    self.pending = None;
                }
            }
            _ if debounce.ticks() == 0 => {
                self.accepted = latest;
                self.pending = None;
            }
            _ => self.pending = Some((latest, now)),
        }
    }

    fn presence(&self) -> Presence {
        Presence {
            uid: self.accepted,
            present: self.accepted.is_some(),
            known: self.accepted.is_some_and(|uid| self.known.contains(&uid)),
        }
    }
}

/// Debounced presence of `R` readers, each with up to `N` known cards
pub struct PresenceTracker<const R: usize, const N: usize> {
    slots: [Slot<N>; R],
    debounce: Millis,
    reported: Option<[Presence; R]>,
}

impl<const R: usize, const N: usize> PresenceTracker<R, N> {
    /// A read has to stay the same for `debounce` before it's accepted, zero accepts it
    /// right away
    pub fn new(debounce: Millis) -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot::new()),
            debounce,
            reported: None,
        }
    }

    /// Feeds one read per reader, returns the new state if it differs from the last one
    /// returned
    pub fn update(&mut self, reads: [Option<Uid>; R], now: Instant) -> Option<[Presence; R]> {
        for (slot, read) in self.slots.iter_mut().zip(reads) {
            slot.process(read, now, self.debounce);
        }
        let snapshot = self.snapshot();
        if self.reported == Some(snapshot) {
            return None;
        }
        self.reported = Some(snapshot);
        Some(snapshot)
    }

    /// Reads every reader, one after the other, then [`update`](Self::update)s
    pub fn poll<I: Interface>(
        &mut self,
        readers: &mut [Pn5180<I>; R],
        now: Instant,
    ) -> Option<[Presence; R]> {
        let reads = core::array::from_fn(|i| readers[i].read_card_serial());
        self.update(reads, now)
    }

    /// Current state, whether it was reported or not
    pub fn snapshot(&self) -> [Presence; R] {
        core::array::from_fn(|i| self.slots[i].presence())
    }

    pub fn known(&self, reader: usize) -> Option<&KnownCards<N>> {
        self.slots.get(reader).map(|s| &s.known)
    }

    pub fn known_mut(&mut self, reader: usize) -> Option<&mut KnownCards<N>> {
        self.slots.get_mut(reader).map(|s| &mut s.known)
    }

    /// Makes `uid` the only known card of `reader`, `false` if there's no such reader
    pub fn learn(&mut self, reader: usize, uid: Uid) -> bool {
        match self.known_mut(reader) {
            Some(known) => {
                info!("reader {=usize}: learned {}", reader, uid);
                known.learn(uid);
                true
            }
            None => false,
        }
    }

    pub fn wipe(&mut self, reader: usize) -> bool {
        match self.known_mut(reader) {
            Some(known) => {
                known.wipe();
                true
            }
            None => false,
        }
    }
}
