use std::collections::{BinaryHeap, HashSet};

use crate::contact::{Contact, ContactDistancePair};
use crate::key::Key;

/// Lookup candidates ordered by XOR distance to a fixed target.
///
/// A contact is admitted at most once: the membership set remembers every id ever inserted or
/// excluded, so a contact that was popped for probing is not queued again when other nodes
/// return it. A shortlist belongs to one lookup and is not shared between threads.
#[derive(Clone, Debug)]
pub struct Shortlist {
    target: Key,
    heap: BinaryHeap<ContactDistancePair>,
    seen: HashSet<Key>,
    closest: Option<ContactDistancePair>,
}

impl Shortlist {
    /// Constructs a new, empty `Shortlist` ordered by distance to `target`.
    pub fn new(target: Key) -> Self {
        Shortlist {
            target,
            heap: BinaryHeap::new(),
            seen: HashSet::new(),
            closest: None,
        }
    }

    /// Inserts `contact` unless a contact with the same id was admitted before. Returns `true` if
    /// it was inserted.
    pub fn insert(&mut self, contact: Contact) -> bool {
        if !self.seen.insert(contact.id) {
            return false;
        }
        let distance = contact.id.xor(&self.target);
        let pair = ContactDistancePair(contact, distance);
        if self.closest.as_ref().map_or(true, |closest| distance < closest.1) {
            self.closest = Some(pair.clone());
        }
        self.heap.push(pair);
        true
    }

    /// Marks `id` as seen without queueing it.
    pub fn exclude(&mut self, id: Key) {
        self.seen.insert(id);
    }

    /// Returns the remaining contact closest to the target.
    pub fn peek_min(&self) -> Option<&Contact> {
        self.heap.peek().map(|pair| &pair.0)
    }

    /// Removes and returns the remaining contact closest to the target.
    pub fn pop_min(&mut self) -> Option<Contact> {
        self.heap.pop().map(|pair| pair.0)
    }

    /// Returns the closest contact ever inserted, whether or not it was popped since.
    pub fn closest(&self) -> Option<&Contact> {
        self.closest.as_ref().map(|pair| &pair.0)
    }

    /// Returns `true` if `id` was inserted or excluded before.
    pub fn contains(&self, id: &Key) -> bool {
        self.seen.contains(id)
    }

    /// Returns the number of remaining contacts.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Consumes the shortlist and returns up to `limit` remaining contacts, closest first.
    pub fn into_closest(self, limit: usize) -> Vec<Contact> {
        let mut pairs = self.heap.into_vec();
        pairs.sort_by(|a, b| a.1.cmp(&b.1));
        pairs.into_iter().take(limit).map(|pair| pair.0).collect()
    }
}

impl Extend<Contact> for Shortlist {
    fn extend<I: IntoIterator<Item = Contact>>(&mut self, iter: I) {
        for contact in iter {
            self.insert(contact);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::net::SocketAddr;

    use super::Shortlist;
    use crate::contact::Contact;
    use crate::key::Key;

    fn contact(id: Key) -> Contact {
        Contact::new(id, "127.0.0.1:4000".parse::<SocketAddr>().unwrap())
    }

    #[test]
    fn test_no_duplicate_ids() {
        let mut shortlist = Shortlist::new(Key::rand());
        let ids: Vec<Key> = (0..20).map(|_| Key::rand()).collect();
        for id in ids.iter().chain(ids.iter()) {
            shortlist.insert(contact(*id));
        }
        assert_eq!(shortlist.len(), ids.len());

        let mut popped = HashSet::new();
        while let Some(c) = shortlist.pop_min() {
            assert!(popped.insert(c.id));
        }
        assert_eq!(popped.len(), ids.len());
    }

    #[test]
    fn test_popped_contact_is_not_requeued() {
        let mut shortlist = Shortlist::new(Key::rand());
        let c = contact(Key::rand());
        assert!(shortlist.insert(c.clone()));
        assert_eq!(shortlist.pop_min(), Some(c.clone()));
        assert!(!shortlist.insert(c.clone()));
        assert!(shortlist.is_empty());
        assert!(shortlist.contains(&c.id));
    }

    #[test]
    fn test_pop_min_returns_closest_remaining() {
        let target = Key::rand();
        let mut shortlist = Shortlist::new(target);
        shortlist.extend((0..100).map(|_| contact(Key::rand())));

        let mut prev = Key::default();
        while let Some(peeked) = shortlist.peek_min().cloned() {
            let c = shortlist.pop_min().unwrap();
            assert_eq!(peeked, c);
            let distance = c.id.xor(&target);
            assert!(prev <= distance);
            prev = distance;
        }
    }

    #[test]
    fn test_closest_survives_pop() {
        let target = Key::rand();
        let mut shortlist = Shortlist::new(target);
        shortlist.extend((0..10).map(|_| contact(Key::rand())));
        let closest = shortlist.peek_min().cloned();
        shortlist.pop_min();
        assert_eq!(shortlist.closest().cloned(), closest);
    }

    #[test]
    fn test_excluded_id_is_rejected() {
        let mut shortlist = Shortlist::new(Key::rand());
        let c = contact(Key::rand());
        shortlist.exclude(c.id);
        assert!(!shortlist.insert(c));
        assert!(shortlist.closest().is_none());
    }

    #[test]
    fn test_into_closest() {
        let target = Key::rand();
        let mut shortlist = Shortlist::new(target);
        shortlist.extend((0..30).map(|_| contact(Key::rand())));
        let closest = shortlist.into_closest(20);
        assert_eq!(closest.len(), 20);
        for pair in closest.windows(2) {
            assert!(pair[0].id.xor(&target) < pair[1].id.xor(&target));
        }
    }
}
