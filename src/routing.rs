use crate::contact::Contact;
use crate::key::Key;
use crate::{lock, REPLICATION_PARAM, ROUTING_TABLE_SIZE};
use std::sync::Mutex;

/// A k-bucket in a node's routing table that has a maximum capacity of `REPLICATION_PARAM`.
///
/// The contacts in the k-bucket are sorted by the time of the most recent communication with
/// those which have been most recently communicated at the end of the list.
#[derive(Clone, Debug, Default)]
struct KBucket {
    contacts: Vec<Contact>,
}

impl KBucket {
    fn position(&self, id: &Key) -> Option<usize> {
        self.contacts.iter().position(|contact| contact.id == *id)
    }

    /// Moves the contact at `index` to the most recently seen end of the list. The stored
    /// address is replaced by `contact`'s in case the node moved.
    fn touch(&mut self, index: usize, contact: Contact) {
        self.contacts.remove(index);
        self.contacts.push(contact);
    }

    fn is_full(&self) -> bool {
        self.contacts.len() >= REPLICATION_PARAM
    }

    /// Returns the least recently seen contact.
    fn lrs(&self) -> Option<&Contact> {
        self.contacts.first()
    }

    fn remove(&mut self, id: &Key) -> Option<Contact> {
        self.position(id).map(|index| self.contacts.remove(index))
    }

    /// Returns a slice of the contacts contained by the k-bucket.
    fn contacts(&self) -> &[Contact] {
        self.contacts.as_slice()
    }
}

/// What `RoutingTable::update` did with a contact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The contact was already known and is now the most recently seen.
    Refreshed,
    /// The contact was appended to a bucket with spare room.
    Inserted,
    /// The bucket was full and its unreachable least recently seen contact was replaced.
    Evicted(Contact),
    /// The bucket was full and its least recently seen contact answered, so the new contact was
    /// discarded.
    Discarded,
    /// The contact is the local node.
    Ignored,
}

/// A node's routing table.
///
/// `RoutingTable` holds one k-bucket per bit of the key space. Bucket `i` holds the contacts
/// whose distance from the local node has its most significant set bit at position `i`, so
/// bucket 0 holds the closest possible neighbour and bucket 159 half of the key space. Every
/// bucket has its own lock.
#[derive(Debug)]
pub struct RoutingTable {
    buckets: Vec<Mutex<KBucket>>,
    contact: Contact,
}

impl RoutingTable {
    /// Constructs a new, empty `RoutingTable` for the node `contact`.
    pub fn new(contact: Contact) -> Self {
        let buckets = (0..ROUTING_TABLE_SIZE)
            .map(|_| Mutex::new(KBucket::default()))
            .collect();
        RoutingTable { buckets, contact }
    }

    /// Returns the index of the bucket `id` belongs in, or `None` for the local node.
    pub fn bucket_index(&self, id: &Key) -> Option<usize> {
        self.contact.id.xor(id).bucket_index()
    }

    /// Upserts a contact into the routing table.
    ///
    /// A known contact is moved to the most recently seen end of its bucket and a new one is
    /// appended if its bucket has room. Otherwise `is_alive` is asked about the bucket's least
    /// recently seen contact: if it is unreachable it is evicted in favour of `contact`, else
    /// `contact` is dropped. The bucket lock is not held while `is_alive` runs.
    pub fn update<F>(&self, contact: Contact, is_alive: F) -> UpdateOutcome
    where
        F: FnOnce(&Contact) -> bool,
    {
        match self.try_update(contact.clone()) {
            Ok(outcome) => outcome,
            Err(lrs) => {
                let alive = is_alive(&lrs);
                self.resolve_full(contact, &lrs, alive)
            },
        }
    }

    /// Upserts `contact` if that does not require probing. Returns the least recently seen
    /// contact of the full bucket otherwise.
    pub(crate) fn try_update(&self, contact: Contact) -> Result<UpdateOutcome, Contact> {
        let index = match self.bucket_index(&contact.id) {
            Some(index) => index,
            None => return Ok(UpdateOutcome::Ignored),
        };
        let mut bucket = lock(&self.buckets[index]);

        if let Some(position) = bucket.position(&contact.id) {
            bucket.touch(position, contact);
            return Ok(UpdateOutcome::Refreshed);
        }

        if !bucket.is_full() {
            bucket.contacts.push(contact);
            return Ok(UpdateOutcome::Inserted);
        }

        match bucket.lrs() {
            Some(lrs) => Err(lrs.clone()),
            None => Ok(UpdateOutcome::Discarded),
        }
    }

    /// Finishes an update that found the bucket full once `lrs` has been probed. The bucket may
    /// have changed while the probe was in flight, so its state is checked again.
    pub(crate) fn resolve_full(&self, contact: Contact, lrs: &Contact, alive: bool) -> UpdateOutcome {
        let index = match self.bucket_index(&contact.id) {
            Some(index) => index,
            None => return UpdateOutcome::Ignored,
        };
        let mut bucket = lock(&self.buckets[index]);

        if let Some(position) = bucket.position(&contact.id) {
            bucket.touch(position, contact);
            return UpdateOutcome::Refreshed;
        }

        if alive {
            if let Some(position) = bucket.position(&lrs.id) {
                let lrs = bucket.contacts[position].clone();
                bucket.touch(position, lrs);
            }
            return UpdateOutcome::Discarded;
        }

        let evicted = bucket.remove(&lrs.id);
        if bucket.is_full() {
            return UpdateOutcome::Discarded;
        }
        debug!(
            "{:?} - evicting {:?} for {:?}",
            self.contact, evicted, contact
        );
        bucket.contacts.push(contact);
        match evicted {
            Some(evicted) => UpdateOutcome::Evicted(evicted),
            None => UpdateOutcome::Inserted,
        }
    }

    /// Returns up to `limit` contacts close to `target`, collected a whole bucket at a time.
    ///
    /// Buckets matching a set bit of the distance between the local node and `target` are
    /// visited first, from the most significant bit down, then the remaining buckets from the
    /// least significant up. That is the order of increasing distance to `target` at bucket
    /// granularity; contacts within a bucket are not sorted. Looking up the local id returns the
    /// local contact followed by every bucket in order.
    pub fn find_closest(&self, target: &Key, limit: usize) -> Vec<Contact> {
        let distance = self.contact.id.xor(target);
        let mut ret = Vec::new();
        if limit == 0 {
            return ret;
        }

        if distance == Key::default() {
            ret.push(self.contact.clone());
        }

        let set_bits = (0..ROUTING_TABLE_SIZE).rev().filter(|&i| distance.bit(i));
        let unset_bits = (0..ROUTING_TABLE_SIZE).filter(|&i| !distance.bit(i));

        for index in set_bits.chain(unset_bits) {
            let bucket = lock(&self.buckets[index]);
            for contact in bucket.contacts() {
                if ret.len() >= limit {
                    return ret;
                }
                ret.push(contact.clone());
            }
        }
        ret
    }

    /// Returns the contact with id `id` if it is in the routing table.
    pub fn find(&self, id: &Key) -> Option<Contact> {
        let index = self.bucket_index(id)?;
        let bucket = lock(&self.buckets[index]);
        bucket.position(id).map(|position| bucket.contacts[position].clone())
    }

    /// Returns every contact in the routing table.
    pub fn contacts(&self) -> Vec<Contact> {
        self.buckets
            .iter()
            .flat_map(|bucket| lock(bucket).contacts().to_vec())
            .collect()
    }

    /// Returns the contacts of bucket `index`, least recently seen first.
    pub fn bucket(&self, index: usize) -> Vec<Contact> {
        self.buckets
            .get(index)
            .map(|bucket| lock(bucket).contacts().to_vec())
            .unwrap_or_default()
    }

    /// Returns the number of contacts in the routing table.
    pub fn size(&self) -> usize {
        self.buckets.iter().map(|bucket| lock(bucket).contacts.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::{RoutingTable, UpdateOutcome};
    use crate::contact::Contact;
    use crate::key::Key;
    use crate::{REPLICATION_PARAM, ROUTING_TABLE_SIZE};

    fn contact(id: Key) -> Contact {
        Contact::new(id, "127.0.0.1:4000".parse::<SocketAddr>().unwrap())
    }

    /// Returns a contact whose distance from `local` has `leading_zeros` leading zeros.
    fn contact_in_range(local: &Key, leading_zeros: usize) -> Contact {
        contact(local.xor(&Key::rand_in_range(leading_zeros)))
    }

    #[test]
    fn test_contact_lands_in_distance_bucket() {
        let local = Key::rand();
        let table = RoutingTable::new(contact(local));
        for _ in 0..200 {
            let other = contact(Key::rand());
            let index = local.xor(&other.id).bucket_index().unwrap();
            let outcome = table.update(other.clone(), |_| true);
            if outcome == UpdateOutcome::Discarded {
                assert_eq!(table.bucket(index).len(), REPLICATION_PARAM);
                assert!(!table.bucket(index).contains(&other));
            } else {
                assert!(table.bucket(index).contains(&other));
            }
            assert!(table.bucket(index).len() <= REPLICATION_PARAM);
        }
        for index in 0..ROUTING_TABLE_SIZE {
            for other in table.bucket(index) {
                assert_eq!(table.bucket_index(&other.id), Some(index));
            }
        }
    }

    #[test]
    fn test_self_is_never_inserted() {
        let local = contact(Key::rand());
        let table = RoutingTable::new(local.clone());
        assert_eq!(table.update(local.clone(), |_| false), UpdateOutcome::Ignored);
        assert_eq!(table.size(), 0);
    }

    #[test]
    fn test_update_existing_moves_to_back() {
        let local = Key::rand();
        let table = RoutingTable::new(contact(local));
        let contacts: Vec<Contact> = (0..5).map(|_| contact_in_range(&local, 0)).collect();
        for c in &contacts {
            assert_eq!(table.update(c.clone(), |_| true), UpdateOutcome::Inserted);
        }

        let index = ROUTING_TABLE_SIZE - 1;
        assert_eq!(table.update(contacts[0].clone(), |_| true), UpdateOutcome::Refreshed);
        let bucket = table.bucket(index);
        assert_eq!(bucket.len(), contacts.len());
        assert_eq!(bucket[bucket.len() - 1], contacts[0]);
        assert_eq!(bucket[0], contacts[1]);
    }

    #[test]
    fn test_full_bucket_evicts_unreachable_lrs() {
        let local = Key::rand();
        let table = RoutingTable::new(contact(local));
        let contacts: Vec<Contact> = (0..=REPLICATION_PARAM)
            .map(|_| contact_in_range(&local, 0))
            .collect();
        for c in &contacts[..REPLICATION_PARAM] {
            table.update(c.clone(), |_| panic!("bucket is not full yet"));
        }

        let newest = contacts[REPLICATION_PARAM].clone();
        let mut probed = None;
        let outcome = table.update(newest.clone(), |lrs| {
            probed = Some(lrs.clone());
            false
        });

        assert_eq!(outcome, UpdateOutcome::Evicted(contacts[0].clone()));
        assert_eq!(probed, Some(contacts[0].clone()));
        let bucket = table.bucket(ROUTING_TABLE_SIZE - 1);
        assert_eq!(bucket.len(), REPLICATION_PARAM);
        assert!(bucket.contains(&newest));
        assert!(!bucket.contains(&contacts[0]));
    }

    #[test]
    fn test_full_bucket_keeps_reachable_lrs() {
        let local = Key::rand();
        let table = RoutingTable::new(contact(local));
        let contacts: Vec<Contact> = (0..=REPLICATION_PARAM)
            .map(|_| contact_in_range(&local, 3))
            .collect();
        for c in &contacts[..REPLICATION_PARAM] {
            table.update(c.clone(), |_| true);
        }

        let newest = contacts[REPLICATION_PARAM].clone();
        assert_eq!(table.update(newest.clone(), |_| true), UpdateOutcome::Discarded);

        let bucket = table.bucket(ROUTING_TABLE_SIZE - 4);
        assert_eq!(bucket.len(), REPLICATION_PARAM);
        assert!(!bucket.contains(&newest));
        assert_eq!(bucket[REPLICATION_PARAM - 1], contacts[0]);
    }

    #[test]
    fn test_find_closest_orders_by_bucket() {
        let local = Key::rand();
        let table = RoutingTable::new(contact(local));
        for _ in 0..300 {
            table.update(contact(Key::rand()), |_| true);
        }

        let target = Key::rand();
        let closest = table.find_closest(&target, REPLICATION_PARAM);
        assert_eq!(closest.len(), REPLICATION_PARAM);

        for (i, a) in closest.iter().enumerate() {
            for b in &closest[i + 1..] {
                if table.bucket_index(&a.id) != table.bucket_index(&b.id) {
                    assert!(a.id.xor(&target) < b.id.xor(&target));
                }
            }
        }

        // no contact left out is closer than a contact from an earlier bucket
        let last_bucket = table.bucket_index(&closest[closest.len() - 1].id);
        for other in table.contacts() {
            if closest.contains(&other) || table.bucket_index(&other.id) == last_bucket {
                continue;
            }
            for c in closest.iter().filter(|c| table.bucket_index(&c.id) != last_bucket) {
                assert!(c.id.xor(&target) < other.id.xor(&target));
            }
        }
    }

    #[test]
    fn test_find_closest_self_includes_local_contact() {
        let local = contact(Key::rand());
        let table = RoutingTable::new(local.clone());
        let others: Vec<Contact> = (0..10).map(|_| contact(Key::rand())).collect();
        for c in &others {
            table.update(c.clone(), |_| true);
        }

        let closest = table.find_closest(&local.id, REPLICATION_PARAM);
        assert_eq!(closest[0], local);
        assert_eq!(closest.len(), others.len() + 1);
        assert_eq!(table.find_closest(&local.id, 0).len(), 0);
    }

    #[test]
    fn test_find() {
        let local = Key::rand();
        let table = RoutingTable::new(contact(local));
        let other = contact(Key::rand());
        assert!(table.find(&other.id).is_none());
        table.update(other.clone(), |_| true);
        assert_eq!(table.find(&other.id), Some(other));
        assert!(table.find(&local).is_none());
    }
}
