use std::cmp::Ordering;
use std::fmt::{Debug, Formatter, Result};
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};

use crate::key::Key;

/// The address book entry of a node. Two contacts are the same node if their ids match.
#[derive(Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Key,
    pub ip: IpAddr,
    pub port: u16,
}

impl Contact {
    pub fn new(id: Key, addr: SocketAddr) -> Self {
        Contact {
            id,
            ip: addr.ip(),
            port: addr.port(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Contact) -> bool {
        self.id == other.id
    }
}

impl Eq for Contact {}

impl Hash for Contact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Debug for Contact {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{}:{} - {:?}", self.ip, self.port, self.id)
    }
}

/// A contact paired with its distance to some target. The ordering is reversed so that a
/// `BinaryHeap` of pairs pops the closest contact first.
#[derive(Eq, Clone, Debug)]
pub struct ContactDistancePair(pub Contact, pub Key);

impl PartialEq for ContactDistancePair {
    fn eq(&self, other: &ContactDistancePair) -> bool {
        self.0.eq(&other.0)
    }
}

impl PartialOrd for ContactDistancePair {
    fn partial_cmp(&self, other: &ContactDistancePair) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ContactDistancePair {
    fn cmp(&self, other: &ContactDistancePair) -> Ordering {
        other.1.cmp(&self.1)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BinaryHeap;
    use std::net::SocketAddr;

    use super::{Contact, ContactDistancePair};
    use crate::key::Key;

    #[test]
    fn test_identity_is_id() {
        let id = Key::rand();
        let a = Contact::new(id, "127.0.0.1:4000".parse::<SocketAddr>().unwrap());
        let b = Contact::new(id, "10.0.0.1:5000".parse::<SocketAddr>().unwrap());
        assert_eq!(a, b);
        assert_eq!(a.addr().port(), 4000);
    }

    #[test]
    fn test_heap_pops_closest() {
        let target = Key::rand();
        let addr = "127.0.0.1:4000".parse::<SocketAddr>().unwrap();
        let mut heap = BinaryHeap::new();
        for _ in 0..50 {
            let id = Key::rand();
            heap.push(ContactDistancePair(Contact::new(id, addr), id.xor(&target)));
        }
        let mut prev = Key::default();
        while let Some(ContactDistancePair(_, distance)) = heap.pop() {
            assert!(prev <= distance);
            prev = distance;
        }
    }
}
