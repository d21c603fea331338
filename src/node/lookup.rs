use std::sync::mpsc::{channel, Sender};
use std::thread;
use std::time::Instant;

use super::{FindValueReply, Node};
use crate::contact::Contact;
use crate::error::Result;
use crate::key::Key;
use crate::shortlist::Shortlist;

/// The result of an iterative `FIND_VALUE`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupValue {
    /// `holder` answered with `value`.
    Found { value: Vec<u8>, holder: Contact },
    /// No node answered with a value; these are the closest nodes that answered.
    NotFound(Vec<Contact>),
}

/// What a single lookup ended with.
enum LookupOutcome {
    Nodes(Vec<Contact>),
    Value(Vec<u8>, Contact),
}

type RpcResult = (Contact, Result<FindValueReply>);

impl Node {
    /// Spawns a thread that sends either a `FIND_NODE` or a `FIND_VALUE` RPC and reports the
    /// outcome on `sender`.
    fn spawn_find_rpc(&self, dest: Contact, key: Key, sender: Sender<RpcResult>, find_value: bool) {
        let node = self.clone();
        thread::spawn(move || {
            let result = if find_value {
                node.find_value(&dest, &key)
            } else {
                node.find_node(&dest, &key).map(FindValueReply::Nodes)
            };

            if sender.send((dest, result)).is_err() {
                debug!("Receiver closed channel before rpc returned.");
            }
        });
    }

    /// Iteratively looks up the nodes closest to `key`.
    ///
    /// The shortlist of contacts to probe is seeded with the `concurrency` contacts of the
    /// whole routing table closest to `key`. Each round pops up to `concurrency` of them, sends
    /// them all a `FIND_NODE` (or `FIND_VALUE`) RPC at once and collects answers until the round
    /// timeout or until every RPC has reported. Nodes that answer join the active list and the
    /// contacts they return join the shortlist. Answers arriving after the round are dropped.
    ///
    /// The lookup stops once `bucket_size` nodes have answered, once there is nobody left to
    /// probe, or once a round did not discover a contact closer than the closest one known
    /// before it. A `FIND_VALUE` answer carrying a value stops the lookup immediately.
    fn lookup_nodes(&self, key: &Key, find_value: bool) -> LookupOutcome {
        let config = &self.config;

        let mut to_probe = Shortlist::new(*key);
        to_probe.exclude(self.contact.id);
        let mut seed = Shortlist::new(*key);
        seed.extend(self.routing_table.contacts());
        for contact in (0..config.concurrency).filter_map(|_| seed.pop_min()) {
            to_probe.insert(contact);
        }
        let mut active = Shortlist::new(*key);

        let mut finished = false;
        for round in 0..config.max_rounds {
            if active.len() >= config.bucket_size {
                debug!("{} - Found {} active nodes", self.contact.addr(), active.len());
                finished = true;
                break;
            }

            let probes: Vec<Contact> = (0..config.concurrency)
                .filter_map(|_| to_probe.pop_min())
                .collect();
            if probes.is_empty() {
                debug!("{} - No contacts left to probe", self.contact.addr());
                finished = true;
                break;
            }
            let previous_closest = to_probe.closest().cloned();

            debug!(
                "{} - Round {} probing {} contacts for {:?}",
                self.contact.addr(),
                round,
                probes.len(),
                key
            );
            let (tx, rx) = channel();
            for dest in &probes {
                self.spawn_find_rpc(dest.clone(), *key, tx.clone(), find_value);
            }
            drop(tx);

            let deadline = Instant::now() + config.round_timeout;
            let mut outstanding = probes.len();
            while outstanding > 0 {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let (dest, result) = match rx.recv_timeout(remaining) {
                    Ok(received) => received,
                    Err(_) => break,
                };
                outstanding -= 1;

                match result {
                    Ok(FindValueReply::Value(value)) => {
                        self.cache_on_path(&active, &dest, key, &value);
                        return LookupOutcome::Value(value, dest);
                    },
                    Ok(FindValueReply::Nodes(nodes)) => {
                        to_probe.extend(nodes);
                        active.insert(dest);
                    },
                    Err(err) => debug!(
                        "{} - No answer from {:?}: {}",
                        self.contact.addr(),
                        dest,
                        err
                    ),
                }
            }

            if to_probe.closest() == previous_closest.as_ref() {
                debug!(
                    "{} - Converged after {} rounds with closest {:?}",
                    self.contact.addr(),
                    round + 1,
                    previous_closest
                );
                finished = true;
                break;
            }
        }

        if !finished {
            warn!(
                "{} - Lookup for {:?} gave up after {} rounds",
                self.contact.addr(),
                key,
                config.max_rounds
            );
        }

        let ret = active.into_closest(config.bucket_size);
        debug!("{} - Closest nodes are {:?}", self.contact.addr(), ret);
        LookupOutcome::Nodes(ret)
    }

    /// Stores a value found by a lookup at the closest node that answered without it.
    fn cache_on_path(&self, active: &Shortlist, holder: &Contact, key: &Key, value: &[u8]) {
        if !self.config.cache_on_path {
            return;
        }
        let dest = match active
            .clone()
            .into_closest(active.len())
            .into_iter()
            .find(|contact| contact.id != holder.id)
        {
            Some(dest) => dest,
            None => return,
        };

        let node = self.clone();
        let key = *key;
        let value = value.to_vec();
        thread::spawn(move || {
            if let Err(err) = node.store(&dest, key, value) {
                debug!("{} - Could not cache value at {:?}: {}", node.contact.addr(), dest, err);
            }
        });
    }

    /// Returns up to `bucket_size` nodes closest to `key` that answered during the lookup,
    /// closest first.
    pub fn iterative_find_node(&self, key: &Key) -> Vec<Contact> {
        match self.lookup_nodes(key, false) {
            LookupOutcome::Nodes(nodes) => nodes,
            LookupOutcome::Value(..) => Vec::new(),
        }
    }

    /// Looks up the nodes closest to `key` and stores the value at the `store_replicas`
    /// closest of them. Returns the nodes that acknowledged the store, which is empty if the
    /// node knows no peers. Fails only if every attempted store failed.
    pub fn iterative_store(&self, key: Key, value: Vec<u8>) -> Result<Vec<Contact>> {
        let nodes = self.iterative_find_node(&key);
        let mut stored = Vec::new();
        let mut last_err = None;

        for dest in nodes.into_iter().take(self.config.store_replicas) {
            info!("{} - Storing {:?} at {:?}", self.contact.addr(), key, dest);
            match self.store(&dest, key, value.clone()) {
                Ok(()) => stored.push(dest),
                Err(err) => last_err = Some(err),
            }
        }

        match last_err {
            Some(err) if stored.is_empty() => Err(err),
            _ => Ok(stored),
        }
    }

    /// Iteratively looks up the value stored under `key`. A value held by this node itself is
    /// returned without asking any peer.
    pub fn iterative_find_value(&self, key: &Key) -> LookupValue {
        if let Some(value) = self.local_find_value(key) {
            debug!("{} - Found {:?} locally", self.contact.addr(), key);
            return LookupValue::Found {
                value,
                holder: self.contact(),
            };
        }

        match self.lookup_nodes(key, true) {
            LookupOutcome::Value(value, holder) => LookupValue::Found { value, holder },
            LookupOutcome::Nodes(nodes) => LookupValue::NotFound(nodes),
        }
    }
}
