mod lookup;

pub use self::lookup::LookupValue;

use std::collections::{BTreeSet, HashMap};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::config::Config;
use crate::contact::Contact;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::protocol::{Message, Protocol, Request, RequestPayload, Response, ResponsePayload};
use crate::routing::RoutingTable;
use crate::storage::{Storage, VdoRegistry};
use crate::vanish::{self, KeyShare, VanishingDataObject};
use crate::{lock, REPLICATION_PARAM};

/// The answer of a single `FIND_VALUE` RPC.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FindValueReply {
    Value(Vec<u8>),
    Nodes(Vec<Contact>),
}

/// A node in the Kademlia DHT.
///
/// A node owns its routing table, value store and registry of vanishing data objects. Cloning a
/// `Node` yields another handle to the same node.
#[derive(Clone)]
pub struct Node {
    contact: Arc<Contact>,
    config: Arc<Config>,
    routing_table: Arc<RoutingTable>,
    storage: Arc<Mutex<Storage>>,
    vdos: Arc<Mutex<VdoRegistry>>,
    pending_requests: Arc<Mutex<HashMap<Key, Sender<Response>>>>,
    protocol: Arc<Protocol>,
    is_active: Arc<AtomicBool>,
}

impl Node {
    /// Constructs a new `Node` on a specific ip and port, and bootstraps the node with an existing
    /// node if `bootstrap` is not `None`.
    pub fn new(ip: &str, port: &str, bootstrap: Option<Contact>) -> Result<Self> {
        Node::with_config(ip, port, bootstrap, Config::default())
    }

    /// Like `new`, with explicit tunables.
    pub fn with_config(
        ip: &str,
        port: &str,
        bootstrap: Option<Contact>,
        config: Config,
    ) -> Result<Self> {
        let addr = format!("{}:{}", ip, port);
        let socket = UdpSocket::bind(addr)?;
        let contact = Arc::new(Contact::new(Key::rand(), socket.local_addr()?));
        let routing_table = RoutingTable::new((*contact).clone());
        let (message_tx, message_rx) = channel();
        let protocol = Protocol::new(socket, message_tx);

        // the bucket is empty, so this never needs a probe
        if let Some(bootstrap_contact) = bootstrap {
            let _ = routing_table.try_update(bootstrap_contact);
        }

        let node = Node {
            contact,
            config: Arc::new(config),
            routing_table: Arc::new(routing_table),
            storage: Arc::new(Mutex::new(Storage::new())),
            vdos: Arc::new(Mutex::new(VdoRegistry::new())),
            pending_requests: Arc::new(Mutex::new(HashMap::new())),
            protocol: Arc::new(protocol),
            is_active: Arc::new(AtomicBool::new(true)),
        };
        info!("{} - Started node {:?}", node.contact.addr(), node.contact.id);

        node.start_message_handler(message_rx);
        node.bootstrap_routing_table();
        Ok(node)
    }

    /// Starts a thread that handles incoming requests and responses.
    fn start_message_handler(&self, rx: Receiver<Message>) {
        let node = self.clone();
        thread::spawn(move || {
            for message in rx.iter() {
                match message {
                    Message::Request(request) => node.handle_request(request),
                    Message::Response(response) => node.handle_response(response),
                    Message::Kill => {
                        node.is_active.store(false, Ordering::Release);
                        info!("{} - Killed message handler", node.contact.addr());
                        break;
                    },
                }
            }
        });
    }

    /// Fills the routing table by looking up the node's own id.
    fn bootstrap_routing_table(&self) {
        let target_key = self.contact.id;
        let found = self.iterative_find_node(&target_key);
        debug!(
            "{} - Bootstrapped with {} contacts",
            self.contact.addr(),
            found.len()
        );
    }

    /// Upserts the routing table. If the contact's bucket is full, a helper thread pings the
    /// least recently seen contact and evicts it only if it does not answer. The handler thread
    /// must not wait for that ping itself since it is the one that delivers the pong.
    fn update_routing_table(&self, contact: Contact) {
        debug!("{} updating {:?}", self.contact.addr(), contact);
        if let Err(lrs) = self.routing_table.try_update(contact.clone()) {
            let node = self.clone();
            thread::spawn(move || {
                let alive = match node.ping(lrs.addr()) {
                    Ok(responder) => responder.id == lrs.id,
                    Err(_) => false,
                };
                node.routing_table.resolve_full(contact, &lrs, alive);
            });
        }
    }

    /// Handles a request RPC.
    fn handle_request(&self, request: Request) {
        info!(
            "{} - Receiving request from {} {:?}",
            self.contact.addr(),
            request.sender.addr(),
            request.payload,
        );
        self.update_routing_table(request.sender.clone());
        let payload = match request.payload {
            RequestPayload::Ping => ResponsePayload::Pong,
            RequestPayload::Store(key, value) => {
                lock(&self.storage).insert(key, value);
                ResponsePayload::Store { error: None }
            },
            RequestPayload::FindNode(key) => ResponsePayload::FindNode {
                nodes: self.routing_table.find_closest(&key, REPLICATION_PARAM),
                error: None,
            },
            RequestPayload::FindValue(key) => {
                let value = lock(&self.storage).get(&key).cloned();
                match value {
                    Some(value) => ResponsePayload::FindValue {
                        value: Some(value),
                        nodes: Vec::new(),
                        error: None,
                    },
                    None => ResponsePayload::FindValue {
                        value: None,
                        nodes: self.routing_table.find_closest(&key, REPLICATION_PARAM),
                        error: None,
                    },
                }
            },
            RequestPayload::GetVdo(id) => ResponsePayload::GetVdo(lock(&self.vdos).get(&id).cloned()),
        };

        let response = Message::Response(Response {
            id: request.id,
            receiver: (*self.contact).clone(),
            payload,
        });
        if let Err(err) = self.protocol.send_message(&response, request.sender.addr()) {
            warn!(
                "{} - Could not respond to {}: {}",
                self.contact.addr(),
                request.sender.addr(),
                err
            );
        }
    }

    /// Handles a response RPC. If the id in the response does not match any outgoing request, then
    /// the response will be ignored.
    fn handle_response(&self, response: Response) {
        self.update_routing_table(response.receiver.clone());
        let sender = lock(&self.pending_requests).remove(&response.id);
        match sender {
            Some(sender) => {
                info!(
                    "{} - Receiving response from {} {:?}",
                    self.contact.addr(),
                    response.receiver.addr(),
                    response.payload,
                );
                if sender.send(response).is_err() {
                    debug!("{} - Requester gave up before the response", self.contact.addr());
                }
            },
            None => warn!(
                "{} - Original request not found; irrelevant response or expired request.",
                self.contact.addr()
            ),
        }
    }

    /// Sends a request RPC and waits up to the request timeout for its response.
    fn send_request(&self, addr: SocketAddr, payload: RequestPayload) -> Result<Response> {
        if !self.is_active.load(Ordering::Acquire) {
            return Err(Error::RpcUnavailable {
                addr,
                reason: "node is shut down".to_string(),
            });
        }
        info!(
            "{} - Sending request to {} {:?}",
            self.contact.addr(),
            addr,
            payload
        );
        let (response_tx, response_rx) = channel();
        let token = {
            let mut pending_requests = lock(&self.pending_requests);
            let mut token = Key::rand();
            while pending_requests.contains_key(&token) {
                token = Key::rand();
            }
            pending_requests.insert(token, response_tx);
            token
        };

        let request = Message::Request(Request {
            id: token,
            sender: (*self.contact).clone(),
            payload,
        });
        if let Err(err) = self.protocol.send_message(&request, addr) {
            lock(&self.pending_requests).remove(&token);
            return Err(Error::RpcUnavailable {
                addr,
                reason: err.to_string(),
            });
        }

        match response_rx.recv_timeout(self.config.request_timeout) {
            Ok(response) => Ok(response),
            Err(_) => {
                warn!(
                    "{} - Request to {} timed out after waiting for {:?}",
                    self.contact.addr(),
                    addr,
                    self.config.request_timeout
                );
                lock(&self.pending_requests).remove(&token);
                Err(Error::RpcUnavailable {
                    addr,
                    reason: format!("timed out after {:?}", self.config.request_timeout),
                })
            },
        }
    }

    /// Sends a `PING` RPC to `addr` and returns the contact that answered.
    pub fn ping(&self, addr: SocketAddr) -> Result<Contact> {
        let response = self.send_request(addr, RequestPayload::Ping)?;
        match response.payload {
            ResponsePayload::Pong => Ok(response.receiver),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    /// Sends a `STORE` RPC.
    pub fn store(&self, dest: &Contact, key: Key, value: Vec<u8>) -> Result<()> {
        let response = self.send_request(dest.addr(), RequestPayload::Store(key, value))?;
        match response.payload {
            ResponsePayload::Store { error: None } => Ok(()),
            ResponsePayload::Store { error: Some(err) } => Err(Error::Remote(err)),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    /// Sends a `FIND_NODE` RPC.
    pub fn find_node(&self, dest: &Contact, key: &Key) -> Result<Vec<Contact>> {
        let response = self.send_request(dest.addr(), RequestPayload::FindNode(*key))?;
        match response.payload {
            ResponsePayload::FindNode { nodes, error: None } => Ok(nodes),
            ResponsePayload::FindNode { error: Some(err), .. } => Err(Error::Remote(err)),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    /// Sends a `FIND_VALUE` RPC.
    pub fn find_value(&self, dest: &Contact, key: &Key) -> Result<FindValueReply> {
        let response = self.send_request(dest.addr(), RequestPayload::FindValue(*key))?;
        match response.payload {
            ResponsePayload::FindValue {
                error: Some(err), ..
            } => Err(Error::Remote(err)),
            ResponsePayload::FindValue {
                value: Some(value), ..
            } => Ok(FindValueReply::Value(value)),
            ResponsePayload::FindValue { nodes, .. } => Ok(FindValueReply::Nodes(nodes)),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    /// Sends a `GET_VDO` RPC.
    pub fn get_vdo(&self, dest: &Contact, vdo_id: &Key) -> Result<Option<VanishingDataObject>> {
        let response = self.send_request(dest.addr(), RequestPayload::GetVdo(*vdo_id))?;
        match response.payload {
            ResponsePayload::GetVdo(vdo) => Ok(vdo),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    /// Returns the value this node itself stores under `key`.
    pub fn local_find_value(&self, key: &Key) -> Option<Vec<u8>> {
        lock(&self.storage).get(key).cloned()
    }

    /// Returns the contact with id `id`, which is either this node or a routing table entry.
    pub fn find_contact(&self, id: &Key) -> Result<Contact> {
        if *id == self.contact.id {
            return Ok((*self.contact).clone());
        }
        self.routing_table
            .find(id)
            .ok_or(Error::ContactNotFound(*id))
    }

    /// Encrypts `payload`, splits its key into `number_keys` shares of which `threshold` recover
    /// it and registers the result under `vdo_id`.
    ///
    /// Each share is also stored in the DHT at its location; failing to place a share is logged
    /// and does not fail the operation since the object keeps a local copy of its shares.
    pub fn vanish(
        &self,
        vdo_id: Key,
        payload: &[u8],
        number_keys: u8,
        threshold: u8,
    ) -> Result<VanishingDataObject> {
        let vdo = vanish::vanish_data(payload, number_keys, threshold)?;
        let locations = vanish::share_locations(vdo.access_key, vdo.number_keys);
        for (share, location) in vdo.shares.iter().zip(locations) {
            match self.iterative_store(location, share.to_bytes()) {
                Ok(ref stored) if stored.is_empty() => {
                    debug!("{} - No peers to hold share {}", self.contact.addr(), share.index)
                },
                Ok(_) => {},
                Err(err) => warn!(
                    "{} - Could not place share {}: {}",
                    self.contact.addr(),
                    share.index,
                    err
                ),
            }
        }

        lock(&self.vdos).insert(vdo_id, vdo.clone());
        info!("{} - Registered vanishing data object {}", self.contact.addr(), vdo_id);
        Ok(vdo)
    }

    /// Fetches the vanishing data object `vdo_id` from `holder` and decrypts it.
    ///
    /// The object's own shares are used first; if there are fewer than its threshold, the
    /// missing shares are looked up in the DHT.
    pub fn unvanish(&self, holder: &Contact, vdo_id: &Key) -> Result<Vec<u8>> {
        let vdo = if holder.id == self.contact.id {
            lock(&self.vdos).get(vdo_id).cloned()
        } else {
            self.get_vdo(holder, vdo_id)?
        };
        let vdo = vdo.ok_or(Error::VdoNotFound(*vdo_id))?;

        match vanish::unvanish_data(&vdo, &vdo.shares) {
            Err(Error::InsufficientShares { .. }) => {
                let mut shares = vdo.shares.clone();
                shares.extend(self.collect_shares(&vdo));
                vanish::unvanish_data(&vdo, &shares)
            },
            result => result,
        }
    }

    /// Looks up the shares of `vdo` at their DHT locations.
    fn collect_shares(&self, vdo: &VanishingDataObject) -> Vec<KeyShare> {
        let known: BTreeSet<u8> = vdo.shares.iter().map(|share| share.index).collect();
        let mut ret: Vec<KeyShare> = Vec::new();
        let locations = vanish::share_locations(vdo.access_key, vdo.number_keys);
        for (index, location) in (1..=vdo.number_keys).zip(locations) {
            if known.len() + ret.len() >= vdo.threshold as usize {
                break;
            }
            if known.contains(&index) {
                continue;
            }
            if let LookupValue::Found { value, .. } = self.iterative_find_value(&location) {
                match KeyShare::from_bytes(&value) {
                    Some(share) if share.index == index => ret.push(share),
                    _ => warn!("{} - Ignoring malformed share at {}", self.contact.addr(), location),
                }
            }
        }
        ret
    }

    /// Returns the `Contact` of the node.
    pub fn contact(&self) -> Contact {
        (*self.contact).clone()
    }

    /// Returns the id of the node.
    pub fn id(&self) -> Key {
        self.contact.id
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    /// Kills the current node. It stops answering requests and its own RPCs fail.
    pub fn kill(&self) {
        if let Err(err) = self.protocol.send_message(&Message::Kill, self.contact.addr()) {
            warn!("{} - Could not kill node: {}", self.contact.addr(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Node;
    use crate::config::Config;
    use crate::error::Error;
    use crate::key::Key;
    use crate::lock;

    fn new_node(bootstrap: Option<&Node>) -> Node {
        let config = Config {
            round_timeout: Duration::from_millis(1000),
            request_timeout: Duration::from_millis(500),
            ..Config::default()
        };
        Node::with_config("127.0.0.1", "0", bootstrap.map(Node::contact), config).unwrap()
    }

    /// Drops all but one share of the object registered under `vdo_id`.
    fn strip_shares(node: &Node, vdo_id: &Key) {
        let mut vdos = lock(&node.vdos);
        let mut vdo = vdos.get(vdo_id).cloned().unwrap();
        vdo.shares.truncate(1);
        vdos.insert(*vdo_id, vdo);
    }

    #[test]
    fn test_unvanish_collects_missing_shares_from_dht() {
        let a = new_node(None);
        let b = new_node(Some(&a));
        let vdo_id = Key::rand();
        a.vanish(vdo_id, b"hello world", 5, 3).unwrap();
        strip_shares(&a, &vdo_id);

        // b is a's only peer, so every share was placed on b
        assert_eq!(a.get_vdo(&a.contact(), &vdo_id).unwrap().unwrap().shares.len(), 1);
        assert_eq!(b.unvanish(&a.contact(), &vdo_id).unwrap(), b"hello world");
    }

    #[test]
    fn test_unvanish_without_enough_shares() {
        let a = new_node(None);
        let vdo_id = Key::rand();
        a.vanish(vdo_id, b"hello world", 5, 3).unwrap();
        strip_shares(&a, &vdo_id);

        match a.unvanish(&a.contact(), &vdo_id) {
            Err(Error::InsufficientShares {
                needed: 3,
                found: 1,
            }) => {},
            other => panic!("unexpected {:?}", other),
        }
    }
}
