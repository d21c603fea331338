use bincode::Options;
use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;

use crate::contact::Contact;
use crate::error::Result;
use crate::key::Key;
use crate::vanish::VanishingDataObject;
use crate::MESSAGE_LENGTH;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Request {
    pub id: Key,
    pub sender: Contact,
    pub payload: RequestPayload,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum RequestPayload {
    Ping,
    Store(Key, Vec<u8>),
    FindNode(Key),
    FindValue(Key),
    GetVdo(Key),
}

/// A reply to a `Request`. `id` echoes the request's message id and `receiver` is the
/// responding node.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Response {
    pub id: Key,
    pub receiver: Contact,
    pub payload: ResponsePayload,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ResponsePayload {
    Pong,
    Store {
        error: Option<String>,
    },
    FindNode {
        nodes: Vec<Contact>,
        error: Option<String>,
    },
    /// A present `value` is authoritative and `nodes` is then ignored.
    FindValue {
        value: Option<Vec<u8>>,
        nodes: Vec<Contact>,
        error: Option<String>,
    },
    GetVdo(Option<VanishingDataObject>),
}

#[derive(Serialize, Deserialize, Debug)]
pub enum Message {
    Request(Request),
    Response(Response),
    Kill,
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MESSAGE_LENGTH as u64)
}

/// The UDP transport of a node. Every datagram carries one `bincode` encoded `Message`.
#[derive(Clone)]
pub struct Protocol {
    socket: Arc<UdpSocket>,
}

impl Protocol {
    /// Wraps `socket` and spawns a thread that forwards every decoded incoming message to `tx`
    /// until the receiving end hangs up.
    pub fn new(socket: UdpSocket, tx: Sender<Message>) -> Protocol {
        let protocol = Protocol {
            socket: Arc::new(socket),
        };
        let ret = protocol.clone();
        thread::spawn(move || {
            let mut buffer = vec![0u8; MESSAGE_LENGTH];
            loop {
                let (len, src_addr) = match protocol.socket.recv_from(&mut buffer) {
                    Ok(received) => received,
                    Err(err) => {
                        warn!("Protocol: Could not receive data: {}", err);
                        continue;
                    },
                };
                let message = match codec().deserialize::<Message>(&buffer[..len]) {
                    Ok(message) => message,
                    Err(err) => {
                        warn!("Protocol: Dropping malformed message from {}: {}", src_addr, err);
                        continue;
                    },
                };

                if tx.send(message).is_err() {
                    warn!("Protocol: Connection closed.");
                    break;
                }
            }
        });
        ret
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn send_message(&self, message: &Message, addr: SocketAddr) -> Result<()> {
        let buffer = codec().serialize(message)?;
        self.socket.send_to(&buffer, addr)?;
        Ok(())
    }
}
