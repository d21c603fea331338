#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

mod config;
mod contact;
mod error;
mod key;
mod node;
mod protocol;
mod routing;
mod shortlist;
mod storage;
pub mod vanish;

pub use self::config::Config;
pub use self::contact::Contact;
pub use self::error::{Error, Result};
pub use self::key::Key;
pub use self::node::{FindValueReply, LookupValue, Node};
pub use self::routing::{RoutingTable, UpdateOutcome};
pub use self::shortlist::Shortlist;
pub use self::vanish::{KeyShare, VanishingDataObject};

use std::sync::{Mutex, MutexGuard};

/// The number of bytes in a key.
pub const KEY_LENGTH: usize = 20;

/// The maximum length of the message in bytes.
const MESSAGE_LENGTH: usize = 65_507;

/// The number of k-buckets in the routing table.
pub const ROUTING_TABLE_SIZE: usize = KEY_LENGTH * 8;

/// The maximum number of entries in a k-bucket.
pub const REPLICATION_PARAM: usize = 20;

/// The maximum number of active RPCs per round of a lookup.
pub const CONCURRENCY_PARAM: usize = 3;

/// Lookup round timeout in milliseconds.
const ROUND_TIMEOUT: u64 = 300;

/// Request timeout time in milliseconds.
const REQUEST_TIMEOUT: u64 = 5000;

/// Upper bound on the number of rounds of a single lookup.
const MAX_LOOKUP_ROUNDS: usize = 1000;

/// Locks `mutex`, recovering the guard if another thread panicked while holding it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
