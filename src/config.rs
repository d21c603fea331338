use std::time::Duration;

use crate::{
    CONCURRENCY_PARAM, MAX_LOOKUP_ROUNDS, REPLICATION_PARAM, REQUEST_TIMEOUT, ROUND_TIMEOUT,
};

/// Tunables of a single node.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum outstanding RPCs per lookup round (alpha).
    pub concurrency: usize,
    /// Number of contacts a lookup tries to collect (k).
    pub bucket_size: usize,
    /// How long a lookup round collects responses.
    pub round_timeout: Duration,
    /// How long a single RPC waits for its response.
    pub request_timeout: Duration,
    /// Safety bound on the rounds of one lookup.
    pub max_rounds: usize,
    /// Number of closest nodes an iterative store writes to.
    pub store_replicas: usize,
    /// Whether a successful iterative find value stores the value at an active contact that
    /// lacked it.
    pub cache_on_path: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            concurrency: CONCURRENCY_PARAM,
            bucket_size: REPLICATION_PARAM,
            round_timeout: Duration::from_millis(ROUND_TIMEOUT),
            request_timeout: Duration::from_millis(REQUEST_TIMEOUT),
            max_rounds: MAX_LOOKUP_ROUNDS,
            store_replicas: 1,
            cache_on_path: true,
        }
    }
}
