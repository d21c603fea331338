use std::collections::HashMap;

use crate::key::Key;
use crate::vanish::VanishingDataObject;

/// The values this node holds for the DHT. Writes are last-write-wins and values never expire.
#[derive(Default, Debug)]
pub struct Storage {
    data: HashMap<Key, Vec<u8>>,
}

impl Storage {
    pub fn new() -> Self {
        Storage {
            data: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: Key, value: Vec<u8>) {
        if self.data.insert(key, value).is_some() {
            debug!("Overwrote {:?}", key);
        }
    }

    pub fn get(&self, key: &Key) -> Option<&Vec<u8>> {
        self.data.get(key)
    }
}

/// Vanishing data objects registered on this node, by id.
#[derive(Default, Debug)]
pub struct VdoRegistry {
    objects: HashMap<Key, VanishingDataObject>,
}

impl VdoRegistry {
    pub fn new() -> Self {
        VdoRegistry {
            objects: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: Key, vdo: VanishingDataObject) {
        self.objects.insert(id, vdo);
    }

    pub fn get(&self, id: &Key) -> Option<&VanishingDataObject> {
        self.objects.get(id)
    }
}
