use record::Record;
use std::collections::HashMap;

/// Unordered backing. Iteration sorts keys on demand.
#[derive(Debug, Clone, Default)]
pub struct HashTable {
    map: HashMap<String, Record>,
}

impl HashTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.map.get(key)
    }

    pub fn insert(&mut self, record: Record) -> Option<Record> {
        self.map.insert(record.key.clone(), record)
    }

    pub fn sorted(&self) -> Vec<&Record> {
        let mut out: Vec<&Record> = self.map.values().collect();
        out.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        out
    }
}
