//! The process-wide name -> job record map. Reads (status queries, handler
//! lookups) and writes (insert/delete/reload's swap) are serialized with a
//! readers/writer lock so observation is always atomic.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::job::JobRecord;

#[derive(Default)]
pub struct Registry {
    inner: RwLock<HashMap<String, Arc<JobRecord>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<JobRecord>> {
        self.inner.read().get(name).cloned()
    }

    pub fn insert(&self, record: Arc<JobRecord>) {
        self.inner.write().insert(record.name.clone(), record);
    }

    pub fn remove(&self, name: &str) -> Option<Arc<JobRecord>> {
        self.inner.write().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    pub fn records(&self) -> Vec<Arc<JobRecord>> {
        self.inner.read().values().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobSpec;

    fn record(name: &str) -> Arc<JobRecord> {
        Arc::new(JobRecord::new(
            name.to_string(),
            JobSpec {
                name: name.to_string(),
                command: "/bin/true".into(),
                ..Default::default()
            },
        ))
    }

    #[test]
    fn insert_then_get() {
        let reg = Registry::new();
        reg.insert(record("a"));
        assert!(reg.get("a").is_some());
        assert!(reg.get("b").is_none());
    }

    #[test]
    fn remove_drops_entry() {
        let reg = Registry::new();
        reg.insert(record("a"));
        assert!(reg.remove("a").is_some());
        assert!(reg.get("a").is_none());
    }

    #[test]
    fn names_reflects_all_entries() {
        let reg = Registry::new();
        reg.insert(record("a"));
        reg.insert(record("b"));
        let mut names = reg.names();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
