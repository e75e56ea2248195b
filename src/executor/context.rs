use crate::storage::{InMemoryStorage, Snapshot};

pub struct ExecutionContext<'a> {
    pub storage: &'a InMemoryStorage,
    pub snapshot: &'a Snapshot,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(storage: &'a InMemoryStorage, snapshot: &'a Snapshot) -> Self {
        Self { storage, snapshot }
    }
}
