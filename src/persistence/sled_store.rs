use std::path::Path;

use sled::Db;

use crate::broker::Message;
use crate::utils::error::{BrokerError, Result};

/// Durable message store backing the in-memory broker's durable queues.
///
/// Each queue gets its own sled tree; entries are keyed by the broker's
/// publish sequence in big-endian order so iteration follows publish order.
#[derive(Clone)]
pub struct Persistence {
    db: Db,
}

impl Persistence {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    pub fn store_message(&self, queue: &str, seq: u64, message: &Message) -> Result<()> {
        let serialized = serde_json::to_vec(message)?;
        let queue_tree = self.db.open_tree(queue)?;
        queue_tree.insert(seq.to_be_bytes(), serialized)?;
        Ok(())
    }

    pub fn remove_message(&self, queue: &str, seq: u64) -> Result<()> {
        let queue_tree = self.db.open_tree(queue)?;
        queue_tree.remove(seq.to_be_bytes())?;
        Ok(())
    }

    /// Messages still stored for `queue`, oldest first.
    pub fn load_messages(&self, queue: &str) -> Result<Vec<(u64, Message)>> {
        let queue_tree = self.db.open_tree(queue)?;
        let mut messages = Vec::new();
        for entry in queue_tree.iter() {
            let (key, value) = entry?;
            let seq_bytes: [u8; 8] = key.as_ref().try_into().map_err(|_| {
                BrokerError::Persistence(format!("malformed key in queue '{queue}'"))
            })?;
            let message: Message = serde_json::from_slice(&value)?;
            messages.push((u64::from_be_bytes(seq_bytes), message));
        }
        Ok(messages)
    }

    /// Block until every write so far is durable on disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("db", &"sled::Db")
            .finish()
    }
}
