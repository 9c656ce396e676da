//! Exchange management
//!
//! An `Exchange` holds the bindings for one exchange name. Bindings are stored
//! as a set of `(queue, routing key)` pairs, so duplicate binds are a no-op.
//!
//! Concurrency note: callers must synchronize access to `Exchange` (for
//! example via the broker lock) when modifying bindings.

use std::collections::BTreeSet;

use crate::broker::{ExchangeKind, ExchangeOptions};

#[derive(Debug)]
pub struct Exchange {
    pub name: String,
    pub kind: ExchangeKind,
    pub options: ExchangeOptions,
    pub bindings: BTreeSet<(String, String)>,
}

impl Exchange {
    pub fn new(name: &str, kind: ExchangeKind, options: ExchangeOptions) -> Self {
        Self {
            name: name.to_string(),
            kind,
            options,
            bindings: BTreeSet::new(),
        }
    }

    /// Bind a queue under `routing_key`. Duplicate binds are ignored.
    pub fn bind(&mut self, queue: &str, routing_key: &str) {
        self.bindings
            .insert((queue.to_string(), routing_key.to_string()));
    }

    /// Remove every binding that points at `queue`.
    pub fn unbind_queue(&mut self, queue: &str) {
        self.bindings.retain(|(bound, _)| bound != queue);
    }

    /// Queue names a message published with `routing_key` goes to, each once.
    pub fn route(&self, routing_key: &str) -> Vec<String> {
        let matching = self.bindings.iter().filter(|(_, key)| match self.kind {
            ExchangeKind::Fanout => true,
            ExchangeKind::Direct => key == routing_key,
        });

        let queues: BTreeSet<&str> = matching.map(|(queue, _)| queue.as_str()).collect();
        queues.into_iter().map(str::to_string).collect()
    }

    pub fn describe(&self) -> String {
        format!(
            "{} (durable={}, auto_delete={})",
            self.kind, self.options.durable, self.options.auto_delete
        )
    }
}
