use crate::domain::ports::RoutingDispatcher;
use crate::domain::transaction::Transaction;
use crate::domain::violation::{HoldingMessage, Violation, ViolationEvent};
use crate::error::{Result, ScreeningError};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::sync::Mutex;

/// Destination of a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    Processing,
    Holding,
    Violations,
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Queue::Processing => "processing",
            Queue::Holding => "holding",
            Queue::Violations => "violations",
        };
        f.write_str(name)
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    queue: Queue,
    message: &'a T,
}

struct Inner<W> {
    writer: W,
    published: HashSet<(Queue, String)>,
}

/// Publishes queue messages as JSON Lines envelopes:
/// `{"queue": "processing", "message": {...}}`.
///
/// A transaction is published at most once per queue, so repeated routing
/// of the same transaction writes nothing new.
pub struct QueueWriter<W: Write + Send> {
    inner: Mutex<Inner<W>>,
}

impl<W: Write + Send> QueueWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(Inner {
                writer,
                published: HashSet::new(),
            }),
        }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.inner
            .into_inner()
            .map(|inner| inner.writer)
            .map_err(|_| ScreeningError::Fatal("queue writer lock poisoned".to_string()))
    }

    fn publish<T: Serialize>(&self, queue: Queue, transaction_id: &str, message: &T) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ScreeningError::Fatal("queue writer lock poisoned".to_string()))?;
        if inner.published.contains(&(queue, transaction_id.to_string())) {
            return Ok(());
        }
        serde_json::to_writer(&mut inner.writer, &Envelope { queue, message })?;
        inner.writer.write_all(b"\n")?;
        inner.writer.flush()?;
        inner.published.insert((queue, transaction_id.to_string()));
        Ok(())
    }
}

#[async_trait]
impl<W: Write + Send> RoutingDispatcher for QueueWriter<W> {
    async fn route_to_processing(&self, transaction: &Transaction) -> Result<()> {
        self.publish(Queue::Processing, &transaction.transaction_id, transaction)
    }

    async fn route_to_holding(
        &self,
        transaction: &Transaction,
        violations: &[Violation],
    ) -> Result<()> {
        let message = HoldingMessage {
            transaction: transaction.clone(),
            violations: violations.to_vec(),
        };
        self.publish(Queue::Holding, &transaction.transaction_id, &message)
    }

    async fn emit_violation_event(
        &self,
        tenant_id: &str,
        transaction_id: &str,
        violations: &[Violation],
    ) -> Result<()> {
        let event = ViolationEvent {
            tenant_id: tenant_id.to_string(),
            transaction_id: transaction_id.to_string(),
            violations: violations.to_vec(),
        };
        self.publish(Queue::Violations, transaction_id, &event)
    }
}
