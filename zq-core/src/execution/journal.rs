//! Order lifecycle journal
//!
//! Append-only JSONL audit of every order event, written by a dedicated
//! thread fed from a bounded channel. The hot path never blocks on disk:
//! when the buffer is full the event is dropped and logged, which is
//! preferable to stalling the submit path.

use crate::core::types::{Fill, Order, OrderId};
use crossbeam::channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::thread;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum JournalEvent {
    OrderSubmit(Box<Order>),
    OrderAck {
        client_order_id: OrderId,
        exchange_order_id: String,
    },
    Fill(Fill),
    OrderCancel(OrderId),
    OrderReject {
        client_order_id: OrderId,
        reason: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp_ns: i64,
    #[serde(flatten)]
    pub event: JournalEvent,
}

impl JournalEntry {
    fn new(event: JournalEvent) -> Self {
        Self {
            timestamp_ns: crate::core::Timestamp::now().as_ns(),
            event,
        }
    }
}

pub struct AsyncJournal {
    sender: Option<Sender<JournalEvent>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl AsyncJournal {
    pub fn new(path: PathBuf) -> std::io::Result<Self> {
        let (sender, receiver) = bounded(4096);
        let handle = thread::Builder::new()
            .name("order-journal".into())
            .spawn(move || Self::writer_loop(path, receiver))?;

        Ok(Self {
            sender: Some(sender),
            thread_handle: Some(handle),
        })
    }

    fn writer_loop(path: PathBuf, receiver: Receiver<JournalEvent>) {
        let mut file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => f,
            Err(e) => {
                error!("failed to open journal file {:?}: {}", path, e);
                return;
            }
        };

        for event in receiver {
            let entry = JournalEntry::new(event);
            match serde_json::to_string(&entry) {
                Ok(json) => {
                    if let Err(e) = writeln!(file, "{}", json) {
                        error!("failed to write journal entry: {}", e);
                    }
                }
                Err(e) => error!("failed to serialize journal entry: {}", e),
            }
        }

        if let Err(e) = file.flush() {
            error!("failed to flush journal: {}", e);
        }
        info!("order journal writer stopped");
    }

    pub fn record(&self, event: JournalEvent) {
        if let Some(sender) = &self.sender {
            if let Err(e) = sender.try_send(event) {
                error!("journal buffer full or disconnected, dropping event: {:?}", e);
            }
        }
    }
}

impl Drop for AsyncJournal {
    fn drop(&mut self) {
        // Drop the sender first so the writer sees a disconnect and exits.
        let _ = self.sender.take();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for AsyncJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncJournal").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{OrderRequest, Side, TradingPair};
    use rust_decimal_macros::dec;
    use std::io::{BufRead, BufReader};

    #[test]
    fn test_journal_round_trip() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();

        {
            let journal = AsyncJournal::new(path.clone()).unwrap();
            let req = OrderRequest::limit(
                TradingPair::new("BTC", "USDC"),
                Side::Buy,
                dec!(0.1),
                dec!(50_000),
            );
            let order = Order::from_request(&req, OrderId::new("j-test"));
            journal.record(JournalEvent::OrderSubmit(Box::new(order)));
            journal.record(JournalEvent::OrderAck {
                client_order_id: OrderId::new("j-test"),
                exchange_order_id: "ex-1".into(),
            });
            // Journal drops here, flushing on the way out.
        }

        let reader = BufReader::new(std::fs::File::open(&path).unwrap());
        let lines: Vec<String> = reader.lines().collect::<Result<_, _>>().unwrap();
        assert_eq!(lines.len(), 2);

        let first: JournalEntry = serde_json::from_str(&lines[0]).unwrap();
        match first.event {
            JournalEvent::OrderSubmit(o) => assert_eq!(o.client_order_id.as_str(), "j-test"),
            other => panic!("unexpected {other:?}"),
        }
        let second: JournalEntry = serde_json::from_str(&lines[1]).unwrap();
        assert!(matches!(second.event, JournalEvent::OrderAck { .. }));
    }
}
