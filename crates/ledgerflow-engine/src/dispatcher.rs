//! Ordered delivery of committed outbox messages.
//!
//! Messages reach the dispatcher only after the transaction that wrote them
//! to the outbox has committed. They are sent per destination in commit
//! order; a destination that fails holds its queue until the next retry tick,
//! so a counterparty never sees a later message of a session before an
//! earlier one.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use ledgerflow_store::CheckpointStore;
use ledgerflow_workflow::{OutboundMessage, Party};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::transport::MessageTransport;

const REDELIVERY_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub(crate) struct Dispatcher {
  sender: mpsc::UnboundedSender<Vec<OutboundMessage>>,
}

impl Dispatcher {
  /// Spawn the delivery task. It exits once every `Dispatcher` is dropped.
  pub fn spawn(store: Arc<dyn CheckpointStore>, transport: Arc<dyn MessageTransport>) -> Self {
    let (sender, receiver) = mpsc::unbounded_channel();
    tokio::spawn(deliver_loop(receiver, store, transport));
    Self { sender }
  }

  pub fn dispatch(&self, batch: Vec<OutboundMessage>) {
    if batch.is_empty() {
      return;
    }
    // The loop only ends after every sender is gone.
    let _ = self.sender.send(batch);
  }
}

async fn deliver_loop(
  mut receiver: mpsc::UnboundedReceiver<Vec<OutboundMessage>>,
  store: Arc<dyn CheckpointStore>,
  transport: Arc<dyn MessageTransport>,
) {
  let mut held: HashMap<Party, VecDeque<OutboundMessage>> = HashMap::new();
  let mut retry = tokio::time::interval(REDELIVERY_INTERVAL);
  retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      batch = receiver.recv() => match batch {
        Some(batch) => {
          for message in batch {
            held.entry(message.destination.clone()).or_default().push_back(message);
          }
        }
        None => {
          flush(&mut held, store.as_ref(), transport.as_ref()).await;
          debug!(undelivered = held.values().map(VecDeque::len).sum::<usize>(), "dispatcher stopped");
          break;
        }
      },
      _ = retry.tick(), if !held.is_empty() => {}
    }

    flush(&mut held, store.as_ref(), transport.as_ref()).await;
  }
}

async fn flush(
  held: &mut HashMap<Party, VecDeque<OutboundMessage>>,
  store: &dyn CheckpointStore,
  transport: &dyn MessageTransport,
) {
  let mut delivered = Vec::new();

  for (destination, queue) in held.iter_mut() {
    while let Some(message) = queue.front() {
      match transport.send(destination, message.message.clone()).await {
        Ok(()) => {
          delivered.push(message.message_id.clone());
          queue.pop_front();
        }
        Err(e) => {
          warn!(
            destination = %destination,
            message_id = %message.message_id,
            error = %e,
            "message delivery failed, holding queue"
          );
          break;
        }
      }
    }
  }
  held.retain(|_, queue| !queue.is_empty());

  if delivered.is_empty() {
    return;
  }
  if let Err(e) = store.acknowledge_outbound(&delivered).await {
    warn!(error = %e, "failed to acknowledge delivered messages");
  }
}
