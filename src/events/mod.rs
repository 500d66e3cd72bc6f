use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// Events emitted after state changes commit. Emission failures are logged
// by callers and never roll back the originating operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Account events
    UserRegistered(Uuid),

    // Item events
    ItemCreated(Uuid),
    ItemUpdated(Uuid),
    ItemDeleted(Uuid),

    // Stock ledger events
    StockIncreased {
        item_id: Uuid,
        movement_id: Uuid,
        amount: i32,
        new_quantity: i32,
    },
    StockDecreased {
        item_id: Uuid,
        movement_id: Uuid,
        amount: i32,
        new_quantity: i32,
    },
}

/// Creates a bounded event channel.
pub fn event_channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

// Consumes events and distributes them to interested subsystems. Currently
// the only subscriber is the log.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::StockIncreased {
                item_id,
                movement_id,
                amount,
                new_quantity,
            } => {
                info!(
                    %item_id, %movement_id, amount, new_quantity,
                    "Stock increased"
                );
            }
            Event::StockDecreased {
                item_id,
                movement_id,
                amount,
                new_quantity,
            } => {
                info!(
                    %item_id, %movement_id, amount, new_quantity,
                    "Stock decreased"
                );
            }
            other => {
                debug!("Received event: {:?}", other);
            }
        }
    }

    info!("Event processing loop terminated");
}
