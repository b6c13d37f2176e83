use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the services after a committed mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Ledger events
    StockReserved {
        location_type: String,
        location_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    StockReleased {
        location_type: String,
        location_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    StockAdded {
        location_type: String,
        location_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    StockRemoved {
        location_type: String,
        location_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },

    // Transfer lifecycle events
    TransferRequested(Uuid),
    TransferApproved {
        transfer_id: Uuid,
        approved_quantity: i32,
    },
    TransferRejected(Uuid),
    TransferReady(Uuid),
    TransferShipped(Uuid),
    TransferDelivered(Uuid),
    TransferReceived {
        transfer_id: Uuid,
        received_quantity: i32,
        damaged_quantity: i32,
    },
    TransferCancelled(Uuid),
    TransferCompleted(Uuid),
    TransferWrittenOff {
        transfer_id: Uuid,
        outcome: String,
    },

    // Permission events
    PermissionGranted(Uuid),
    PermissionConsumed(Uuid),
    PermissionsSwept {
        expired_count: u64,
    },
}

/// Cloneable handle for emitting events into the processing loop.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Consumes events until every sender is dropped.
///
/// Downstream integrations (notifications, projections) hang off this
/// loop; the core only logs.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::TransferReceived {
                transfer_id,
                received_quantity,
                damaged_quantity,
            } if *damaged_quantity > 0 => {
                warn!(
                    transfer_id = %transfer_id,
                    received = received_quantity,
                    damaged = damaged_quantity,
                    "Transfer received with damaged units"
                );
            }
            Event::TransferWrittenOff {
                transfer_id,
                outcome,
            } => {
                warn!(transfer_id = %transfer_id, outcome = %outcome, "Transfer written off");
            }
            other => {
                info!("Received event: {:?}", other);
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_fails_once_receiver_is_dropped() {
        let (tx, rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        drop(rx);
        assert!(sender.send(Event::TransferRequested(Uuid::new_v4())).await.is_err());
    }

    #[test]
    fn events_serialize() {
        let event = Event::TransferApproved {
            transfer_id: Uuid::new_v4(),
            approved_quantity: 25,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("TransferApproved"));
    }
}
