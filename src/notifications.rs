//! Registry of live admin connections. A single dispatcher task owns the
//! connection map; every registration, removal and broadcast is a message on
//! its queue, so events reach each client in publish order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsJsonResponse {
    pub action: String,
    pub message: String,
    pub user_id: i32,
}

impl WsJsonResponse {
    pub fn logout(user_id: i32) -> Self {
        Self {
            action: "logout".to_string(),
            message: "Your account has been deleted".to_string(),
            user_id,
        }
    }

    pub fn connected(user_id: i32) -> Self {
        Self {
            action: "connected".to_string(),
            message: "Connected to server".to_string(),
            user_id,
        }
    }
}

pub type ConnectionId = u64;

/// Outgoing half of a client connection; the socket writer drains the paired
/// receiver. Dropping the sender ends that writer.
pub type ClientSink = mpsc::UnboundedSender<String>;

enum Command {
    Register {
        id: ConnectionId,
        user_id: i32,
        sink: ClientSink,
    },
    Unregister(ConnectionId),
    Publish(WsJsonResponse),
    Count(oneshot::Sender<usize>),
}

struct Client {
    user_id: i32,
    sink: ClientSink,
}

#[derive(Clone)]
pub struct NotificationHub {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl NotificationHub {
    /// Spawns the dispatcher. It runs until every handle has been dropped.
    pub fn start() -> (Self, JoinHandle<()>) {
        let (commands, queue) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch(queue));
        let hub = Self {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (hub, dispatcher)
    }

    fn submit(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Notification dispatcher has stopped; command dropped");
        }
    }

    pub fn register(&self, user_id: i32, sink: ClientSink) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.submit(Command::Register { id, user_id, sink });
        id
    }

    pub fn unregister(&self, id: ConnectionId) {
        self.submit(Command::Unregister(id));
    }

    /// Queues an event for every connected client and returns immediately.
    pub fn publish(&self, event: WsJsonResponse) {
        self.submit(Command::Publish(event));
    }

    pub fn force_logout(&self, user_id: i32) {
        self.publish(WsJsonResponse::logout(user_id));
    }

    /// Number of registered connections once every earlier command has been
    /// applied.
    pub async fn connection_count(&self) -> usize {
        let (reply, answer) = oneshot::channel();
        self.submit(Command::Count(reply));
        answer.await.unwrap_or(0)
    }
}

async fn dispatch(mut queue: mpsc::UnboundedReceiver<Command>) {
    let mut clients: HashMap<ConnectionId, Client> = HashMap::new();

    while let Some(command) = queue.recv().await {
        match command {
            Command::Register { id, user_id, sink } => {
                debug!("Registered connection {id} for user {user_id}");
                clients.insert(id, Client { user_id, sink });
            }
            Command::Unregister(id) => {
                clients.remove(&id);
            }
            Command::Publish(event) => {
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Could not encode {} event: {e}", event.action);
                        continue;
                    }
                };
                clients.retain(|id, client| match client.sink.send(payload.clone()) {
                    Ok(()) => true,
                    Err(_) => {
                        info!(
                            "Dropping connection {id} of user {} after a failed write",
                            client.user_id
                        );
                        false
                    }
                });
            }
            Command::Count(reply) => {
                let _ = reply.send(clients.len());
            }
        }
    }
}
