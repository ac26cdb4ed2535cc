//! In-process connection hub.
//!
//! A single actor task owns the `user_id -> outbound queue` map; everything
//! else talks to it through command channels, so the map needs no locking.
//! Outbound queues are bounded: a consumer that cannot keep up gets its
//! connection forcibly closed instead of growing the queue without limit.

use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::events::DomainEvent;

pub mod connection;

/// Capacity of each per-connection outbound queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// A live registration: the outbound queue plus the token identifying this
/// particular connection. Unregistering with a stale token (after the
/// connection was replaced or evicted) is a no-op.
pub struct Registration {
    pub connection_id: Uuid,
    pub receiver: mpsc::Receiver<String>,
}

struct Register {
    user_id: Uuid,
    reply: oneshot::Sender<Registration>,
}

struct Unregister {
    user_id: Uuid,
    /// `None` forcibly disconnects whatever connection the user has.
    connection_id: Option<Uuid>,
}

enum Command {
    /// Deliver `payload` to every listed user, minus `exclude`.
    Broadcast {
        user_ids: Vec<Uuid>,
        exclude: Option<Uuid>,
        payload: String,
    },
    /// Deliver `payload` to every connected user, minus `exclude`.
    BroadcastAll {
        exclude: Option<Uuid>,
        payload: String,
    },
    SendToUser {
        user_id: Uuid,
        payload: String,
    },
    IsConnected {
        user_id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    ConnectedUsers {
        reply: oneshot::Sender<Vec<Uuid>>,
    },
}

/// Cloneable handle to the hub actor.
#[derive(Clone)]
pub struct Hub {
    register_tx: mpsc::Sender<Register>,
    unregister_tx: mpsc::Sender<Unregister>,
    command_tx: mpsc::Sender<Command>,
}

impl Hub {
    /// Spawn the actor task and return a handle to it.
    pub fn spawn() -> Self {
        let (register_tx, register_rx) = mpsc::channel(64);
        let (unregister_tx, unregister_rx) = mpsc::channel(64);
        let (command_tx, command_rx) = mpsc::channel(1_024);

        tokio::spawn(run_actor(register_rx, unregister_rx, command_rx));

        Self {
            register_tx,
            unregister_tx,
            command_tx,
        }
    }

    /// Register a connection for `user_id`, returning the outbound queue the
    /// connection's write pump must drain. Re-registering replaces (and
    /// thereby closes) any previous queue for the same user.
    pub async fn register(&self, user_id: Uuid) -> AppResult<Registration> {
        let (reply, rx) = oneshot::channel();
        self.register_tx
            .send(Register { user_id, reply })
            .await
            .map_err(|_| AppError::Internal)?;
        rx.await.map_err(|_| AppError::Internal)
    }

    /// Idempotent: unknown users and stale connection tokens are ignored.
    pub async fn unregister(&self, user_id: Uuid, connection_id: Uuid) -> AppResult<()> {
        self.unregister_tx
            .send(Unregister {
                user_id,
                connection_id: Some(connection_id),
            })
            .await
            .map_err(|_| AppError::Internal)?;
        Ok(())
    }

    /// Forcibly drop whatever connection `user_id` currently has.
    pub async fn disconnect(&self, user_id: Uuid) -> AppResult<()> {
        self.unregister_tx
            .send(Unregister {
                user_id,
                connection_id: None,
            })
            .await
            .map_err(|_| AppError::Internal)?;
        Ok(())
    }

    pub async fn broadcast_event(
        &self,
        event: &DomainEvent,
        user_ids: Vec<Uuid>,
        exclude: Option<Uuid>,
    ) -> AppResult<()> {
        let payload = event.to_broadcast_payload()?;
        self.command_tx
            .send(Command::Broadcast {
                user_ids,
                exclude,
                payload,
            })
            .await
            .map_err(|_| AppError::Internal)?;
        Ok(())
    }

    pub async fn broadcast_event_to_all(
        &self,
        event: &DomainEvent,
        exclude: Option<Uuid>,
    ) -> AppResult<()> {
        let payload = event.to_broadcast_payload()?;
        self.command_tx
            .send(Command::BroadcastAll { exclude, payload })
            .await
            .map_err(|_| AppError::Internal)?;
        Ok(())
    }

    pub async fn send_event_to_user(&self, user_id: Uuid, event: &DomainEvent) -> AppResult<()> {
        let payload = event.to_broadcast_payload()?;
        self.command_tx
            .send(Command::SendToUser { user_id, payload })
            .await
            .map_err(|_| AppError::Internal)?;
        Ok(())
    }

    pub async fn is_connected(&self, user_id: Uuid) -> AppResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::IsConnected { user_id, reply })
            .await
            .map_err(|_| AppError::Internal)?;
        rx.await.map_err(|_| AppError::Internal)
    }

    pub async fn connected_users(&self) -> AppResult<Vec<Uuid>> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::ConnectedUsers { reply })
            .await
            .map_err(|_| AppError::Internal)?;
        rx.await.map_err(|_| AppError::Internal)
    }
}

async fn run_actor(
    mut register_rx: mpsc::Receiver<Register>,
    mut unregister_rx: mpsc::Receiver<Unregister>,
    mut command_rx: mpsc::Receiver<Command>,
) {
    let mut connections: HashMap<Uuid, Entry> = HashMap::new();

    loop {
        tokio::select! {
            cmd = register_rx.recv() => match cmd {
                Some(Register { user_id, reply }) => {
                    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
                    let connection_id = Uuid::new_v4();
                    // Replacing drops the old sender, which closes the old
                    // connection's queue and ends its write pump.
                    let entry = Entry { connection_id, tx };
                    if connections.insert(user_id, entry).is_some() {
                        debug!(%user_id, "replaced existing connection");
                    } else {
                        debug!(%user_id, "registered connection");
                    }
                    let _ = reply.send(Registration {
                        connection_id,
                        receiver: rx,
                    });
                }
                None => break,
            },
            cmd = unregister_rx.recv() => match cmd {
                Some(Unregister { user_id, connection_id }) => {
                    let matches = connections.get(&user_id).map_or(false, |entry| {
                        connection_id.map_or(true, |id| id == entry.connection_id)
                    });
                    if matches {
                        connections.remove(&user_id);
                        debug!(%user_id, "unregistered connection");
                    }
                }
                None => break,
            },
            cmd = command_rx.recv() => match cmd {
                Some(cmd) => handle_command(&mut connections, cmd),
                None => break,
            },
        }
    }
}

struct Entry {
    connection_id: Uuid,
    tx: mpsc::Sender<String>,
}

fn handle_command(connections: &mut HashMap<Uuid, Entry>, cmd: Command) {
    match cmd {
        Command::Broadcast {
            user_ids,
            exclude,
            payload,
        } => {
            for user_id in user_ids {
                if Some(user_id) == exclude {
                    continue;
                }
                deliver(connections, user_id, &payload);
            }
        }
        Command::BroadcastAll { exclude, payload } => {
            let targets: Vec<Uuid> = connections
                .keys()
                .copied()
                .filter(|id| Some(*id) != exclude)
                .collect();
            for user_id in targets {
                deliver(connections, user_id, &payload);
            }
        }
        Command::SendToUser { user_id, payload } => {
            deliver(connections, user_id, &payload);
        }
        Command::IsConnected { user_id, reply } => {
            let _ = reply.send(connections.contains_key(&user_id));
        }
        Command::ConnectedUsers { reply } => {
            let _ = reply.send(connections.keys().copied().collect());
        }
    }
}

/// `try_send` into the user's bounded queue. A full queue means the consumer
/// is not draining; the connection is removed, which drops the queue sender
/// and terminates the write pump.
fn deliver(connections: &mut HashMap<Uuid, Entry>, user_id: Uuid, payload: &str) {
    let Some(entry) = connections.get(&user_id) else {
        return;
    };
    match entry.tx.try_send(payload.to_string()) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(%user_id, "outbound queue full, disconnecting slow consumer");
            connections.remove(&user_id);
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            connections.remove(&user_id);
        }
    }
}
