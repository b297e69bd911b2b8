use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use kibble_db::Database;

/// Where the store connection stands. Published by the supervisor, read by
/// everything that needs the store.
#[derive(Clone)]
pub enum ConnectionState {
    /// Attempt `attempt` (1-based) is in flight or about to be.
    Connecting { attempt: u32 },
    Ready(Arc<Database>),
    /// The retry budget ran out. Terminal.
    Exhausted,
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting { attempt } => f.debug_struct("Connecting").field("attempt", attempt).finish(),
            Self::Ready(_) => f.write_str("Ready"),
            Self::Exhausted => f.write_str("Exhausted"),
        }
    }
}

/// Create the state channel. The writer goes to the supervisor, handles to
/// everyone else.
pub fn connection_state() -> (StateWriter, StoreHandle) {
    let (tx, rx) = watch::channel(ConnectionState::Connecting { attempt: 1 });
    (StateWriter { tx }, StoreHandle { rx })
}

/// The single write side of the connection state. Deliberately not `Clone`.
pub struct StateWriter {
    tx: watch::Sender<ConnectionState>,
}

impl StateWriter {
    pub fn set(&self, state: ConnectionState) {
        // send_replace never fails, even with no receivers left.
        self.tx.send_replace(state);
    }

    pub fn handle(&self) -> StoreHandle {
        StoreHandle {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only view of the connection state.
#[derive(Clone)]
pub struct StoreHandle {
    rx: watch::Receiver<ConnectionState>,
}

impl StoreHandle {
    pub fn state(&self) -> ConnectionState {
        self.rx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.rx.borrow(), ConnectionState::Ready(_))
    }

    /// The store, if connected.
    pub fn store(&self) -> Option<Arc<Database>> {
        match &*self.rx.borrow() {
            ConnectionState::Ready(db) => Some(db.clone()),
            _ => None,
        }
    }

    /// Wait until the store is connected. `None` if it never will be.
    pub async fn wait_ready(&self) -> Option<Arc<Database>> {
        let mut rx = self.rx.clone();
        let state = rx
            .wait_for(|s| matches!(s, ConnectionState::Ready(_) | ConnectionState::Exhausted))
            .await
            .ok()?
            .clone();

        match state {
            ConnectionState::Ready(db) => Some(db),
            _ => None,
        }
    }
}
