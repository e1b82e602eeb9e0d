use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::protocol::ServerData;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerState {
    pub pm_type: u8,
    pub origin: Vec3,
    pub velocity: Vec3,
    pub view_angles: Vec3,
    pub fov: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityState {
    pub number: u16,
    pub origin: Vec3,
    pub angles: Vec3,
    pub model_index: u8,
    pub frame: u16,
}

/// World state as of server frame `time`.
///
/// Only the frame header is decoded at this layer, so `player_state` keeps its
/// default value and `entities` is empty.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub time: i32,
    pub delta_frame: i32,
    pub player_state: PlayerState,
    pub entities: Vec<EntityState>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    Connected,
    Disconnected { reason: String },
    Error { message: String },
    Snapshot(Snapshot),
    /// Raw tap fired for every opcode before it is decoded. `body` runs to the
    /// end of the payload and shares its buffer.
    ServerCommand { opcode: u8, body: Bytes },
    ConfigString { index: u16, value: String },
    Print { level: u8, text: String },
    CenterPrint(String),
    StuffText(String),
    ServerData(ServerData),
}

impl NetworkEvent {
    /// Everything except the raw [`NetworkEvent::ServerCommand`] tap.
    pub fn is_content(&self) -> bool {
        !matches!(self, Self::ServerCommand { .. })
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<NetworkEvent>;

/// Fan-out of [`NetworkEvent`]s to any number of subscribers.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<NetworkEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn emit(&self, event: NetworkEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
