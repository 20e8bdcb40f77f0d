//! HTTP protocol definitions (JSON bodies)

use serde::{Deserialize, Serialize};

pub const MSG_COLLECTED: &str = "Snapshot collected";
pub const MSG_SAVED: &str = "Processes saved";
pub const MSG_CLEARED: &str = "All processes deleted";
pub const MSG_LOCKED: &str = "Database is locked, try again";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

impl MessageBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectBody {
    pub message: String,
    pub count: usize,
    pub hostname: String,
}
