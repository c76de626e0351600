//! Buffers: stock points of one item at one location.

use serde::{Deserialize, Serialize};

use crate::dates::TimeSpan;
use crate::{CalendarId, ItemId, LocationId, OperationId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BufferKind {
    /// Regular buffer: shortages propagate to the producing operation.
    Default,
    /// Never constrains; any ask is answered in full and nothing
    /// propagates upstream.
    Infinite,
    /// Replenished by purchasing rather than an operation. The size and
    /// interval bounds are hard constraints; the inventory levels are
    /// soft.
    Procure {
        leadtime: TimeSpan,
        size_minimum: f64,
        size_maximum: f64,
        size_multiple: f64,
        min_interval: TimeSpan,
        max_interval: TimeSpan,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Buffer {
    pub name: String,
    pub item: Option<ItemId>,
    pub location: Option<LocationId>,
    /// Stock at the start of the horizon.
    pub onhand: f64,
    pub kind: BufferKind,
    /// Wish level for safety stock; never a hard floor.
    pub minimum_calendar: Option<CalendarId>,
    pub minimum: f64,
    /// The operation that replenishes this buffer.
    pub producing: Option<OperationId>,
}

impl Buffer {
    pub fn new(name: impl Into<String>) -> Self {
        Buffer {
            name: name.into(),
            item: None,
            location: None,
            onhand: 0.0,
            kind: BufferKind::Default,
            minimum_calendar: None,
            minimum: 0.0,
            producing: None,
        }
    }

    pub fn infinite(name: impl Into<String>) -> Self {
        let mut b = Buffer::new(name);
        b.kind = BufferKind::Infinite;
        b
    }

    pub fn with_onhand(mut self, onhand: f64) -> Self {
        self.onhand = onhand;
        self
    }

    pub fn with_item(mut self, item: ItemId) -> Self {
        self.item = Some(item);
        self
    }

    pub fn with_producing(mut self, operation: OperationId) -> Self {
        self.producing = Some(operation);
        self
    }

    pub fn with_minimum(mut self, minimum: f64) -> Self {
        self.minimum = minimum;
        self
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self.kind, BufferKind::Infinite)
    }
}
