//! Common identifier types shared by every venue agent.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a fabric channel.
///
/// The inbound record prefix carries this id so the broker knows where to
/// answer. Ids are plain text and must not contain `:` or whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(String);

impl ChannelId {
    /// Creates a channel id from arbitrary text.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The private reply channel of a customer group.
    pub fn for_customer(customer: CustomerId) -> Self {
        Self(format!("customer_fifo_{}", customer.0))
    }

    /// Returns the id as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a customer group, unique within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CustomerId(pub u64);

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a table.
///
/// Ids start at 1 and are assigned in creation order, ascending capacity
/// first, so `id - 1` is the table's arena index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl TableId {
    /// Returns the arena index for this id, or `None` for id 0.
    pub fn index(&self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
