//! Table inventory and first-fit seat allocation.
//!
//! Tables live in a fixed arena indexed by `TableId - 1`. Ids are assigned
//! in ascending capacity order, then creation order within a capacity, so
//! walking the arena front to back is exactly the allocation scan order.
//!
//! # Allocation
//!
//! ```text
//! for capacity in ascending capacities where capacity >= group_size:
//!     for table in tables of that capacity, creation order:
//!         if table.tag in {unset, group_size} and table.free >= group_size:
//!             seat here
//! reject
//! ```
//!
//! No backtracking: a later, tighter table never wins over an earlier
//! compatible one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use venue_env::TableId;

/// A single table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    pub capacity: u32,
    pub used_seats: u32,
    /// Size of the groups sharing this table; unset iff the table is empty
    pub occupant_group_size: Option<u32>,
}

impl Table {
    fn new(id: TableId, capacity: u32) -> Self {
        Self {
            id,
            capacity,
            used_seats: 0,
            occupant_group_size: None,
        }
    }

    /// Seats still free.
    pub fn free_seats(&self) -> u32 {
        self.capacity.saturating_sub(self.used_seats)
    }

    /// True if a group of `group_size` may sit here right now.
    pub fn accepts(&self, group_size: u32) -> bool {
        self.occupant_group_size.map_or(true, |tag| tag == group_size)
            && self.free_seats() >= group_size
    }

    /// True if the table satisfies its own invariants.
    pub fn is_consistent(&self) -> bool {
        self.used_seats <= self.capacity
            && (self.occupant_group_size.is_none() == (self.used_seats == 0))
    }
}

/// Result of a successful [`TableInventory::seat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatAssignment {
    pub table_id: TableId,
    pub capacity: u32,
    pub seats_before: u32,
    pub seats_after: u32,
}

/// The broker's table arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInventory {
    tables: Vec<Table>,
}

impl TableInventory {
    /// Builds a fresh inventory from a `capacity -> count` mapping.
    pub fn from_counts(counts: &BTreeMap<u32, u32>) -> Self {
        let mut tables = Vec::with_capacity(counts.values().sum::<u32>() as usize);
        let mut next_id = 1;
        // BTreeMap iterates capacities in ascending order
        for (&capacity, &count) in counts {
            for _ in 0..count {
                tables.push(Table::new(TableId(next_id), capacity));
                next_id += 1;
            }
        }
        Self { tables }
    }

    /// Seats a group using first-fit; `None` if no table qualifies.
    pub fn seat(&mut self, group_size: u32) -> Option<SeatAssignment> {
        if group_size == 0 {
            return None;
        }

        let table = self
            .tables
            .iter_mut()
            .filter(|t| t.capacity >= group_size)
            .find(|t| t.accepts(group_size))?;

        let seats_before = table.used_seats;
        table.used_seats += group_size;
        if table.occupant_group_size.is_none() {
            table.occupant_group_size = Some(group_size);
        }

        Some(SeatAssignment {
            table_id: table.id,
            capacity: table.capacity,
            seats_before,
            seats_after: table.used_seats,
        })
    }

    /// Frees `group_size` seats at `table_id`, clamping at zero and clearing
    /// the tag once the table is empty.
    ///
    /// Returns the updated table, or `None` for an unknown id.
    pub fn release(&mut self, table_id: TableId, group_size: u32) -> Option<&Table> {
        let table = self.get_mut(table_id)?;
        table.used_seats = table.used_seats.saturating_sub(group_size);
        if table.used_seats == 0 {
            table.occupant_group_size = None;
        }
        Some(table)
    }

    /// Looks up a table by id.
    pub fn get(&self, table_id: TableId) -> Option<&Table> {
        self.tables.get(table_id.index()?)
    }

    fn get_mut(&mut self, table_id: TableId) -> Option<&mut Table> {
        self.tables.get_mut(table_id.index()?)
    }

    /// All tables in allocation order.
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Total seats currently taken.
    pub fn used_seats(&self) -> u32 {
        self.tables.iter().map(|t| t.used_seats).sum()
    }

    /// True if no table has anyone seated.
    pub fn is_vacant(&self) -> bool {
        self.tables
            .iter()
            .all(|t| t.used_seats == 0 && t.occupant_group_size.is_none())
    }

    /// Returns the first table that violates its invariants, if any.
    pub fn find_inconsistent(&self) -> Option<&Table> {
        self.tables.iter().find(|t| !t.is_consistent())
    }
}
