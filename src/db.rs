//! Inventory database interface.
//!
//! The relational adapter is an external collaborator; this module fixes
//! the one query surface the server depends on. Lookups are blocking calls
//! made from the peer's task, so a slow backend stalls that peer until the
//! query returns.

use serde::Deserialize;
use std::{collections::HashMap, net::Ipv4Addr};
use thiserror::Error;

/// Longest workstation name kept from the backing store.
pub const COMPUTER_NAME_MAXLEN: usize = 100;

/// Inventory row for a managed workstation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Computer {
    pub id: u32,
    pub name: String,
    pub center: u32,
    pub room: u32,
    #[serde(default)]
    pub procedure: u32,
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("no computer registered for {0}")]
    NotFound(Ipv4Addr),

    #[error("query failed: {0}")]
    Query(String),
}

/// Lookup surface of the backing inventory store.
pub trait Database: Send + Sync + 'static {
    /// Resolves the workstation registered under `ip`.
    fn computer_by_ip(&self, ip: Ipv4Addr) -> Result<Computer, DbError>;
}

/// Inventory held in process memory, seeded from the configuration file.
#[derive(Debug, Default)]
pub struct MemoryDb {
    computers: HashMap<Ipv4Addr, Computer>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `computer` under `ip`, truncating over-long names the way
    /// the backing store would.
    pub fn insert(&mut self, ip: Ipv4Addr, mut computer: Computer) {
        computer.name.truncate(COMPUTER_NAME_MAXLEN);
        self.computers.insert(ip, computer);
    }
}

impl Database for MemoryDb {
    fn computer_by_ip(&self, ip: Ipv4Addr) -> Result<Computer, DbError> {
        self.computers
            .get(&ip)
            .cloned()
            .ok_or(DbError::NotFound(ip))
    }
}

#[cfg(test)]
mod inventory {
    use super::*;

    fn computer(name: &str) -> Computer {
        Computer {
            id: 12,
            name: name.to_owned(),
            center: 1,
            room: 3,
            procedure: 0,
        }
    }

    #[test]
    fn lookup_by_ip() {
        let ip = Ipv4Addr::new(192, 168, 2, 10);
        let mut db = MemoryDb::new();
        db.insert(ip, computer("lab-a-01"));

        assert_eq!(db.computer_by_ip(ip).unwrap().name, "lab-a-01");
        assert!(matches!(
            db.computer_by_ip(Ipv4Addr::new(192, 168, 2, 11)),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn names_are_truncated() {
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        let mut db = MemoryDb::new();
        db.insert(ip, computer(&"n".repeat(300)));

        assert_eq!(
            db.computer_by_ip(ip).unwrap().name.len(),
            COMPUTER_NAME_MAXLEN
        );
    }
}
