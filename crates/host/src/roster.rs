//! Identity reservation set for the host lobby.
//!
//! The roster is the authoritative record of which squad identities are
//! held and by which link. Check-and-mark runs to completion inside the
//! host's single message loop, so two concurrent requests for the same
//! name can never interleave.

use vaultrun_engine::squad_in_catalog;
use vaultrun_wire::LinkId;

/// One granted reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub name: String,
    pub link: LinkId,
}

/// Why a reservation request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Another link already holds this identity.
    Taken,
    /// The name is not in the squad catalog.
    UnknownIdentity,
}

/// Reservation set, ordered by reservation time.
#[derive(Debug, Default)]
pub struct Roster {
    reservations: Vec<Reservation>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically check and mark `name` as reserved by `link`.
    ///
    /// A reservation is final for the session: there is no release, and a
    /// denied requester may only retry with a different identity.
    pub fn try_reserve(&mut self, name: &str, link: LinkId) -> Result<(), DenyReason> {
        if !squad_in_catalog(name) {
            return Err(DenyReason::UnknownIdentity);
        }
        if self.is_reserved(name) {
            return Err(DenyReason::Taken);
        }

        self.reservations.push(Reservation { name: name.to_string(), link });
        Ok(())
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.reservations.iter().any(|r| r.name == name)
    }

    /// Link holding `name`, if reserved.
    pub fn holder(&self, name: &str) -> Option<LinkId> {
        self.reservations.iter().find(|r| r.name == name).map(|r| r.link)
    }

    /// Reserved names in reservation order; the payload of every
    /// `SyncIdentities` snapshot.
    pub fn names(&self) -> Vec<String> {
        self.reservations.iter().map(|r| r.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }
}
