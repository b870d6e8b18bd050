//! Raft-style leader election consulting a shared witness (§4.10, §3's
//! "Elector/witness state").

use velox_core::ids::Version;
use serde::{Deserialize, Serialize};

/// Per-database tuple used to compare candidates for primary leadership
/// (§3: "Elector/witness state: per-database tuple (id, term, version)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectorState {
    /// Database identity the term/version pair belongs to.
    pub database_id: u64,
    /// Local term, incremented on every leadership transition (§4.6).
    pub term: u64,
    /// Highest commit version this node has durably recorded.
    pub version: Version,
}

impl ElectorState {
    /// Whether `self` dominates `other`: has a term at least as high, and
    /// within equal terms a version at least as high (§4.10: "A node
    /// becomes primary only if its (term, version) is not dominated by its
    /// peer's").
    pub fn dominates(&self, other: &ElectorState) -> bool {
        (self.term, self.version) >= (other.term, other.version)
    }
}

/// Outcome of a witness's leadership grant request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WitnessDecision {
    /// The witness grants leadership for the requested term.
    Granted,
    /// The witness denies the request (stale term, lost quorum, or the
    /// peer already holds a lease for this term).
    Denied,
}

/// Abstraction over the witness coordinator: a shared-folder file or a
/// standalone service (§4.10, §6). Kept as a trait because the concrete
/// transport is outside this crate's scope (§1 excludes a wire-protocol
/// rewrite).
pub trait Witness: Send + Sync {
    /// Ask the witness to grant `candidate` leadership for `requested_term`,
    /// given the peer's last-known state.
    fn request_leadership(
        &self,
        candidate: &ElectorState,
        requested_term: u64,
        peer: &ElectorState,
    ) -> WitnessDecision;
}

/// Drives one database's leadership state machine against a [`Witness`].
pub struct Elector<W: Witness> {
    witness: W,
    local: ElectorState,
}

impl<W: Witness> Elector<W> {
    /// Build an elector starting from `local`'s current (term, version).
    pub fn new(witness: W, local: ElectorState) -> Self {
        Self { witness, local }
    }

    /// The locally known elector state.
    pub fn local_state(&self) -> ElectorState {
        self.local
    }

    /// Attempt to become primary against `peer`'s last-known state.
    ///
    /// Returns `true` and advances the local term if the local state is not
    /// dominated by the peer's and the witness grants a new term; otherwise
    /// returns `false` and leaves the local term unchanged.
    pub fn try_become_primary(&mut self, peer: &ElectorState) -> bool {
        if peer.dominates(&self.local) && peer != &self.local {
            return false;
        }
        let requested_term = self.local.term + 1;
        match self.witness.request_leadership(&self.local, requested_term, peer) {
            WitnessDecision::Granted => {
                self.local.term = requested_term;
                true
            }
            WitnessDecision::Denied => false,
        }
    }

    /// Record that a new commit version has been durably recorded, without
    /// attempting an election.
    pub fn advance_version(&mut self, version: Version) {
        if version > self.local.version {
            self.local.version = version;
        }
    }
}
