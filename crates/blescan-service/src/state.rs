//! Health flags shared between the delivery workers and the status LEDs.
//!
//! Each flag is an independent boolean raised and cleared by exactly one
//! owner (the HTTP worker, the mesh worker, the relay supervisor, the
//! startup sequence). The LED driver only reads them.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One health signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthFlag {
    /// The daemon is starting up.
    Setup,
    /// The HTTP queue is deeper than its stacking threshold.
    HttpStacking,
    /// The last HTTP delivery failed.
    HttpUnreachable,
    /// The mesh queue is deeper than its stacking threshold.
    MeshStacking,
    /// The mesh radio is being opened or configured.
    MeshSetup,
    /// The radio stack crashed and is waiting to restart.
    MeshCrash,
    /// No mesh target was reachable on the last attempt.
    MeshUnreachable,
}

impl HealthFlag {
    pub const ALL: [HealthFlag; 7] = [
        HealthFlag::Setup,
        HealthFlag::HttpStacking,
        HealthFlag::HttpUnreachable,
        HealthFlag::MeshStacking,
        HealthFlag::MeshSetup,
        HealthFlag::MeshCrash,
        HealthFlag::MeshUnreachable,
    ];

    fn index(self) -> usize {
        match self {
            HealthFlag::Setup => 0,
            HealthFlag::HttpStacking => 1,
            HealthFlag::HttpUnreachable => 2,
            HealthFlag::MeshStacking => 3,
            HealthFlag::MeshSetup => 4,
            HealthFlag::MeshCrash => 5,
            HealthFlag::MeshUnreachable => 6,
        }
    }
}

impl fmt::Display for HealthFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthFlag::Setup => "setup",
            HealthFlag::HttpStacking => "http_stacking",
            HealthFlag::HttpUnreachable => "http_unreachable",
            HealthFlag::MeshStacking => "mesh_stacking",
            HealthFlag::MeshSetup => "mesh_setup",
            HealthFlag::MeshCrash => "mesh_crash",
            HealthFlag::MeshUnreachable => "mesh_unreachable",
        };
        f.write_str(name)
    }
}

/// The set of health flags.
#[derive(Default)]
pub struct HealthFlags {
    flags: [AtomicBool; 7],
}

/// Shared handle to the health flags.
pub type SharedHealth = Arc<HealthFlags>;

impl HealthFlags {
    /// All flags cleared.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedHealth {
        Arc::new(Self::new())
    }

    pub fn set(&self, flag: HealthFlag, value: bool) {
        self.flags[flag.index()].store(value, Ordering::SeqCst);
    }

    pub fn raise(&self, flag: HealthFlag) {
        self.set(flag, true);
    }

    pub fn clear(&self, flag: HealthFlag) {
        self.set(flag, false);
    }

    pub fn is_set(&self, flag: HealthFlag) -> bool {
        self.flags[flag.index()].load(Ordering::SeqCst)
    }

    /// Copy of every flag at this instant.
    pub fn snapshot(&self) -> HealthSnapshot {
        let mut values = [false; 7];
        for flag in HealthFlag::ALL {
            values[flag.index()] = self.is_set(flag);
        }
        HealthSnapshot { values }
    }
}

impl fmt::Debug for HealthFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(HealthFlag::ALL.into_iter().filter(|flag| self.is_set(*flag)))
            .finish()
    }
}

/// Point-in-time copy of the health flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthSnapshot {
    values: [bool; 7],
}

impl HealthSnapshot {
    /// Snapshot with exactly the given flags raised.
    pub fn with(flags: &[HealthFlag]) -> Self {
        let mut values = [false; 7];
        for flag in flags {
            values[flag.index()] = true;
        }
        Self { values }
    }

    pub fn is_set(&self, flag: HealthFlag) -> bool {
        self.values[flag.index()]
    }
}
