//! Error Types - Collective and Bootstrap Failures
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised by collectives, group construction and launch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DistributedError {
    /// The rendezvous port is taken by another process or launch.
    #[error("Address already in use: {host}:{port}")]
    AddressInUse {
        /// Rendezvous host.
        host: String,
        /// Rendezvous port.
        port: u16,
    },

    /// This rank issued a collective on a group it does not belong to.
    #[error("Rank {rank} is not a member of group {ranks:?}")]
    NotInGroup {
        /// The calling rank.
        rank: usize,
        /// The group members.
        ranks: Vec<usize>,
    },

    /// Participants issued different collectives under the same sequence number.
    #[error("Collective mismatch in group {ranks:?}: {message}")]
    CollectiveMismatch {
        /// The group members.
        ranks: Vec<usize>,
        /// What disagreed.
        message: String,
    },

    /// A buffer had the wrong length for the collective.
    #[error("Buffer length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// The expected length.
        expected: usize,
        /// The actual length.
        actual: usize,
    },

    /// Not every participant arrived before the timeout.
    #[error("Collective timed out after {secs}s in group {ranks:?}")]
    Timeout {
        /// The group members.
        ranks: Vec<usize>,
        /// Seconds waited.
        secs: u64,
    },

    /// A rank index outside the world.
    #[error("Invalid rank {rank} for world size {world_size}")]
    InvalidRank {
        /// The offending rank.
        rank: usize,
        /// The world size.
        world_size: usize,
    },

    /// Incompatible parallel layout.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A rank thread panicked during a launch.
    #[error("Rank {rank} panicked")]
    RankPanicked {
        /// The rank whose thread panicked.
        rank: usize,
    },

    /// Socket-level failure during bootstrap.
    #[error("I/O error during bootstrap: {0}")]
    Io(String),
}

/// A specialized Result type for distributed operations.
pub type Result<T> = core::result::Result<T, DistributedError>;

impl DistributedError {
    /// Maps a bind error, recognising a taken port.
    #[must_use]
    pub fn from_bind(err: &std::io::Error, host: &str, port: u16) -> Self {
        if err.kind() == std::io::ErrorKind::AddrInUse {
            Self::AddressInUse {
                host: host.to_string(),
                port,
            }
        } else {
            Self::Io(err.to_string())
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
