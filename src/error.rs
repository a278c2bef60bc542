use std::net::Ipv4Addr;

/// Convenience return type for fallible core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that might go wrong decoding packets, running a neighbor
/// session, updating the topology table, or standing the daemon up.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --- WireError: drop the packet, log, keep going ---
    #[error("packet too short: need {need} bytes, have {have}")]
    ErrShort { need: usize, have: usize },
    #[error("header checksum mismatch: got {got:#06x}, computed {computed:#06x}")]
    ErrChecksum { got: u16, computed: u16 },
    #[error("authentication failed for packet from {0}")]
    ErrAuth(Ipv4Addr),
    #[error("corrupt packet: {0}")]
    ErrCorrupt(&'static str),
    #[error("unknown TLV type {0:#06x}")]
    ErrUnknownTlv(u16),

    // --- SessionError: tear the neighbor down ---
    #[error("neighbor {0}: K-value mismatch with local instance")]
    ErrKMismatch(Ipv4Addr),
    #[error("neighbor {0}: hold timer expired")]
    ErrHoldExpired(Ipv4Addr),
    #[error("neighbor {0}: retransmission limit ({1}) exhausted")]
    ErrRetransExhausted(Ipv4Addr, u8),
    #[error("neighbor {0}: received peer termination TLV")]
    ErrPeerTerm(Ipv4Addr),

    // --- TopologyError: log and ignore ---
    #[error("reply references prefix not in topology table")]
    ErrUnknownPrefix,
    #[error("no feasible successor available for active prefix")]
    ErrNoFeasibleSuccessor,

    // --- FatalError: abort startup ---
    #[error("failed to create raw socket: {0}")]
    ErrSocket(#[source] std::io::Error),
    #[error("failed to join multicast group: {0}")]
    ErrMulticastJoin(#[source] std::io::Error),
    #[error("no send key available from keychain")]
    ErrKeychainMissing,
    #[error("invalid configuration: {0}")]
    ErrConfig(&'static str),
    #[error("invalid configuration: {0}")]
    ErrConfigDynamic(String),

    #[error("failed to build value: {0}")]
    ErrBuild(#[from] derive_builder::UninitializedFieldError),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::ErrConfigDynamic(msg)
    }
}
