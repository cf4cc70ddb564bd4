//! The error taxonomy the refresh controller classifies every attempt
//! outcome into, and the fallback policy attached to each kind.

use std::fmt;
use std::net::SocketAddr;

use domain::base::iana::Rcode;

use crate::zonemaintenance::axfr;
use crate::zonemaintenance::ixfr;
use crate::zonemaintenance::requestor;
use crate::zonemaintenance::wire;

//----------- RefreshError ----------------------------------------------------

/// The outcome of one refresh attempt against one remote, classified per
/// the engine's error taxonomy.
///
/// Every variant of [`Kind`] maps to exactly one fallback policy (see
/// [`Kind::fallback`]); `RefreshError` additionally carries the context
/// needed to produce the one-line ERROR summary this crate logs.
#[derive(Debug)]
pub struct RefreshError {
    pub kind: Kind,
    pub zone: String,
    pub remote: Option<SocketAddr>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl RefreshError {
    pub fn new(zone: impl Into<String>, remote: Option<SocketAddr>, kind: Kind) -> Self {
        Self {
            kind,
            zone: zone.into(),
            remote,
            source: None,
        }
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.remote {
            Some(remote) => write!(f, "zone '{}' ({}): {}", self.zone, remote, self.kind),
            None => write!(f, "zone '{}': {}", self.zone, self.kind),
        }
    }
}

impl std::error::Error for RefreshError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

//----------- Kind -------------------------------------------------------------

/// Which of the five documented fallback policies applies to an attempt
/// outcome.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Try the next address of the same peer; if exhausted, try the next
    /// peer.
    NextAddressThenPeer,

    /// Fail this peer outright; try the next peer.
    NextPeer,

    /// Abandon the attempt; do not fall back to another peer.
    AbandonNoFallback,

    /// Abandon the attempt; retry later on the same schedule.
    AbandonRetryLater,
}

/// One classified attempt outcome.
#[derive(Debug)]
pub enum Kind {
    // --- TransportErrors: try next address, then next peer -----------------
    IoFailure,
    Timeout,
    ConnectRefused,

    // --- ProtocolErrors: fail this peer, try next ---------------------------
    Denied(Rcode),
    Malformed(String),
    TsigBad,
    TsigUnsignedRun,

    // --- ContentErrors: abandon, no peer fallback ---------------------------
    OutOfBailiwick,
    ZoneSizeExceeded,
    TransferSizeExceeded,
    ChangesetChainBroken,
    SemanticCheckFailed(String),
    ZoneMdFailed,

    // --- LocalErrors: abandon, retry later -----------------------------------
    AllocFailed,
    JournalFull,
    MasterSerialUnknown,
}

impl Kind {
    pub fn fallback(&self) -> FallbackPolicy {
        match self {
            Kind::IoFailure | Kind::Timeout | Kind::ConnectRefused => {
                FallbackPolicy::NextAddressThenPeer
            }
            Kind::Denied(_) | Kind::Malformed(_) | Kind::TsigBad | Kind::TsigUnsignedRun => {
                FallbackPolicy::NextPeer
            }
            Kind::OutOfBailiwick
            | Kind::ZoneSizeExceeded
            | Kind::TransferSizeExceeded
            | Kind::ChangesetChainBroken
            | Kind::SemanticCheckFailed(_)
            | Kind::ZoneMdFailed => FallbackPolicy::AbandonNoFallback,
            Kind::AllocFailed | Kind::JournalFull | Kind::MasterSerialUnknown => {
                FallbackPolicy::AbandonRetryLater
            }
        }
    }

    /// Whether the requestor reported the transport itself as broken. The
    /// controller uses this to decide whether an IXFR failure can still
    /// retry as AXFR on the same connection (it cannot if the transport is
    /// the thing that failed).
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Kind::IoFailure | Kind::Timeout | Kind::ConnectRefused)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::IoFailure => f.write_str("I/O failure"),
            Kind::Timeout => f.write_str("timed out"),
            Kind::ConnectRefused => f.write_str("connection refused"),
            Kind::Denied(rcode) => write!(f, "denied ({rcode})"),
            Kind::Malformed(why) => write!(f, "malformed response: {why}"),
            Kind::TsigBad => f.write_str("TSIG verification failed"),
            Kind::TsigUnsignedRun => {
                f.write_str("too many consecutive unsigned messages in TSIG exchange")
            }
            Kind::OutOfBailiwick => f.write_str("record out of bailiwick"),
            Kind::ZoneSizeExceeded => f.write_str("zone exceeds configured maximum size"),
            Kind::TransferSizeExceeded => f.write_str("transfer exceeds configured maximum size"),
            Kind::ChangesetChainBroken => f.write_str("changeset chain is broken"),
            Kind::SemanticCheckFailed(why) => write!(f, "semantic check failed: {why}"),
            Kind::ZoneMdFailed => f.write_str("ZONEMD verification failed"),
            Kind::AllocFailed => f.write_str("allocation failed"),
            Kind::JournalFull => f.write_str("journal is full"),
            Kind::MasterSerialUnknown => f.write_str("master serial unknown"),
        }
    }
}

//----------- Conversions from module-local errors ---------------------------

impl From<requestor::Error> for Kind {
    fn from(err: requestor::Error) -> Self {
        match err {
            requestor::Error::Io(_) => Kind::IoFailure,
            requestor::Error::Timeout => Kind::Timeout,
            requestor::Error::ConnectRefused => Kind::ConnectRefused,
            requestor::Error::Wire(wire) => wire.into(),
        }
    }
}

impl From<wire::Error> for Kind {
    fn from(err: wire::Error) -> Self {
        match err {
            wire::Error::Denied(rcode) => Kind::Denied(rcode),
            wire::Error::MalformedTrailing => Kind::Malformed("trailing garbage".to_string()),
            wire::Error::Parse(why) => Kind::Malformed(why),
            wire::Error::TsigBad => Kind::TsigBad,
            wire::Error::TsigUnsignedRun => Kind::TsigUnsignedRun,
        }
    }
}

impl From<axfr::Error> for Kind {
    fn from(err: axfr::Error) -> Self {
        match err {
            axfr::Error::OutOfBailiwick => Kind::OutOfBailiwick,
            axfr::Error::ZoneSizeExceeded => Kind::ZoneSizeExceeded,
            axfr::Error::TransferTruncated => Kind::Malformed("transfer truncated".to_string()),
            axfr::Error::ApexNotSoa => Kind::Malformed("first record was not the apex SOA".into()),
        }
    }
}

impl From<ixfr::Error> for Kind {
    fn from(err: ixfr::Error) -> Self {
        match err {
            ixfr::Error::Malformed(why) => Kind::Malformed(why),
            ixfr::Error::TransferSizeExceeded => Kind::TransferSizeExceeded,
        }
    }
}
