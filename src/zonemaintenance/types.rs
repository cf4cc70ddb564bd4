use std::net::SocketAddr;
use std::sync::Arc;

use domain::base::{Name, Rtype, Serial};
use domain::rdata::ZoneRecordData;
use foldhash::HashMap;
use serde::{Deserialize, Serialize};

use core::time::Duration;

use crate::zonemaintenance::config::TransportStrategy;

//------------ Data model (section 3) ----------------------------------------

/// One fully-qualified owned resource record, as assembled by the AXFR/IXFR
/// consumers. Unlike a wire-parsed record, this owns its name and data so
/// it can outlive the message it was read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnedRecord {
    pub owner: Name<Vec<u8>>,
    pub rtype: Rtype,
    pub data: ZoneRecordData<Vec<u8>, Name<Vec<u8>>>,
}

/// A fully materialized zone tree, keyed by owner and record type, as
/// produced by the AXFR consumer or by applying a chain of changesets atop
/// a previous [`ZoneContents`].
#[derive(Clone, Debug)]
pub struct ZoneContents {
    pub apex: Name<Vec<u8>>,
    pub serial: Serial,
    pub records: HashMap<(Name<Vec<u8>>, Rtype), Vec<OwnedRecord>>,
}

impl ZoneContents {
    /// An empty, apex-only placeholder used before the first successful
    /// transfer ("bootstrap").
    pub fn empty(apex: Name<Vec<u8>>) -> Self {
        Self {
            apex,
            serial: Serial::from(0),
            records: HashMap::default(),
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.values().map(|v| v.len()).sum()
    }
}

/// Persistent per-zone schedule state (survives process restarts via the
/// [`crate::zonemaintenance::store::TimerStore`] collaborator).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneTimers {
    pub next_refresh: Option<u32>,
    pub next_expire: Option<u32>,
    /// The SOA `retry` interval (post-clamp) from the last successful
    /// refresh, reused to pace retries after a subsequent failure without
    /// having to fall back to bootstrap backoff for a zone we already hold.
    pub retry_secs: Option<u32>,
    pub last_refresh_ok: bool,
    pub master_pin_hit: Option<u32>,
    pub last_master: Option<SocketAddr>,
    pub bootstrap_count: u8,
}

impl Default for ZoneTimers {
    fn default() -> Self {
        Self {
            next_refresh: None,
            next_expire: None,
            retry_secs: None,
            last_refresh_ok: false,
            master_pin_hit: None,
            last_master: None,
            bootstrap_count: 0,
        }
    }
}

/// One configured peer a zone may refresh from.
#[derive(Clone, Debug)]
pub struct Remote {
    pub addresses: Vec<SocketAddr>,
    pub transport: TransportStrategy,
    pub tsig_key_name: Option<String>,
    pub request_expire: bool,
    pub notify_blocked: bool,
    pub pin_tolerance: Duration,
}

/// A single serial-to-serial delta, as produced by the IXFR consumer or by
/// `ixfr_from_axfr` differencing.
#[derive(Clone, Debug)]
pub struct Changeset {
    pub soa_from: Serial,
    pub soa_to: Serial,
    pub deletions: Vec<OwnedRecord>,
    pub additions: Vec<OwnedRecord>,
}

impl Changeset {
    pub fn raw_size(&self) -> usize {
        self.deletions.len() + self.additions.len()
    }
}

/// A proposed mutation of a zone's published contents, staged until the
/// controller commits it atomically.
#[derive(Clone, Debug)]
pub enum ZoneUpdate {
    /// Replace the entire tree (AXFR, or `ixfr_from_axfr` without a usable
    /// prior tree to diff against).
    Full(Arc<ZoneContents>),
    /// Apply an ordered list of changesets atop the currently published
    /// contents.
    Incremental(Vec<Changeset>),
}

/// Bookkeeping for one attempt against one peer; discarded once the
/// controller has turned it into a [`crate::zonemaintenance::error::RefreshError`]
/// or a committed update.
#[derive(Debug, Default)]
pub struct RefreshAttempt {
    pub bytes: u64,
    pub packets: u64,
    pub fallback_axfr: bool,
    pub fallback_peer: bool,
}
