//! The collaborator traits an "engine context" bundles for the controller
//! timers, the KASP master-serial record, the journal, the
//! DNSSEC signer, and the metrics sink. Real hosts back these with LMDB
//! and a signing daemon; tests back them with the in-memory doubles below.

use std::fmt;
use std::sync::Arc;

use domain::base::{Name, Serial};
use domain::tsig::Key;

use crate::zonemaintenance::types::{Changeset, ZoneContents, ZoneTimers};

//----------- TsigKeyStore -----------------------------------------------------

/// Resolves a [`crate::zonemaintenance::types::Remote`]'s configured
/// `tsig_key_name` to the key material the wire layer signs/verifies with.
///
/// Parsing key files and secrets is the configuration collaborator's job;
/// this seam only looks a name up in whatever it was already given.
pub trait TsigKeyStore: Send + Sync {
    fn key(&self, name: &str) -> Option<Arc<Key>>;
}

//----------- TimerStore -------------------------------------------------------

pub trait TimerStore: Send + Sync {
    fn load(&self, zone: &Name<Vec<u8>>) -> Option<ZoneTimers>;
    fn store(&self, zone: &Name<Vec<u8>>, timers: ZoneTimers);
}

//----------- MasterSerialStore -------------------------------------------------

pub trait MasterSerialStore: Send + Sync {
    fn load(&self, zone: &Name<Vec<u8>>) -> Option<Serial>;
    fn store(&self, zone: &Name<Vec<u8>>, serial: Serial);
}

//----------- JournalStore -----------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JournalError {
    /// The configured `journal-max-usage`/`journal-max-depth` ceiling was
    /// reached and the oldest entries could not be rolled over (e.g. a
    /// reader still pinning them).
    Full,
}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalError::Full => f.write_str("journal is full"),
        }
    }
}

impl std::error::Error for JournalError {}

pub trait JournalStore: Send + Sync {
    /// Append one changeset, rolling over the oldest entries first if the
    /// configured usage or depth ceiling would otherwise be exceeded.
    fn append(&self, zone: &Name<Vec<u8>>, changeset: Changeset) -> Result<(), JournalError>;

    /// Changesets covering `from..=to`, in chain order, if the full chain
    /// is still present.
    fn range(&self, zone: &Name<Vec<u8>>, soa_from: Serial, soa_to: Serial) -> Option<Vec<Changeset>>;
}

//----------- ZoneSigner -------------------------------------------------------

#[derive(Debug)]
pub struct SigningError(pub String);

impl fmt::Display for SigningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "signing failed: {}", self.0)
    }
}

impl std::error::Error for SigningError {}

/// The DNSSEC signer seam. The refresh engine calls through this trait when
/// a zone is configured with `dnssec-signing: true`; it never implements
/// signing itself.
pub trait ZoneSigner: Send + Sync {
    fn sign(&self, zone: &Name<Vec<u8>>, contents: &ZoneContents) -> Result<ZoneContents, SigningError>;
}

//----------- MetricsSink -------------------------------------------------------

/// What happened to one refresh attempt, for the metrics collaborator to
/// tally. Kept separate from [`crate::zonemaintenance::error::Kind`] so the
/// metrics seam does not need to depend on the full error taxonomy.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    UpToDate,
    AxfrApplied,
    IxfrApplied,
    Fallback,
    Failed,
}

pub trait MetricsSink: Send + Sync {
    fn record_attempt(&self, zone: &Name<Vec<u8>>, outcome: AttemptOutcome);
    fn record_bytes(&self, zone: &Name<Vec<u8>>, bytes: u64);
    fn record_commit(&self, zone: &Name<Vec<u8>>, serial: Serial);
}

//----------- In-memory test doubles -------------------------------------------
