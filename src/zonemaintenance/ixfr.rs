//! The IXFR consumer: assembles an ordered list of changesets from an
//! incremental-transfer record stream, detecting the degenerate replies
//! (up-to-date, AXFR-style IXFR, malformed) up front.

use std::fmt;

use domain::base::{Name, Rtype, Serial};
use domain::rdata::{Soa, ZoneRecordData};

use crate::zonemaintenance::serial::{self, SerialOrdering};
use crate::zonemaintenance::types::{Changeset, OwnedRecord};

//----------- Error -------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Malformed(String),
    TransferSizeExceeded,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Malformed(why) => write!(f, "malformed IXFR stream: {why}"),
            Error::TransferSizeExceeded => {
                f.write_str("IXFR transfer exceeds configured maximum size")
            }
        }
    }
}

impl std::error::Error for Error {}

//----------- Outcome -------------------------------------------------------

/// What to do with the response once the first one or two records have
/// been inspected.
#[derive(Debug)]
pub enum Kickoff {
    /// A single SOA at or after the local serial: no transfer happened.
    UpToDate,
    /// The reply is structurally an AXFR; hand the stream (including the
    /// records already peeked at) to the AXFR consumer.
    AxfrStyle,
    /// A genuine IXFR stream; proceed with [`IxfrConsumer::feed`].
    Proceed(IxfrConsumer),
}

/// Inspect the first SOA (and, if available, the record immediately after
/// it) of an IXFR response and classify it.
///
/// `local_serial` is the requestor's serial before this attempt; `peek`
/// returns the second record's (owner, rtype) only if one is immediately
/// available without blocking (callers reading in streaming fashion may
/// not have it yet, in which case `AxfrStyle`/`Malformed` detection that
/// depends on it happens lazily inside [`IxfrConsumer::feed`] instead).
pub fn kickoff(
    apex: &Name<Vec<u8>>,
    max_zone_size: u64,
    local_serial: Serial,
    first_soa: &Soa<Name<Vec<u8>>>,
    second: Option<(&Name<Vec<u8>>, Rtype, Option<&Soa<Name<Vec<u8>>>>)>,
) -> Result<Kickoff, Error> {
    if let Some((owner, rtype, second_soa)) = second {
        let is_apex_non_soa = owner == apex && rtype != Rtype::SOA;
        let is_repeated_soa = matches!(second_soa, Some(soa) if soa == first_soa);
        if is_apex_non_soa || is_repeated_soa {
            return Ok(Kickoff::AxfrStyle);
        }
    } else if serial::is_current_or_ahead(first_soa.serial(), local_serial) {
        return Ok(Kickoff::UpToDate);
    }

    Ok(Kickoff::Proceed(IxfrConsumer::new(
        apex.clone(),
        max_zone_size,
        first_soa.clone(),
    )))
}

//----------- State machine --------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    SoaDel,
    Del,
    SoaAdd,
    Add,
}

/// What happened after feeding one more record to the consumer.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    Done,
}

pub struct IxfrConsumer {
    apex: Name<Vec<u8>>,
    max_zone_size: u64,
    final_soa: Soa<Name<Vec<u8>>>,
    state: State,
    change_size: u64,
    changesets: Vec<Changeset>,
    current_from: Option<Serial>,
    current_to: Option<Serial>,
    deletions: Vec<OwnedRecord>,
    additions: Vec<OwnedRecord>,
    /// `ixfr_by_one`: stop after exactly one changeset, leaving the rest of
    /// the stream (if any) for the next refresh cycle.
    by_one: bool,
}

impl IxfrConsumer {
    fn new(apex: Name<Vec<u8>>, max_zone_size: u64, first_soa: Soa<Name<Vec<u8>>>) -> Self {
        Self {
            apex,
            max_zone_size,
            final_soa: first_soa.clone(),
            state: State::SoaDel,
            change_size: 0,
            changesets: Vec::new(),
            current_from: Some(first_soa.serial()),
            current_to: None,
            deletions: Vec::new(),
            additions: Vec::new(),
            by_one: false,
        }
    }

    pub fn with_ixfr_by_one(mut self, by_one: bool) -> Self {
        self.by_one = by_one;
        self
    }

    fn account(&mut self, rdata_len: usize) -> Result<(), Error> {
        self.change_size += rdata_len as u64;
        if self.change_size / 2 > self.max_zone_size {
            return Err(Error::TransferSizeExceeded);
        }
        Ok(())
    }

    fn is_in_bailiwick(&self, owner: &Name<Vec<u8>>) -> bool {
        owner.ends_with(&self.apex)
    }

    /// Feed the next record of the IXFR body (after the kickoff SOA has
    /// already been consumed by [`kickoff`]).
    pub fn feed(
        &mut self,
        owner: Name<Vec<u8>>,
        rtype: Rtype,
        data: ZoneRecordData<Vec<u8>, Name<Vec<u8>>>,
        rdata_len: usize,
    ) -> Result<Step, Error> {
        self.account(rdata_len)?;

        if let ZoneRecordData::Soa(soa) = &data {
            if owner == self.apex {
                return self.on_soa(soa.clone());
            }
        }

        if !self.is_in_bailiwick(&owner) {
            // Silently skipped per spec.
            return Ok(Step::Continue);
        }

        let record = OwnedRecord { owner, rtype, data };
        match self.state {
            State::SoaDel => {
                return Err(Error::Malformed(
                    "expected SOA_from to start a changeset group".to_string(),
                ));
            }
            State::Del => self.deletions.push(record),
            State::SoaAdd => {
                self.state = State::Add;
                self.additions.push(record);
            }
            State::Add => self.additions.push(record),
        }
        Ok(Step::Continue)
    }

    fn on_soa(&mut self, soa: Soa<Name<Vec<u8>>>) -> Result<Step, Error> {
        match self.state {
            State::SoaDel => {
                self.current_from = Some(soa.serial());
                self.state = State::Del;
                Ok(Step::Continue)
            }
            State::Del => {
                self.current_to = Some(soa.serial());
                self.state = State::SoaAdd;
                Ok(Step::Continue)
            }
            State::SoaAdd => {
                // A bare SOA immediately after SOA_to, with no additions:
                // treat as the additions half being empty and this SOA
                // opening the next group, unless it matches the final SOA.
                self.state = State::Add;
                self.close_group();

                if soa == self.final_soa {
                    return Ok(Step::Done);
                }
                self.current_from = Some(soa.serial());
                self.state = State::Del;
                Ok(Step::Continue)
            }
            State::Add => {
                self.close_group();

                // Matching the final SOA always wins over `ixfr_by_one`:
                // a group-completing record equal to the captured final
                // SOA ends the stream even in by-one mode.
                if soa == self.final_soa {
                    return Ok(Step::Done);
                }

                if self.by_one {
                    return Ok(Step::Done);
                }

                self.current_from = Some(soa.serial());
                self.state = State::Del;
                Ok(Step::Continue)
            }
        }
    }

    fn close_group(&mut self) {
        let soa_from = self.current_from.take().expect("SOA_from set before close");
        let soa_to = self.current_to.take().expect("SOA_to set before close");
        self.changesets.push(Changeset {
            soa_from,
            soa_to,
            deletions: std::mem::take(&mut self.deletions),
            additions: std::mem::take(&mut self.additions),
        });
    }

    /// Consume the consumer, returning the changesets assembled so far.
    /// Call only after [`Step::Done`] has been observed.
    pub fn finish(self) -> Vec<Changeset> {
        self.changesets
    }
}
