//! The AXFR consumer: assembles a complete new zone from a stream of
//! record sets delivered message by message.
//!
//! Records arrive already detached from the wire buffer they were parsed
//! from (see [`crate::zonemaintenance::requestor`]), so this module only
//! deals in owned [`domain`] types.

use std::fmt;

use domain::base::{Name, Rtype, Serial};
use domain::rdata::{Soa, ZoneRecordData};
use foldhash::HashMap;

use crate::zonemaintenance::types::{OwnedRecord, ZoneContents};

//----------- Error -------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The first record of the transfer was not the apex SOA.
    ApexNotSoa,
    /// A record's owner name falls outside the zone being transferred.
    OutOfBailiwick,
    /// Cumulative raw RDATA size exceeded the configured ceiling.
    ZoneSizeExceeded,
    /// The underlying connection closed before a terminal SOA was seen.
    TransferTruncated,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ApexNotSoa => f.write_str("first record of AXFR was not the apex SOA"),
            Error::OutOfBailiwick => f.write_str("record out of bailiwick"),
            Error::ZoneSizeExceeded => f.write_str("zone exceeds configured maximum size"),
            Error::TransferTruncated => {
                f.write_str("connection closed before a terminal SOA was seen")
            }
        }
    }
}

impl std::error::Error for Error {}

//----------- Outcome -------------------------------------------------------

/// What happened after feeding one more record to the consumer.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    /// More records are expected.
    Continue,
    /// The terminal SOA was seen; the transfer is complete.
    Done,
}

//----------- AxfrConsumer ---------------------------------------------------

/// Builds a new, empty-tree-to-full-tree zone from an AXFR (or
/// AXFR-style-IXFR) record stream.
///
/// One instance is used for exactly one transfer: [`Self::feed`] is called
/// once per record in wire order, and [`Self::finish`] is used to detect a
/// connection that closed mid-transfer.
pub struct AxfrConsumer {
    apex: Name<Vec<u8>>,
    max_zone_size: u64,
    first_soa: Option<Soa<Name<Vec<u8>>>>,
    cumulative_size: u64,
    tree: HashMap<(Name<Vec<u8>>, Rtype), Vec<OwnedRecord>>,
    done: bool,
}

impl AxfrConsumer {
    pub fn new(apex: Name<Vec<u8>>, max_zone_size: u64) -> Self {
        Self {
            apex,
            max_zone_size,
            first_soa: None,
            cumulative_size: 0,
            tree: HashMap::default(),
            done: false,
        }
    }

    fn is_in_bailiwick(&self, owner: &Name<Vec<u8>>) -> bool {
        owner.ends_with(&self.apex)
    }

    /// Feed the next record from the wire, in order. `rdata_len` is the
    /// raw RDATA length as it appeared on the wire, used for the zone-size
    /// ceiling (the owner name and record header are not counted).
    pub fn feed(
        &mut self,
        owner: Name<Vec<u8>>,
        rtype: Rtype,
        data: ZoneRecordData<Vec<u8>, Name<Vec<u8>>>,
        rdata_len: usize,
    ) -> Result<Step, Error> {
        if self.first_soa.is_none() {
            let ZoneRecordData::Soa(soa) = &data else {
                return Err(Error::ApexNotSoa);
            };
            if owner != self.apex {
                return Err(Error::ApexNotSoa);
            }
            self.first_soa = Some(soa.clone());
            self.cumulative_size += rdata_len as u64;
            self.check_size()?;
            return Ok(Step::Continue);
        }

        if let ZoneRecordData::Soa(soa) = &data {
            if owner == self.apex && Some(soa) == self.first_soa.as_ref() {
                self.done = true;
                return Ok(Step::Done);
            }
        }

        if !self.is_in_bailiwick(&owner) {
            return Err(Error::OutOfBailiwick);
        }

        self.cumulative_size += rdata_len as u64;
        self.check_size()?;

        self.tree
            .entry((owner.clone(), rtype))
            .or_default()
            .push(OwnedRecord { owner, rtype, data });

        Ok(Step::Continue)
    }

    fn check_size(&self) -> Result<(), Error> {
        if self.cumulative_size > self.max_zone_size {
            return Err(Error::ZoneSizeExceeded);
        }
        Ok(())
    }

    /// Call when the underlying connection has closed with no more
    /// records to deliver. Errors unless a terminal SOA was already seen.
    pub fn finish(self) -> Result<ZoneContents, Error> {
        if !self.done {
            return Err(Error::TransferTruncated);
        }
        Ok(ZoneContents {
            apex: self.apex,
            serial: self
                .first_soa
                .as_ref()
                .map(|s| s.serial())
                .unwrap_or_else(Serial::now),
            records: self.tree,
        })
    }

    pub fn bytes_so_far(&self) -> u64 {
        self.cumulative_size
    }
}
