//! The top-level refresh state machine: decides what a SOA
//! response means, finalizes AXFR/IXFR transfers into a commit, and fans
//! out the post-commit NOTIFY set.
//!
//! This module is deliberately I/O-free: it is handed already-parsed SOA
//! records and already-assembled [`ZoneContents`]/[`Changeset`]s, and
//! returns a decision or a commit. Driving sockets through the requestor
//! and feeding the AXFR/IXFR consumers is the scheduler's job.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use domain::base::{Name, Serial};
use domain::rdata::Soa;

use crate::zonemaintenance::config::ZoneConfig;
use crate::zonemaintenance::error::{Kind, RefreshError};
use crate::zonemaintenance::serial::{compare, next_serial, SerialOrdering};
use crate::zonemaintenance::store::{
    AttemptOutcome, JournalStore, MasterSerialStore, MetricsSink, TimerStore, TsigKeyStore,
    ZoneSigner,
};
use crate::zonemaintenance::timers::{edns_expire_is_usable, plan_from_soa, ZoneDeadlines};
use crate::zonemaintenance::types::{Changeset, Remote, ZoneContents, ZoneTimers};

pub(crate) fn now_unix() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}

//----------- SoaOutcome --------------------------------------------------------

/// What a SOA query response means for this attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum SoaOutcome {
    /// The remote is pinned and not yet past its tolerance window; no
    /// transfer is attempted this cycle.
    PinnedWait,
    /// The pin tolerance has elapsed; accept this peer and force AXFR.
    PinExpiredForceAxfr,
    /// The remote has newer data; proceed to transfer (IXFR or AXFR).
    Transfer,
    /// We are at least as current as the remote; nothing to do.
    UpToDate,
}

/// Evaluate a SOA response against the locally held serial, applying the
/// pinned-master guard.
#[allow(clippy::too_many_arguments)]
pub fn evaluate_soa(
    local_serial: Option<Serial>,
    remote_serial: Serial,
    remote: SocketAddr,
    pin_tolerance: Duration,
    last_master: Option<SocketAddr>,
    master_pin_hit: Option<u32>,
) -> (SoaOutcome, Option<u32>) {
    let Some(local_serial) = local_serial else {
        return (SoaOutcome::Transfer, master_pin_hit);
    };

    let ahead_or_equal = matches!(
        compare(local_serial, remote_serial),
        SerialOrdering::Equal | SerialOrdering::Greater
    );
    if ahead_or_equal {
        return (SoaOutcome::UpToDate, master_pin_hit);
    }

    if pin_tolerance.is_zero() {
        return (SoaOutcome::Transfer, master_pin_hit);
    }

    let is_pinned_peer = last_master == Some(remote);
    if is_pinned_peer {
        return (SoaOutcome::Transfer, None);
    }

    match master_pin_hit {
        None => (SoaOutcome::PinnedWait, Some(now_unix())),
        Some(hit) => {
            let elapsed = now_unix().saturating_sub(hit);
            if Duration::from_secs(elapsed.into()) >= pin_tolerance {
                (SoaOutcome::PinExpiredForceAxfr, None)
            } else {
                (SoaOutcome::PinnedWait, Some(hit))
            }
        }
    }
}

//----------- EngineContext -----------------------------------------------------

/// The immutable-after-construction bundle of collaborator handles every
/// refresh attempt calls through.
pub struct EngineContext {
    pub timers: Arc<dyn TimerStore>,
    pub master_serial: Arc<dyn MasterSerialStore>,
    pub journal: Arc<dyn JournalStore>,
    pub signer: Option<Arc<dyn ZoneSigner>>,
    pub metrics: Arc<dyn MetricsSink>,
    pub tsig_keys: Option<Arc<dyn TsigKeyStore>>,
}

//----------- Commit -------------------------------------------------------------

/// The result of a successful finalize, ready for the scheduler to publish.
pub struct Commit {
    pub contents: ZoneContents,
    pub deadlines: ZoneDeadlines,
    pub serial_changed: bool,
}

fn current_wall_secs() -> u32 {
    now_unix()
}

/// Finalize an AXFR (or AXFR-style IXFR) transfer into a commit.
pub fn finalize_axfr(
    zone: &Name<Vec<u8>>,
    config: &ZoneConfig,
    ctx: &EngineContext,
    current: Option<&ZoneContents>,
    mut new_tree: ZoneContents,
    edns_expire: Option<u32>,
    peer: SocketAddr,
) -> Result<Commit, RefreshError> {
    let received_serial = new_tree.serial;

    if config.dnssec_signing {
        let current_serial = current.map(|c| c.serial);
        let local_serial = next_serial(
            current_serial,
            config.serial_policy,
            config.serial_increment,
            config.serial_modulo,
        )
        .map_err(|_| RefreshError::new(zone.to_string(), Some(peer), Kind::AllocFailed))?;
        new_tree.serial = local_serial;
        ctx.master_serial.store(zone, received_serial);
    }

    if let Some(signer) = &ctx.signer {
        if config.dnssec_signing {
            new_tree = signer.sign(zone, &new_tree).map_err(|e| {
                RefreshError::new(zone.to_string(), Some(peer), Kind::SemanticCheckFailed(e.0))
                    .with_source(e)
            })?;
        }
    }

    let serial_changed = current.map(|c| c.serial) != Some(new_tree.serial);

    let deadlines = commit_common(zone, config, ctx, &new_tree, edns_expire, peer)?;

    if serial_changed {
        ctx.metrics.record_attempt(zone, AttemptOutcome::AxfrApplied);
    } else {
        ctx.metrics.record_attempt(zone, AttemptOutcome::UpToDate);
    }

    Ok(Commit {
        contents: new_tree,
        deadlines,
        serial_changed,
    })
}

/// Finalize a chain of IXFR changesets into a commit.
pub fn finalize_ixfr(
    zone: &Name<Vec<u8>>,
    config: &ZoneConfig,
    ctx: &EngineContext,
    current: &ZoneContents,
    changesets: Vec<Changeset>,
    edns_expire: Option<u32>,
    peer: SocketAddr,
) -> Result<Commit, RefreshError> {
    if config.dnssec_signing && ctx.master_serial.load(zone).is_none() {
        return Err(RefreshError::new(
            zone.to_string(),
            Some(peer),
            Kind::MasterSerialUnknown,
        ));
    }

    let mut working = current.clone();
    let mut master_serial = ctx.master_serial.load(zone);

    for changeset in &changesets {
        if let Some(expected) = master_serial {
            if changeset.soa_from != expected {
                return Err(RefreshError::new(
                    zone.to_string(),
                    Some(peer),
                    Kind::ChangesetChainBroken,
                ));
            }
        }

        apply_changeset(&mut working, changeset, config.xfr.ixfr_benevolent)
            .map_err(|why| RefreshError::new(zone.to_string(), Some(peer), Kind::Malformed(why)))?;

        master_serial = Some(changeset.soa_to);
    }

    // For a signed zone, each changeset's soa_from/soa_to is
    // rewritten to lie in the local serial sequence before it is journaled,
    // chaining one next_serial() bump per changeset so that the journal (and
    // thus anything replaying it) sees the same serial chain our own SOA
    // publishes, never the master's.
    let journaled_changesets = if config.dnssec_signing {
        if let Some(master_serial) = master_serial {
            ctx.master_serial.store(zone, master_serial);
        }
        let mut local_serial = current.serial;
        let mut rewritten = Vec::with_capacity(changesets.len());
        for changeset in &changesets {
            let next_local = next_serial(
                Some(local_serial),
                config.serial_policy,
                config.serial_increment,
                config.serial_modulo,
            )
            .map_err(|_| RefreshError::new(zone.to_string(), Some(peer), Kind::AllocFailed))?;
            rewritten.push(Changeset {
                soa_from: local_serial,
                soa_to: next_local,
                deletions: changeset.deletions.clone(),
                additions: changeset.additions.clone(),
            });
            local_serial = next_local;
        }
        working.serial = local_serial;
        rewritten
    } else {
        changesets
    };

    if let Some(signer) = &ctx.signer {
        if config.dnssec_signing {
            working = signer.sign(zone, &working).map_err(|e| {
                RefreshError::new(zone.to_string(), Some(peer), Kind::SemanticCheckFailed(e.0))
                    .with_source(e)
            })?;
        }
    }

    let serial_changed = current.serial != working.serial;

    for changeset in journaled_changesets {
        if config.journal_content != crate::zonemaintenance::config::JournalContent::None {
            ctx.journal
                .append(zone, changeset)
                .map_err(|_| RefreshError::new(zone.to_string(), Some(peer), Kind::JournalFull))?;
        }
    }

    let deadlines = commit_common(zone, config, ctx, &working, edns_expire, peer)?;

    ctx.metrics.record_attempt(
        zone,
        if serial_changed {
            AttemptOutcome::IxfrApplied
        } else {
            AttemptOutcome::UpToDate
        },
    );

    Ok(Commit {
        contents: working,
        deadlines,
        serial_changed,
    })
}

fn commit_common(
    zone: &Name<Vec<u8>>,
    config: &ZoneConfig,
    ctx: &EngineContext,
    contents: &ZoneContents,
    edns_expire: Option<u32>,
    peer: SocketAddr,
) -> Result<ZoneDeadlines, RefreshError> {
    let soa = apex_soa(contents).ok_or_else(|| {
        RefreshError::new(
            zone.to_string(),
            Some(peer),
            Kind::Malformed("committed tree has no apex SOA".to_string()),
        )
    })?;

    let edns_expire = edns_expire.filter(|s| edns_expire_is_usable(*s));
    let deadlines = plan_from_soa(&soa, config, edns_expire);

    ctx.timers.store(
        zone,
        ZoneTimers {
            next_refresh: Some(current_wall_secs().saturating_add(deadlines.refresh.as_secs() as u32)),
            next_expire: Some(current_wall_secs().saturating_add(deadlines.expire.as_secs() as u32)),
            retry_secs: Some(deadlines.retry.as_secs() as u32),
            last_refresh_ok: true,
            master_pin_hit: None,
            last_master: Some(peer),
            bootstrap_count: 0,
        },
    );
    ctx.metrics.record_commit(zone, contents.serial);

    Ok(deadlines)
}

fn apex_soa(contents: &ZoneContents) -> Option<Soa<Name<Vec<u8>>>> {
    contents
        .records
        .get(&(contents.apex.clone(), domain::base::Rtype::SOA))
        .and_then(|rrset| rrset.first())
        .and_then(|record| match &record.data {
            domain::rdata::ZoneRecordData::Soa(soa) => Some(soa.clone()),
            _ => None,
        })
}

fn apply_changeset(
    tree: &mut ZoneContents,
    changeset: &Changeset,
    benevolent: bool,
) -> Result<(), String> {
    for record in &changeset.deletions {
        let key = (record.owner.clone(), record.rtype);
        match tree.records.get_mut(&key) {
            Some(rrset) => {
                let before = rrset.len();
                rrset.retain(|r| r.data != record.data);
                if rrset.len() == before && !benevolent {
                    return Err(format!("delete of absent record at {}", record.owner));
                }
                if rrset.is_empty() {
                    tree.records.remove(&key);
                }
            }
            None if !benevolent => {
                return Err(format!("delete of absent rrset at {}", record.owner));
            }
            None => {}
        }
    }

    for record in &changeset.additions {
        let key = (record.owner.clone(), record.rtype);
        let rrset = tree.records.entry(key).or_default();
        if rrset.iter().any(|r| r.data == record.data) {
            if !benevolent {
                return Err(format!("add of already-present record at {}", record.owner));
            }
        } else {
            rrset.push(record.clone());
        }
    }

    tree.serial = changeset.soa_to;
    Ok(())
}

//----------- NOTIFY fan-out -----------------------------------------------

/// The set of peers to send a post-commit NOTIFY to: every configured
/// remote that does not have `notify_blocked` set, plus any extra
/// `notify.targets` addresses.
pub fn notify_fanout(remotes: &[Remote], extra_targets: &[SocketAddr]) -> Vec<SocketAddr> {
    let mut targets: Vec<SocketAddr> = remotes
        .iter()
        .filter(|r| !r.notify_blocked)
        .flat_map(|r| r.addresses.iter().copied())
        .collect();
    targets.extend(extra_targets.iter().copied());
    targets.sort();
    targets.dedup();
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zonemaintenance::config::{
        CatalogRole, JournalContent, NotifyConfig, SemanticChecks, TimerBounds, TransportStrategy,
        XfrConfig, ZonefileLoad,
    };
    use crate::zonemaintenance::serial::SerialPolicy;
    use crate::zonemaintenance::store::memory::{
        MemoryJournalStore, MemoryMasterSerialStore, MemoryTimerStore, NoopMetricsSink,
    };
    use crate::zonemaintenance::types::OwnedRecord;
    use crate::common::datetime::TimeSpan;
    use domain::base::{Rtype, Ttl};
    use domain::rdata::ZoneRecordData;

    fn apex() -> Name<Vec<u8>> {
        "example.com.".parse().unwrap()
    }

    fn peer() -> SocketAddr {
        "192.0.2.1:53".parse().unwrap()
    }

    fn base_config() -> ZoneConfig {
        ZoneConfig {
            refresh_interval: TimerBounds {
                min: TimeSpan::from(Duration::from_secs(60)),
                max: TimeSpan::from(Duration::from_secs(86400)),
            },
            retry_interval: TimerBounds {
                min: TimeSpan::from(Duration::from_secs(60)),
                max: TimeSpan::from(Duration::from_secs(86400)),
            },
            expire_interval: TimerBounds {
                min: TimeSpan::from(Duration::from_secs(60)),
                max: TimeSpan::from(Duration::from_secs(1_209_600)),
            },
            master_pin_tolerance: TimeSpan::from(Duration::from_secs(0)),
            dnssec_signing: false,
            serial_policy: SerialPolicy::Increment,
            serial_increment: 1,
            serial_modulo: None,
            journal_content: JournalContent::Changes,
            zonefile_load: ZonefileLoad::None,
            xfr: XfrConfig::default(),
            zonemd_generate: false,
            zonemd_verify: false,
            sem_checks: SemanticChecks::On,
            notify: NotifyConfig::default(),
            catalog_role: CatalogRole::None,
            catalog_template: None,
            catalog_zone: None,
            ddns_master: None,
        }
    }

    fn ctx() -> EngineContext {
        EngineContext {
            timers: Arc::new(MemoryTimerStore::default()),
            master_serial: Arc::new(MemoryMasterSerialStore::default()),
            journal: Arc::new(MemoryJournalStore::with_max_depth(100)),
            signer: None,
            metrics: Arc::new(NoopMetricsSink),
            tsig_keys: None,
        }
    }

    fn soa_tree(serial: u32) -> ZoneContents {
        let soa = Soa::new(
            apex(),
            apex(),
            Serial::from(serial),
            Ttl::from_secs(3600),
            Ttl::from_secs(900),
            Ttl::from_secs(1_209_600),
            Ttl::from_secs(3600),
        );
        let mut contents = ZoneContents::empty(apex());
        contents.serial = Serial::from(serial);
        contents.records.insert(
            (apex(), Rtype::SOA),
            vec![OwnedRecord {
                owner: apex(),
                rtype: Rtype::SOA,
                data: ZoneRecordData::Soa(soa),
            }],
        );
        contents
    }

    #[test]
    fn bootstrap_always_transfers() {
        let (outcome, _) = evaluate_soa(None, Serial::from(5), peer(), Duration::ZERO, None, None);
        assert_eq!(outcome, SoaOutcome::Transfer);
    }

    #[test]
    fn ahead_of_remote_is_up_to_date() {
        let (outcome, _) =
            evaluate_soa(Some(Serial::from(10)), Serial::from(5), peer(), Duration::ZERO, None, None);
        assert_eq!(outcome, SoaOutcome::UpToDate);
    }

    #[test]
    fn unpinned_remote_with_newer_serial_transfers_immediately() {
        let (outcome, _) =
            evaluate_soa(Some(Serial::from(5)), Serial::from(10), peer(), Duration::ZERO, None, None);
        assert_eq!(outcome, SoaOutcome::Transfer);
    }

    #[test]
    fn pinned_non_last_master_waits_then_expires() {
        let other: SocketAddr = "192.0.2.2:53".parse().unwrap();
        let (outcome, hit) = evaluate_soa(
            Some(Serial::from(5)),
            Serial::from(10),
            peer(),
            Duration::from_secs(300),
            Some(other),
            None,
        );
        assert_eq!(outcome, SoaOutcome::PinnedWait);
        assert!(hit.is_some());
    }

    #[test]
    fn pinned_last_master_transfers_and_clears_pin() {
        let (outcome, hit) = evaluate_soa(
            Some(Serial::from(5)),
            Serial::from(10),
            peer(),
            Duration::from_secs(300),
            Some(peer()),
            None,
        );
        assert_eq!(outcome, SoaOutcome::Transfer);
        assert!(hit.is_none());
    }

    #[test]
    fn axfr_finalize_commits_and_plans_timers() {
        let config = base_config();
        let context = ctx();
        let new_tree = soa_tree(100);

        let commit = finalize_axfr(&apex(), &config, &context, None, new_tree, None, peer()).unwrap();
        assert!(commit.serial_changed);
        assert_eq!(commit.contents.serial, Serial::from(100));
        assert!(context.timers.load(&apex()).is_some());
    }

    #[test]
    fn ixfr_finalize_rejects_broken_chain() {
        let config = base_config();
        let context = ctx();
        let current = soa_tree(100);

        let changeset = Changeset {
            soa_from: Serial::from(999),
            soa_to: Serial::from(101),
            deletions: Vec::new(),
            additions: Vec::new(),
        };
        context.master_serial.store(&apex(), Serial::from(100));

        let err =
            finalize_ixfr(&apex(), &config, &context, &current, vec![changeset], None, peer())
                .unwrap_err();
        assert!(matches!(err.kind, Kind::ChangesetChainBroken));
    }

    #[test]
    fn ixfr_finalize_rewrites_journaled_serials_for_signed_zones() {
        let mut config = base_config();
        config.dnssec_signing = true;
        let context = ctx();
        // Local contents start at serial 5; the master's chain (tracked by
        // master_serial) starts at 100, unrelated to the local sequence.
        let current = soa_tree(5);
        context.master_serial.store(&apex(), Serial::from(100));

        let changesets = vec![
            Changeset {
                soa_from: Serial::from(100),
                soa_to: Serial::from(101),
                deletions: Vec::new(),
                additions: Vec::new(),
            },
            Changeset {
                soa_from: Serial::from(101),
                soa_to: Serial::from(103),
                deletions: Vec::new(),
                additions: Vec::new(),
            },
        ];

        let commit =
            finalize_ixfr(&apex(), &config, &context, &current, changesets, None, peer()).unwrap();

        // The published serial advances in the local sequence (one bump per
        // changeset under the increment policy), not the master's.
        assert_eq!(commit.contents.serial, Serial::from(7));
        assert_eq!(context.master_serial.load(&apex()), Some(Serial::from(103)));

        let journaled = context
            .journal
            .range(&apex(), Serial::from(5), Serial::from(7))
            .unwrap();
        assert_eq!(journaled.len(), 2);
        assert_eq!(journaled[0].soa_from, Serial::from(5));
        assert_eq!(journaled[0].soa_to, Serial::from(6));
        assert_eq!(journaled[1].soa_from, Serial::from(6));
        assert_eq!(journaled[1].soa_to, Serial::from(7));
    }

    #[test]
    fn notify_fanout_skips_blocked_remotes() {
        let blocked_addr: SocketAddr = "192.0.2.9:53".parse().unwrap();
        let remotes = vec![
            Remote {
                addresses: vec![peer()],
                transport: TransportStrategy::Udp,
                tsig_key_name: None,
                request_expire: false,
                notify_blocked: false,
                pin_tolerance: Duration::ZERO,
            },
            Remote {
                addresses: vec![blocked_addr],
                transport: TransportStrategy::Udp,
                tsig_key_name: None,
                request_expire: false,
                notify_blocked: true,
                pin_tolerance: Duration::ZERO,
            },
        ];
        let targets = notify_fanout(&remotes, &[]);
        assert_eq!(targets, vec![peer()]);
    }
}
