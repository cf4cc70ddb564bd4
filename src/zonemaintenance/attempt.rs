//! The refresh-attempt driver: the async state machine that turns a zone's
//! configured remotes into a SOA probe, a transfer, and a finalized commit.
//!
//! Every module below this one is either I/O-free ([`wire`], [`axfr`],
//! [`ixfr`], [`controller`]) or I/O-only-but-decision-free ([`requestor`]).
//! This is the one place that strings them together: SOA probe, pinned-
//! master guard, IXFR-with-AXFR-fallback transfer, finalize, and — on
//! exhaustion of every configured remote — planning the next retry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use domain::base::{Name, Serial};
use domain::rdata::{Soa, ZoneRecordData};
use tracing::{error, info, warn};

use crate::zonemaintenance::axfr::{self, AxfrConsumer};
use crate::zonemaintenance::config::{NotifyConfig, SemanticChecks, TransportStrategy, ZoneConfig};
use crate::zonemaintenance::controller::{self, Commit, EngineContext, SoaOutcome};
use crate::zonemaintenance::error::{FallbackPolicy, Kind, RefreshError};
use crate::zonemaintenance::ixfr::{self, IxfrConsumer, Kickoff};
use crate::zonemaintenance::requestor::{self, Requestor};
use crate::zonemaintenance::store::AttemptOutcome;
use crate::zonemaintenance::timers::{bootstrap_next, edns_expire_is_usable, next_retry, plan_from_soa};
use crate::zonemaintenance::types::{Changeset, Remote, ZoneContents, ZoneTimers};
use crate::zonemaintenance::wire::{self, EdnsOptions, QuestionKind, WireRecord};

/// What one full refresh cycle against a zone's configured remotes
/// produced.
#[derive(Debug)]
pub enum AttemptResult {
    /// Every remote we probed reported a serial we are already at or ahead
    /// of; nothing was transferred, but the refresh/retry/expire deadlines
    /// were replanned from the probe response anyway.
    UpToDate,
    /// The pinned-master guard is holding; no transfer was attempted this
    /// cycle.
    PinnedWait,
    /// A transfer landed and was finalized into a commit, ready for the
    /// caller to publish via [`crate::zonemaintenance::scheduler::ZoneHandle::publish`].
    Applied(Commit),
}

/// Drive one refresh cycle for `zone` against its configured `remotes`, in
/// order, falling back across addresses and peers per each failure's
/// [`Kind::fallback`] policy.
///
/// On total exhaustion this plans the next retry/bootstrap deadline itself
/// (no successful attempt means no SOA to replan timers from) before
/// returning the last classified error.
pub async fn refresh_zone(
    zone: &Name<Vec<u8>>,
    config: &ZoneConfig,
    ctx: &EngineContext,
    remotes: &[Remote],
    current: Option<Arc<ZoneContents>>,
    io_timeout: Duration,
    #[cfg(feature = "tls")] tls_config: Option<Arc<rustls::ClientConfig>>,
) -> Result<AttemptResult, RefreshError> {
    let previous_timers = ctx.timers.load(zone).unwrap_or_default();
    let mut last_err: Option<RefreshError> = None;
    let started = Instant::now();

    for remote in remotes {
        for &addr in &remote.addresses {
            let result = attempt_one_address(
                zone,
                config,
                ctx,
                remote,
                addr,
                current.as_deref(),
                &previous_timers,
                io_timeout,
                #[cfg(feature = "tls")]
                tls_config.clone(),
            )
            .await;

            match result {
                Ok(outcome) => {
                    log_success(zone, addr, current.as_deref(), &outcome, started.elapsed());
                    if let AttemptResult::Applied(commit) = &outcome {
                        if commit.serial_changed {
                            notify_commit(
                                zone,
                                remotes,
                                &config.notify,
                                commit.contents.serial,
                                io_timeout,
                            )
                            .await;
                        }
                    }
                    return Ok(outcome);
                }
                Err(err) => {
                    warn!(zone = %zone, remote = %addr, error = %err, "refresh attempt failed");
                    let policy = err.kind.fallback();
                    last_err = Some(err);
                    match policy {
                        FallbackPolicy::NextAddressThenPeer => continue,
                        FallbackPolicy::NextPeer => break,
                        FallbackPolicy::AbandonNoFallback | FallbackPolicy::AbandonRetryLater => {
                            let err = last_err.expect("just set above");
                            let next_retry_at =
                                plan_failure(zone, config, ctx, current.as_deref(), &previous_timers);
                            error!(zone = %zone, error = %err, next_retry_at, "refresh cycle failed");
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    let err = last_err.unwrap_or_else(|| RefreshError::new(zone.to_string(), None, Kind::IoFailure));
    let next_retry_at = plan_failure(zone, config, ctx, current.as_deref(), &previous_timers);
    error!(zone = %zone, error = %err, next_retry_at, "refresh cycle failed");
    Err(err)
}

/// One INFO line summarizing a successful cycle: `(duration, old_serial,
/// new_serial, remote_serial, expires_in)`, per the engine's documented
/// user-visible success behavior. `remote_serial` is omitted for
/// [`AttemptResult::PinnedWait`], which never reached a transfer decision.
fn log_success(
    zone: &Name<Vec<u8>>,
    remote: SocketAddr,
    current: Option<&ZoneContents>,
    outcome: &AttemptResult,
    duration: Duration,
) {
    let old_serial = current.map(|c| c.serial);
    match outcome {
        AttemptResult::PinnedWait => {
            info!(zone = %zone, remote = %remote, ?duration, "pinned-master guard holding, no transfer");
        }
        AttemptResult::UpToDate => {
            info!(
                zone = %zone, remote = %remote, ?duration, ?old_serial,
                "zone already up to date"
            );
        }
        AttemptResult::Applied(commit) => {
            info!(
                zone = %zone, remote = %remote, ?duration, ?old_serial,
                new_serial = %commit.contents.serial,
                expires_in = commit.deadlines.expire.as_secs(),
                "zone transfer applied"
            );
        }
    }
}

/// SOA probe, then (if the remote is ahead) transfer, against one address.
async fn attempt_one_address(
    zone: &Name<Vec<u8>>,
    config: &ZoneConfig,
    ctx: &EngineContext,
    remote: &Remote,
    addr: SocketAddr,
    current: Option<&ZoneContents>,
    previous_timers: &ZoneTimers,
    io_timeout: Duration,
    #[cfg(feature = "tls")] tls_config: Option<Arc<rustls::ClientConfig>>,
) -> Result<AttemptResult, RefreshError> {
    let as_refresh_err = |kind: Kind| RefreshError::new(zone.to_string(), Some(addr), kind);

    let mut conn = connect_requestor(
        zone,
        addr,
        remote.transport,
        io_timeout,
        #[cfg(feature = "tls")]
        tls_config.clone(),
    )
    .await
    .map_err(|e| as_refresh_err(Kind::from(e)))?;

    let tsig_key = remote
        .tsig_key_name
        .as_deref()
        .and_then(|name| ctx.tsig_keys.as_ref().and_then(|store| store.key(name)));

    let soa_edns = EdnsOptions {
        request_expire: remote.request_expire,
        udp_payload_size: 1232,
        ..Default::default()
    };
    let soa_question = wire::build_question(zone, QuestionKind::Soa, &soa_edns, tsig_key.as_deref())
        .map_err(|e| as_refresh_err(Kind::from(e)))?;
    let soa_response = conn
        .exchange(&soa_question)
        .await
        .map_err(|e| as_refresh_err(Kind::from(e)))?;

    let local_serial = current.map(|c| c.serial);
    let parsed = wire::parse_message(soa_response).and_then(|m| wire::soa_and_expire_from_answer(&m));
    let (remote_soa, edns_expire) = match parsed {
        Ok(pair) => pair,
        // A soft semantic-checks policy tolerates a malformed SOA answer by
        // falling straight through to a full AXFR rather than failing the
        // attempt outright.
        Err(wire::Error::Parse(_) | wire::Error::MalformedTrailing)
            if config.sem_checks == SemanticChecks::Soft =>
        {
            return transfer(
                zone,
                config,
                ctx,
                &mut conn,
                addr,
                current,
                local_serial,
                true,
                None,
                tsig_key.as_deref(),
            )
            .await;
        }
        Err(e) => return Err(as_refresh_err(Kind::from(e))),
    };

    let (outcome, pin_hit) = controller::evaluate_soa(
        local_serial,
        remote_soa.serial(),
        addr,
        remote.pin_tolerance,
        previous_timers.last_master,
        previous_timers.master_pin_hit,
    );

    match outcome {
        SoaOutcome::PinnedWait => {
            ctx.timers.store(
                zone,
                ZoneTimers {
                    master_pin_hit: pin_hit,
                    ..previous_timers.clone()
                },
            );
            Ok(AttemptResult::PinnedWait)
        }
        SoaOutcome::UpToDate => {
            replan_without_commit(zone, config, ctx, &remote_soa, edns_expire, addr);
            Ok(AttemptResult::UpToDate)
        }
        SoaOutcome::Transfer => {
            transfer(
                zone,
                config,
                ctx,
                &mut conn,
                addr,
                current,
                local_serial,
                false,
                edns_expire,
                tsig_key.as_deref(),
            )
            .await
        }
        SoaOutcome::PinExpiredForceAxfr => {
            transfer(
                zone,
                config,
                ctx,
                &mut conn,
                addr,
                current,
                local_serial,
                true,
                edns_expire,
                tsig_key.as_deref(),
            )
            .await
        }
    }
}

async fn connect_requestor(
    zone: &Name<Vec<u8>>,
    addr: SocketAddr,
    transport: TransportStrategy,
    io_timeout: Duration,
    #[cfg(feature = "tls")] tls_config: Option<Arc<rustls::ClientConfig>>,
) -> Result<Requestor, requestor::Error> {
    #[cfg(feature = "tls")]
    {
        let sni = zone.to_string();
        Requestor::connect(addr, transport, io_timeout, tls_config, Some(sni.trim_end_matches('.'))).await
    }
    #[cfg(not(feature = "tls"))]
    {
        Requestor::connect(addr, transport, io_timeout).await
    }
}

/// Issue the transfer question (IXFR if we hold a prior tree and the
/// pinned-master guard did not force a full transfer, AXFR otherwise), read
/// the response stream, and finalize it into a commit.
#[allow(clippy::too_many_arguments)]
async fn transfer(
    zone: &Name<Vec<u8>>,
    config: &ZoneConfig,
    ctx: &EngineContext,
    conn: &mut Requestor,
    peer: SocketAddr,
    current: Option<&ZoneContents>,
    local_serial: Option<Serial>,
    force_axfr: bool,
    edns_expire: Option<u32>,
    tsig_key: Option<&domain::tsig::Key>,
) -> Result<AttemptResult, RefreshError> {
    let as_refresh_err = |kind: Kind| RefreshError::new(zone.to_string(), Some(peer), kind);
    let want_ixfr = current.is_some() && !force_axfr;

    if want_ixfr {
        match try_ixfr(zone, config, conn, local_serial.unwrap(), tsig_key).await {
            Ok(IxfrOutcome::UpToDate) => {
                if let Some(current) = current {
                    let soa = apex_soa_of(current).ok_or_else(|| {
                        as_refresh_err(Kind::Malformed("current tree has no apex SOA".to_string()))
                    })?;
                    replan_without_commit(zone, config, ctx, &soa, edns_expire, peer);
                }
                return Ok(AttemptResult::UpToDate);
            }
            Ok(IxfrOutcome::Changesets(changesets)) => {
                let commit = controller::finalize_ixfr(
                    zone,
                    config,
                    ctx,
                    current.expect("want_ixfr implies current is Some"),
                    changesets,
                    edns_expire,
                    peer,
                )?;
                return Ok(AttemptResult::Applied(commit));
            }
            Ok(IxfrOutcome::AxfrStyle(pending)) => {
                let new_tree = drain_axfr(zone, conn, config.xfr.zone_max_size, pending)
                    .await
                    .map_err(as_refresh_err)?;
                let commit =
                    controller::finalize_axfr(zone, config, ctx, current, new_tree, edns_expire, peer)?;
                return Ok(AttemptResult::Applied(commit));
            }
            Err(kind) if !kind.is_transport_failure() => {
                // RFC 1995 IXFR-denial fallback: reissue as AXFR on the
                // same connection rather than burning an address/peer
                // fallback slot over a capability mismatch.
                let axfr_question =
                    wire::build_question(zone, QuestionKind::Axfr, &EdnsOptions::default(), tsig_key)
                        .map_err(|e| as_refresh_err(Kind::from(e)))?;
                let first = conn
                    .exchange(&axfr_question)
                    .await
                    .map_err(|e| as_refresh_err(Kind::from(e)))?;
                let message = wire::parse_message(first).map_err(|e| as_refresh_err(Kind::from(e)))?;
                let pending =
                    wire::parse_transfer_records(&message).map_err(|e| as_refresh_err(Kind::from(e)))?;
                let new_tree = drain_axfr(zone, conn, config.xfr.zone_max_size, pending)
                    .await
                    .map_err(as_refresh_err)?;
                let commit =
                    controller::finalize_axfr(zone, config, ctx, current, new_tree, edns_expire, peer)?;
                Ok(AttemptResult::Applied(commit))
            }
            Err(kind) => Err(as_refresh_err(kind)),
        }
    } else {
        let axfr_question =
            wire::build_question(zone, QuestionKind::Axfr, &EdnsOptions::default(), tsig_key)
                .map_err(|e| as_refresh_err(Kind::from(e)))?;
        let first = conn
            .exchange(&axfr_question)
            .await
            .map_err(|e| as_refresh_err(Kind::from(e)))?;
        let message = wire::parse_message(first).map_err(|e| as_refresh_err(Kind::from(e)))?;
        let pending =
            wire::parse_transfer_records(&message).map_err(|e| as_refresh_err(Kind::from(e)))?;
        let new_tree = drain_axfr(zone, conn, config.xfr.zone_max_size, pending)
            .await
            .map_err(as_refresh_err)?;
        let commit = controller::finalize_axfr(zone, config, ctx, current, new_tree, edns_expire, peer)?;
        Ok(AttemptResult::Applied(commit))
    }
}

enum IxfrOutcome {
    UpToDate,
    Changesets(Vec<Changeset>),
    AxfrStyle(Vec<WireRecord>),
}

async fn try_ixfr(
    zone: &Name<Vec<u8>>,
    config: &ZoneConfig,
    conn: &mut Requestor,
    local_serial: Serial,
    tsig_key: Option<&domain::tsig::Key>,
) -> Result<IxfrOutcome, Kind> {
    let edns = EdnsOptions::default();
    let question = wire::build_question(
        zone,
        QuestionKind::Ixfr { current_serial: local_serial },
        &edns,
        tsig_key,
    )
    .map_err(Kind::from)?;

    let first = conn.exchange(&question).await.map_err(Kind::from)?;
    let message = wire::parse_message(first).map_err(Kind::from)?;
    let records = wire::parse_transfer_records(&message).map_err(Kind::from)?;

    let Some(first_record) = records.first() else {
        return Err(Kind::Malformed("IXFR response carries no answer".to_string()));
    };
    let ZoneRecordData::Soa(first_soa) = &first_record.data else {
        return Err(Kind::Malformed("IXFR response does not open with an SOA".to_string()));
    };

    let second = records.get(1).map(|r| {
        let soa = match &r.data {
            ZoneRecordData::Soa(s) => Some(s),
            _ => None,
        };
        (&r.owner, r.rtype, soa)
    });

    let kickoff = ixfr::kickoff(
        zone,
        config.xfr.zone_max_size,
        local_serial,
        first_soa,
        second,
    )
    .map_err(Kind::from)?;

    match kickoff {
        Kickoff::UpToDate => Ok(IxfrOutcome::UpToDate),
        Kickoff::AxfrStyle => Ok(IxfrOutcome::AxfrStyle(records)),
        Kickoff::Proceed(mut consumer) => {
            consumer = consumer.with_ixfr_by_one(config.xfr.ixfr_by_one);
            let mut pending = records;
            pending.remove(0);

            loop {
                for record in pending.drain(..) {
                    let step = consumer
                        .feed(record.owner, record.rtype, record.data, record.rdata_len)
                        .map_err(Kind::from)?;
                    if step == ixfr::Step::Done {
                        return Ok(IxfrOutcome::Changesets(consumer.finish()));
                    }
                }

                match conn.read_next().await.map_err(Kind::from)? {
                    Some(bytes) => {
                        let message = wire::parse_message(bytes).map_err(Kind::from)?;
                        pending = wire::parse_transfer_records(&message).map_err(Kind::from)?;
                    }
                    None => {
                        return Err(Kind::Malformed(
                            "connection closed before the IXFR's final SOA".to_string(),
                        ));
                    }
                }
            }
        }
    }
}

async fn drain_axfr(
    zone: &Name<Vec<u8>>,
    conn: &mut Requestor,
    max_zone_size: u64,
    first_records: Vec<WireRecord>,
) -> Result<ZoneContents, Kind> {
    let mut consumer = AxfrConsumer::new(zone.clone(), max_zone_size);
    let mut pending = first_records;

    loop {
        for record in pending.drain(..) {
            let step = consumer
                .feed(record.owner, record.rtype, record.data, record.rdata_len)
                .map_err(Kind::from)?;
            if step == axfr::Step::Done {
                return consumer.finish().map_err(Kind::from);
            }
        }

        match conn.read_next().await.map_err(Kind::from)? {
            Some(bytes) => {
                let message = wire::parse_message(bytes).map_err(Kind::from)?;
                pending = wire::parse_transfer_records(&message).map_err(Kind::from)?;
            }
            None => return consumer.finish().map_err(Kind::from),
        }
    }
}

fn apex_soa_of(contents: &ZoneContents) -> Option<Soa<Name<Vec<u8>>>> {
    contents
        .records
        .get(&(contents.apex.clone(), domain::base::Rtype::SOA))
        .and_then(|rrset| rrset.first())
        .and_then(|record| match &record.data {
            ZoneRecordData::Soa(soa) => Some(soa.clone()),
            _ => None,
        })
}

/// Replan the refresh/retry/expire deadlines from a probe response that
/// turned out to already be up to date, without going through
/// [`controller::finalize_axfr`]/[`controller::finalize_ixfr`] (there is no
/// new tree to commit, and doing so would risk bumping a signed zone's
/// local serial for data that did not change).
fn replan_without_commit(
    zone: &Name<Vec<u8>>,
    config: &ZoneConfig,
    ctx: &EngineContext,
    soa: &Soa<Name<Vec<u8>>>,
    edns_expire: Option<u32>,
    peer: SocketAddr,
) {
    let edns_expire = edns_expire.filter(|s| edns_expire_is_usable(*s));
    let deadlines = plan_from_soa(soa, config, edns_expire);
    let now = controller::now_unix();

    ctx.timers.store(
        zone,
        ZoneTimers {
            next_refresh: Some(now.saturating_add(deadlines.refresh.as_secs() as u32)),
            next_expire: Some(now.saturating_add(deadlines.expire.as_secs() as u32)),
            retry_secs: Some(deadlines.retry.as_secs() as u32),
            last_refresh_ok: true,
            master_pin_hit: None,
            last_master: Some(peer),
            bootstrap_count: 0,
        },
    );
    ctx.metrics.record_attempt(zone, AttemptOutcome::UpToDate);
}

/// Every configured remote failed this cycle: plan the next attempt using
/// the last known SOA retry interval if we hold one, or bootstrap backoff
/// otherwise, record the failure for metrics, and return the planned
/// `next_refresh` unix timestamp for the caller's failure log line.
fn plan_failure(
    zone: &Name<Vec<u8>>,
    config: &ZoneConfig,
    ctx: &EngineContext,
    current: Option<&ZoneContents>,
    previous_timers: &ZoneTimers,
) -> u32 {
    ctx.metrics.record_attempt(zone, AttemptOutcome::Failed);

    let now = controller::now_unix();
    let bootstrap_count = previous_timers.bootstrap_count.saturating_add(1);

    let wait = if current.is_some() {
        match previous_timers.retry_secs {
            Some(secs) => next_retry(config, Duration::from_secs(secs.into())),
            None => bootstrap_next(u32::from(bootstrap_count)),
        }
    } else {
        bootstrap_next(u32::from(bootstrap_count))
    };

    let next_refresh = now.saturating_add(wait.as_secs() as u32);
    ctx.timers.store(
        zone,
        ZoneTimers {
            next_refresh: Some(next_refresh),
            last_refresh_ok: false,
            bootstrap_count,
            ..previous_timers.clone()
        },
    );
    next_refresh
}

/// Send a post-commit NOTIFY to every fan-out target, fire-and-forget.
///
/// Each target gets its own short-lived UDP exchange; a failure (refused,
/// timed out, malformed reply) is logged at INFO and otherwise ignored —
/// per §4.8, NOTIFY delivery never blocks or retries from this engine, and
/// never affects the outcome of the refresh attempt that produced the
/// commit being announced.
pub async fn notify_commit(
    zone: &Name<Vec<u8>>,
    remotes: &[Remote],
    notify: &NotifyConfig,
    serial: Serial,
    io_timeout: Duration,
) {
    let targets = controller::notify_fanout(remotes, &notify.targets);
    for target in targets {
        if let Err(err) = send_notify(zone, target, serial, io_timeout).await {
            info!(zone = %zone, remote = %target, error = %err, "NOTIFY delivery failed");
        }
    }
}

async fn send_notify(
    zone: &Name<Vec<u8>>,
    target: SocketAddr,
    serial: Serial,
    io_timeout: Duration,
) -> Result<(), requestor::Error> {
    let query = wire::build_notify(zone, serial)?;
    #[cfg(feature = "tls")]
    let mut requestor =
        Requestor::connect(target, TransportStrategy::Udp, io_timeout, None, None).await?;
    #[cfg(not(feature = "tls"))]
    let mut requestor = Requestor::connect(target, TransportStrategy::Udp, io_timeout).await?;
    requestor.exchange(&query).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zonemaintenance::config::{
        CatalogRole, JournalContent, NotifyConfig, SemanticChecks, TimerBounds, XfrConfig,
        ZonefileLoad,
    };
    use crate::zonemaintenance::serial::SerialPolicy;
    use crate::zonemaintenance::store::memory::{
        MemoryJournalStore, MemoryMasterSerialStore, MemoryTimerStore, NoopMetricsSink,
    };
    use crate::common::datetime::TimeSpan;

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

    #[test]
    fn plan_failure_uses_bootstrap_backoff_with_no_prior_zone() {
        let config = base_config();
        let context = ctx();
        let previous = ZoneTimers::default();

        let next_refresh = plan_failure(&apex(), &config, &context, None, &previous);

        let stored = context.timers.load(&apex()).unwrap();
        assert_eq!(stored.bootstrap_count, 1);
        assert!(!stored.last_refresh_ok);
        assert_eq!(stored.next_refresh, Some(next_refresh));
    }

    #[test]
    fn plan_failure_reuses_retry_secs_when_a_prior_zone_exists() {
        let config = base_config();
        let context = ctx();
        let current = ZoneContents::empty(apex());
        let previous = ZoneTimers {
            retry_secs: Some(120),
            ..ZoneTimers::default()
        };

        plan_failure(&apex(), &config, &context, Some(&current), &previous);

        let stored = context.timers.load(&apex()).unwrap();
        assert_eq!(stored.bootstrap_count, 1);
        assert!(stored.next_refresh.unwrap() >= 120);
    }

    #[test]
    fn replan_without_commit_records_up_to_date_and_stores_timers() {
        let config = base_config();
        let context = ctx();
        let soa = Soa::new(
            apex(),
            apex(),
            Serial::from(5),
            domain::base::Ttl::from_secs(3600),
            domain::base::Ttl::from_secs(900),
            domain::base::Ttl::from_secs(1_209_600),
            domain::base::Ttl::from_secs(3600),
        );

        replan_without_commit(&apex(), &config, &context, &soa, None, peer());

        let stored = context.timers.load(&apex()).unwrap();
        assert!(stored.last_refresh_ok);
        assert_eq!(stored.last_master, Some(peer()));
        assert_eq!(stored.retry_secs, Some(900));
    }

    #[tokio::test]
    async fn notify_commit_sends_one_notify_per_unblocked_remote() {
        let server_a = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr_a = server_a.local_addr().unwrap();
        let server_b = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr_b = server_b.local_addr().unwrap();

        let respond = |server: tokio::net::UdpSocket| {
            tokio::spawn(async move {
                let mut buf = [0u8; 512];
                let (len, peer) = server.recv_from(&mut buf).await.unwrap();
                // Opcode NOTIFY occupies bits 3-6 of header byte 2 (0x08).
                assert_eq!((buf[2] >> 3) & 0x0f, 4);
                let mut reply = buf[..len].to_vec();
                reply[2] |= 0x80; // QR bit: this is a response
                server.send_to(&reply, peer).await.unwrap();
            })
        };
        let task_a = respond(server_a);
        let task_b = respond(server_b);

        let remotes = vec![
            Remote {
                addresses: vec![addr_a],
                transport: TransportStrategy::Udp,
                tsig_key_name: None,
                request_expire: false,
                notify_blocked: false,
                pin_tolerance: Duration::ZERO,
            },
            Remote {
                addresses: vec![addr_b],
                transport: TransportStrategy::Udp,
                tsig_key_name: None,
                request_expire: false,
                notify_blocked: false,
                pin_tolerance: Duration::ZERO,
            },
        ];

        notify_commit(
            &apex(),
            &remotes,
            &NotifyConfig::default(),
            Serial::from(9),
            Duration::from_secs(2),
        )
        .await;

        task_a.await.unwrap();
        task_b.await.unwrap();
    }

    #[tokio::test]
    async fn notify_commit_logs_and_continues_past_an_unreachable_target() {
        // Nothing listens here; the exchange should time out without panicking
        // or otherwise blocking indefinitely.
        let unreachable: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let remotes = vec![Remote {
            addresses: vec![unreachable],
            transport: TransportStrategy::Udp,
            tsig_key_name: None,
            request_expire: false,
            notify_blocked: false,
            pin_tolerance: Duration::ZERO,
        }];

        notify_commit(
            &apex(),
            &remotes,
            &NotifyConfig::default(),
            Serial::from(1),
            Duration::from_millis(200),
        )
        .await;
    }
}
