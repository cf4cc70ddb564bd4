//! Timer planning: turning an SOA plus configured bounds into the
//! three absolute deadlines the scheduler waits on, and the bootstrap and
//! retry backoff formulas used when no successful attempt has landed yet.

use std::time::Duration;

use domain::rdata::Soa;
use rand::Rng;

use crate::zonemaintenance::config::{TimerBounds, ZoneConfig};

/// The maximum bootstrap backoff, regardless of how many consecutive
/// failures have occurred.
const BOOTSTRAP_CAP: Duration = Duration::from_secs(7200);

/// Upper bound (exclusive) of the jitter added to every computed deadline,
/// to avoid every zone on a box waking up in lockstep.
const JITTER_CEIL_SECS: u64 = 29;

/// The three deadlines the scheduler maintains for one zone: when to next
/// attempt a refresh, when to fall back to retry pacing, and when the zone
/// is considered expired absent a successful refresh.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ZoneDeadlines {
    pub refresh: Duration,
    pub retry: Duration,
    pub expire: Duration,
}

/// Plan the refresh/retry/expire intervals from a freshly learned SOA, per
/// the configured clamping rules. `edns_expire` is the EDNS EXPIRE option value
/// from the same exchange the SOA came from, when the peer sent one.
pub fn plan_from_soa<N>(
    soa: &Soa<N>,
    config: &ZoneConfig,
    edns_expire: Option<u32>,
) -> ZoneDeadlines {
    let refresh = config
        .refresh_interval
        .clamp(Duration::from_secs(soa.refresh().as_secs().into()));
    let retry = config
        .retry_interval
        .clamp(Duration::from_secs(soa.retry().as_secs().into()));

    let soa_expire = Duration::from_secs(soa.expire().as_secs().into());
    let expire = match edns_expire {
        // An EDNS EXPIRE value never outlives the SOA's own expire field,
        // and is not subject to the configured minimum: the peer told us
        // exactly how long our copy is still authoritative for.
        Some(secs) => {
            let edns_expire = Duration::from_secs(secs.into()).min(soa_expire);
            clamp_peer_reported(&config.expire_interval, edns_expire)
        }
        None => config.expire_interval.clamp(soa_expire),
    };

    let expire = if config.is_catalog() {
        Duration::ZERO
    } else {
        expire
    };

    ZoneDeadlines {
        refresh,
        retry,
        expire,
    }
}

/// How long to wait before the next attempt after a failed refresh, given
/// the SOA-derived retry interval.
pub fn next_retry(config: &ZoneConfig, soa_retry: Duration) -> Duration {
    config.retry_interval.clamp(soa_retry) + jitter()
}

/// The exponential-ish backoff used before any SOA has ever been learned
/// (cold start, or every attempt against every remote has failed). `count`
/// is the number of consecutive failed bootstrap attempts, starting at 1
/// for the first failure.
pub fn bootstrap_next(count: u32) -> Duration {
    let secs = 5u64.saturating_mul(u64::from(count).saturating_mul(u64::from(count)));
    Duration::from_secs(secs).min(BOOTSTRAP_CAP) + jitter()
}

fn jitter() -> Duration {
    let secs = rand::rng().random_range(0..JITTER_CEIL_SECS);
    Duration::from_secs(secs)
}

/// Whether an EDNS EXPIRE value is too small to act on ("an EDNS
/// EXPIRE value under two seconds is ignored, not honored").
pub fn edns_expire_is_usable(secs: u32) -> bool {
    secs >= 2
}

/// Clamp a single interval read from a peer-reported value (e.g. an EDNS
/// EXPIRE override) using only the configured maximum, not the minimum:
/// the peer is allowed to shorten the window below our configured floor.
pub fn clamp_peer_reported(bounds: &TimerBounds, value: Duration) -> Duration {
    value.min(bounds.max.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::base::{Name, Serial, Ttl};
    use crate::common::datetime::TimeSpan;
    use crate::zonemaintenance::config::{
        CatalogRole, JournalContent, NotifyConfig, SemanticChecks, XfrConfig, ZonefileLoad,
    };
    use crate::zonemaintenance::serial::SerialPolicy;

    fn apex() -> Name<Vec<u8>> {
        "example.com.".parse().unwrap()
    }

    fn base_config() -> ZoneConfig {
        ZoneConfig {
            refresh_interval: TimerBounds {
                min: TimeSpan::from(Duration::from_secs(120)),
                max: TimeSpan::from(Duration::from_secs(3600)),
            },
            retry_interval: TimerBounds {
                min: TimeSpan::from(Duration::from_secs(60)),
                max: TimeSpan::from(Duration::from_secs(1800)),
            },
            expire_interval: TimerBounds {
                min: TimeSpan::from(Duration::from_secs(600)),
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

    fn soa(refresh: u32, retry: u32, expire: u32) -> Soa<Name<Vec<u8>>> {
        Soa::new(
            apex(),
            apex(),
            Serial::from(1u32),
            Ttl::from_secs(refresh),
            Ttl::from_secs(retry),
            Ttl::from_secs(expire),
            Ttl::from_secs(3600),
        )
    }

    #[test]
    fn soa_values_within_bounds_pass_through() {
        let config = base_config();
        let deadlines = plan_from_soa(&soa(600, 120, 100_000), &config, None);
        assert_eq!(deadlines.refresh, Duration::from_secs(600));
        assert_eq!(deadlines.retry, Duration::from_secs(120));
        assert_eq!(deadlines.expire, Duration::from_secs(100_000));
    }

    #[test]
    fn soa_values_are_clamped_to_configured_bounds() {
        let config = base_config();
        let deadlines = plan_from_soa(&soa(10, 5, 10), &config, None);
        assert_eq!(deadlines.refresh, Duration::from_secs(120));
        assert_eq!(deadlines.retry, Duration::from_secs(60));
        assert_eq!(deadlines.expire, Duration::from_secs(600));
    }

    #[test]
    fn edns_expire_overrides_soa_expire_without_minimum_clamp() {
        let config = base_config();
        let deadlines = plan_from_soa(&soa(600, 120, 100_000), &config, Some(5));
        assert_eq!(deadlines.expire, Duration::from_secs(5));
    }

    #[test]
    fn catalog_zones_pin_expire_to_zero() {
        let mut config = base_config();
        config.catalog_role = CatalogRole::Generator;
        config.catalog_zone = Some("catalog.example.".to_string());
        let deadlines = plan_from_soa(&soa(600, 120, 100_000), &config, None);
        assert_eq!(deadlines.expire, Duration::ZERO);
    }

    #[test]
    fn bootstrap_backoff_grows_then_caps() {
        assert!(bootstrap_next(1) < bootstrap_next(10));
        let capped = bootstrap_next(1000);
        assert!(capped <= BOOTSTRAP_CAP + Duration::from_secs(JITTER_CEIL_SECS));
    }

    #[test]
    fn small_edns_expire_values_are_rejected_by_the_usability_check() {
        assert!(!edns_expire_is_usable(1));
        assert!(edns_expire_is_usable(2));
    }
}
