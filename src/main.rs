use clap::Parser;
use slac_evse::config::Config;
use slac_evse::net::{EthernetPort, PnetEthernetPort};
use slac_evse::session::SlacSession;
use slac_evse::stats::Stats;
use slac_evse::{key_provisioning, link_probe, matching, stats, telemetry};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();

    let config = Config::parse();
    let evse_plc_mac = config.evse_plc_mac_bytes()?;
    let evse_id = config.evse_id_bytes();

    info!(
        iface = config.iface,
        evse_id = config.evse_id,
        init_timeout_ms = config.slac_init_timeout_ms,
        "slac-evse-bridge starting"
    );

    let stats = Stats::new();
    let stats_clone = stats.clone();
    let stats_interval = config.stats_interval_secs;
    tokio::spawn(async move {
        stats::stats_reporter(stats_clone, stats_interval).await;
    });

    let telemetry = if config.telemetry_enabled {
        let (sink, _publish_handle, _eventloop_handle) = telemetry::spawn_telemetry(&config);
        Some(sink)
    } else {
        None
    };

    run_supervisor(&config, evse_plc_mac, evse_id, stats, telemetry).await
}

/// Owns one [`SlacSession`] per interface and drives it through repeated
/// matching attempts: on Matched, runs the link probe until the link drops,
/// then leaves the logical network and starts over. Matches SPEC_FULL.md's
/// "Out of scope" framing of the CLI/supervisor layer: this loop contains no
/// protocol logic of its own, only orchestration.
async fn run_supervisor(
    config: &Config,
    evse_plc_mac: [u8; 6],
    evse_id: [u8; 17],
    stats: std::sync::Arc<Stats>,
    telemetry: Option<std::sync::Arc<telemetry::TelemetrySink>>,
) -> anyhow::Result<()> {
    let port = PnetEthernetPort::open(&config.iface)?;
    let mut session = SlacSession::new(port.local_mac(), evse_plc_mac, evse_id);
    let init_timeout = config.slac_init_timeout();

    loop {
        stats.record_session_started();
        match matching::run_matching_attempt(&mut session, &port, init_timeout).await {
            Ok(true) => {
                info!(run_id = ?session.run_id, pev_mac = ?session.pev_mac, "SLAC match complete");
                stats.record_session_matched();
                if let Some(sink) = &telemetry {
                    sink.next_event(telemetry::SlacEventType::Matched, session.run_id, session.pev_mac);
                }

                link_probe::run_link_probe_until_down(&session, &port).await;
                stats.record_link_probe_failure();
                if let Some(sink) = &telemetry {
                    sink.next_event(telemetry::SlacEventType::LinkDown, session.run_id, session.pev_mac);
                }

                warn!("powerline link lost; leaving logical network and restarting matching");
                key_provisioning::leave_logical_network(&mut session, &port).await;
            }
            Ok(false) => {
                stats.record_session_timed_out();
                // no PARM.REQ within the poll window, or the attempt reset
                // itself mid-sequence — either way, just try again
            }
            Err(e) => {
                error!(error = %e, "I/O error during matching attempt");
                return Err(e.into());
            }
        }
    }
}
