//! Post-match link-liveness probing: vendor `LINK_STATUS.REQ/CNF` exchange
//! against the local PLC MAC (SPEC_FULL.md §4.5).

use std::time::Duration;
use tracing::warn;

use crate::codec::ethernet::EthernetHeader;
use crate::codec::homeplug::{pack_header_no_frag, parse_mm_type_no_frag, LINK_STATUS, MMTYPE_CNF, MMTYPE_REQ};
use crate::codec::messages::LINK_STATUS_VENDOR_OUI;
use crate::error::SlacError;
use crate::net::EthernetPort;
use crate::session::SlacSession;

/// Interval between consecutive liveness probes once Matched.
pub const LINK_PROBE_INTERVAL: Duration = Duration::from_secs(2);
const LINK_STATUS_TIMEOUT: Duration = Duration::from_secs(1);

/// Sends one `LINK_STATUS.REQ` to the local PLC modem and reports whether
/// the matching `LINK_STATUS.CNF` came back in time.
pub async fn is_link_status_active(session: &SlacSession, port: &dyn EthernetPort) -> bool {
    let eth = EthernetHeader::new(session.evse_plc_mac, port.local_mac());
    let hdr = pack_header_no_frag(LINK_STATUS | MMTYPE_REQ);
    let mut frame = Vec::with_capacity(14 + 3 + 3);
    frame.extend_from_slice(&eth.pack());
    frame.extend_from_slice(&hdr);
    frame.extend_from_slice(&LINK_STATUS_VENDOR_OUI.to_be_bytes()[1..4]);

    let reply = match port.send_recv_frame(&frame, 14 + 3, LINK_STATUS_TIMEOUT).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "LINK_STATUS.REQ failed");
            return false;
        }
    };

    match parse_mm_type_no_frag(&reply, 14) {
        Ok(mm_type) => mm_type == (LINK_STATUS | MMTYPE_CNF),
        Err(_) => false,
    }
}

/// Loops [`is_link_status_active`] on [`LINK_PROBE_INTERVAL`] until the link
/// is reported down; returns so the supervisor can run
/// [`crate::key_provisioning::leave_logical_network`] and restart matching.
pub async fn run_link_probe_until_down(session: &SlacSession, port: &dyn EthernetPort) {
    loop {
        tokio::time::sleep(LINK_PROBE_INTERVAL).await;
        if !is_link_status_active(session, port).await {
            warn!("link probe failed; powerline link considered down");
            return;
        }
    }
}
