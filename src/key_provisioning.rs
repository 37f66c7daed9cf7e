//! NMK/NID generation and `CM_SET_KEY.REQ/CNF` provisioning of the local PLC
//! modem.

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{info, warn};

use crate::codec::ethernet::EthernetHeader;
use crate::codec::homeplug::{HomePlugHeader, CM_SET_KEY, MMTYPE_CNF, MMTYPE_REQ};
use crate::codec::messages::{SetKeyCnf, SetKeyReq, SET_KEY_CNF_SIZE};
use crate::error::SlacError;
use crate::net::EthernetPort;
use crate::session::SlacSession;

/// Settle time after a successful rekey, letting the modem join the new AVLN
/// before EV traffic is accepted.
pub const SLAC_SETTLE_TIME: Duration = Duration::from_secs(10);

const SET_KEY_CNF_TIMEOUT: Duration = Duration::from_secs(1);

/// Derive a 7-byte NID from a 16-byte NMK: 5 rounds of SHA-256 feedback,
/// truncated to 7 bytes with the top two bits of the last byte cleared.
pub fn generate_nid(nmk: &[u8; 16]) -> [u8; 7] {
    let mut digest = nmk.to_vec();
    for _ in 0..5 {
        let mut hasher = Sha256::new();
        hasher.update(&digest);
        digest = hasher.finalize().to_vec();
    }
    let mut nid = [0u8; 7];
    nid.copy_from_slice(&digest[0..7]);
    nid[6] &= 0b0011_1111;
    nid
}

/// Generates a fresh NMK/NID pair, pushes it to the local PLC modem via
/// `CM_SET_KEY.REQ/CNF`, and commits it into `session` only if the modem
/// confirms. Failure is non-fatal: the session keeps its previous key and
/// the function simply returns (SPEC_FULL.md §4.2 / §7 `KeyProvisioningFailed`).
pub async fn evse_set_key(session: &mut SlacSession, port: &dyn EthernetPort) {
    let mut nmk = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nmk);
    let nid = generate_nid(&nmk);

    let req = SetKeyReq { nid, new_key: nmk };
    let eth = EthernetHeader::new(session.evse_plc_mac, port.local_mac());
    let hdr = HomePlugHeader::new(CM_SET_KEY | MMTYPE_REQ);

    let mut frame = Vec::with_capacity(14 + 5 + 74);
    frame.extend_from_slice(&eth.pack());
    frame.extend_from_slice(&hdr.pack());
    frame.extend_from_slice(&req.pack());

    let reply = match port
        .send_recv_frame(&frame, 14 + 5 + SET_KEY_CNF_SIZE, SET_KEY_CNF_TIMEOUT)
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "CM_SET_KEY.CNF did not arrive; keeping previous NMK/NID");
            return;
        }
    };

    let payload_offset = 14 + 5;
    let parsed = SetKeyCnf::parse(&reply[payload_offset..]);
    match parsed {
        Ok(cnf) if cnf.result != 0xff => {
            session.nmk = nmk;
            session.nid = nid;
            info!("PLC modem accepted new NMK/NID");
            tokio::time::sleep(SLAC_SETTLE_TIME).await;
        }
        Ok(cnf) => {
            warn!(result = cnf.result, "CM_SET_KEY.CNF reported failure; keeping previous NMK/NID");
        }
        Err(e) => {
            warn!(error = %e, "malformed CM_SET_KEY.CNF; keeping previous NMK/NID");
        }
    }
}

/// `leave_logical_network`: rekey, then clear run-scoped session state.
pub async fn leave_logical_network(session: &mut SlacSession, port: &dyn EthernetPort) {
    evse_set_key(session, port).await;
    session.reset();
}
