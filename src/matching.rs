//! The SLAC matching state machine: PARM → START_ATTEN → sounding →
//! ATTEN_CHAR → MATCH (SPEC_FULL.md §4.3).

use std::time::Duration;
use tracing::{info, warn};

use crate::codec::ethernet::{EthernetHeader, ETH_TYPE_HPAV};
use crate::codec::homeplug::{
    HomePlugHeader, CM_ATTEN_CHAR, CM_SLAC_MATCH, CM_SLAC_PARM, CM_START_ATTEN_CHAR, MMTYPE_CNF,
    MMTYPE_IND, MMTYPE_REQ, MMTYPE_RSP,
};
use crate::codec::messages::{
    AttenChar, AttenCharRsp, MatchCnf, MatchReq, SlacParmCnf, SlacParmReq, StartAttenChar,
    ATTEN_CHAR_IND_SIZE, ATTEN_CHAR_RSP_SIZE, SLAC_MATCH_REQ_SIZE, SLAC_PARM_REQ_SIZE,
    START_ATTEN_CHAR_IND_SIZE,
};
use crate::error::SlacError;
use crate::net::EthernetPort;
use crate::session::{SessionState, SlacSession};
use crate::sound_aggregator::cm_sounds_loop;

/// How long the outer supervisor polls for the opening `SLAC_PARM.REQ`
/// before giving up this attempt. Overridable via `SLAC_INIT_TIMEOUT`.
pub const SLAC_INIT_TIMEOUT_DEFAULT: Duration = Duration::from_millis(50);
const TT_MATCH_SEQUENCE: Duration = Duration::from_millis(400);
const ATTEN_RESULTS_TIMEOUT_MS: u64 = 900;
const ATTEN_CHAR_RSP_TIMEOUT: Duration = Duration::from_secs(1);
const TT_MATCH_RESPONSE: Duration = Duration::from_secs(10);

const ETH_HDR: usize = 14;
const HP_HDR: usize = 5;

/// Drives one full matching attempt starting from [`SessionState::Unmatched`].
/// Returns `Ok(true)` on reaching [`SessionState::Matched`], `Ok(false)` if
/// the attempt timed out or was rejected (session already reset to
/// Unmatched), and `Err` only for I/O failures, which the supervisor must
/// handle by possibly recreating the port.
pub async fn run_matching_attempt(
    session: &mut SlacSession,
    port: &dyn EthernetPort,
    init_timeout: Duration,
) -> Result<bool, SlacError> {
    port.reset()?;

    let parm_req = match await_slac_parm_req(session, port, init_timeout).await {
        Ok(req) => req,
        Err(SlacError::Timeout(_)) => return Ok(false),
        Err(e) => return Err(e),
    };

    session.run_id = parm_req.run_id;
    session.application_type = parm_req.application_type;
    session.security_type = parm_req.security_type;

    send_parm_cnf(session, port).await?;
    session.state = SessionState::Matching;
    info!(run_id = ?session.run_id, "SLAC_PARM.CNF sent, entering Matching");

    match run_matching_sequence(session, port).await {
        Ok(()) => {
            session.state = SessionState::Matched;
            Ok(true)
        }
        Err(SlacError::Timeout(what)) => {
            warn!(what, "matching sequence timed out; resetting to Unmatched");
            session.reset();
            Ok(false)
        }
        Err(SlacError::MalformedFrame(what)) => {
            warn!(what, "malformed frame during matching; resetting to Unmatched");
            session.reset();
            Ok(false)
        }
        Err(SlacError::ProtocolMismatch(what)) => {
            warn!(what, "protocol mismatch during matching; resetting to Unmatched");
            session.reset();
            Ok(false)
        }
        Err(e @ SlacError::Io(_)) => Err(e),
        Err(SlacError::KeyProvisioningFailed(what)) => {
            warn!(what, "key provisioning failed mid-match; resetting to Unmatched");
            session.reset();
            Ok(false)
        }
    }
}

async fn await_slac_parm_req(
    session: &mut SlacSession,
    port: &dyn EthernetPort,
    timeout: Duration,
) -> Result<SlacParmReq, SlacError> {
    let frame = port.recv_frame(ETH_HDR + HP_HDR + SLAC_PARM_REQ_SIZE, timeout).await?;
    let eth = EthernetHeader::parse(&frame)?;
    if eth.ether_type != ETH_TYPE_HPAV {
        return Err(SlacError::ProtocolMismatch("non-HPAV frame while awaiting PARM.REQ"));
    }
    let hdr = HomePlugHeader::parse(&frame)?;
    if hdr.mm_type != (CM_SLAC_PARM | MMTYPE_REQ) {
        return Err(SlacError::ProtocolMismatch("expected CM_SLAC_PARM.REQ"));
    }
    let req = SlacParmReq::parse(&frame[ETH_HDR + HP_HDR..])?;
    session.pev_mac = eth.src_mac;
    session.forwarding_sta = eth.src_mac;
    Ok(req)
}

async fn send_parm_cnf(session: &mut SlacSession, port: &dyn EthernetPort) -> Result<(), SlacError> {
    let cnf = SlacParmCnf::new(session.forwarding_sta, session.run_id);
    let eth = EthernetHeader::new(session.pev_mac, session.evse_mac);
    let hdr = HomePlugHeader::new(CM_SLAC_PARM | MMTYPE_CNF);
    let mut frame = Vec::with_capacity(ETH_HDR + HP_HDR + 25);
    frame.extend_from_slice(&eth.pack());
    frame.extend_from_slice(&hdr.pack());
    frame.extend_from_slice(&cnf.pack());
    port.send_frame(&frame).await?;
    Ok(())
}

async fn run_matching_sequence(session: &mut SlacSession, port: &dyn EthernetPort) -> Result<(), SlacError> {
    await_start_atten_char(session, port).await?;

    session.time_out_ms = ATTEN_RESULTS_TIMEOUT_MS;
    cm_sounds_loop(session, port).await?;

    send_atten_char_ind_and_await_rsp(session, port).await?;

    let match_req = await_slac_match_req(session, port).await?;
    session.pev_id = match_req.pev_id;

    send_match_cnf(session, port).await
}

async fn await_start_atten_char(session: &mut SlacSession, port: &dyn EthernetPort) -> Result<(), SlacError> {
    let start = std::time::Instant::now();
    loop {
        let remaining = TT_MATCH_SEQUENCE
            .checked_sub(start.elapsed())
            .ok_or(SlacError::Timeout("CM_START_ATTEN_CHAR.IND"))?;
        let frame = port
            .recv_frame(ETH_HDR + HP_HDR + START_ATTEN_CHAR_IND_SIZE, remaining)
            .await?;
        let eth = EthernetHeader::parse(&frame)?;
        let hdr = HomePlugHeader::parse(&frame)?;
        if eth.src_mac != session.pev_mac || hdr.mm_type != (CM_START_ATTEN_CHAR | MMTYPE_IND) {
            continue; // not for this run — ignore and keep waiting within the same window
        }
        let ind = StartAttenChar::parse(&frame[ETH_HDR + HP_HDR..])?;
        if ind.run_id != session.run_id || ind.resp_type != 0x01 {
            continue; // idempotent re-arrival with stale fields, or not ours
        }
        // EV emits this up to three times; re-arrival with the same run_id
        // is accepted without changing state (idempotent).
        session.num_expected_sounds = Some(ind.num_sounds);
        return Ok(());
    }
}

async fn send_atten_char_ind_and_await_rsp(
    session: &SlacSession,
    port: &dyn EthernetPort,
) -> Result<(), SlacError> {
    let mut aag = [0u8; crate::codec::messages::SLAC_GROUPS];
    for (i, v) in session.aag.iter().enumerate() {
        aag[i] = (*v).min(u8::MAX as u32) as u8;
    }
    let ind = AttenChar {
        // The reference implementation populates this with the PEV's MAC,
        // not the EVSE's own — kept as-is per SPEC_FULL.md's guidance to
        // follow original_source/ on ambiguous field semantics.
        source_address: session.pev_mac,
        run_id: session.run_id,
        num_sounds: session.num_total_sounds.min(u8::MAX as u32) as u8,
        num_groups: session.num_groups,
        aag,
    };
    let eth = EthernetHeader::new(session.pev_mac, session.evse_mac);
    let hdr = HomePlugHeader::new(CM_ATTEN_CHAR | MMTYPE_IND);
    let mut frame = Vec::with_capacity(ETH_HDR + HP_HDR + ATTEN_CHAR_IND_SIZE);
    frame.extend_from_slice(&eth.pack());
    frame.extend_from_slice(&hdr.pack());
    frame.extend_from_slice(&ind.pack());

    let reply = port
        .send_recv_frame(&frame, ETH_HDR + HP_HDR + ATTEN_CHAR_RSP_SIZE, ATTEN_CHAR_RSP_TIMEOUT)
        .await?;
    let reply_eth = EthernetHeader::parse(&reply)?;
    let reply_hdr = HomePlugHeader::parse(&reply)?;
    if reply_eth.ether_type != ETH_TYPE_HPAV || reply_hdr.mm_type != (CM_ATTEN_CHAR | MMTYPE_RSP) {
        return Err(SlacError::ProtocolMismatch("expected CM_ATTEN_CHAR.RSP"));
    }
    let rsp = AttenCharRsp::parse(&reply[ETH_HDR + HP_HDR..])?;
    if rsp.run_id != session.run_id {
        return Err(SlacError::ProtocolMismatch("ATTEN_CHAR.RSP run_id mismatch"));
    }
    if rsp.result != 0 {
        return Err(SlacError::ProtocolMismatch("ATTEN_CHAR.RSP reported failure"));
    }
    Ok(())
}

async fn await_slac_match_req(session: &SlacSession, port: &dyn EthernetPort) -> Result<MatchReq, SlacError> {
    let start = std::time::Instant::now();
    loop {
        let remaining = TT_MATCH_RESPONSE
            .checked_sub(start.elapsed())
            .ok_or(SlacError::Timeout("CM_SLAC_MATCH.REQ"))?;
        let frame = port
            .recv_frame(ETH_HDR + HP_HDR + SLAC_MATCH_REQ_SIZE, remaining)
            .await?;
        let hdr = HomePlugHeader::parse(&frame)?;
        if hdr.mm_type != (CM_SLAC_MATCH | MMTYPE_REQ) {
            continue;
        }
        let req = MatchReq::parse(&frame[ETH_HDR + HP_HDR..])?;
        if req.run_id != session.run_id {
            // Scenario 5: wrong run_id resets to Unmatched, no CNF sent.
            return Err(SlacError::ProtocolMismatch("SLAC_MATCH.REQ run_id mismatch"));
        }
        return Ok(req);
    }
}

async fn send_match_cnf(session: &SlacSession, port: &dyn EthernetPort) -> Result<(), SlacError> {
    let cnf = MatchCnf {
        pev_mac: session.pev_mac,
        evse_mac: session.evse_mac,
        evse_id: session.evse_id,
        run_id: session.run_id,
        nid: session.nid,
        nmk: session.nmk,
    };
    let eth = EthernetHeader::new(session.pev_mac, session.evse_mac);
    let hdr = HomePlugHeader::new(CM_SLAC_MATCH | MMTYPE_CNF);
    let mut frame = Vec::with_capacity(ETH_HDR + HP_HDR + 90);
    frame.extend_from_slice(&eth.pack());
    frame.extend_from_slice(&hdr.pack());
    frame.extend_from_slice(&cnf.pack());
    port.send_frame(&frame).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::homeplug::{CM_ATTEN_PROFILE, CM_MNBC_SOUND};
    use crate::codec::messages::MNBC_SOUND_IND_SIZE;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const EVSE_MAC: [u8; 6] = [1, 2, 3, 4, 5, 6];
    const EVSE_PLC_MAC: [u8; 6] = [7; 6];
    const PEV_MAC: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
    const RUN_ID: [u8; 8] = [9; 8];

    /// Serves a fixed queue of inbound frames and records every outbound one,
    /// standing in for a real [`EthernetPort`] across a full matching run.
    struct MockPort {
        rx: Mutex<VecDeque<Vec<u8>>>,
        tx: Mutex<Vec<Vec<u8>>>,
    }

    impl MockPort {
        fn new(frames: Vec<Vec<u8>>) -> Self {
            MockPort { rx: Mutex::new(frames.into()), tx: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl EthernetPort for MockPort {
        fn local_mac(&self) -> [u8; 6] {
            EVSE_MAC
        }

        async fn send_frame(&self, frame: &[u8]) -> Result<usize, SlacError> {
            self.tx.lock().unwrap().push(frame.to_vec());
            Ok(frame.len())
        }

        async fn recv_frame(&self, _expected_size: usize, _timeout: Duration) -> Result<Vec<u8>, SlacError> {
            self.rx
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(SlacError::Timeout("mock queue drained"))
        }

        fn reset(&self) -> Result<(), SlacError> {
            Ok(())
        }
    }

    fn parm_req_frame() -> Vec<u8> {
        let eth = EthernetHeader::new(EVSE_MAC, PEV_MAC);
        let hdr = HomePlugHeader::new(CM_SLAC_PARM | MMTYPE_REQ);
        let mut payload = vec![0u8; SLAC_PARM_REQ_SIZE];
        payload[2..10].copy_from_slice(&RUN_ID);
        let mut frame = eth.pack().to_vec();
        frame.extend_from_slice(&hdr.pack());
        frame.extend_from_slice(&payload);
        frame
    }

    fn start_atten_char_frame(run_id: [u8; 8], num_sounds: u8) -> Vec<u8> {
        let eth = EthernetHeader::new(EVSE_MAC, PEV_MAC);
        let hdr = HomePlugHeader::new(CM_START_ATTEN_CHAR | MMTYPE_IND);
        let mut payload = vec![0u8; START_ATTEN_CHAR_IND_SIZE];
        payload[2] = num_sounds;
        payload[3] = 6; // time_out
        payload[4] = 0x01; // resp_type
        payload[5..11].copy_from_slice(&PEV_MAC);
        payload[11..19].copy_from_slice(&run_id);
        let mut frame = eth.pack().to_vec();
        frame.extend_from_slice(&hdr.pack());
        frame.extend_from_slice(&payload);
        frame
    }

    fn mnbc_and_profile_frames(run_id: [u8; 8]) -> (Vec<u8>, Vec<u8>) {
        let eth = EthernetHeader::new(EVSE_MAC, PEV_MAC);

        let mnbc_hdr = HomePlugHeader::new(CM_MNBC_SOUND | MMTYPE_IND);
        let mut mnbc_payload = vec![0u8; MNBC_SOUND_IND_SIZE];
        mnbc_payload[20..28].copy_from_slice(&run_id);
        let mut mnbc = eth.pack().to_vec();
        mnbc.extend_from_slice(&mnbc_hdr.pack());
        mnbc.extend_from_slice(&mnbc_payload);

        let profile_hdr = HomePlugHeader::new(CM_ATTEN_PROFILE | MMTYPE_IND);
        let mut profile_payload = Vec::new();
        profile_payload.extend_from_slice(&PEV_MAC);
        profile_payload.push(1); // num_groups
        profile_payload.push(0); // rsvd
        profile_payload.push(5); // aag[0]
        let mut profile = eth.pack().to_vec();
        profile.extend_from_slice(&profile_hdr.pack());
        profile.extend_from_slice(&profile_payload);

        (mnbc, profile)
    }

    fn atten_char_rsp_frame(run_id: [u8; 8], result: u8) -> Vec<u8> {
        let eth = EthernetHeader::new(EVSE_MAC, PEV_MAC);
        let hdr = HomePlugHeader::new(CM_ATTEN_CHAR | MMTYPE_RSP);
        let mut payload = vec![0u8; ATTEN_CHAR_RSP_SIZE];
        payload[8..16].copy_from_slice(&run_id);
        payload[50] = result;
        let mut frame = eth.pack().to_vec();
        frame.extend_from_slice(&hdr.pack());
        frame.extend_from_slice(&payload);
        frame
    }

    fn match_req_frame(run_id: [u8; 8]) -> Vec<u8> {
        let eth = EthernetHeader::new(EVSE_MAC, PEV_MAC);
        let hdr = HomePlugHeader::new(CM_SLAC_MATCH | MMTYPE_REQ);
        let mut payload = vec![0u8; SLAC_MATCH_REQ_SIZE];
        payload[4..21].copy_from_slice(&[3; 17]); // pev_id
        payload[21..27].copy_from_slice(&PEV_MAC);
        payload[50..58].copy_from_slice(&run_id);
        let mut frame = eth.pack().to_vec();
        frame.extend_from_slice(&hdr.pack());
        frame.extend_from_slice(&payload);
        frame
    }

    fn new_session() -> SlacSession {
        SlacSession::new(EVSE_MAC, EVSE_PLC_MAC, *b"EVSE-000000000001")
    }

    /// The full happy path reaches Matched, and every outgoing frame after
    /// PARM.REQ carries the session's run_id, per spec.md §8's invariant.
    #[tokio::test]
    async fn happy_path_reaches_matched() {
        let (mnbc, profile) = mnbc_and_profile_frames(RUN_ID);
        let frames = vec![
            parm_req_frame(),
            start_atten_char_frame(RUN_ID, 1),
            mnbc,
            profile,
            atten_char_rsp_frame(RUN_ID, 0),
            match_req_frame(RUN_ID),
        ];
        let port = MockPort::new(frames);
        let mut session = new_session();

        let result = run_matching_attempt(&mut session, &port, Duration::from_millis(50)).await;

        assert_eq!(result.unwrap(), true);
        assert_eq!(session.state, SessionState::Matched);
        assert_eq!(session.run_id, RUN_ID);
        assert_eq!(session.pev_id, [3; 17]);

        let sent = port.tx.lock().unwrap();
        assert_eq!(sent.len(), 3); // PARM.CNF, ATTEN_CHAR.IND, MATCH.CNF
        assert_eq!(&sent[0][36..44], &RUN_ID); // PARM.CNF run_id
        assert_eq!(&sent[1][27..35], &RUN_ID); // ATTEN_CHAR.IND run_id
        assert_eq!(&sent[2][69..77], &RUN_ID); // MATCH.CNF run_id
    }

    /// Scenario 5: a MATCH.REQ with the wrong run_id resets the session to
    /// Unmatched and no MATCH.CNF is sent.
    #[tokio::test]
    async fn wrong_run_id_match_req_resets_to_unmatched() {
        let (mnbc, profile) = mnbc_and_profile_frames(RUN_ID);
        let frames = vec![
            parm_req_frame(),
            start_atten_char_frame(RUN_ID, 1),
            mnbc,
            profile,
            atten_char_rsp_frame(RUN_ID, 0),
            match_req_frame([0xff; 8]), // wrong run_id
        ];
        let port = MockPort::new(frames);
        let mut session = new_session();

        let result = run_matching_attempt(&mut session, &port, Duration::from_millis(50)).await;

        assert_eq!(result.unwrap(), false);
        assert_eq!(session.state, SessionState::Unmatched);

        let sent = port.tx.lock().unwrap();
        assert_eq!(sent.len(), 2); // PARM.CNF, ATTEN_CHAR.IND — no MATCH.CNF
    }

    /// No opening PARM.REQ arrives within the poll window: the attempt
    /// reports back to the supervisor instead of erroring.
    #[tokio::test]
    async fn no_parm_req_times_out_to_supervisor() {
        let port = MockPort::new(Vec::new());
        let mut session = new_session();

        let result = run_matching_attempt(&mut session, &port, Duration::from_millis(10)).await;

        assert_eq!(result.unwrap(), false);
        assert_eq!(session.state, SessionState::Unmatched);
    }
}
