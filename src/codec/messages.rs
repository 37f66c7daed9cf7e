//! Fixed-layout SLAC payload codecs.
//!
//! Each struct packs/parses exactly the field list given by SPEC_FULL.md
//! §4.1 for that message. A handful of the table's declared "payload size"
//! numbers do not actually add up to the sum of their own field list (most
//! visibly `SLAC_PARM.CNF` and `SLAC_MATCH.CNF`); per DESIGN.md these
//! structs trust the field list, since that is the literal wire contract,
//! and the *size* column is a summary that drifted out of sync with it in
//! the original implementation this was distilled from.

use crate::error::SlacError;

fn need(buf: &[u8], len: usize, what: &'static str) -> Result<(), SlacError> {
    if buf.len() < len {
        Err(SlacError::MalformedFrame(what))
    } else {
        Ok(())
    }
}

/// Number of attenuation groups tracked per sounding (`AAG`).
pub const SLAC_GROUPS: usize = 58;

// ═══════════════════════════════════════════════════════════════════════
//  CM_SET_KEY
// ═══════════════════════════════════════════════════════════════════════

pub const SET_KEY_REQ_SIZE: usize = 74;

/// `CM_SET_KEY.REQ` payload — provisions the local PLC modem with a new NMK/NID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetKeyReq {
    pub nid: [u8; 7],
    pub new_key: [u8; 16],
}

impl SetKeyReq {
    pub fn pack(&self) -> [u8; SET_KEY_REQ_SIZE] {
        let mut buf = [0u8; SET_KEY_REQ_SIZE];
        buf[0] = 0x01; // key_type
        // my_nonce(4)=0, your_nonce(4)=0
        buf[9] = 4; // pid
        // prn(2)=0
        // pmn(1)=0
        // cco_cap(1)=0
        buf[14..21].copy_from_slice(&self.nid);
        buf[21] = 0x01; // new_eks
        buf[22..38].copy_from_slice(&self.new_key);
        // remaining bytes are padding, already zero
        buf
    }
}

pub const SET_KEY_CNF_SIZE: usize = 14;

/// `CM_SET_KEY.CNF` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetKeyCnf {
    pub result: u8,
}

impl SetKeyCnf {
    pub fn parse(buf: &[u8]) -> Result<Self, SlacError> {
        need(buf, SET_KEY_CNF_SIZE, "SET_KEY.CNF payload truncated")?;
        Ok(SetKeyCnf { result: buf[0] })
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  CM_SLAC_PARM
// ═══════════════════════════════════════════════════════════════════════

pub const SLAC_PARM_REQ_SIZE: usize = 10;

/// `CM_SLAC_PARM.REQ` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlacParmReq {
    pub application_type: u8,
    pub security_type: u8,
    pub run_id: [u8; 8],
}

impl SlacParmReq {
    pub fn parse(buf: &[u8]) -> Result<Self, SlacError> {
        need(buf, SLAC_PARM_REQ_SIZE, "SLAC_PARM.REQ payload truncated")?;
        let mut run_id = [0u8; 8];
        run_id.copy_from_slice(&buf[2..10]);
        Ok(SlacParmReq { application_type: buf[0], security_type: buf[1], run_id })
    }
}

pub const SLAC_PARM_CNF_SIZE: usize = 25;

/// `CM_SLAC_PARM.CNF` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlacParmCnf {
    pub m_sound_target: [u8; 6],
    pub num_sounds: u8,
    pub time_out: u8,
    pub resp_type: u8,
    pub forwarding_sta: [u8; 6],
    pub application_type: u8,
    pub security_type: u8,
    pub run_id: [u8; 8],
}

impl SlacParmCnf {
    pub fn new(forwarding_sta: [u8; 6], run_id: [u8; 8]) -> Self {
        SlacParmCnf {
            m_sound_target: super::ethernet::BROADCAST_MAC,
            num_sounds: 0x0a,
            time_out: 0x06,
            resp_type: 0x01,
            forwarding_sta,
            application_type: 0x00,
            security_type: 0x00,
            run_id,
        }
    }

    pub fn pack(&self) -> [u8; SLAC_PARM_CNF_SIZE] {
        let mut buf = [0u8; SLAC_PARM_CNF_SIZE];
        buf[0..6].copy_from_slice(&self.m_sound_target);
        buf[6] = self.num_sounds;
        buf[7] = self.time_out;
        buf[8] = self.resp_type;
        buf[9..15].copy_from_slice(&self.forwarding_sta);
        buf[15] = self.application_type;
        buf[16] = self.security_type;
        buf[17..25].copy_from_slice(&self.run_id);
        buf
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  CM_START_ATTEN_CHAR
// ═══════════════════════════════════════════════════════════════════════

pub const START_ATTEN_CHAR_IND_SIZE: usize = 19;

/// `CM_START_ATTEN_CHAR.IND` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartAttenChar {
    pub application_type: u8,
    pub security_type: u8,
    pub num_sounds: u8,
    pub time_out: u8,
    pub resp_type: u8,
    pub forwarding_sta: [u8; 6],
    pub run_id: [u8; 8],
}

impl StartAttenChar {
    pub fn parse(buf: &[u8]) -> Result<Self, SlacError> {
        need(buf, START_ATTEN_CHAR_IND_SIZE, "START_ATTEN_CHAR.IND payload truncated")?;
        let mut forwarding_sta = [0u8; 6];
        forwarding_sta.copy_from_slice(&buf[5..11]);
        let mut run_id = [0u8; 8];
        run_id.copy_from_slice(&buf[11..19]);
        Ok(StartAttenChar {
            application_type: buf[0],
            security_type: buf[1],
            num_sounds: buf[2],
            time_out: buf[3],
            resp_type: buf[4],
            forwarding_sta,
            run_id,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  CM_MNBC_SOUND
// ═══════════════════════════════════════════════════════════════════════

pub const MNBC_SOUND_IND_SIZE: usize = 52;

/// `CM_MNBC_SOUND.IND` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MnbcSound {
    pub application_type: u8,
    pub security_type: u8,
    pub sender_id: [u8; 17],
    pub cnt: u8,
    pub run_id: [u8; 8],
    pub rnd: [u8; 16],
}

impl MnbcSound {
    pub fn parse(buf: &[u8]) -> Result<Self, SlacError> {
        need(buf, MNBC_SOUND_IND_SIZE, "MNBC_SOUND.IND payload truncated")?;
        let mut sender_id = [0u8; 17];
        sender_id.copy_from_slice(&buf[2..19]);
        let mut run_id = [0u8; 8];
        run_id.copy_from_slice(&buf[20..28]);
        let mut rnd = [0u8; 16];
        rnd.copy_from_slice(&buf[36..52]);
        Ok(MnbcSound {
            application_type: buf[0],
            security_type: buf[1],
            sender_id,
            cnt: buf[19],
            run_id,
            rnd,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  CM_ATTEN_PROFILE
// ═══════════════════════════════════════════════════════════════════════

/// Fixed header portion of `CM_ATTEN_PROFILE.IND`, ahead of the variable
/// `aag[num_groups]` tail. Used as the minimum size to request from the
/// port when expecting a profile frame — the tail length isn't known until
/// the header itself has been read.
pub const ATTEN_PROFILE_HEADER_SIZE: usize = 8;

/// `CM_ATTEN_PROFILE.IND` payload — `num_groups` is never validated above
/// `SLAC_GROUPS` (58) on the wire, but the caller clamps it before indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttenProfile {
    pub pev_mac: [u8; 6],
    pub num_groups: u8,
    pub aag: Vec<u8>,
}

impl AttenProfile {
    pub fn parse(buf: &[u8]) -> Result<Self, SlacError> {
        need(buf, ATTEN_PROFILE_HEADER_SIZE, "ATTEN_PROFILE.IND header truncated")?;
        let mut pev_mac = [0u8; 6];
        pev_mac.copy_from_slice(&buf[0..6]);
        let num_groups = buf[6];
        let tail_len = num_groups as usize;
        need(
            buf,
            ATTEN_PROFILE_HEADER_SIZE + tail_len,
            "ATTEN_PROFILE.IND aag tail truncated",
        )?;
        let aag = buf[ATTEN_PROFILE_HEADER_SIZE..ATTEN_PROFILE_HEADER_SIZE + tail_len].to_vec();
        Ok(AttenProfile { pev_mac, num_groups, aag })
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  CM_ATTEN_CHAR
// ═══════════════════════════════════════════════════════════════════════

pub const ATTEN_CHAR_IND_SIZE: usize = 51 + 1 + SLAC_GROUPS;

/// `CM_ATTEN_CHAR.IND` payload — the EVSE's own averaged attenuation report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttenChar {
    pub source_address: [u8; 6],
    pub run_id: [u8; 8],
    pub num_sounds: u8,
    pub num_groups: u8,
    pub aag: [u8; SLAC_GROUPS],
}

impl AttenChar {
    pub fn pack(&self) -> Vec<u8> {
        let mut buf = vec![0u8; ATTEN_CHAR_IND_SIZE];
        buf[0] = 0x00; // application_type
        buf[1] = 0x00; // security_type
        buf[2..8].copy_from_slice(&self.source_address);
        buf[8..16].copy_from_slice(&self.run_id);
        // source_id(17) / resp_id(17) left zeroed per spec
        buf[50] = self.num_sounds;
        buf[51] = self.num_groups;
        buf[52..52 + SLAC_GROUPS].copy_from_slice(&self.aag);
        buf
    }
}

pub const ATTEN_CHAR_RSP_SIZE: usize = 51;

/// `CM_ATTEN_CHAR.RSP` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttenCharRsp {
    pub run_id: [u8; 8],
    pub result: u8,
}

impl AttenCharRsp {
    pub fn parse(buf: &[u8]) -> Result<Self, SlacError> {
        need(buf, ATTEN_CHAR_RSP_SIZE, "ATTEN_CHAR.RSP payload truncated")?;
        let mut run_id = [0u8; 8];
        run_id.copy_from_slice(&buf[8..16]);
        Ok(AttenCharRsp { run_id, result: buf[50] })
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  CM_SLAC_MATCH
// ═══════════════════════════════════════════════════════════════════════

pub const SLAC_MATCH_REQ_SIZE: usize = 66;

/// `CM_SLAC_MATCH.REQ` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchReq {
    pub pev_id: [u8; 17],
    pub pev_mac: [u8; 6],
    pub run_id: [u8; 8],
}

impl MatchReq {
    pub fn parse(buf: &[u8]) -> Result<Self, SlacError> {
        need(buf, SLAC_MATCH_REQ_SIZE, "SLAC_MATCH.REQ payload truncated")?;
        let mut pev_id = [0u8; 17];
        pev_id.copy_from_slice(&buf[4..21]);
        let mut pev_mac = [0u8; 6];
        pev_mac.copy_from_slice(&buf[21..27]);
        // evse_id(17) + evse_mac(6) at 27..50 — echoed back by the EV, unused here
        let mut run_id = [0u8; 8];
        run_id.copy_from_slice(&buf[50..58]);
        Ok(MatchReq { pev_id, pev_mac, run_id })
    }
}

pub const SLAC_MATCH_CNF_SIZE: usize = 90;

/// `CM_SLAC_MATCH.CNF` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCnf {
    pub pev_mac: [u8; 6],
    pub evse_mac: [u8; 6],
    pub evse_id: [u8; 17],
    pub run_id: [u8; 8],
    pub nid: [u8; 7],
    pub nmk: [u8; 16],
}

impl MatchCnf {
    pub fn pack(&self) -> Vec<u8> {
        let mut buf = vec![0u8; SLAC_MATCH_CNF_SIZE];
        buf[0] = 0x00; // application_type
        buf[1] = 0x00; // security_type
        buf[2..4].copy_from_slice(&0x3eu16.to_be_bytes()); // mvf_length
        // pev_id(17) left zeroed — the EVSE does not echo one back
        buf[21..27].copy_from_slice(&self.pev_mac);
        buf[27..44].copy_from_slice(&self.evse_id);
        buf[44..50].copy_from_slice(&self.evse_mac);
        buf[50..58].copy_from_slice(&self.run_id);
        // rsvd(8) at 58..66 left zero
        buf[66..73].copy_from_slice(&self.nid);
        // rsvd(1) at 73 left zero
        buf[74..90].copy_from_slice(&self.nmk);
        buf
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Vendor LINK_STATUS
// ═══════════════════════════════════════════════════════════════════════

/// Vendor OUI carried in the `LINK_STATUS.REQ` payload.
pub const LINK_STATUS_VENDOR_OUI: u32 = 0x00b052;
pub const LINK_STATUS_REQ_PAYLOAD_SIZE: usize = 3;
pub const LINK_STATUS_CNF_SIZE: usize = 3;
