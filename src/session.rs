//! The per-interface session record: identifiers, counters and accumulated
//! sounding measurements for one matching run.

use crate::codec::messages::SLAC_GROUPS;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unmatched,
    Matching,
    Matched,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Unmatched => "unmatched",
            SessionState::Matching => "matching",
            SessionState::Matched => "matched",
        };
        write!(f, "{s}")
    }
}

/// One matching session, owned by a single interface task.
///
/// `nmk`/`nid`/`evse_mac`/`evse_id`/`evse_plc_mac` survive [`reset`](Self::reset);
/// every other field is run-scoped and cleared back to its default.
pub struct SlacSession {
    pub state: SessionState,

    pub nmk: [u8; 16],
    pub nid: [u8; 7],

    pub evse_mac: [u8; 6],
    pub evse_plc_mac: [u8; 6],
    pub evse_id: [u8; 17],

    pub pev_mac: [u8; 6],
    pub pev_id: [u8; 17],
    pub forwarding_sta: [u8; 6],
    pub run_id: [u8; 8],

    pub application_type: u8,
    pub security_type: u8,

    pub num_expected_sounds: Option<u8>,
    pub num_total_sounds: u32,
    pub num_groups: u8,
    pub aag: [u32; SLAC_GROUPS],
    pub time_out_ms: u64,

    pub matching_task_handle: Option<JoinHandle<()>>,
}

impl SlacSession {
    /// `nmk`/`nid` start at all-zero; the first [`evse_set_key`](crate::key_provisioning::evse_set_key)
    /// call provisions real values before any matching attempt is made.
    pub fn new(evse_mac: [u8; 6], evse_plc_mac: [u8; 6], evse_id: [u8; 17]) -> Self {
        SlacSession {
            state: SessionState::Unmatched,
            nmk: [0u8; 16],
            nid: [0u8; 7],
            evse_mac,
            evse_plc_mac,
            evse_id,
            pev_mac: [0u8; 6],
            pev_id: [0u8; 17],
            forwarding_sta: [0u8; 6],
            run_id: [0u8; 8],
            application_type: 0,
            security_type: 0,
            num_expected_sounds: None,
            num_total_sounds: 0,
            num_groups: 0,
            aag: [0u32; SLAC_GROUPS],
            time_out_ms: 0,
            matching_task_handle: None,
        }
    }

    /// Clears every run-scoped field back to its default and returns the
    /// session to [`SessionState::Unmatched`]. Key material and immutable
    /// identifiers are left untouched — see the struct-level docs.
    pub fn reset(&mut self) {
        if let Some(handle) = self.matching_task_handle.take() {
            handle.abort();
        }
        self.state = SessionState::Unmatched;
        self.pev_mac = [0u8; 6];
        self.pev_id = [0u8; 17];
        self.forwarding_sta = [0u8; 6];
        self.run_id = [0u8; 8];
        self.application_type = 0;
        self.security_type = 0;
        self.num_expected_sounds = None;
        self.num_total_sounds = 0;
        self.num_groups = 0;
        self.aag = [0u32; SLAC_GROUPS];
        self.time_out_ms = 0;
    }
}
