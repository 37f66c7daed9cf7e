//! The raw-socket adapter boundary.
//!
//! SLAC's matching logic never touches a socket directly — it drives an
//! [`EthernetPort`], which isolates frame I/O the way SPEC_FULL.md's
//! external-interfaces section describes: `sendeth`/`readeth`/`send_recv_eth`
//! plus a reset hook used to drain stale frames at the PARM boundary.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::SlacError;

#[async_trait]
pub trait EthernetPort: Send + Sync {
    /// Local hardware address used as the source MAC on every outgoing frame.
    fn local_mac(&self) -> [u8; 6];

    /// Send a raw Ethernet frame as-is (the caller is responsible for
    /// padding to the 60-byte minimum).
    async fn send_frame(&self, frame: &[u8]) -> Result<usize, SlacError>;

    /// Block until a frame of at least `expected_size` bytes arrives, or
    /// `timeout` elapses.
    async fn recv_frame(&self, expected_size: usize, timeout: Duration) -> Result<Vec<u8>, SlacError>;

    /// Convenience for request/reply exchanges: send, then wait for a reply.
    async fn send_recv_frame(
        &self,
        frame: &[u8],
        expected_size: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, SlacError> {
        self.send_frame(frame).await?;
        self.recv_frame(expected_size, timeout).await
    }

    /// Drop any frames queued before this call returns — used on the PARM
    /// boundary so a new run never observes a stale frame from the last one.
    fn reset(&self) -> Result<(), SlacError>;
}
