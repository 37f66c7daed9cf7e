//! [`EthernetPort`] backed by `pnet::datalink` raw sockets.
//!
//! Datalink channels are blocking, so a background thread owns the receive
//! half and forwards every frame into an unbounded channel; `recv_frame`
//! then just waits on that channel under a `tokio::time::timeout`. The send
//! half is driven through `spawn_blocking` since `DataLinkSender::send_to`
//! can block on a busy interface.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pnet::datalink::{self, Channel, DataLinkSender, NetworkInterface};
use tokio::sync::mpsc;

use crate::codec::ethernet::ETH_TYPE_HPAV;
use crate::error::SlacError;
use crate::net::port::EthernetPort;

pub struct PnetEthernetPort {
    local_mac: [u8; 6],
    tx: Arc<Mutex<Box<dyn DataLinkSender>>>,
    frame_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    #[allow(dead_code)] // kept only to tie the reader thread's lifetime to the port
    reader_handle: std::thread::JoinHandle<()>,
}

impl PnetEthernetPort {
    /// Opens a raw datalink channel on `iface_name` and spawns the
    /// background reader thread. Only HomePlug AV frames (EtherType
    /// `0x88E1`) are forwarded; everything else is dropped at the source.
    pub fn open(iface_name: &str) -> Result<Self, SlacError> {
        let interface = datalink::interfaces()
            .into_iter()
            .find(|i: &NetworkInterface| i.name == iface_name)
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no such interface: {iface_name}"),
                )
            })?;

        let local_mac = interface
            .mac
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "interface has no MAC address"))?
            .octets();

        let (datalink_tx, datalink_rx) = match datalink::channel(&interface, Default::default()) {
            Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
            Ok(_) => {
                return Err(SlacError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "unsupported datalink channel type",
                )))
            }
            Err(e) => return Err(SlacError::Io(e)),
        };

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let reader_handle = std::thread::spawn(move || Self::reader_loop(datalink_rx, frame_tx));

        Ok(PnetEthernetPort {
            local_mac,
            tx: Arc::new(Mutex::new(datalink_tx)),
            frame_rx: Mutex::new(frame_rx),
            reader_handle,
        })
    }

    fn reader_loop(
        mut rx: Box<dyn datalink::DataLinkReceiver>,
        frame_tx: mpsc::UnboundedSender<Vec<u8>>,
    ) {
        loop {
            match rx.next() {
                Ok(frame) => {
                    if frame.len() >= 14 {
                        let ether_type = u16::from_be_bytes([frame[12], frame[13]]);
                        if ether_type != ETH_TYPE_HPAV {
                            continue;
                        }
                    }
                    if frame_tx.send(frame.to_vec()).is_err() {
                        return; // port dropped
                    }
                }
                Err(_) => return,
            }
        }
    }
}

impl Drop for PnetEthernetPort {
    fn drop(&mut self) {
        // The reader thread exits on its own once the channel closes or the
        // interface errors; nothing to join eagerly here since `next()`
        // has no clean interrupt short of dropping the whole channel.
    }
}

#[async_trait]
impl EthernetPort for PnetEthernetPort {
    fn local_mac(&self) -> [u8; 6] {
        self.local_mac
    }

    async fn send_frame(&self, frame: &[u8]) -> Result<usize, SlacError> {
        let tx = Arc::clone(&self.tx);
        let frame = frame.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut guard = tx.lock().expect("datalink sender poisoned");
            match guard.send_to(&frame, None) {
                Some(Ok(())) => Ok(frame.len()),
                Some(Err(e)) => Err(SlacError::Io(e)),
                None => Err(SlacError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "datalink sender buffer full",
                ))),
            }
        })
        .await
        .expect("send_frame blocking task panicked")
    }

    async fn recv_frame(&self, expected_size: usize, timeout: Duration) -> Result<Vec<u8>, SlacError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(SlacError::Timeout("raw Ethernet frame"));
            }
            let frame = {
                let mut rx = self.frame_rx.lock().expect("frame channel poisoned");
                tokio::time::timeout(remaining, rx.recv())
                    .await
                    .map_err(|_| SlacError::Timeout("raw Ethernet frame"))?
                    .ok_or_else(|| {
                        SlacError::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "datalink reader thread exited",
                        ))
                    })?
            };
            if frame.len() >= expected_size {
                return Ok(frame);
            }
            // short frame on this interface's MTU padding — keep waiting
        }
    }

    fn reset(&self) -> Result<(), SlacError> {
        let mut rx = self.frame_rx.lock().expect("frame channel poisoned");
        while rx.try_recv().is_ok() {}
        Ok(())
    }
}
