//! Optional fire-and-forget MQTT telemetry of session events.
//!
//! Adapted from the teacher's `mqtt_publisher`: one QoS 0 connection, a
//! monotonic event counter, best-effort delivery — a dropped publish never
//! blocks or fails the matching session that produced it.

use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlacEventType {
    ParmMatched,
    SoundingComplete,
    Matched,
    Reset,
    LinkDown,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlacEvent {
    pub counter: u64,
    pub event_type: SlacEventType,
    pub run_id_hex: String,
    pub pev_mac_hex: String,
}

/// Monotonic counter shared by every event emitted on this bridge, mirroring
/// the session record's `mqtt_msg_counter` field.
pub struct TelemetrySink {
    counter: AtomicU64,
    tx: mpsc::Sender<SlacEvent>,
}

impl TelemetrySink {
    pub fn next_event(&self, event_type: SlacEventType, run_id: [u8; 8], pev_mac: [u8; 6]) {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let event = SlacEvent {
            counter,
            event_type,
            run_id_hex: hex_string(&run_id),
            pev_mac_hex: hex_string(&pev_mac),
        };
        // best-effort: a full channel just drops the event rather than
        // ever blocking the matching state machine on telemetry
        let _ = self.tx.try_send(event);
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Spawns the MQTT client (one connection, QoS 0 fire-and-forget) and
/// returns a [`TelemetrySink`] handle plus the two background task handles
/// driving the publisher and the rumqttc event loop.
pub fn spawn_telemetry(
    config: &Config,
) -> (Arc<TelemetrySink>, tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
    let mut mqtt_opts = MqttOptions::new(&config.mqtt_client_id, &config.mqtt_host, config.mqtt_port);
    mqtt_opts.set_keep_alive(Duration::from_secs(config.mqtt_keep_alive_secs as u64));
    mqtt_opts.set_inflight(u16::MAX);
    mqtt_opts.set_clean_session(true);

    let (client, eventloop) = AsyncClient::new(mqtt_opts, 1024);
    let (tx, mut rx) = mpsc::channel(1024);

    let eventloop_handle = tokio::spawn(mqtt_eventloop_task(eventloop));

    let topic = config.mqtt_topic.clone();
    let publish_handle = tokio::spawn(async move {
        info!("telemetry publisher started");
        while let Some(event) = rx.recv().await {
            let payload = match serde_json::to_vec(&event) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(error = %e, "failed to serialize SLAC telemetry event");
                    continue;
                }
            };
            if let Err(e) = client.publish(&topic, QoS::AtMostOnce, false, payload).await {
                debug!(error = %e, "telemetry publish error");
            }
        }
        warn!("telemetry channel closed, shutting down");
    });

    (Arc::new(TelemetrySink { counter: AtomicU64::new(0), tx }), publish_handle, eventloop_handle)
}

async fn mqtt_eventloop_task(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(event) => {
                debug!(event = ?event, "MQTT event");
            }
            Err(e) => {
                error!(error = %e, "MQTT connection error, reconnecting in 1s");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
