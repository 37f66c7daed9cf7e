use clap::Parser;

/// EVSE-side SLAC (ISO 15118-3) matching bridge — pairs with a nearby EV
/// over HomePlug Green PHY and hands off to ISO 15118-2 once matched.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Config {
    /// Network interface carrying HomePlug AV traffic (EtherType 0x88E1)
    #[arg(long, env = "SLAC_IFACE", default_value = "eth0")]
    pub iface: String,

    /// EVSE station identifier, ASCII, padded/truncated to 17 bytes
    #[arg(long, env = "SLAC_EVSE_ID", default_value = "EVSE-0000000000001")]
    pub evse_id: String,

    /// Local PLC modem MAC address, colon-separated hex (identifies the
    /// HomePlug modem this host drives CM_SET_KEY / LINK_STATUS against)
    #[arg(long, env = "SLAC_EVSE_PLC_MAC", default_value = "00:b0:52:00:00:01")]
    pub evse_plc_mac: String,

    /// How long to poll for the opening CM_SLAC_PARM.REQ before returning
    /// to the supervisor for another attempt, in milliseconds
    #[arg(long, env = "SLAC_INIT_TIMEOUT", default_value_t = 50)]
    pub slac_init_timeout_ms: u64,

    /// Stats logging interval in seconds (0 = disabled)
    #[arg(long, default_value_t = 10)]
    pub stats_interval_secs: u64,

    // ── Telemetry (optional MQTT sink) ──────────────────────────────────
    /// Enable fire-and-forget MQTT telemetry of session events
    #[arg(long, default_value_t = false)]
    pub telemetry_enabled: bool,

    /// MQTT broker host
    #[arg(long, env = "SLAC_MQTT_HOST", default_value = "localhost")]
    pub mqtt_host: String,

    /// MQTT broker port
    #[arg(long, env = "SLAC_MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    /// MQTT client id
    #[arg(long, default_value = "slac-evse-bridge")]
    pub mqtt_client_id: String,

    /// MQTT topic session events are published to
    #[arg(long, default_value = "slac/evse/events")]
    pub mqtt_topic: String,

    /// MQTT keep-alive, seconds
    #[arg(long, default_value_t = 30)]
    pub mqtt_keep_alive_secs: u32,
}

impl Config {
    pub fn slac_init_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.slac_init_timeout_ms)
    }

    /// Pads or truncates the configured EVSE id to the 17-byte wire field.
    pub fn evse_id_bytes(&self) -> [u8; 17] {
        let mut out = [0u8; 17];
        let src = self.evse_id.as_bytes();
        let n = src.len().min(17);
        out[..n].copy_from_slice(&src[..n]);
        out
    }

    pub fn evse_plc_mac_bytes(&self) -> anyhow::Result<[u8; 6]> {
        parse_mac(&self.evse_plc_mac)
    }
}

fn parse_mac(s: &str) -> anyhow::Result<[u8; 6]> {
    let mut out = [0u8; 6];
    let mut parts = s.split(':');
    for byte in out.iter_mut() {
        let part = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("MAC address '{s}' has too few octets"))?;
        *byte = u8::from_str_radix(part, 16)
            .map_err(|_| anyhow::anyhow!("invalid hex octet '{part}' in MAC address '{s}'"))?;
    }
    if parts.next().is_some() {
        anyhow::bail!("MAC address '{s}' has too many octets");
    }
    Ok(out)
}
