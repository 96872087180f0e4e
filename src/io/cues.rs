//! Audio/lighting cue fan-out
//!
//! One ASCII letter per datagram, sent independently to the audio and the
//! lighting machine. Fire-and-forget: no retry, no acknowledgment.

use crate::domain::types::CueCode;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Log a failed cue send (cold path)
#[cold]
fn log_cue_failed(endpoint: &str, addr: &str, cue: CueCode, e: &std::io::Error) {
    warn!(endpoint = %endpoint, addr = %addr, cue = %cue, error = %e, "cue_send_failed");
}

pub struct CueFanout {
    /// None when cues are disabled
    socket: Option<UdpSocket>,
    endpoints: Vec<(&'static str, String)>,
    metrics: Arc<Metrics>,
}

impl CueFanout {
    /// Bind an ephemeral sending socket; a disabled fan-out never binds
    pub async fn bind(
        audio_addr: &str,
        lighting_addr: &str,
        enabled: bool,
        metrics: Arc<Metrics>,
    ) -> std::io::Result<Self> {
        let socket = if enabled { Some(UdpSocket::bind("0.0.0.0:0").await?) } else { None };
        let endpoints =
            vec![("audio", audio_addr.to_string()), ("lighting", lighting_addr.to_string())];

        info!(
            enabled = %enabled,
            audio = %audio_addr,
            lighting = %lighting_addr,
            "cue_fanout_ready"
        );
        Ok(Self { socket, endpoints, metrics })
    }

    pub async fn from_config(config: &Config, metrics: Arc<Metrics>) -> std::io::Result<Self> {
        Self::bind(config.audio_addr(), config.lighting_addr(), config.cues_enabled(), metrics).await
    }

    pub fn is_enabled(&self) -> bool {
        self.socket.is_some()
    }

    /// Send `cue` to every endpoint; returns how many sends succeeded
    pub async fn send(&self, cue: CueCode) -> usize {
        let Some(socket) = &self.socket else {
            debug!(cue = %cue, "cue_skipped_disabled");
            return 0;
        };

        let mut buf = [0u8; 4];
        let payload = cue.0.encode_utf8(&mut buf).as_bytes();

        let mut delivered = 0;
        for (endpoint, addr) in &self.endpoints {
            match socket.send_to(payload, addr.as_str()).await {
                Ok(_) => {
                    delivered += 1;
                    self.metrics.record_cue_sent();
                }
                Err(e) => {
                    self.metrics.record_cue_failed();
                    log_cue_failed(endpoint, addr, cue, &e);
                }
            }
        }

        info!(cue = %cue, delivered = %delivered, "cue_sent");
        delivered
    }
}
