//! UDP listener for occupancy reports
//!
//! One JSON report per datagram. Each loop iteration first drops whatever is
//! already queued on the socket (reports that piled up during the previous
//! reaction), then waits for a fresh datagram and hands it to the handler.
//! Only one report is handled at a time.
//!
//! The listener runs until its cancel signal flips to `true`, including while
//! a report is being handled.

use crate::domain::types::OccupancyReport;
use crate::infra::metrics::Metrics;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Receive buffer size (max UDP payload rounded up)
const RECV_BUFFER: usize = 64 * 1024;

/// Consumer of decoded reports
#[async_trait]
pub trait ReportHandler: Send + Sync {
    async fn handle(&self, report: OccupancyReport);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListenerStats {
    /// Datagrams taken by the blocking receive
    pub received: u64,
    pub decoded: u64,
    pub rejected: u64,
    /// Datagrams discarded by the pre-receive drain
    pub stale_dropped: u64,
}

pub struct SensorListener {
    socket: UdpSocket,
    metrics: Arc<Metrics>,
}

/// Log a datagram that failed to decode (cold path)
#[cold]
fn log_decode_failed(peer: SocketAddr, len: usize, e: &serde_json::Error) {
    warn!(peer = %peer, bytes = %len, error = %e, "report_decode_failed");
}

impl SensorListener {
    pub async fn bind(addr: &str, metrics: Arc<Metrics>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket, metrics })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive and dispatch reports until cancelled; the socket closes on return
    pub async fn run<H>(self, handler: &H, mut cancel: watch::Receiver<bool>) -> ListenerStats
    where
        H: ReportHandler + ?Sized,
    {
        let mut stats = ListenerStats::default();
        let mut buf = vec![0u8; RECV_BUFFER];

        if let Ok(addr) = self.socket.local_addr() {
            info!(addr = %addr, "sensor_listener_started");
        }

        loop {
            if *cancel.borrow() {
                break;
            }

            let stale = self.drain_stale(&mut buf);
            if stale > 0 {
                stats.stale_dropped += stale;
                self.metrics.record_stale_dropped(stale);
                debug!(count = %stale, "stale_reports_dropped");
            }

            let (len, peer) = tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                    continue;
                }
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(error = %e, "sensor_recv_failed");
                        continue;
                    }
                }
            };
            stats.received += 1;

            let report = match OccupancyReport::from_slice(&buf[..len]) {
                Ok(report) => report,
                Err(e) => {
                    stats.rejected += 1;
                    self.metrics.record_report_rejected();
                    log_decode_failed(peer, len, &e);
                    continue;
                }
            };
            stats.decoded += 1;
            self.metrics.record_report_received();
            debug!(peer = %peer, regions = %report.regions.len(), "report_received");

            tokio::select! {
                _ = cancel.changed() => {
                    info!("sensor_listener_cancelled_mid_reaction");
                    break;
                }
                _ = handler.handle(report) => {}
            }
        }

        info!(
            received = %stats.received,
            decoded = %stats.decoded,
            rejected = %stats.rejected,
            stale_dropped = %stats.stale_dropped,
            "sensor_listener_stopped"
        );
        stats
    }

    /// Discard every datagram already queued on the socket
    fn drain_stale(&self, buf: &mut [u8]) -> u64 {
        let mut dropped = 0;
        loop {
            match self.socket.try_recv_from(buf) {
                Ok(_) => dropped += 1,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "sensor_drain_failed");
                    break;
                }
            }
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Records region ids of handled reports; optionally blocks forever
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        handled: Notify,
        block: bool,
    }

    #[async_trait]
    impl ReportHandler for Recorder {
        async fn handle(&self, report: OccupancyReport) {
            let ids = report.regions.iter().map(|r| r.id.clone()).collect::<Vec<_>>().join(",");
            self.seen.lock().push(ids);
            self.handled.notify_one();
            if self.block {
                std::future::pending::<()>().await;
            }
        }
    }

    fn report(id: &str, count: u32) -> Vec<u8> {
        format!(r#"[{{"ID": "{}", "Zone": [{{"PeopleCount": {}, "PeoplePosition": []}}]}}]"#, id, count)
            .into_bytes()
    }

    async fn setup() -> (SensorListener, UdpSocket, SocketAddr) {
        let listener =
            SensorListener::bind("127.0.0.1:0", Arc::new(Metrics::new())).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (listener, sender, addr)
    }

    #[tokio::test]
    async fn test_routes_reports_and_skips_malformed() {
        let (listener, sender, addr) = setup().await;
        let recorder = Arc::new(Recorder::default());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let handler = recorder.clone();
        let task = tokio::spawn(async move { listener.run(handler.as_ref(), cancel_rx).await });

        // Let the listener reach its blocking receive before sending
        tokio::time::sleep(Duration::from_millis(50)).await;
        sender.send_to(b"{not json", addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        sender.send_to(&[0xff, 0xfe, 0x00], addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        sender.send_to(&report("2", 2), addr).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), recorder.handled.notified()).await.unwrap();

        cancel_tx.send(true).unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();

        assert_eq!(recorder.seen.lock().clone(), vec!["2".to_string()]);
        assert_eq!(stats.received, 3);
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.decoded, 1);
    }

    #[tokio::test]
    async fn test_stale_datagrams_are_dropped() {
        let (listener, sender, addr) = setup().await;

        // Queued before the listener starts receiving
        for id in ["1", "2", "3"] {
            sender.send_to(&report(id, 1), addr).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let recorder = Arc::new(Recorder::default());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handler = recorder.clone();
        let task = tokio::spawn(async move { listener.run(handler.as_ref(), cancel_rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        sender.send_to(&report("4", 1), addr).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), recorder.handled.notified()).await.unwrap();

        cancel_tx.send(true).unwrap();
        let stats = task.await.unwrap();
        assert_eq!(stats.stale_dropped, 3);
        assert_eq!(recorder.seen.lock().clone(), vec!["4".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_while_idle() {
        let (listener, _sender, _addr) = setup().await;
        let recorder = Recorder::default();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let stop = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_tx.send(true).unwrap();
        };
        let (stats, ()) = tokio::time::timeout(
            Duration::from_secs(2),
            async { tokio::join!(listener.run(&recorder, cancel_rx), stop) },
        )
        .await
        .unwrap();
        assert_eq!(stats, ListenerStats::default());
    }

    #[tokio::test]
    async fn test_cancel_mid_reaction() {
        let (listener, sender, addr) = setup().await;
        let recorder = Arc::new(Recorder { block: true, ..Recorder::default() });
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let handler = recorder.clone();
        let task = tokio::spawn(async move { listener.run(handler.as_ref(), cancel_rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        sender.send_to(&report("1", 3), addr).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), recorder.handled.notified()).await.unwrap();

        cancel_tx.send(true).unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert_eq!(stats.decoded, 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_returns_immediately() {
        let (listener, _sender, _addr) = setup().await;
        let (_cancel_tx, cancel_rx) = watch::channel(true);
        let stats = listener.run(&Recorder::default(), cancel_rx).await;
        assert_eq!(stats, ListenerStats::default());
    }
}
