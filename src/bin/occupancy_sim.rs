//! Occupancy report simulator
//!
//! Sends synthetic perception reports to the installation over UDP, for
//! on-site testing without the camera system.
//!
//! Every report lists regions "1".."4"; the chosen region carries `--count`
//! people, the others are empty.
//!
//! Usage:
//!   cargo run --bin occupancy-sim -- --region 2 --count 2
//!   cargo run --bin occupancy-sim -- --region 4 --count 5 --repeat 10 --interval-ms 500
//!   cargo run --bin occupancy-sim -- --raw '{not json'

use anyhow::Context;
use clap::Parser;
use iaoap::domain::types::{
    OccupancyReport, PeoplePosition, RegionSnapshot, ZoneEntry, REGION_PRIORITY,
};
use std::time::Duration;
use tokio::net::UdpSocket;

#[derive(Parser, Debug)]
#[command(name = "occupancy-sim")]
#[command(about = "Send synthetic occupancy reports to the installation")]
struct Args {
    /// Sensor listener address
    #[arg(short, long, default_value = "127.0.0.1:9999")]
    target: String,

    /// Region id to occupy ("1".."4")
    #[arg(short, long, default_value = "2")]
    region: String,

    /// People in the occupied region
    #[arg(short, long, default_value = "2")]
    count: u32,

    /// Number of reports to send
    #[arg(long, default_value = "1")]
    repeat: u32,

    /// Delay between reports (ms)
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Send this payload verbatim instead of a generated report
    #[arg(long)]
    raw: Option<String>,
}

fn build_report(region: &str, count: u32) -> OccupancyReport {
    let regions = REGION_PRIORITY
        .iter()
        .map(|&id| {
            let people = if id == region { count } else { 0 };
            let positions = (0..people as i32)
                .map(|i| PeoplePosition { x1: i * 40, y1: 20, x2: i * 40 + 30, y2: 120 })
                .collect();
            RegionSnapshot {
                id: id.to_string(),
                zones: vec![ZoneEntry { people_count: people, people_position: positions }],
            }
        })
        .collect();
    OccupancyReport { regions }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let payload = match &args.raw {
        Some(raw) => raw.clone().into_bytes(),
        None => serde_json::to_vec(&build_report(&args.region, args.count))
            .context("Failed to encode report")?,
    };

    let socket = UdpSocket::bind("0.0.0.0:0").await.context("Failed to bind UDP socket")?;

    println!("[SIM] Target:   {}", args.target);
    if args.raw.is_some() {
        println!("[SIM] Payload:  raw ({} bytes)", payload.len());
    } else {
        println!("[SIM] Region:   {} ({} people)", args.region, args.count);
    }

    for n in 1..=args.repeat {
        socket
            .send_to(&payload, args.target.as_str())
            .await
            .with_context(|| format!("Failed to send to {}", args.target))?;
        println!("[SIM] Sent report #{}", n);

        if n < args.repeat {
            tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_report_occupies_one_region() {
        let report = build_report("3", 2);
        assert_eq!(report.regions.len(), 4);
        assert_eq!(report.region("3").unwrap().people_count(), 2);
        assert_eq!(report.region("1").unwrap().people_count(), 0);
        assert_eq!(report.region("3").unwrap().zones[0].people_position.len(), 2);
    }

    #[test]
    fn test_report_survives_wire_format() {
        let bytes = serde_json::to_vec(&build_report("1", 4)).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains(r#""ID":"1""#));
        assert!(text.contains(r#""PeopleCount":4"#));
        assert_eq!(OccupancyReport::from_slice(&bytes).unwrap(), build_report("1", 4));
    }
}
