//! ==============================================================================
//! dashboard.rs - headless dashboard client
//! ==============================================================================
//!
//! purpose:
//!     runs the dashboard core against a live relay without a browser. every
//!     redraw is written as a plotly figure to `<out_dir>/<metric>.json`, and
//!     chart interactions are read from stdin, one per line:
//!
//!         zoom   <metric> <start> <end>
//!         pan    <metric> <start> <end>
//!         slider <metric> <start> <end>
//!         latest <metric>
//!         last   <metric> <n>
//!
//!     times are rfc 3339 or epoch milliseconds. eof on stdin exits.
//!
//! usage:
//!     soil-dashboard [out_dir]        (default: ./figures)
//!
//! ==============================================================================

use anyhow::{Context, Result};
use chrono::DateTime;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use soil_relay::config::RelayConfig;
use soil_relay::dashboard::client::RangeClient;
use soil_relay::dashboard::push::{run_push_feed, ws_url};
use soil_relay::dashboard::{DashboardDriver, Interaction, PlotlyTarget};
use soil_relay::domain::{Metric, TimestampMs};

fn parse_time(raw: &str) -> Result<TimestampMs, String> {
    if let Ok(ms) = raw.parse::<TimestampMs>() {
        return Ok(ms);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.timestamp_millis())
        .map_err(|e| format!("bad time {:?}: {}", raw, e))
}

fn parse_command(line: &str) -> Result<(Metric, Interaction), String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let (verb, rest) = words.split_first().ok_or("empty command")?;
    let metric: Metric = rest
        .first()
        .ok_or("missing metric")?
        .parse()
        .map_err(|e: soil_relay::error::UnknownMetric| e.to_string())?;

    let window = || -> Result<(TimestampMs, TimestampMs), String> {
        match rest {
            [_, start, end] => Ok((parse_time(start)?, parse_time(end)?)),
            _ => Err(format!("usage: {} <metric> <start> <end>", verb)),
        }
    };

    let interaction = match *verb {
        "zoom" => {
            let (start, end) = window()?;
            Interaction::Zoom { start, end }
        }
        "pan" => {
            let (start, end) = window()?;
            Interaction::Pan { start, end }
        }
        "slider" => {
            let (start, end) = window()?;
            Interaction::Slider { start, end }
        }
        "latest" => Interaction::ShowLatest,
        "last" => {
            let n = rest
                .get(1)
                .and_then(|n| n.parse().ok())
                .ok_or("usage: last <metric> <n>")?;
            Interaction::ShowLastN(n)
        }
        other => return Err(format!("unknown command: {}", other)),
    };
    Ok((metric, interaction))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = RelayConfig::load_or_default();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    config.log_summary();

    let settings = config.dashboard.clone();
    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("figures"));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    tracing::info!("[DASHBOARD] relay {} -> figures in {}", settings.relay_url, out_dir.display());

    let client = RangeClient::new(&settings.relay_url, &settings)?;
    let driver = DashboardDriver::new(&settings, client, PlotlyTarget::new(Some(out_dir)));

    // push feed
    let (push_tx, push_rx) = mpsc::channel(256);
    tokio::spawn(run_push_feed(
        ws_url(&settings.relay_url),
        Duration::from_millis(settings.reconnect_delay_ms),
        push_tx,
    ));

    // stdin interactions
    let (ui_tx, ui_rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line) {
                Ok(cmd) => {
                    if ui_tx.send(cmd).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("[DASHBOARD] {}", e),
            }
        }
    });

    let driver = driver.run(push_rx, ui_rx).await;
    tracing::info!("[DASHBOARD] exiting after {} draws", driver.target().draws());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command("zoom ph 1000 2000"),
            Ok((Metric::Ph, Interaction::Zoom { start: 1000, end: 2000 }))
        );
        assert_eq!(
            parse_command("slider temperatura 1970-01-01T00:00:01Z 1970-01-01T00:00:02.500Z"),
            Ok((Metric::Temperature, Interaction::Slider { start: 1000, end: 2500 }))
        );
        assert_eq!(parse_command("latest bateria"), Ok((Metric::Battery, Interaction::ShowLatest)));
        assert_eq!(parse_command("last pH 15"), Ok((Metric::Ph, Interaction::ShowLastN(15))));

        assert!(parse_command("zoom ph 1000").is_err());
        assert!(parse_command("latest ruido").is_err());
        assert!(parse_command("jump ph").is_err());
        assert!(parse_command("").is_err());
    }
}
