//! Statistics display and formatting

use duckov_net::SessionStats;
use std::time::Duration;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a millisecond latency, `N/A` when unknown
pub fn format_latency(latency_ms: Option<u32>) -> String {
    match latency_ms {
        Some(ms) if ms >= 1000 => format!("{:.2}s", ms as f64 / 1000.0),
        Some(ms) => format!("{}ms", ms),
        None => "N/A".to_string(),
    }
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Display full session statistics
pub fn display_session_stats(label: &str, stats: &SessionStats) {
    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ SESSION {:<52}│", label);
    println!("├─────────────────────────────────────────────────────────────┤");
    println!(
        "│ Datagrams: {} sent / {} received",
        stats.datagrams_sent, stats.datagrams_received
    );
    println!(
        "│ Bytes:     {} sent / {} received",
        format_bytes(stats.bytes_sent),
        format_bytes(stats.bytes_received)
    );
    println!(
        "│ Reliable:  {} sent / {} received",
        stats.reliable_sent, stats.reliable_received
    );
    println!(
        "│ Unreliable: {} sent / {} received",
        stats.unreliable_sent, stats.unreliable_received
    );
    println!("│ Latency:   {}", format_latency(stats.latency_ms));
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ ARQ                                                         │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!(
        "│ SRTT: {}ms  RTTVAR: {}ms  RTO: {}ms",
        stats.kcp.srtt, stats.kcp.rttval, stats.kcp.rto
    );
    println!(
        "│ In flight: {}  Queued: {}  Retransmits: {} (+{} fast)",
        stats.kcp.inflight,
        stats.kcp.send_queue,
        stats.kcp.retransmissions,
        stats.kcp.fast_retransmissions
    );
    println!("└─────────────────────────────────────────────────────────────┘");
}

/// One-line stats summary (for continuous updates)
pub fn display_compact_stats(stats: &SessionStats, elapsed: Duration) -> String {
    format!(
        "[{:8}] Sent: {} | Recv: {} | Latency: {} | RTO: {}ms | Retransmits: {}",
        format_duration(elapsed),
        format_bytes(stats.bytes_sent),
        format_bytes(stats.bytes_received),
        format_latency(stats.latency_ms),
        stats.kcp.rto,
        stats.kcp.retransmissions
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(2 * 1024 * 1024), "2.00 MB");
    }

    #[test]
    fn test_format_latency() {
        assert_eq!(format_latency(None), "N/A");
        assert_eq!(format_latency(Some(42)), "42ms");
        assert_eq!(format_latency(Some(2500)), "2.50s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 01m 01s");
    }

    #[test]
    fn test_compact_stats() {
        let stats = SessionStats {
            bytes_sent: 2048,
            latency_ms: Some(12),
            ..Default::default()
        };
        let line = display_compact_stats(&stats, Duration::from_secs(61));
        assert!(line.contains("2.00 KB"));
        assert!(line.contains("12ms"));
        assert!(line.contains("1m 01s"));
    }
}
