use ip_ping_engine::ProbeOutcome;
use serde::Serialize;
use std::fmt;

/// Round trip statistics in milliseconds. All zero when nothing was received.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RttStats {
    pub min: i64,
    pub avg: f64,
    pub max: i64,
    pub median: f64,
    pub stddev: f64,
    pub jitter: f64,
}

impl RttStats {
    /// `rtts` must be in send order, jitter depends on it.
    pub fn from_series(rtts: &[i64]) -> Self {
        if rtts.is_empty() {
            return Self::default();
        }
        let n = rtts.len() as f64;
        let avg = rtts.iter().sum::<i64>() as f64 / n;
        let variance = rtts
            .iter()
            .map(|&rtt| (rtt as f64 - avg).powi(2))
            .sum::<f64>()
            / n;

        let mut sorted = rtts.to_vec();
        sorted.sort_unstable();
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
        } else {
            sorted[mid] as f64
        };

        let jitter = if rtts.len() > 1 {
            rtts.windows(2)
                .map(|pair| (pair[1] - pair[0]).abs())
                .sum::<i64>() as f64
                / (rtts.len() - 1) as f64
        } else {
            0.0
        };

        Self {
            min: sorted[0],
            avg,
            max: sorted[sorted.len() - 1],
            median,
            stddev: variance.sqrt(),
            jitter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub host: String,
    pub sent: u32,
    pub received: u32,
    /// Integer percentage.
    pub loss: u32,
    pub rtt: RttStats,
}

impl Summary {
    pub fn new(host: &str, sent: u32, rtts: &[i64]) -> Self {
        let received = rtts.len() as u32;
        let loss = if sent == 0 {
            100
        } else {
            100u32.saturating_sub(received.min(sent) * 100 / sent)
        };
        Self {
            host: host.to_string(),
            sent,
            received,
            loss,
            rtt: RttStats::from_series(rtts),
        }
    }

    pub fn from_probes(host: &str, probes: &[ProbeOutcome]) -> Self {
        let rtts: Vec<i64> = probes
            .iter()
            .filter(|probe| probe.success)
            .map(|probe| probe.rtt_ms)
            .collect();
        Self::new(host, probes.len() as u32, &rtts)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- {} ping statistics ---", self.host)?;
        write!(
            f,
            "{} packets transmitted, {} received, {}% packet loss",
            self.sent, self.received, self.loss
        )?;
        if self.received > 0 {
            let rtt = &self.rtt;
            write!(
                f,
                "\nrtt min/avg/max/median/mdev/jitter = {}/{:.3}/{}/{:.3}/{:.3}/{:.3} ms",
                rtt.min, rtt.avg, rtt.max, rtt.median, rtt.stddev, rtt.jitter
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ip_ping_engine::ProbeError;
    use std::time::Duration;

    #[test]
    fn empty_series() {
        assert_eq!(RttStats::from_series(&[]), RttStats::default());
    }

    #[test]
    fn series() {
        let stats = RttStats::from_series(&[10, 30, 20, 40]);
        assert_eq!(stats.min, 10);
        assert_eq!(stats.max, 40);
        assert_eq!(stats.avg, 25.0);
        assert_eq!(stats.median, 25.0);
        assert!((stats.stddev - 125f64.sqrt()).abs() < 1e-9);
        // |30-10| + |20-30| + |40-20| over 3
        assert!((stats.jitter - 50.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn odd_median_and_single_value() {
        assert_eq!(RttStats::from_series(&[9, 1, 5]).median, 5.0);
        let single = RttStats::from_series(&[7]);
        assert_eq!((single.min, single.max), (7, 7));
        assert_eq!(single.stddev, 0.0);
        assert_eq!(single.jitter, 0.0);
    }

    #[test]
    fn loss() {
        assert_eq!(Summary::new("h", 4, &[1, 2, 3]).loss, 25);
        assert_eq!(Summary::new("h", 3, &[1]).loss, 67);
        assert_eq!(Summary::new("h", 2, &[]).loss, 100);
        assert_eq!(Summary::new("h", 0, &[]).loss, 100);
        assert_eq!(Summary::new("h", 5, &[1, 1, 1, 1, 1]).loss, 0);
    }

    #[test]
    fn from_probes_counts_failures() {
        let probes = vec![
            ProbeOutcome::from(ProbeError::Timeout),
            ProbeOutcome::reply(Duration::from_millis(12), Some(60)),
            ProbeOutcome::reply(Duration::from_millis(8), Some(60)),
        ];
        let summary = Summary::from_probes("10.0.0.1", &probes);
        assert_eq!(summary.sent, 3);
        assert_eq!(summary.received, 2);
        assert_eq!(summary.loss, 34);
        assert_eq!(summary.rtt.min, 8);
        assert_eq!(summary.rtt.jitter, 4.0);
    }

    #[test]
    fn display() {
        let summary = Summary::new("10.0.0.1", 2, &[10, 20]);
        assert_eq!(
            summary.to_string(),
            "--- 10.0.0.1 ping statistics ---\n\
             2 packets transmitted, 2 received, 0% packet loss\n\
             rtt min/avg/max/median/mdev/jitter = 10/15.000/20/15.000/5.000/10.000 ms"
        );
        let lost = Summary::new("10.0.0.1", 1, &[]);
        assert_eq!(
            lost.to_string(),
            "--- 10.0.0.1 ping statistics ---\n1 packets transmitted, 0 received, 100% packet loss"
        );
    }
}
