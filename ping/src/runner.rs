//! Normal and continuous ping modes on top of any `Prober`.

use crate::configuration::Configuration;
use crate::export;
use crate::stats::Summary;
use crate::terminal::{self, Palette};
use ip_ping_engine::{ping_host, PingOptions, PingResult, Prober};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::error;

/// Runs one `ping_host` off the runtime thread.
async fn ping<P>(prober: &Arc<P>, target: &str, options: &PingOptions) -> PingResult
where
    P: Prober + Send + Sync + 'static,
{
    let prober = prober.clone();
    let target = target.to_string();
    let options = options.clone();
    match tokio::task::spawn_blocking(move || ping_host(&*prober, &target, &options)).await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "ping task failed");
            PingResult::default()
        }
    }
}

fn prefix(conf: &Configuration) -> String {
    if conf.timestamp {
        terminal::timestamp()
    } else {
        String::new()
    }
}

async fn export(conf: &Configuration, summary: &Summary, result: Option<&PingResult>) {
    if let Some(export_conf) = &conf.export {
        if let Err(e) = export::export_summary(export_conf, summary).await {
            eprintln!("Failed to export to {}: {}", export_conf.path, e);
        }
    }
    if let (Some(path), Some(result)) = (&conf.probes_export, result) {
        let written = export::export_probes(path, conf.export_append, &conf.target, &result.probes);
        if let Err(e) = written.await {
            eprintln!("Failed to export to {}: {}", path, e);
        }
    }
}

/// `attempts()` calls to `ping_host`, merged. Exit code 0 if any reply came
/// back, 1 otherwise.
pub async fn run_attempts<P, W>(prober: &Arc<P>, conf: &Configuration, out: &mut W) -> io::Result<i32>
where
    P: Prober + Send + Sync + 'static,
    W: Write,
{
    let palette = Palette::new(conf.no_color);
    let total = conf.attempts();
    let verbose = !conf.quiet && !conf.summary;
    if verbose {
        writeln!(
            out,
            "Pinging {} with {} attempt(s), timeout={}ms",
            conf.target,
            total,
            conf.ping.timeout.as_millis()
        )?;
    }

    let mut result = PingResult::default();
    for _ in 0..total {
        let attempt = ping(prober, &conf.target, &conf.ping).await;
        if verbose {
            let first = result.probes.len();
            for (i, outcome) in attempt.probes.iter().enumerate() {
                if outcome.success {
                    writeln!(
                        out,
                        "{}{}Attempt {}: Reply, RTT={}ms, TTL={}{}",
                        prefix(conf),
                        palette.green(),
                        first + i + 1,
                        outcome.rtt_ms,
                        outcome.ttl,
                        palette.reset()
                    )?;
                } else {
                    writeln!(
                        out,
                        "{}{}Attempt {}: Failed ({}){}",
                        prefix(conf),
                        palette.red(),
                        first + i + 1,
                        outcome.error.as_deref().unwrap_or("unknown"),
                        palette.reset()
                    )?;
                }
            }
        }
        result.merge(attempt);
    }

    let summary = Summary::from_probes(&conf.target, &result.probes);
    export(conf, &summary, Some(&result)).await;

    if conf.summary {
        writeln!(out, "{}", summary)?;
    }
    if !result.reachable {
        writeln!(
            out,
            "{}Host {} not reachable{}",
            palette.red(),
            conf.target,
            palette.reset()
        )?;
        return Ok(1);
    }
    if !conf.summary {
        writeln!(
            out,
            "{}Reply from {} RTT={}ms TTL={}{}",
            palette.green(),
            conf.target,
            result.rtt_ms,
            result.ttl,
            palette.reset()
        )?;
    }
    Ok(0)
}

/// One `ping_host` per round, `interval` apart, until CTRL+C or `count`
/// rounds. A round counts as received if any of its attempts got a reply.
pub async fn run_continuous<P, W>(
    prober: &Arc<P>,
    conf: &Configuration,
    out: &mut W,
) -> io::Result<i32>
where
    P: Prober + Send + Sync + 'static,
    W: Write,
{
    let palette = Palette::new(conf.no_color);
    if !conf.quiet {
        writeln!(
            out,
            "Pinging {} continuously, interval={}ms (CTRL+C to stop)",
            conf.target,
            conf.interval.as_millis()
        )?;
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut sent = 0u32;
    let mut rtts = vec![];
    loop {
        if conf.count.map_or(false, |count| sent >= count) {
            break;
        }
        let round = tokio::select! {
            _ = &mut ctrl_c => break,
            round = ping(prober, &conf.target, &conf.ping) => round,
        };
        sent += 1;

        if round.reachable {
            rtts.push(round.rtt_ms);
            if !conf.quiet {
                writeln!(
                    out,
                    "{}{}Reply from {}: time={}ms TTL={}{}",
                    prefix(conf),
                    palette.green(),
                    conf.target,
                    round.rtt_ms,
                    round.ttl,
                    palette.reset()
                )?;
            }
        } else if !conf.quiet {
            writeln!(
                out,
                "{}{}Request timed out{}",
                prefix(conf),
                palette.red(),
                palette.reset()
            )?;
        }

        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = tokio::time::sleep(conf.interval) => {}
        }
    }

    let summary = Summary::new(&conf.target, sent, &rtts);
    writeln!(out)?;
    writeln!(out, "{}", summary)?;
    export(conf, &summary, None).await;
    Ok(0)
}
