use crate::configuration::{ExportConfiguration, ExportFormat};
use crate::stats::Summary;
use ip_ping_engine::ProbeOutcome;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

const SUMMARY_HEADER: &str = "host,sent,received,loss,min,avg,max,median,stddev,jitter\n";
const PROBES_HEADER: &str = "host,idx,success,rtt_ms,ttl,error\n";

/// Opens `path` for writing and tells whether it already holds data, in
/// which case no CSV header should be written.
async fn open(path: &str, append: bool) -> std::io::Result<(File, bool)> {
    let file = if append {
        OpenOptions::new().create(true).append(true).open(path).await?
    } else {
        File::create(path).await?
    };
    let has_data = file.metadata().await?.len() > 0;
    Ok((file, has_data))
}

fn csv_field(value: &str) -> String {
    if value.contains(|c| c == ',' || c == '"' || c == '\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn summary_csv_row(summary: &Summary) -> String {
    let rtt = &summary.rtt;
    format!(
        "{},{},{},{},{},{:.3},{},{:.3},{:.3},{:.3}\n",
        csv_field(&summary.host),
        summary.sent,
        summary.received,
        summary.loss,
        rtt.min,
        rtt.avg,
        rtt.max,
        rtt.median,
        rtt.stddev,
        rtt.jitter
    )
}

pub async fn export_summary(conf: &ExportConfiguration, summary: &Summary) -> std::io::Result<()> {
    let (mut file, has_data) = open(&conf.path, conf.append).await?;
    let mut out = String::new();
    match conf.format {
        ExportFormat::Csv => {
            if !has_data {
                out.push_str(SUMMARY_HEADER);
            }
            out.push_str(&summary_csv_row(summary));
        }
        ExportFormat::Json => {
            out.push_str(&serde_json::to_string(summary)?);
            out.push('\n');
        }
    }
    file.write_all(out.as_bytes()).await?;
    file.flush().await
}

/// One CSV line per probe, numbered from 1 in send order.
pub async fn export_probes(
    path: &str,
    append: bool,
    host: &str,
    probes: &[ProbeOutcome],
) -> std::io::Result<()> {
    let (mut file, has_data) = open(path, append).await?;
    let mut out = String::new();
    if !has_data {
        out.push_str(PROBES_HEADER);
    }
    for (i, probe) in probes.iter().enumerate() {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            csv_field(host),
            i + 1,
            probe.success as u8,
            probe.rtt_ms,
            probe.ttl,
            csv_field(probe.error.as_deref().unwrap_or(""))
        ));
    }
    file.write_all(out.as_bytes()).await?;
    file.flush().await
}
