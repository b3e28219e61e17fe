use ip_ping_engine::PingOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

pub const USAGE: &str = "Usage:
  ping <ip> [options]

Options:
  -t, -W, --timeout <ms>   Timeout per probe (default 1000)
  -r, --retries <n>        Attempts per ping (default 1)
  --if <name>              Interface name or part of it
  -q, --quiet              Minimal output
  --summary                Only print statistics at the end
  --continuous             Ping until CTRL+C
  -i, --interval <ms>      Delay between pings in continuous mode (default 1000)
  -c, --count <n>          Number of pings
  -s, --size <bytes>       Echo payload size (default 0)
  --ttl <n>                IP time to live
  --timestamp              Prefix lines with the local time
  --no-color               Disable ANSI colors
  --csv <path>             Export the summary as CSV
  --json <path>            Export the summary as JSON
  --export <path>          Export the summary (see --format)
  --format <csv|json>      Export format
  --export-append          Append to the export file
  --export-probes <path>   Export every probe as CSV";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Result<Self, ()> {
        Ok(match s {
            "csv" => Self::Csv,
            "json" => Self::Json,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfiguration {
    pub path: String,
    pub format: ExportFormat,
    pub append: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub target: String,
    pub ping: PingOptions,
    pub quiet: bool,
    pub summary: bool,
    pub continuous: bool,
    pub timestamp: bool,
    pub interval: Duration,
    pub count: Option<u32>,
    pub no_color: bool,
    pub export: Option<ExportConfiguration>,
    pub probes_export: Option<String>,
    /// Applies to every export file.
    pub export_append: bool,
}

fn value<'a, I, T>(args: &mut I, flag: &str) -> Result<T, String>
where
    I: Iterator<Item = &'a String>,
    T: std::str::FromStr,
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    args.next()
        .ok_or(format!("Empty {} value", flag))?
        .parse::<T>()
        .map_err(|e| format!("Failed to parse {} value: {:?}", flag, e))
}

impl Configuration {
    /// Parses the arguments following the program name. Unknown flags are
    /// reported and skipped; out of range numbers are clamped.
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        let mut args = args.iter();
        let target = args.next().ok_or("Missing target IP")?.clone();
        if target.starts_with('-') {
            return Err(format!("Expected a target IP before options, got {}", target));
        }

        let mut ping = PingOptions::default();
        let mut quiet = false;
        let mut summary = false;
        let mut continuous = false;
        let mut timestamp = false;
        let mut interval = Duration::from_millis(1000);
        let mut count = None;
        let mut no_color = false;
        let mut export_path = None;
        let mut export_format = ExportFormat::Csv;
        let mut export_append = false;
        let mut probes_export = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-t" | "-W" | "--timeout" => {
                    ping.timeout = Duration::from_millis(value(&mut args, arg)?)
                }
                "-r" | "--retries" => ping.retries = value(&mut args, arg)?,
                "--if" => ping.interface = value(&mut args, arg)?,
                "-q" | "--quiet" => quiet = true,
                "--summary" => summary = true,
                "--continuous" => continuous = true,
                "-i" | "--interval" => {
                    let ms: u64 = value(&mut args, arg)?;
                    interval = Duration::from_millis(ms.max(1));
                }
                "-c" | "--count" => {
                    let n: i64 = value(&mut args, arg)?;
                    count = Some(n.max(1).min(i64::from(u32::MAX)) as u32);
                }
                "-s" | "--size" => {
                    let n: i64 = value(&mut args, arg)?;
                    ping.payload_size = n.max(0) as usize;
                }
                "--ttl" => {
                    let n: i64 = value(&mut args, arg)?;
                    ping.ttl = Some(n.max(1).min(255) as u8);
                }
                "--timestamp" => timestamp = true,
                "--no-color" => no_color = true,
                "--csv" => {
                    export_path = Some(value(&mut args, arg)?);
                    export_format = ExportFormat::Csv;
                }
                "--json" => {
                    export_path = Some(value(&mut args, arg)?);
                    export_format = ExportFormat::Json;
                }
                "--export" => export_path = Some(value(&mut args, arg)?),
                "--format" => {
                    let format: String = value(&mut args, arg)?;
                    match ExportFormat::from_str(&format) {
                        Ok(format) => export_format = format,
                        Err(_) => warn!(%format, "unknown export format"),
                    }
                }
                "--export-append" => export_append = true,
                "--export-probes" => probes_export = Some(value(&mut args, arg)?),
                unknown => warn!(argument = unknown, "unknown argument"),
            }
        }

        Ok(Self {
            target,
            ping,
            quiet,
            summary,
            continuous,
            timestamp,
            interval,
            count,
            no_color,
            export: export_path.map(|path| ExportConfiguration {
                path,
                format: export_format,
                append: export_append,
            }),
            probes_export,
            export_append,
        })
    }

    /// Pings made in normal mode: `count` if given, else one per retry.
    pub fn attempts(&self) -> u32 {
        self.count.unwrap_or_else(|| self.ping.retries.max(1))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn defaults() {
        let conf = Configuration::from_args(&args("192.0.2.1")).unwrap();
        assert_eq!(conf.target, "192.0.2.1");
        assert_eq!(conf.ping, PingOptions::default());
        assert_eq!(conf.interval, Duration::from_millis(1000));
        assert_eq!(conf.count, None);
        assert_eq!(conf.export, None);
        assert_eq!(conf.attempts(), 1);
        assert!(!conf.quiet && !conf.summary && !conf.continuous);
    }

    #[test]
    fn full_command_line() {
        let conf = Configuration::from_args(&args(
            "10.0.0.1 -W 250 -r 4 --if eth --summary -s 56 --ttl 12 --timestamp \
             --no-color --export out.json --format json --export-append",
        ))
        .unwrap();
        assert_eq!(conf.ping.timeout, Duration::from_millis(250));
        assert_eq!(conf.ping.retries, 4);
        assert_eq!(conf.ping.interface, "eth");
        assert_eq!(conf.ping.payload_size, 56);
        assert_eq!(conf.ping.ttl, Some(12));
        assert!(conf.summary && conf.timestamp && conf.no_color);
        assert_eq!(conf.attempts(), 4);
        assert_eq!(
            conf.export,
            Some(ExportConfiguration {
                path: "out.json".to_string(),
                format: ExportFormat::Json,
                append: true,
            })
        );
    }

    #[test]
    fn values_are_clamped() {
        let conf = Configuration::from_args(&args(
            "10.0.0.1 --continuous -i 0 -c -3 -s -10 --ttl 900",
        ))
        .unwrap();
        assert!(conf.continuous);
        assert_eq!(conf.interval, Duration::from_millis(1));
        assert_eq!(conf.count, Some(1));
        assert_eq!(conf.ping.payload_size, 0);
        assert_eq!(conf.ping.ttl, Some(255));

        let conf = Configuration::from_args(&args("10.0.0.1 --ttl 0")).unwrap();
        assert_eq!(conf.ping.ttl, Some(1));
    }

    #[test]
    fn count_overrides_retries() {
        let conf = Configuration::from_args(&args("10.0.0.1 -r 3 -c 7")).unwrap();
        assert_eq!(conf.attempts(), 7);
    }

    #[test]
    fn later_shortcut_wins() {
        let conf = Configuration::from_args(&args("10.0.0.1 --json a.json --csv b.csv")).unwrap();
        let export = conf.export.unwrap();
        assert_eq!(export.path, "b.csv");
        assert_eq!(export.format, ExportFormat::Csv);
        assert!(!export.append);
    }

    #[test]
    fn append_applies_to_probes_export_alone() {
        let conf =
            Configuration::from_args(&args("10.0.0.1 --export-probes p.csv --export-append"))
                .unwrap();
        assert_eq!(conf.export, None);
        assert_eq!(conf.probes_export.as_deref(), Some("p.csv"));
        assert!(conf.export_append);
    }

    #[test]
    fn unknown_arguments_are_skipped() {
        let conf = Configuration::from_args(&args("10.0.0.1 --bogus -q --format xml")).unwrap();
        assert!(conf.quiet);
        assert_eq!(conf.export, None);
    }

    #[test]
    fn errors() {
        assert!(Configuration::from_args(&[]).is_err());
        assert!(Configuration::from_args(&args("--timeout 5")).is_err());
        assert_eq!(
            Configuration::from_args(&args("10.0.0.1 --timeout")).unwrap_err(),
            "Empty --timeout value"
        );
        assert!(Configuration::from_args(&args("10.0.0.1 -t soon")).is_err());
    }

    #[test]
    fn serializes() {
        let conf = Configuration::from_args(&args("10.0.0.1 --csv out.csv")).unwrap();
        let json = serde_json::to_string(&conf).unwrap();
        let back: Configuration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, conf);
    }
}
