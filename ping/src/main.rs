mod configuration;
mod export;
mod runner;
mod stats;
mod terminal;

use configuration::{Configuration, USAGE};
use ip_ping_engine::{Engine, SystemOpener};
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let conf = match Configuration::from_args(&args) {
        Ok(conf) => conf,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    let engine = Arc::new(Engine::new(SystemOpener::new()));
    if let Err(e) = engine.start(&conf.ping.interface) {
        eprintln!("Failed to start ICMP engine: {}", e);
        std::process::exit(3);
    }

    let mut out = std::io::stdout();
    let run = if conf.continuous {
        runner::run_continuous(&engine, &conf, &mut out).await
    } else {
        runner::run_attempts(&engine, &conf, &mut out).await
    };
    let code = run.unwrap_or_else(|e| {
        eprintln!("Failed to write output: {}", e);
        1
    });

    let _ = out.flush();
    engine.stop();
    std::process::exit(code);
}
