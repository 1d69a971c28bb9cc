// CLI entry point for the headless viewer.
//
// Connects to an authoring server and mirrors its scene into an in-memory
// `RecordingScene`, ticking at roughly 60 Hz the way a render loop would.
// Pool sizes are logged whenever they change, which makes this useful for
// checking a server's stream without a renderer attached. See `session.rs`
// for the per-tick behavior.
//
// Usage:
//   geo-viewer [OPTIONS]
//     --config <PATH>   JSON viewer config (default: built-in defaults)
//     --addr <ADDR>     Server address, overrides the config
//     --ticks <N>       Stop after N ticks (default: run until disconnected)
//
// Logging goes through env_logger; set RUST_LOG=debug for per-packet detail.

use std::path::PathBuf;
use std::time::Duration;

use geo_stream_client::{ClientSession, RecordingScene, ViewerConfig};

const FRAME: Duration = Duration::from_millis(16);

struct Args {
    config: Option<PathBuf>,
    addr: Option<String>,
    ticks: Option<u64>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args();

    let mut config = match &args.config {
        Some(path) => ViewerConfig::load(path).unwrap_or_else(|e| {
            log::error!("{e}");
            std::process::exit(1);
        }),
        None => ViewerConfig::default(),
    };
    if let Some(addr) = args.addr {
        config.server_addr = addr;
    }
    config.connect_on_start = true;

    let mut session = ClientSession::tcp(config, RecordingScene::new());
    session.start();
    if !session.is_connected() {
        std::process::exit(1);
    }

    let mut last_sizes = session.engine().pool().sizes();
    let mut ticks = 0u64;
    while args.ticks.is_none_or(|limit| ticks < limit) {
        let report = session.tick();
        if report.offline {
            log::info!("connection closed after {ticks} ticks");
            break;
        }
        if let Some(index) = report.index {
            log::info!("streaming index is now {index}");
        }
        let sizes = session.engine().pool().sizes();
        if sizes != last_sizes {
            log::info!("pools: {sizes}");
            last_sizes = sizes;
        }
        ticks += 1;
        std::thread::sleep(FRAME);
    }

    let stats = session.stats();
    log::info!(
        "applied {} deltas, rejected {}, {} summaries, {} objects destroyed",
        stats.applied,
        stats.rejected,
        stats.summaries,
        stats.destroyed
    );
    session.disconnect();
}

/// Parse command-line arguments. Plain `std::env::args()` matching.
fn parse_args() -> Args {
    let mut parsed = Args {
        config: None,
        addr: None,
        ticks: None,
    };
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                parsed.config = Some(args.get(i).map(PathBuf::from).unwrap_or_else(|| {
                    eprintln!("--config requires a path");
                    std::process::exit(1);
                }));
            }
            "--addr" => {
                i += 1;
                parsed.addr = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--addr requires a value");
                    std::process::exit(1);
                }));
            }
            "--ticks" => {
                i += 1;
                parsed.ticks = Some(args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(
                    || {
                        eprintln!("--ticks requires a valid number");
                        std::process::exit(1);
                    },
                ));
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_usage() {
    println!("Usage: geo-viewer [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <PATH>   JSON viewer config");
    println!("  --addr <ADDR>     Server address (overrides the config)");
    println!("  --ticks <N>       Stop after N ticks");
    println!("  --help, -h        Show this help");
}
