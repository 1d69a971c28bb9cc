// CLI entry point for the stand-in authoring server.
//
// Starts a feed and replays a scene script to viewers: every time a viewer
// joins, the whole script is broadcast again. Deltas carry complete object
// state, so viewers that already have the scene end up unchanged. Index
// requests are echoed by the feed itself (see `roster.rs`) and logged here.
//
// Usage:
//   geo-feed [OPTIONS]
//     --port <PORT>          Listen port (default: 12345)
//     --scene <PATH>         JSON array of server messages (default: demo scene)
//     --interval-ms <N>      Delay between broadcast packets (default: 100)
//     --max-viewers <N>      Reject viewers beyond N (default: unlimited)
//
// The process runs until killed.

use std::path::PathBuf;
use std::time::Duration;

use geo_stream_feed::script::{demo_scene, load_scene};
use geo_stream_feed::{FeedConfig, FeedEvent, FeedHandle, start_feed};
use geo_stream_protocol::ServerMessage;

struct Args {
    config: FeedConfig,
    scene: Option<PathBuf>,
    interval: Duration,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args();

    let scene = match &args.scene {
        Some(path) => load_scene(path).unwrap_or_else(|e| {
            log::error!("{e}");
            std::process::exit(1);
        }),
        None => demo_scene(),
    };

    let (handle, addr) = match start_feed(args.config) {
        Ok(result) => result,
        Err(e) => {
            log::error!("failed to start feed: {e}");
            std::process::exit(1);
        }
    };
    log::info!("feed on {addr} with {} scene packets", scene.len());

    loop {
        match handle.next_event(Duration::from_secs(1)) {
            Some(FeedEvent::Joined { viewer, greeting }) => {
                log::info!("{viewer} says {greeting:?}; replaying scene");
                replay(&handle, &scene, args.interval);
            }
            Some(FeedEvent::IndexRequested { viewer, update }) => {
                log::info!(
                    "{viewer} moved gate {} to {}",
                    update.gate_id,
                    update.index
                );
            }
            Some(FeedEvent::Left { viewer }) => {
                log::info!("{viewer} left; {} connected", handle.viewer_count());
            }
            None => {}
        }
    }
}

fn replay(handle: &FeedHandle, scene: &[ServerMessage], interval: Duration) {
    for msg in scene {
        if !handle.broadcast(msg.clone()) {
            return;
        }
        std::thread::sleep(interval);
    }
}

/// Parse command-line arguments. Plain `std::env::args()` matching.
fn parse_args() -> Args {
    let mut parsed = Args {
        config: FeedConfig::default(),
        scene: None,
        interval: Duration::from_millis(100),
    };
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                parsed.config.port =
                    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--port requires a valid port number");
                        std::process::exit(1);
                    });
            }
            "--scene" => {
                i += 1;
                parsed.scene = Some(args.get(i).map(PathBuf::from).unwrap_or_else(|| {
                    eprintln!("--scene requires a path");
                    std::process::exit(1);
                }));
            }
            "--interval-ms" => {
                i += 1;
                let ms: u64 = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--interval-ms requires a valid number");
                    std::process::exit(1);
                });
                parsed.interval = Duration::from_millis(ms);
            }
            "--max-viewers" => {
                i += 1;
                parsed.config.max_viewers =
                    Some(args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--max-viewers requires a valid number");
                        std::process::exit(1);
                    }));
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
    println!("Usage: geo-feed [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --port <PORT>          Listen port (default: 12345)");
    println!("  --scene <PATH>         JSON array of server messages (default: demo scene)");
    println!("  --interval-ms <N>      Delay between broadcast packets (default: 100)");
    println!("  --max-viewers <N>      Reject viewers beyond N (default: unlimited)");
    println!("  --help, -h             Show this help");
}
