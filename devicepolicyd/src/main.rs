//! # Device Policy Daemon
//!
//! Main entry point for the device policy host.

use core_types::UserId;
use devicepolicyd::{Daemon, DaemonConfig, StoreMode};
use std::env;
use std::path::PathBuf;
use std::process;
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

struct Args {
    daemon: DaemonConfig,
    log_level: String,
    print_dump: bool,
}

fn main() {
    let args: Vec<String> = env::args().collect();

    let parsed = parse_args(&args).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        print_usage(&args[0]);
        process::exit(1);
    });

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&parsed.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let daemon = Daemon::new(parsed.daemon).unwrap_or_else(|e| {
        error!(error = %e, "failed to start device policy service");
        process::exit(1);
    });

    match daemon.run() {
        Ok(dump) => {
            if parsed.print_dump {
                print!("{}", dump);
            }
        }
        Err(e) => {
            error!(error = %e, "startup pass failed");
            process::exit(1);
        }
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args {
        daemon: DaemonConfig::default(),
        log_level: "info".to_string(),
        print_dump: false,
    };
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                let path = args.get(i).ok_or("Missing value for --config")?;
                parsed.daemon.config_path = Some(PathBuf::from(path));
            }
            "--base-dir" => {
                i += 1;
                let path = args.get(i).ok_or("Missing value for --base-dir")?;
                parsed.daemon.base_dir = Some(PathBuf::from(path));
            }
            "--ephemeral" => {
                parsed.daemon.store = StoreMode::Ephemeral;
            }
            "--dump" => {
                i += 1;
                let user = args.get(i).ok_or("Missing value for --dump")?;
                let user: u32 = user
                    .parse()
                    .map_err(|_| format!("Invalid user id: {}", user))?;
                parsed.daemon.dump_users.push(UserId::new(user));
                parsed.print_dump = true;
            }
            "--log-level" => {
                i += 1;
                parsed.log_level = args.get(i).ok_or("Missing value for --log-level")?.clone();
            }
            "--help" | "-h" => {
                print_usage(&args[0]);
                process::exit(0);
            }
            other => {
                return Err(format!("Unknown option: {}", other));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [OPTIONS]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <FILE>      Service configuration (JSON)");
    eprintln!("  --base-dir <DIR>         Journal directory, overrides the config file");
    eprintln!("  --ephemeral              Keep records in memory only");
    eprintln!("  --dump <USER>            Load a user and print the service state");
    eprintln!("  --log-level <FILTER>     Log filter when RUST_LOG is unset (default: info)");
    eprintln!("  -h, --help               Show this help message");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} --config /etc/devicepolicy.json", program);
    eprintln!("  {} --ephemeral --dump 0", program);
}
