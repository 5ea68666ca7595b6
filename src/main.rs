mod app;
mod config;
mod shutdown;

use anyhow::Result;
use clap::{Arg, ArgMatches, Command};

use app::{AppMode, Application};
use config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    let (mode, sub) = match matches.subcommand() {
        Some(("api", sub)) => (
            AppMode::Api {
                host: sub.get_one::<String>("host").unwrap().clone(),
                port: *sub.get_one::<u16>("port").unwrap(),
            },
            sub,
        ),
        Some(("worker", sub)) => (AppMode::Worker, sub),
        Some(("scheduler", sub)) => (
            AppMode::Scheduler {
                tick_seconds: *sub.get_one::<u64>("tick").unwrap(),
            },
            sub,
        ),
        Some(("reaper", sub)) => (
            AppMode::Reaper {
                interval_seconds: sub.get_one::<u64>("interval").copied(),
            },
            sub,
        ),
        _ => unreachable!("subcommand required"),
    };

    init_logging(sub);

    let config = AppConfig::from_env()?;
    Application::new(config).run(mode).await
}

fn build_cli() -> Command {
    let common = |cmd: Command| {
        cmd.arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level filter")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("Log output format")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
    };

    Command::new("taskhub")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Single-host task execution platform")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(common(
            Command::new("api")
                .about("Serve the HTTP API")
                .arg(
                    Arg::new("host")
                        .long("host")
                        .value_name("HOST")
                        .default_value("127.0.0.1"),
                )
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .value_parser(clap::value_parser!(u16))
                        .default_value("8000"),
                ),
        ))
        .subcommand(common(
            Command::new("worker").about("Run a worker process (one run at a time)"),
        ))
        .subcommand(common(
            Command::new("scheduler")
                .about("Run the cron scheduler")
                .arg(
                    Arg::new("tick")
                        .long("tick")
                        .value_name("SECONDS")
                        .help("Scheduler tick interval")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("1"),
                ),
        ))
        .subcommand(common(
            Command::new("reaper")
                .about("Run the lease reaper")
                .arg(
                    Arg::new("interval")
                        .long("interval")
                        .value_name("SECONDS")
                        .help("Sweep interval (overrides TASKHUB_REAPER_INTERVAL_SECONDS)")
                        .value_parser(clap::value_parser!(u64)),
                ),
        ))
}

fn init_logging(matches: &ArgMatches) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = matches.get_one::<String>("log-level").unwrap();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("taskhub={level},{level}")));

    let registry = tracing_subscriber::registry().with(filter);
    match matches.get_one::<String>("log-format").map(String::as_str) {
        Some("json") => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        _ => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
