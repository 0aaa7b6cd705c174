use backtrace::Backtrace;
use clap::{value_parser, Arg, ArgAction, Command};
use ringlog::*;

use std::path::PathBuf;
use std::time::Duration;

mod backend;
mod config;
mod dispatch;
mod query;
mod reshape;
mod server;

use config::Config;

fn main() {
    // custom panic hook to terminate whole process after unwinding
    std::panic::set_hook(Box::new(|s| {
        eprintln!("{s}");
        eprintln!("{:?}", Backtrace::new());
        std::process::exit(101);
    }));

    let args = command().get_matches();

    let mut config = match args.get_one::<PathBuf>("CONFIG") {
        Some(path) => Config::load(path).unwrap_or_else(|e| {
            eprintln!("{e}");
            std::process::exit(1);
        }),
        None => Config::default(),
    };

    if let Err(e) = config.apply_env() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    // configure debug log
    let level = config.log().level(args.get_count("VERBOSE"));

    let debug_output: Box<dyn Output> = Box::new(Stderr::new());

    let debug_log = if level <= Level::Info {
        LogBuilder::new().format(ringlog::default_format)
    } else {
        LogBuilder::new()
    }
    .output(debug_output)
    .build()
    .expect("failed to initialize debug log");

    let mut log = MultiLogBuilder::new()
        .level_filter(level.to_level_filter())
        .default(debug_log)
        .build()
        .start();

    // initialize async runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("sophos-telemetry")
        .build()
        .expect("failed to launch async runtime");

    // spawn logging thread
    rt.spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = log.flush();
        }
    });

    let (stop, mut stopped) = tokio::sync::watch::channel(false);

    ctrlc::set_handler(move || {
        let _ = stop.send(true);
    })
    .expect("failed to set termination handler");

    let shutdown = async move {
        let _ = stopped.changed().await;
        info!("received termination signal, shutting down");
    };

    info!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    if let Err(e) = rt.block_on(server::run(&config, shutdown)) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    // give the log drain a chance to flush the final messages
    std::thread::sleep(Duration::from_millis(100));
}

fn command() -> Command {
    Command::new(env!("CARGO_BIN_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_about(
            "Serves application traffic, cpu and memory usage as well as node \
            latency and resource availability, aggregated from a Prometheus \
            compatible metrics backend. The backend address may be overridden \
            with the PROMETHEUS_ADDRESS environment variable.",
        )
        .arg(
            Arg::new("CONFIG")
                .help("Server configuration file")
                .value_parser(value_parser!(PathBuf))
                .action(ArgAction::Set)
                .index(1),
        )
        .arg(
            Arg::new("VERBOSE")
                .long("verbose")
                .short('v')
                .help("Increase verbosity")
                .action(ArgAction::Count),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli() {
        command().debug_assert();

        let args = command().get_matches_from(["sophos-telemetry", "-vv", "server.toml"]);
        assert_eq!(args.get_count("VERBOSE"), 2);
        assert_eq!(
            args.get_one::<PathBuf>("CONFIG"),
            Some(&PathBuf::from("server.toml"))
        );

        let args = command().get_matches_from(["sophos-telemetry"]);
        assert!(args.get_one::<PathBuf>("CONFIG").is_none());
    }
}
