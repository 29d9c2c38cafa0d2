use anyhow::Result;
use tracing::{metadata::LevelFilter, *};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

use crate::cli::manager::{self, Args};

// Start logger, should be done inside main
pub fn init(args: &Args) -> Result<()> {
    // Configure the console log
    let console_env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if args.verbose {
            EnvFilter::new(LevelFilter::DEBUG.to_string())
        } else {
            EnvFilter::new(LevelFilter::INFO.to_string())
        }
    });

    let console_layer = fmt::Layer::new()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(fmt::format::FmtSpan::NONE)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_filter(console_env_filter);

    // Configure the file log, records included
    let file_layer = args.log_path.as_ref().map(|dir| {
        let file_appender = tracing_appender::rolling::hourly(dir, "latency-tracer.log");
        fmt::Layer::new()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(fmt::format::FmtSpan::NONE)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_filter(EnvFilter::new(LevelFilter::TRACE.to_string()))
    });

    let subscriber = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        "{}, version: {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    );
    debug!("Command line call: {}", manager::command_line_string());
    debug!("Command line input struct call: {args:?}");

    Ok(())
}
