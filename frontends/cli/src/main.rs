use clap::Parser;
use std::fs::OpenOptions;
use std::process::ExitCode;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::StreamExt;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use studyboard_api::ClientError;
use studyboard_cli::{connect, Args, Console, ConsoleConfig};
use studyboard_core::Notice;

fn init_logging(args: &Args) {
    // Default to INFO level, can be overridden with RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_file = args.log_file.as_ref().and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                eprintln!(
                    "Warning: Could not open log file {:?} ({}), logging to stderr",
                    path, e
                )
            })
            .ok()
    });

    match log_file {
        Some(file) => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(file).with_ansi(false))
            .init(),
        None => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

fn print_notice(notice: Result<Notice, BroadcastStreamRecvError>) {
    match notice {
        Ok(Notice::Info(message)) => eprintln!("{}", message),
        Ok(Notice::Error(message)) => eprintln!("! {}", message),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!("[Console] {} notices were dropped", skipped)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_logging(&args);

    let config = match ConsoleConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let backend = match connect(&args, &config).await {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let console = Console::new(backend);
    let mut notices = console.notices().stream();
    let result = {
        let run = console.run(&args.command);
        tokio::pin!(run);
        loop {
            tokio::select! {
                result = &mut run => break result,
                Some(notice) = notices.next() => print_notice(notice),
            }
        }
    };
    // Dropping the console closes the channel, so the stream ends after the backlog
    drop(console);
    while let Some(notice) = notices.next().await {
        print_notice(notice);
    }

    match result {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if let Some(ClientError::Authentication { .. }) = e.downcast_ref::<ClientError>() {
                eprintln!("{}", config.login_hint());
            }
            ExitCode::FAILURE
        }
    }
}
