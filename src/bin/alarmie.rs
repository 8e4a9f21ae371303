//! Connect to the chat gateway and log every message that arrives.
//!
//! # Usage
//!
//! ```bash
//! export SLACK_ALARMIE_TOKEN=xoxb-...
//! export ALARMIE_LOGFILEPATH=/var/log/alarmie.log
//! alarmie --channel C024BE91L --ping-interval 30
//! ```
//!
//! Ctrl+C closes the session and exits.

use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use arrrg::CommandLine;
use tokio::sync::Notify;

use alarmie::{AlarmieArgs, Config, ConnectionManager, LogfmtLogger, Logger, credential_from_env};

#[tokio::main]
async fn main() -> ExitCode {
    let (args, _) = AlarmieArgs::from_command_line_relaxed("alarmie [OPTIONS]");
    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("alarmie: {err}");
            return ExitCode::FAILURE;
        }
    };
    let logger = match open_logger(&config) {
        Ok(logger) => logger,
        Err(err) => {
            eprintln!("alarmie: {err}");
            return ExitCode::FAILURE;
        }
    };
    logger.warn("Started application", &[]);

    match run(&config, Arc::clone(&logger)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logger.critical("exiting", &[("error", &err)]);
            eprintln!("alarmie: {err}");
            ExitCode::FAILURE
        }
    }
}

fn open_logger(config: &Config) -> alarmie::Result<Arc<dyn Logger>> {
    let path = config.log_file_path()?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| alarmie::Error::io(format!("could not open {}", path.display()), e))?;
    Ok(Arc::new(LogfmtLogger::with_min_level(
        file,
        config.log_level()?,
    )))
}

async fn run(config: &Config, logger: Arc<dyn Logger>) -> alarmie::Result<()> {
    let credential = credential_from_env()?;
    let manager = ConnectionManager::from_config(config, Arc::clone(&logger))?;
    let session = Arc::new(config.retry_policy().connect(&manager, &credential).await?);

    let interrupted = Arc::new(Notify::new());
    let interrupted_clone = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        interrupted_clone.notify_one();
    })
    .map_err(|e| alarmie::Error::config(format!("could not install signal handler: {e}"), None))?;

    let closer = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            interrupted.notified().await;
            session.close().await;
        })
    };

    let pinger = config
        .ping_interval()
        .map(|interval| tokio::spawn(keep_alive(Arc::clone(&session), interval)));

    let result = receive_loop(&session, logger.as_ref()).await;
    session.close().await;
    closer.abort();
    if let Some(pinger) = pinger {
        pinger.abort();
    }
    result
}

async fn keep_alive(session: Arc<alarmie::SessionContext>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if session.ping().await.is_err() {
            break;
        }
    }
}

async fn receive_loop(
    session: &alarmie::SessionContext,
    logger: &dyn Logger,
) -> alarmie::Result<()> {
    loop {
        match session.receive().await {
            Ok(message) => {
                if message.kind == "message" {
                    logger.info(
                        "message",
                        &[
                            ("channel", &message.channel),
                            ("user", &message.user),
                            ("text", &message.text),
                        ],
                    );
                }
            }
            Err(err) if err.is_protocol() => continue,
            Err(err) if err.is_closed() => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}
