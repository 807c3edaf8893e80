//! Command line tool for downloading Street View panoramas.

use std::io;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use streetview::{CancelToken, Downloader};

mod batch;
mod cli;
mod config;
mod output;
mod pipeline;
#[cfg(test)]
mod testing;

use cli::Args;
use pipeline::{OutputSettings, Pipeline, Target};

/// Exit code of a run interrupted with Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "info" }),
    )
    .format_timestamp(None)
    .init();

    match run(args).await {
        Ok(code) => code,
        Err(err) if batch::is_cancellation(&err) => {
            log::warn!("Interrupted");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config_path = config::default_config_path();

    if args.configure {
        let path = config_path.context("cannot determine the home directory")?;
        eprintln!("Enter your Maps API key:");
        let key = config::configure(&path, io::stdin().lock())?;
        println!(
            "Stored API key {} in {}",
            config::mask_api_key(&key),
            path.display()
        );
        return Ok(ExitCode::SUCCESS);
    }

    let api_key = config::resolve_api_key(args.api_key.as_deref(), config_path.as_deref())?;
    let downloader = Downloader::builder()
        .with_api_key(api_key)
        .with_quality(args.quality)
        .with_concurrency(args.concurrency)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_retries(args.retries)
        .with_backoff(args.backoff)
        .build()?;
    let pipeline = Pipeline::new(downloader, OutputSettings::from_args(&args));

    let cancel = CancelToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Cancelling, press Ctrl-C again to abort immediately");
                cancel.cancel();
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(i32::from(EXIT_INTERRUPTED));
                }
            }
        }
    });

    if let Some(path) = &args.batch {
        let links = batch::read_batch(path)?;
        log::info!("Processing {} links from {}", links.len(), path.display());
        let report = batch::run_batch(&pipeline, &links, &cancel).await;
        return Ok(if report.cancelled {
            ExitCode::from(EXIT_INTERRUPTED)
        } else if report.is_failure() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        });
    }

    let target = match (args.location(), &args.url) {
        (Some((lat, lng)), _) => Target::Location {
            lat,
            lng,
            radius: args.radius,
        },
        (None, Some(url)) => Target::Link(url.clone()),
        (None, None) => anyhow::bail!("no link given"),
    };

    pipeline
        .run(&target, args.output.clone(), &cancel)
        .await?
        .print();
    Ok(ExitCode::SUCCESS)
}
