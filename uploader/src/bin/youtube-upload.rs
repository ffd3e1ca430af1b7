use std::io::IsTerminal;
use tokio::io::AsyncReadExt;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use youtube_uploader::oauth::InstalledFlow;
use youtube_uploader::report::ConsoleReporter;
use youtube_uploader::upload::Uploader;
use youtube_uploader::youtube_api::YouTubeClient;
use youtube_uploader::{RunConfig, run};

const OAUTH_DONE: &str = include_str!("../../oauth_success.html");

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    println!("YouTube Data API: Upload");
    println!("========================");

    let config = RunConfig::default();
    match YouTubeClient::new() {
        Ok(client) => {
            let flow = InstalledFlow::new(OAUTH_DONE).persist_tokens_to(config.token_cache.clone());
            let uploader = Uploader::new(client).with_chunk_size(config.chunk_size);
            let mut reporter = ConsoleReporter::stdout();

            tokio::select! {
                result = run(&config, &flow, &uploader, &mut reporter) => {
                    if let Err(e) = result {
                        print_error(eyre::Report::new(e));
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("upload cancelled");
                }
            }
        }
        Err(e) => print_error(eyre::Report::new(e).wrap_err("build HTTP client")),
    }

    println!("Press any key to continue...");
    let _ = tokio::io::stdin().read(&mut [0u8; 1]).await;
    Ok(())
}

fn print_error(report: eyre::Report) {
    for cause in report.chain() {
        println!("Error: {cause}");
    }
}
