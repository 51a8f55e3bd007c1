mod config;

use std::time::Duration;

use anyhow::{Context, bail};
use slsk_client::{DownloadEvent, Session};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage:
  slsk search <query> [seconds]
  slsk download <user> <remote-path> <size>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = config::load()?;
    if config.username.is_empty() {
        bail!("no username configured (set SLSK_USERNAME or edit the config file)");
    }

    let session = Session::connect(config).await.map_err(|e| {
        tracing::error!("cannot start session: {e}");
        e
    })?;
    let outcome = session.login().await.context("login failed")?;
    tracing::info!(greeting = %outcome.greeting, rooms = outcome.rooms.len(), "logged in");

    let result = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["search", query, rest @ ..] => {
            let seconds = match rest.first() {
                Some(s) => s.parse().context("seconds must be a number")?,
                None => 10,
            };
            search(&session, query, Duration::from_secs(seconds)).await
        }
        ["download", user, path, size] => {
            let size = size.parse().context("size must be a number")?;
            download(&session, user, path, size).await
        }
        _ => {
            eprintln!("{USAGE}");
            Ok(())
        }
    };

    session.shutdown();
    result
}

async fn search(session: &Session, query: &str, window: Duration) -> anyhow::Result<()> {
    let mut search = session.search(session.next_token(), query).await?;
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    let mut count = 0usize;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = session.closed() => bail!("session closed"),
            result = search.recv() => {
                let Some(result) = result else { break };
                for file in &result.files {
                    count += 1;
                    println!(
                        "{}\t{}\t{}\tslot:{}\tqueue:{}",
                        result.username,
                        file.size,
                        file.filename,
                        if result.slot_free { "yes" } else { "no" },
                        result.queue_length,
                    );
                }
            }
        }
    }
    tracing::info!(files = count, "search window closed");
    Ok(())
}

async fn download(session: &Session, user: &str, path: &str, size: u64) -> anyhow::Result<()> {
    session
        .connect_peer(user)
        .await
        .with_context(|| format!("cannot reach {user}"))?;

    let mut events = session.subscribe::<DownloadEvent>();
    let token = session.next_token();
    let progress = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if event.token != token {
                continue;
            }
            tracing::info!(state = ?event.state, file = %event.filename, "download");
            if event.state.is_terminal() {
                break;
            }
        }
    });

    let bytes = session.download(user, token, path, size).await?;
    let _ = progress.await;
    println!("downloaded {bytes} bytes");
    Ok(())
}
