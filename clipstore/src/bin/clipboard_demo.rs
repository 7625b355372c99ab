//! Clipboard store demo
//!
//! Lines typed on stdin are appended to the clipboard of one identity.
//! Two blocking readers print what they receive, and a subscriber prints
//! change notifications. An empty line or end of input shuts the store
//! down, which releases the readers.

use clipstore::{Identity, Notification, OpenOptions, Store, StoreConfig, StoreError};
use futures::future::join_all;
use tokio::io::{AsyncBufReadExt, BufReader};

const DEMO_IDENTITY: Identity = Identity::new(1000);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = StoreConfig::from_env()?;
    let store = Store::new(config)?;

    let mut writer = store
        .open(DEMO_IDENTITY, OpenOptions::new().write(true).append(true).truncate(true))
        .await?;

    let mut readers = Vec::new();
    for name in ["r1", "r2"] {
        let session = store
            .open(DEMO_IDENTITY, OpenOptions::new().read(true))
            .await?;
        readers.push(tokio::spawn(read_all(name, session)));
    }

    let mut watcher = store
        .open(DEMO_IDENTITY, OpenOptions::new().read(true))
        .await?;
    watcher.subscribe().await?;
    let watcher_task = tokio::spawn(async move {
        while let Some(event) = watcher.next_notification().await {
            println!("(watch) {event:?}");
            if event == Notification::HangUp {
                break;
            }
        }
        watcher.close().await;
    });

    println!("Enter text (empty line to quit):");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Err(e) = writer.write(trimmed.as_bytes()).await {
            eprintln!("Write error: {e}");
            break;
        }
    }
    writer.close().await;

    if let Some(stats) = store.stats(DEMO_IDENTITY).await {
        println!("Buffer: {stats:?}");
    }
    let report = store.shutdown().await;
    println!("Store shut down: {report:?}");

    join_all(readers).await;
    watcher_task.await?;
    println!("All tasks completed");
    Ok(())
}

async fn read_all(name: &str, mut session: clipstore::Session) {
    let mut buf = [0u8; 4];

    loop {
        match session.read_blocking(&mut buf).await {
            Ok(0) => {
                println!("({name}) EOF");
                break;
            }
            Ok(n) => {
                let data = String::from_utf8_lossy(&buf[..n]);
                println!("({name}): {data}");
            }
            Err(StoreError::ShutDown) => {
                println!("({name}) hang-up");
                break;
            }
            Err(e) => {
                eprintln!("({name}) Error: {e}");
                break;
            }
        }
    }
    session.close().await;
}
