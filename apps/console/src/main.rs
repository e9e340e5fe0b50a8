use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use session_core::{live::WebSocketLiveChannel, ClientConfig, ControllerEvent, SessionController};
use shared::domain::Language;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use url::Url;

#[derive(Parser, Debug)]
struct Args {
    /// Base URL of the chat API, e.g. https://chat.example.net/v1/
    #[arg(long)]
    server_url: Url,
    #[arg(long)]
    username: String,
    #[arg(long)]
    password: String,
    /// Open the websocket push channel instead of refetching after each send.
    #[arg(long)]
    live: bool,
    #[arg(long, default_value = "ru")]
    language: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let config = ClientConfig::new(args.server_url);
    let controller = if args.live {
        SessionController::with_live_connector(config, Arc::new(WebSocketLiveChannel))?
    } else {
        SessionController::new(config)?
    };

    match Language::from_code(&args.language) {
        Some(language) => controller.set_language(language).await,
        None => warn!(code = %args.language, "unknown language code, keeping the default"),
    }

    controller.set_username_field(args.username).await;
    controller.set_password_field(args.password).await;
    controller.authenticate().await?;

    let snapshot = controller.snapshot().await;
    println!(
        "signed in as {}",
        snapshot.current_username.as_deref().unwrap_or("?")
    );
    for message in snapshot.transcript.iter().rev() {
        println!("{}: {}", message.sender_name, message.text);
    }

    let mut events = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ControllerEvent::MessageArrived(message) => {
                    println!("{}: {}", message.sender_name, message.text);
                }
                ControllerEvent::Error(notice) => eprintln!("error: {notice}"),
                ControllerEvent::StateChanged(_) => {}
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        controller.set_draft(line).await;
        if let Err(err) = controller.send_message().await {
            eprintln!("send failed: {err}");
        }
    }

    controller.logout().await?;
    Ok(())
}
