use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    store::{BubbleKey, OpenBubble},
    ChannelConfig, ChatClient, ClientNotice, ClientStore, HttpStorageApi, SessionChannel,
};
use shared::domain::{ConversationId, PostId, UserId, UserSummary};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mint a session token against a local gateway secret.
    Token {
        user_id: i64,
        #[arg(long, default_value = "dev-auth-secret")]
        secret: String,
        #[arg(long, default_value_t = 60)]
        minutes: i64,
    },
    /// Connect, follow rooms, print events, and send stdin lines to the conversation.
    Chat {
        #[arg(long, default_value = "http://127.0.0.1:8443")]
        gateway_url: String,
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        storage_url: String,
        #[arg(long)]
        token: String,
        #[arg(long)]
        user_id: i64,
        #[arg(long, default_value = "Cli")]
        name: String,
        #[arg(long)]
        conversation: Option<i64>,
        #[arg(long = "post")]
        posts: Vec<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match Cli::parse().command {
        Command::Token {
            user_id,
            secret,
            minutes,
        } => {
            let token = gateway::auth::issue_session_token(
                &secret,
                UserId(user_id),
                chrono::Duration::minutes(minutes),
            )?;
            println!("{token}");
        }
        Command::Chat {
            gateway_url,
            storage_url,
            token,
            user_id,
            name,
            conversation,
            posts,
        } => {
            let me = UserSummary {
                user_id: UserId(user_id),
                first_name: name,
                last_name: String::new(),
                avatar: None,
            };
            chat(&gateway_url, &storage_url, token, me, conversation, posts).await?;
        }
    }

    Ok(())
}

async fn chat(
    gateway_url: &str,
    storage_url: &str,
    token: String,
    me: UserSummary,
    conversation: Option<i64>,
    posts: Vec<i64>,
) -> Result<()> {
    let mut channel = SessionChannel::connect(ChannelConfig::new(gateway_url, token.clone()))
        .context("opening session channel")?;
    let Some(events) = channel.events() else {
        bail!("channel event stream already taken");
    };
    let storage = Arc::new(HttpStorageApi::new(storage_url, token));
    let client = ChatClient::new(ClientStore::new(me), Arc::new(channel), storage);
    let mut notices = client.subscribe();
    tokio::spawn(client.clone().run(events));

    let conversation = conversation.map(ConversationId);
    if let Some(conversation_id) = conversation {
        client
            .open_conversation(OpenBubble::group(
                conversation_id,
                format!("conversation {conversation_id}"),
                Vec::new(),
            ))
            .await
            .with_context(|| format!("opening conversation {conversation_id}"))?;
    }
    for post_id in posts {
        client.join_post(PostId(post_id)).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            notice = notices.recv() => match notice {
                Ok(notice) => {
                    if !print_notice(notice) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "notice stream lagged"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => match line? {
                Some(line) if !line.trim().is_empty() => match conversation {
                    Some(conversation_id) => {
                        if let Err(error) = client
                            .send_message(BubbleKey::Conversation(conversation_id), line)
                            .await
                        {
                            warn!(%error, "send failed");
                        }
                    }
                    None => warn!("no --conversation given, input ignored"),
                },
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    info!("leaving");
    Ok(())
}

/// Returns false when the session can no longer continue.
fn print_notice(notice: ClientNotice) -> bool {
    match notice {
        ClientNotice::Event(event) => match serde_json::to_string(&event) {
            Ok(json) => println!("{json}"),
            Err(error) => warn!(%error, event = event.name(), "unprintable event"),
        },
        ClientNotice::Toast(text) => println!("! {text}"),
        ClientNotice::OpenMediaRoom { room, .. } => println!("media room {room} opened"),
        ClientNotice::CloseMediaRoom => println!("media room closed"),
        ClientNotice::Resynced => info!("resynchronised after reconnect"),
        ClientNotice::RedirectToAuth => {
            warn!("session rejected, sign in again");
            return false;
        }
    }
    true
}
