use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use common::CommandConfig;

use crate::commands::{handle_message, DigestService};
use crate::telegram::TelegramTransport;

/// Long-poll Telegram until `shutdown` is notified. Each inbound message is handled in its own
/// task, so a slow digest never blocks other chats.
pub async fn run_bot(
    transport: Arc<TelegramTransport>,
    service: Arc<DigestService>,
    commands: Arc<Vec<CommandConfig>>,
    shutdown: Arc<Notify>,
) -> anyhow::Result<()> {
    info!(commands = commands.len(), "bot: polling for updates");
    let mut offset = 0i64;
    let mut backoff = Duration::from_secs(1);

    loop {
        let poll = tokio::select! {
            res = transport.get_updates(offset) => res,
            _ = shutdown.notified() => {
                info!("bot: shutdown requested, exiting loop");
                break;
            }
        };

        match poll {
            Ok((messages, next_offset)) => {
                backoff = Duration::from_secs(1);
                offset = next_offset;
                for message in messages {
                    let transport = transport.clone();
                    let service = service.clone();
                    let commands = commands.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_message(&service, transport.as_ref(), &commands, message.chat_id, &message.text).await
                        {
                            error!(chat_id = message.chat_id, error = %e, "bot: failed to handle message");
                        }
                    });
                }
            }
            Err(e) => {
                warn!(error = %e, ?backoff, "bot: getUpdates failed, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.notified() => break,
                }
                backoff = (backoff * 2).min(Duration::from_secs(60));
            }
        }
    }

    info!("bot: stopped");
    Ok(())
}
