use anyhow::Context;
use ffmpeg_feed::OutputStream;
use tokio_util::sync::CancellationToken;
use twitch_chat::ChatClient;

mod config;
mod producer;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_feed", log::LevelFilter::Debug)
        .filter_module("twitch_chat", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let path = config::config_path();
    let config = config::AppConfig::load(&path)?;
    log::info!("loaded {} ({:?})", path.display(), config.stream.destination);

    let stream = OutputStream::open(config.stream.clone())
        .await
        .context("starting ffmpeg")?;

    let mut chat = match config.chat.clone() {
        Some(chat_config) => {
            let chat = ChatClient::connect(chat_config)
                .await
                .context("connecting to chat")?;
            if let Some(greeting) = &config.producer.greeting {
                chat.send_chat_message(greeting)?;
            }
            Some(chat)
        }
        None => {
            log::info!("no chat section configured, streaming without chat");
            None
        }
    };

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("interrupted, shutting down");
                cancel_clone.cancel();
            }
            Err(e) => log::error!("unable to listen for ctrl-c: {}", e),
        }
    });

    let mut card = producer::TestCard::new(&config.stream, &config.producer);
    let result = producer::run(
        &stream,
        chat.as_mut(),
        &mut card,
        &config.producer,
        &cancel,
    )
    .await;

    if let Some(chat) = chat.as_mut() {
        chat.close().await;
    }
    stream.close().await;
    result
}
