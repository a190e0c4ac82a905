use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::UserId};
use tracing::info;

use tfw_core::{config::Config, dispatch::RuleEngine, ports::DispatchSink};

use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RuleEngine>,
    pub sink: Arc<dyn DispatchSink>,
    pub forward_channel_posts: bool,
    /// Our own account; its messages are never forwarded again.
    pub bot_id: UserId,
}

/// Long-poll the Bot API until Ctrl-C.
///
/// Teloxide runs updates of one chat in order and different chats
/// concurrently, so each engine invocation handles exactly one message.
pub async fn run_polling(
    bot: Bot,
    cfg: &Config,
    engine: Arc<RuleEngine>,
    sink: Arc<dyn DispatchSink>,
) -> anyhow::Result<()> {
    let me = bot.get_me().await?;
    info!(username = me.username(), "tfw bot started");
    if !cfg.forward_channel_posts {
        info!("channel posts are ignored (FORWARD_CHANNEL_POSTS=false)");
    }

    let state = Arc::new(AppState {
        engine,
        sink,
        forward_channel_posts: cfg.forward_channel_posts,
        bot_id: me.id,
    });

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handlers::handle_message))
        .branch(Update::filter_channel_post().endpoint(handlers::handle_channel_post));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("tfw bot stopped");
    Ok(())
}
