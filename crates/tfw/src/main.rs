mod cli;

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use teloxide::Bot;
use tracing::info;

use tfw_core::{
    clock::{Clock, SystemClock},
    config::Config,
    dedup::MediaGroupDedup,
    dispatch::RuleEngine,
    domain::{ChatDbId, ForwardRule, PlatformChatId},
    links::{self, LinkPolicy, LinkResolver, LinkStatus},
    ports::{RelationshipStore, WriteOutcome},
};
use tfw_store::{CommentSettings, SqliteStore};
use tfw_telegram::{router, TelegramPlatform, TelegramSink};

use crate::cli::{Cli, Commands, LinkCommand, RuleCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tfw_core::logging::init("tfw")?;

    let cfg = Config::load()?;
    let store = Arc::new(SqliteStore::connect(&cfg.database_url, cfg.db_max_connections).await?);
    store.migrate().await?;

    match cli.command {
        Commands::Run => run(&cfg, store).await,
        Commands::Rule { command } => rule(&store, command).await,
        Commands::Link { command } => link(&cfg, store, command).await,
    }
}

fn link_resolver(cfg: &Config, store: Arc<SqliteStore>, bot: Bot, clock: Arc<dyn Clock>) -> Arc<LinkResolver> {
    Arc::new(LinkResolver::new(
        store,
        Arc::new(TelegramPlatform::new(bot)),
        clock,
        LinkPolicy {
            ttl: cfg.link_cache_ttl,
        },
    ))
}

async fn run(cfg: &Config, store: Arc<SqliteStore>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.require_bot_token()?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let links = link_resolver(cfg, store.clone(), bot.clone(), clock.clone());
    let engine = Arc::new(RuleEngine::new(
        store,
        links,
        MediaGroupDedup::new(clock, cfg.media_group_window),
    ));
    let sink = Arc::new(TelegramSink::new(bot.clone()));

    info!(
        ttl_hours = cfg.link_cache_ttl.as_secs() / 3600,
        media_group_secs = cfg.media_group_window.as_secs(),
        "starting forwarder"
    );
    router::run_polling(bot, cfg, engine, sink)
        .await
        .context("telegram bot failed")
}

async fn rule(store: &SqliteStore, command: RuleCommand) -> anyhow::Result<()> {
    match command {
        RuleCommand::Add {
            source,
            target,
            comments,
        } => {
            let outcome = store
                .add_rule(PlatformChatId(source), PlatformChatId(target))
                .await?;
            let WriteOutcome::Written(rule) = outcome else {
                bail!("a rule from {source} to {target} already exists");
            };
            if comments {
                let settings = CommentSettings {
                    forward: Some(true),
                    ..Default::default()
                };
                store.update_comment_settings(rule.id, &settings).await?;
            }
            println!("created rule {}", rule.id);
        }
        RuleCommand::List { json } => {
            let rules = store.list_rules().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rules)?);
            } else {
                print_rules(&rules);
            }
        }
        RuleCommand::Enable { id } => set_enabled(store, id, true).await?,
        RuleCommand::Disable { id } => set_enabled(store, id, false).await?,
        RuleCommand::Comments(args) => {
            let settings = CommentSettings {
                forward: args.forward(),
                prefix: args.prefix(),
                include_context: args.context,
            };
            if settings == CommentSettings::default() {
                bail!("nothing to change: pass --on/--off, --prefix, --default-prefix or --context");
            }
            if !store.update_comment_settings(args.id, &settings).await? {
                bail!("no rule with id {}", args.id);
            }
            println!("updated comment settings of rule {}", args.id);
        }
    }
    Ok(())
}

async fn set_enabled(store: &SqliteStore, id: i64, enabled: bool) -> anyhow::Result<()> {
    if !store.set_rule_enabled(id, enabled).await? {
        bail!("no rule with id {id}");
    }
    println!("rule {id} {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

fn print_rules(rules: &[ForwardRule]) {
    if rules.is_empty() {
        println!("no rules");
        return;
    }
    println!(
        "{:>4}  {:>16}  {:>16}  {:<8}  {:<8}  prefix",
        "id", "source", "target", "enabled", "comments"
    );
    for rule in rules {
        let comments = match (rule.comment_forward_enabled, rule.comment_context_enabled) {
            (false, _) => "off",
            (true, false) => "on",
            (true, true) => "on+link",
        };
        println!(
            "{:>4}  {:>16}  {:>16}  {:<8}  {:<8}  {}",
            rule.id,
            rule.source_platform_id,
            rule.target_platform_id,
            rule.enabled,
            comments,
            rule.comment_prefix()
        );
    }
}

async fn channel_id(store: &SqliteStore, channel: i64) -> anyhow::Result<ChatDbId> {
    match store.chat_by_platform_id(PlatformChatId(channel)).await? {
        Some(chat) => Ok(chat.id),
        None => bail!("chat {channel} is not registered; add a rule for it first"),
    }
}

async fn link(cfg: &Config, store: Arc<SqliteStore>, command: LinkCommand) -> anyhow::Result<()> {
    match command {
        LinkCommand::Status { channel } => {
            let id = channel_id(&store, channel).await?;
            print_status(channel, &links::status(store.as_ref(), id).await?);
        }
        LinkCommand::Resolve { channel } => {
            let id = channel_id(&store, channel).await?;
            let bot = Bot::new(cfg.require_bot_token()?);
            let resolver = link_resolver(cfg, store.clone(), bot, Arc::new(SystemClock));
            resolver.resolve(id).await?;
            print_status(channel, &resolver.status(id).await?);
        }
    }
    Ok(())
}

fn print_status(channel: i64, status: &LinkStatus) {
    match status {
        LinkStatus::NeverChecked => println!("{channel}: never checked"),
        LinkStatus::NoLinkedGroup { last_checked } => {
            println!("{channel}: no discussion group (checked {last_checked})")
        }
        LinkStatus::Linked {
            group,
            last_checked,
        } => println!(
            "{channel}: discussion group {} {} (checked {last_checked})",
            group.platform_chat_id,
            group.name.as_deref().unwrap_or("<unnamed>")
        ),
    }
}
