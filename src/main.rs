use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use hacker_news_sync::config::SyncConfig;
use hacker_news_sync::models::{CountScope, FlatComment, Item, ItemId, SearchQuery, StoryCategory};
use hacker_news_sync::monitor::Monitor;
use hacker_news_sync::preview::text_preview;
use hacker_news_sync::tree::{flatten_thread, CollapseState};
use hacker_news_sync::{logging, Cache, Database, HackerNewsClient};

/// Terminal Hacker News reader backed by a local cache.
#[derive(Parser)]
#[command(name = "hn-sync")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    /// Config file. Defaults to ~/.hn_reader/config.toml
    #[arg(long, global = true, env = "HN_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the database path from the config file
    #[arg(long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List a page of stories (top, new, best, ask, show, jobs)
    Stories {
        #[arg(default_value = "top")]
        category: StoryCategory,
    },
    /// Print a story or comment with its replies
    Thread {
        id: ItemId,
        /// Comment ids to show collapsed
        #[arg(long)]
        collapse: Vec<ItemId>,
        /// Collapse every top-level comment
        #[arg(long)]
        collapse_all: bool,
    },
    /// Show a user profile
    User { name: String },
    /// Newest comments site-wide
    Comments {
        #[arg(long, default_value_t = 0)]
        page: usize,
    },
    /// Watch a user's recent comments for replies until Ctrl-C
    Watch { name: String },
    /// List stored reply notifications
    Notifications {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Mark everything listed as read
        #[arg(long)]
        mark_read: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let config_path = cli.config.clone().or_else(SyncConfig::default_config_path);
    let mut config = match config_path {
        Some(path) => SyncConfig::load(&path)?,
        None => SyncConfig::default(),
    };
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    let db = Database::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    let client = HackerNewsClient::new(&config.fetch)?;
    let cache = Arc::new(Cache::new(
        db,
        Arc::new(client),
        config.cache.clone(),
        config.fetch.clone(),
    ));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    match cli.command {
        Commands::Stories { category } => show_stories(&cache, category, &cancel).await?,
        Commands::Thread { id, collapse, collapse_all } => {
            show_thread(&cache, id, collapse, collapse_all, &cancel).await?
        }
        Commands::User { name } => {
            let user = cache.user(&name).await?;
            println!("{}  karma {}  joined {}", user.id, user.karma, format_age(cache.now(), user.created));
            if !user.about.is_empty() {
                println!("{}", text_preview(&user.about, 400));
            }
            println!("{} submissions", user.submitted.len());
        }
        Commands::Comments { page } => {
            let query = SearchQuery::newest_comments(config.fetch.page_size, page);
            for comment in cache.search(&query).await? {
                println!(
                    "{} on \"{}\" ({})",
                    comment.author,
                    comment.title,
                    format_age(cache.now(), comment.created_at)
                );
                println!("    {}", text_preview(&comment.text, 160));
            }
        }
        Commands::Watch { name } => watch(cache, config, &name, cancel).await?,
        Commands::Notifications { limit, mark_read } => {
            let store = cache.store();
            let unread = store.unread_notification_count()?;
            println!("{} unread", unread);
            for n in store.list_notifications(limit)? {
                let marker = if n.read { " " } else { "*" };
                println!(
                    "{} {} replied to {} ({}): {}",
                    marker,
                    n.author,
                    n.parent_id,
                    format_age(cache.now(), n.created_at),
                    n.text_preview
                );
            }
            if mark_read {
                store.mark_all_notifications_read()?;
            }
        }
    }

    Ok(())
}

async fn show_stories(cache: &Cache, category: StoryCategory, cancel: &CancellationToken) -> Result<()> {
    let stories = cache.stories(category, cancel).await?;
    let now = cache.now();
    for (rank, story) in stories.iter().enumerate() {
        println!("{:>3}. {}", rank + 1, story.title);
        println!(
            "     {} points by {} {} | {} comments",
            story.score,
            story.author,
            format_age(now, story.created_at),
            story.comment_count
        );
    }
    Ok(())
}

async fn show_thread(
    cache: &Cache,
    id: ItemId,
    collapse: Vec<ItemId>,
    collapse_all: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let root = cache.load_thread(id, cancel).await?;
    let mut collapsed: CollapseState = collapse.into_iter().collect();
    if collapse_all {
        let expanded = flatten_thread(cache, &root, &collapsed);
        collapsed.collapse_top_level(&expanded);
    }

    if !root.title.is_empty() {
        println!("{}", root.title);
        println!("{} points by {}\n", root.score, root.author);
    }
    let now = cache.now();
    for comment in flatten_thread(cache, &root, &collapsed) {
        print_comment(&comment, now);
    }
    Ok(())
}

fn print_comment(comment: &FlatComment, now: i64) {
    let indent = "  ".repeat(comment.depth);
    let toggle = if comment.is_collapsed { "[+]" } else { "[-]" };
    let op = if comment.is_original_poster { " [OP]" } else { "" };
    let at_least = if comment.count_scope == CountScope::Partial { "+" } else { "" };
    println!(
        "{}{} {}{} {} ({}{} replies)",
        indent,
        toggle,
        display_author(&comment.item),
        op,
        format_age(now, comment.item.created_at),
        comment.descendant_count,
        at_least
    );
    if !comment.is_collapsed {
        println!("{}    {}", indent, text_preview(&comment.item.text, 300));
    }
}

fn display_author(item: &Item) -> &str {
    if item.deleted {
        "[deleted]"
    } else {
        &item.author
    }
}

async fn watch(cache: Arc<Cache>, config: SyncConfig, name: &str, cancel: CancellationToken) -> Result<()> {
    let (monitor, mut unread) = Monitor::new(cache, config.monitor.clone());
    let report = monitor.seed_from_user(name, &cancel).await?;
    println!("Watching {} comments by {} (Ctrl-C to stop)", report.registered, name);

    let handle = Arc::new(monitor).spawn(cancel.clone());
    loop {
        let changed = tokio::select! {
            _ = cancel.cancelled() => break,
            changed = unread.changed() => changed,
        };
        if changed.is_err() {
            break;
        }
        println!("{} unread replies", *unread.borrow_and_update());
    }
    handle.await?;
    info!("Watch stopped");
    Ok(())
}

fn format_age(now: i64, then: i64) -> String {
    let secs = (now - then).max(0);
    match secs {
        s if s < 60 => "just now".to_string(),
        s if s < 3600 => format!("{} minutes ago", s / 60),
        s if s < 86_400 => format!("{} hours ago", s / 3600),
        s => format!("{} days ago", s / 86_400),
    }
}
