use clap::{ArgGroup, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tfw")]
#[command(author, version, about = "Telegram forwarder with comment-group support", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Listen for updates and forward them according to the rules
    Run,

    /// Manage forwarding rules
    Rule {
        #[command(subcommand)]
        command: RuleCommand,
    },

    /// Inspect or refresh channel → discussion group links
    Link {
        #[command(subcommand)]
        command: LinkCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum RuleCommand {
    /// Create a rule from SOURCE to TARGET (Telegram chat ids)
    Add {
        #[arg(allow_hyphen_values = true)]
        source: i64,
        #[arg(allow_hyphen_values = true)]
        target: i64,
        /// Also forward comments posted in the source channel's discussion group
        #[arg(long)]
        comments: bool,
    },

    /// List all rules
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Enable a rule
    Enable { id: i64 },

    /// Disable a rule
    Disable { id: i64 },

    /// Change comment forwarding settings of a rule
    Comments(CommentArgs),
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("forward").args(["on", "off"])))]
#[command(group(ArgGroup::new("prefix_choice").args(["prefix", "default_prefix"])))]
pub struct CommentArgs {
    pub id: i64,

    #[arg(long)]
    pub on: bool,

    #[arg(long)]
    pub off: bool,

    /// Text sent ahead of each forwarded comment
    #[arg(long)]
    pub prefix: Option<String>,

    /// Go back to the default prefix
    #[arg(long)]
    pub default_prefix: bool,

    /// Append a link to the commented channel post
    #[arg(long)]
    pub context: Option<bool>,
}

impl CommentArgs {
    pub fn forward(&self) -> Option<bool> {
        match (self.on, self.off) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }

    pub fn prefix(&self) -> Option<Option<String>> {
        if self.default_prefix {
            Some(None)
        } else {
            self.prefix.clone().map(Some)
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum LinkCommand {
    /// Show the cached discussion group of a channel (no network)
    Status {
        #[arg(allow_hyphen_values = true)]
        channel: i64,
    },

    /// Resolve the discussion group now, refreshing the cache if stale
    Resolve {
        #[arg(allow_hyphen_values = true)]
        channel: i64,
    },
}
