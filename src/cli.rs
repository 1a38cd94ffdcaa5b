use clap::{Parser, Subcommand};

/// Keygate: API key issuance and authorization service
#[derive(Parser)]
#[command(name = "keygate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to KEYGATE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Apply pending database migrations
    Migrate,

    /// Manage API keys
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// List the permission catalog
    Permissions,
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Issue a new API key
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, value_delimiter = ',', required = true)]
        permissions: Vec<String>,
        /// Days until expiry (1-3650)
        #[arg(long)]
        expiry_days: Option<i64>,
        #[arg(long)]
        rate_limit: Option<i32>,
    },
    /// List keys (secrets are masked)
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, default_value = "1")]
        page: i64,
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Show a single key
    Show {
        id: String,
    },
    /// Change fields of a key
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, value_delimiter = ',')]
        permissions: Option<Vec<String>>,
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        rate_limit: Option<i32>,
    },
    /// Extend a key's expiry; zero or negative resets to the default
    Renew {
        id: String,
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        extend_days: i64,
    },
    /// Permanently delete a key and its usage history
    Delete {
        id: String,
    },
}
