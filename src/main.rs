use std::path::PathBuf;

use blogstore::config::normalize_base_url;
use blogstore::types::{LoginPayload, PostPayload};
use blogstore::{Store, StoreConfig, StoreError};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0} not found after fetch")]
    NotFound(String),
    #[error("nothing to update; pass at least one of --title, --content, --excerpt")]
    EmptyUpdate,
    #[error("invalid JSON output: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "blogstore", about = "Column/post blog API client")]
struct Cli {
    #[arg(long, env = "BLOGSTORE_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "BLOGSTORE_STORAGE_PATH")]
    storage_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Columns(ColumnsCommand),
    Posts(PostsCommand),
    /// Log in and fetch the current user.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "BLOGSTORE_PASSWORD")]
        password: String,
    },
    Whoami,
    Logout,
}

#[derive(Args, Debug)]
struct ColumnsCommand {
    #[command(subcommand)]
    command: ColumnsSubcommand,
}

#[derive(Subcommand, Debug)]
enum ColumnsSubcommand {
    List,
    Show { column_id: String },
}

#[derive(Args, Debug)]
struct PostsCommand {
    #[command(subcommand)]
    command: PostsSubcommand,
}

#[derive(Subcommand, Debug)]
enum PostsSubcommand {
    List {
        column_id: String,
    },
    Show {
        post_id: String,
    },
    Create {
        #[arg(long)]
        column: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        excerpt: Option<String>,
    },
    Update {
        post_id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        excerpt: Option<String>,
    },
    Delete {
        post_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let mut config = StoreConfig::from_env()?;
    if let Some(base_url) = cli.base_url {
        config.base_url = normalize_base_url(&base_url);
    }
    if let Some(storage_path) = cli.storage_path {
        config.storage_path = storage_path;
    }

    let store = Store::from_config(&config)?;
    let result = run(&store, cli.command).await;
    if let Err(CliError::Store(_)) = &result {
        let error = store.snapshot().error;
        if let Some(message) = error.message {
            tracing::error!(%message, "request failed");
        }
    }
    result
}

async fn run(store: &Store, command: Command) -> Result<(), CliError> {
    match command {
        Command::Columns(columns) => run_columns(store, columns).await,
        Command::Posts(posts) => run_posts(store, posts).await,
        Command::Login { email, password } => {
            let credentials = LoginPayload { email, password };
            store.tracked(store.login_and_fetch(&credentials)).await?;
            tracing::info!("logged in");
            print_json(&store.snapshot().user)
        }
        Command::Whoami => {
            store.tracked(store.fetch_current_user()).await?;
            print_json(&store.snapshot().user)
        }
        Command::Logout => {
            store.logout();
            tracing::info!("logged out");
            Ok(())
        }
    }
}

async fn run_columns(store: &Store, columns: ColumnsCommand) -> Result<(), CliError> {
    match columns.command {
        ColumnsSubcommand::List => {
            store.tracked(store.fetch_columns()).await?;
            print_json(&store.snapshot().columns)
        }
        ColumnsSubcommand::Show { column_id } => {
            store.tracked(store.fetch_column(&column_id)).await?;
            let column = store
                .column_by_id(&column_id)
                .ok_or_else(|| CliError::NotFound(format!("column {column_id}")))?;
            print_json(&column)
        }
    }
}

async fn run_posts(store: &Store, posts: PostsCommand) -> Result<(), CliError> {
    match posts.command {
        PostsSubcommand::List { column_id } => {
            store.tracked(store.fetch_posts(&column_id)).await?;
            print_json(&store.posts_by_column_id(&column_id))
        }
        PostsSubcommand::Show { post_id } => {
            store.tracked(store.fetch_post(&post_id)).await?;
            let post = store
                .post_by_id(&post_id)
                .ok_or_else(|| CliError::NotFound(format!("post {post_id}")))?;
            print_json(&post)
        }
        PostsSubcommand::Create { column, title, content, excerpt } => {
            let author = store.snapshot().user.id;
            let payload = PostPayload {
                title: Some(title),
                content,
                excerpt,
                column: Some(column),
                author,
                image: None,
            };
            let created = store.tracked(store.create_post(&payload)).await?;
            print_json(&created.data)
        }
        PostsSubcommand::Update { post_id, title, content, excerpt } => {
            if title.is_none() && content.is_none() && excerpt.is_none() {
                return Err(CliError::EmptyUpdate);
            }
            let payload = PostPayload { title, content, excerpt, ..PostPayload::default() };
            let updated = store.tracked(store.update_post(&post_id, &payload)).await?;
            print_json(&updated.data)
        }
        PostsSubcommand::Delete { post_id } => {
            let deleted = store.tracked(store.delete_post(&post_id)).await?;
            tracing::info!(post_id = %post_id, "post deleted");
            print_json(&deleted.data)
        }
    }
}

fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
