use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    CommentDraft, CommentSynchronizer, HttpBackend, InsertOrdering, SubmissionGateway,
    SubmitError, SyncEvent,
};
use shared::domain::{BlogId, Comment, CommentId, SubscriptionStatus};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "comments", about = "Blog comments and newsletter client")]
struct Cli {
    #[arg(long, env = "COMMENTS_SERVER_URL", default_value = "http://127.0.0.1:8787")]
    server_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the comments of a post, newest first.
    List { blog_id: String },
    /// Follow a post's comments live. Type `r` + Enter to reload, Ctrl-C to quit.
    Watch {
        blog_id: String,
        #[arg(long, value_enum, default_value_t = Ordering::Prepend)]
        ordering: Ordering,
    },
    Post {
        blog_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        body: String,
    },
    Edit {
        comment_id: i64,
        #[arg(long)]
        body: String,
    },
    Delete { comment_id: i64 },
    Subscribe { email: String },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Ordering {
    Prepend,
    CreatedAt,
}

impl From<Ordering> for InsertOrdering {
    fn from(value: Ordering) -> Self {
        match value {
            Ordering::Prepend => InsertOrdering::Prepend,
            Ordering::CreatedAt => InsertOrdering::ByCreatedAt,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
    let cli = Cli::parse();
    let backend = Arc::new(
        HttpBackend::new(&cli.server_url)
            .with_context(|| format!("invalid --server-url {}", cli.server_url))?,
    );

    match cli.command {
        Command::List { blog_id } => {
            let sync = CommentSynchronizer::new(backend);
            sync.initialize(&BlogId::new(blog_id)).await?;
            print_view(&sync.view().await);
        }
        Command::Watch { blog_id, ordering } => {
            let sync = CommentSynchronizer::with_ordering(backend, ordering.into());
            watch(sync, BlogId::new(blog_id)).await?;
        }
        Command::Post {
            blog_id,
            name,
            email,
            body,
        } => {
            let gateway = SubmissionGateway::new(backend);
            let draft = CommentDraft { name, email, body };
            match gateway.submit_comment(&BlogId::new(blog_id), &draft).await {
                Ok(()) => println!("{}", client_core::gateway::COMMENT_ADDED),
                Err(SubmitError::Validation(errors)) => {
                    anyhow::bail!("{}", errors.summary())
                }
                Err(err) => return Err(err.into()),
            }
        }
        Command::Edit { comment_id, body } => {
            let comment = backend.update_comment(CommentId(comment_id), &body).await?;
            println!("updated comment {}", comment.id.0);
        }
        Command::Delete { comment_id } => {
            backend.delete_comment(CommentId(comment_id)).await?;
            println!("deleted comment {comment_id}");
        }
        Command::Subscribe { email } => {
            let gateway = SubmissionGateway::new(backend);
            match gateway.subscribe_newsletter(&email).await {
                Ok(outcome) => println!("{}", outcome.message()),
                Err(SubmitError::Validation(errors)) => {
                    anyhow::bail!("{}", errors.email.unwrap_or_default())
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    Ok(())
}

async fn watch(sync: Arc<CommentSynchronizer>, blog_id: BlogId) -> Result<()> {
    let mut events = sync.subscribe_events();
    if let Err(err) = sync.initialize(&blog_id).await {
        eprintln!("{err}; type `r` to retry");
    }
    sync.subscribe(&blog_id).await;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = stdin.next_line() => match line? {
                Some(line) if line.trim() == "r" => {
                    info!(%blog_id, "manual reload");
                    if let Err(err) = sync.refresh().await {
                        eprintln!("{err}");
                    }
                }
                Some(_) => {}
                None => break,
            },
            event = events.recv() => match event {
                Ok(SyncEvent::ViewChanged(comments)) => print_view(&comments),
                Ok(SyncEvent::StatusChanged(SubscriptionStatus::Errored)) => {
                    eprintln!("live updates unavailable; type `r` to reload");
                }
                Ok(SyncEvent::StatusChanged(status)) => info!(%status, "subscription status"),
                Ok(SyncEvent::Failed(err)) => warn!(%err, "sync failure"),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "fell behind sync events");
                    print_view(&sync.view().await);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    sync.teardown().await;
    Ok(())
}

fn print_view(comments: &[Comment]) {
    println!("--- {} comment(s) ---", comments.len());
    for comment in comments {
        println!(
            "#{} {} ({}): {}",
            comment.id.0,
            comment.name,
            comment.created_at.format("%Y-%m-%d %H:%M"),
            comment.body
        );
    }
}
