use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::domain::{
    normalize_email, BlogId, Comment, CommentId, NewComment, NewsletterSubscriber, SubscriberId,
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// Outcome of a subscriber insert. Uniqueness is decided by the
/// `newsletter_subscribers.email` constraint, not by a prior read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberInsert {
    Inserted(NewsletterSubscriber),
    AlreadyExists,
}

const COMMENT_COLUMNS: &str = "id, blog_id, name, body, created_at";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn insert_comment(&self, comment: &NewComment) -> Result<Comment> {
        let row = sqlx::query(&format!(
            "INSERT INTO comments (blog_id, name, email, body, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING {COMMENT_COLUMNS}"
        ))
        .bind(comment.blog_id.as_str())
        .bind(comment.name.trim())
        .bind(normalize_email(&comment.email))
        .bind(comment.body.trim())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .context("failed to insert comment")?;
        Ok(comment_from_row(&row))
    }

    /// Newest first; rows created in the same instant fall back to id order.
    pub async fn list_comments_for_blog(&self, blog_id: &BlogId) -> Result<Vec<Comment>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMENT_COLUMNS}
             FROM comments
             WHERE blog_id = ?
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(blog_id.as_str())
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to list comments for blog '{blog_id}'"))?;
        Ok(rows.iter().map(comment_from_row).collect())
    }

    pub async fn load_comment(&self, comment_id: CommentId) -> Result<Option<Comment>> {
        let row = sqlx::query(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?"
        ))
        .bind(comment_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(comment_from_row))
    }

    pub async fn update_comment_body(
        &self,
        comment_id: CommentId,
        body: &str,
    ) -> Result<Option<Comment>> {
        let row = sqlx::query(&format!(
            "UPDATE comments SET body = ? WHERE id = ? RETURNING {COMMENT_COLUMNS}"
        ))
        .bind(body.trim())
        .bind(comment_id.0)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to update comment {}", comment_id.0))?;
        Ok(row.as_ref().map(comment_from_row))
    }

    /// Returns the removed row so callers can announce the deletion.
    pub async fn delete_comment(&self, comment_id: CommentId) -> Result<Option<Comment>> {
        let row = sqlx::query(&format!(
            "DELETE FROM comments WHERE id = ? RETURNING {COMMENT_COLUMNS}"
        ))
        .bind(comment_id.0)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to delete comment {}", comment_id.0))?;
        Ok(row.as_ref().map(comment_from_row))
    }

    pub async fn find_subscriber(&self, email: &str) -> Result<Option<NewsletterSubscriber>> {
        let row = sqlx::query(
            "SELECT id, email, subscribed_at FROM newsletter_subscribers WHERE email = ?",
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(subscriber_from_row))
    }

    pub async fn insert_subscriber(&self, email: &str) -> Result<SubscriberInsert> {
        let email = normalize_email(email);
        let row = sqlx::query(
            "INSERT INTO newsletter_subscribers (email, subscribed_at)
             VALUES (?, ?)
             ON CONFLICT(email) DO NOTHING
             RETURNING id, email, subscribed_at",
        )
        .bind(&email)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .context("failed to insert newsletter subscriber")?;

        match row {
            Some(row) => Ok(SubscriberInsert::Inserted(subscriber_from_row(&row))),
            None => {
                debug!(%email, "newsletter subscriber already present");
                Ok(SubscriberInsert::AlreadyExists)
            }
        }
    }

    pub async fn count_subscribers(&self, email: &str) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM newsletter_subscribers WHERE email = ?")
            .bind(normalize_email(email))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn comment_from_row(row: &SqliteRow) -> Comment {
    Comment {
        id: CommentId(row.get::<i64, _>(0)),
        blog_id: BlogId(row.get::<String, _>(1)),
        name: row.get::<String, _>(2),
        body: row.get::<String, _>(3),
        created_at: row.get::<DateTime<Utc>, _>(4),
    }
}

fn subscriber_from_row(row: &SqliteRow) -> NewsletterSubscriber {
    NewsletterSubscriber {
        id: SubscriberId(row.get::<i64, _>(0)),
        email: row.get::<String, _>(1),
        subscribed_at: row.get::<DateTime<Utc>, _>(2),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
