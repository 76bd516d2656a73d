//! `SQLite` storage for circles.
//!
//! This module provides persistent storage for circles, memberships, role
//! permissions, gating rules, invites, content, leaderboard entries and
//! the activity log.
//!
//! Every mutation the engine performs runs inside [`CircleStorage::write`],
//! an immediate transaction. Uniqueness and exactly-once guarantees come
//! from conditional statements (`ON CONFLICT ... DO NOTHING`, guarded
//! `UPDATE ... WHERE`) whose affected-row count tells the caller whether it
//! won, so several engine instances may share one database file.

// SQLite operations need to hold the lock for the duration of the operation.
#![allow(clippy::significant_drop_tightening)]

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tokio::runtime::RuntimeFlavor;
use tracing::{debug, warn};

use crate::activity::ActivityKind;
use crate::circle::{Category, Result, Role, Visibility};
use crate::content::InteractionKind;

pub(crate) mod activity;
pub(crate) mod circles;
pub(crate) mod content;
pub(crate) mod gating;
pub(crate) mod invites;
pub(crate) mod leaderboard;
pub(crate) mod memberships;

/// Runs blocking storage work from async code.
///
/// On a multi-threaded tokio runtime the current worker hands its queued
/// tasks to other workers while `f` waits on the connection mutex or on
/// `busy_timeout`. Outside such a runtime `f` runs inline.
pub(crate) fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Default time a statement waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// `SQLite`-based storage for circle data.
///
/// Thread-safe wrapper around a `SQLite` connection. Components receive it
/// as an `Arc<CircleStorage>`.
pub struct CircleStorage {
    conn: Mutex<Connection>,
}

impl CircleStorage {
    /// Opens (or creates) the database at `path`.
    ///
    /// Creates the tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or initialized.
    pub fn new(path: &Path) -> Result<Self> {
        Self::open(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Opens the database at `path` with a custom busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or initialized.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        debug!(path = %path.display(), "opening circle storage");
        let conn = Connection::open(path)?;
        Self::from_connection(conn, busy_timeout)
    }

    /// Creates an in-memory storage instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, DEFAULT_BUSY_TIMEOUT)
    }

    fn from_connection(conn: Connection, busy_timeout: Duration) -> Result<Self> {
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    /// Locks the connection, recovering it if a previous holder panicked.
    ///
    /// A panic inside [`CircleStorage::write`] drops the open transaction,
    /// which rolls it back, so the connection is consistent again.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("recovering circle storage after a panicked operation");
            self.conn.clear_poison();
            poisoned.into_inner()
        })
    }

    /// Runs read-only queries against the connection.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock();
        f(&conn)
    }

    /// Runs `f` inside an immediate transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back
    /// otherwise, so callers never observe a partially applied operation.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Initializes the database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock();

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS circles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                description TEXT,
                image_url TEXT,
                banner_url TEXT,
                creator TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT 'general',
                visibility TEXT NOT NULL DEFAULT 'public',
                member_count INTEGER NOT NULL DEFAULT 0 CHECK (member_count >= 0),
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS circle_role_permissions (
                circle_id TEXT NOT NULL REFERENCES circles(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                can_post INTEGER NOT NULL,
                can_comment INTEGER NOT NULL,
                can_invite INTEGER NOT NULL,
                can_moderate INTEGER NOT NULL,
                can_manage_treasury INTEGER NOT NULL,
                can_create_proposal INTEGER NOT NULL,
                can_vote INTEGER NOT NULL,
                can_manage_roles INTEGER NOT NULL,
                PRIMARY KEY (circle_id, role)
            );

            CREATE TABLE IF NOT EXISTS circle_memberships (
                circle_id TEXT NOT NULL REFERENCES circles(id) ON DELETE CASCADE,
                member TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'member',
                joined_at INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (circle_id, member)
            );
            CREATE INDEX IF NOT EXISTS idx_memberships_member
                ON circle_memberships(member, active);

            CREATE TABLE IF NOT EXISTS circle_gating_rules (
                id TEXT PRIMARY KEY,
                circle_id TEXT NOT NULL REFERENCES circles(id) ON DELETE CASCADE,
                rule_type TEXT NOT NULL,
                params TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_gating_rules_circle
                ON circle_gating_rules(circle_id, active);

            CREATE TABLE IF NOT EXISTS circle_invites (
                id TEXT PRIMARY KEY,
                circle_id TEXT NOT NULL REFERENCES circles(id) ON DELETE CASCADE,
                invited_by TEXT NOT NULL,
                code TEXT NOT NULL UNIQUE,
                invited_address TEXT,
                used INTEGER NOT NULL DEFAULT 0,
                used_by TEXT,
                used_at INTEGER,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_invites_circle
                ON circle_invites(circle_id);

            CREATE TABLE IF NOT EXISTS circle_posts (
                id TEXT PRIMARY KEY,
                circle_id TEXT NOT NULL REFERENCES circles(id) ON DELETE CASCADE,
                author TEXT NOT NULL,
                title TEXT,
                content TEXT NOT NULL,
                pinned INTEGER NOT NULL DEFAULT 0,
                like_count INTEGER NOT NULL DEFAULT 0 CHECK (like_count >= 0),
                dislike_count INTEGER NOT NULL DEFAULT 0 CHECK (dislike_count >= 0),
                comment_count INTEGER NOT NULL DEFAULT 0 CHECK (comment_count >= 0),
                share_count INTEGER NOT NULL DEFAULT 0 CHECK (share_count >= 0),
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_posts_circle_author
                ON circle_posts(circle_id, author);

            CREATE TABLE IF NOT EXISTS circle_comments (
                id TEXT PRIMARY KEY,
                post_id TEXT NOT NULL REFERENCES circle_posts(id) ON DELETE CASCADE,
                circle_id TEXT NOT NULL,
                author TEXT NOT NULL,
                content TEXT NOT NULL,
                parent_comment_id TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_comments_post
                ON circle_comments(post_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_comments_circle_author
                ON circle_comments(circle_id, author);

            CREATE TABLE IF NOT EXISTS circle_post_interactions (
                post_id TEXT NOT NULL REFERENCES circle_posts(id) ON DELETE CASCADE,
                user TEXT NOT NULL,
                kind TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (post_id, user, kind)
            );

            CREATE TABLE IF NOT EXISTS circle_leaderboard (
                circle_id TEXT NOT NULL REFERENCES circles(id) ON DELETE CASCADE,
                member TEXT NOT NULL,
                points INTEGER NOT NULL DEFAULT 0,
                post_count INTEGER NOT NULL DEFAULT 0,
                comment_count INTEGER NOT NULL DEFAULT 0,
                likes_received INTEGER NOT NULL DEFAULT 0,
                last_updated INTEGER NOT NULL,
                PRIMARY KEY (circle_id, member)
            );

            CREATE TABLE IF NOT EXISTS circle_activity (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                circle_id TEXT NOT NULL,
                actor TEXT NOT NULL,
                kind TEXT NOT NULL,
                subject TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_activity_circle
                ON circle_activity(circle_id, id);
            ",
        )?;

        Ok(())
    }
}

/// Implements `ToSql`/`FromSql` for enums with `as_str`/`parse`.
macro_rules! sql_text_enum {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.as_str()))
                }
            }

            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    let text = value.as_str()?;
                    <$ty>::parse(text).ok_or_else(|| {
                        FromSqlError::Other(
                            format!("invalid {} value: {text}", stringify!($ty)).into(),
                        )
                    })
                }
            }
        )+
    };
}

sql_text_enum!(Category, Visibility, Role, InteractionKind, ActivityKind);
