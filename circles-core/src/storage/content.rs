//! Post, comment and interaction rows.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::circle::{Page, Result};
use crate::content::{Comment, InteractionKind, Post};
use crate::ids::{CircleId, PostId};

const POST_COLUMNS: &str = "id, circle_id, author, title, content, pinned, like_count, \
     dislike_count, comment_count, share_count, created_at";

const COMMENT_COLUMNS: &str = "id, post_id, circle_id, author, content, parent_comment_id, created_at";

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        circle_id: row.get(1)?,
        author: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        pinned: row.get(5)?,
        like_count: row.get(6)?,
        dislike_count: row.get(7)?,
        comment_count: row.get(8)?,
        share_count: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        post_id: row.get(1)?,
        circle_id: row.get(2)?,
        author: row.get(3)?,
        content: row.get(4)?,
        parent_comment_id: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Counter column moved by an interaction of `kind`.
const fn counter_column(kind: InteractionKind) -> &'static str {
    match kind {
        InteractionKind::Like => "like_count",
        InteractionKind::Dislike => "dislike_count",
        InteractionKind::Share => "share_count",
    }
}

// ==================== Posts ====================

pub(crate) fn insert_post(conn: &Connection, post: &Post) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO circle_posts (id, circle_id, author, title, content, pinned, like_count,
                                  dislike_count, comment_count, share_count, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ",
        params![
            post.id,
            post.circle_id,
            post.author,
            post.title,
            post.content,
            post.pinned,
            post.like_count,
            post.dislike_count,
            post.comment_count,
            post.share_count,
            post.created_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn get_post(conn: &Connection, id: &PostId) -> Result<Option<Post>> {
    let sql = format!("SELECT {POST_COLUMNS} FROM circle_posts WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], post_from_row).optional()?)
}

/// Posts of a circle, pinned first, then newest first.
pub(crate) fn list_posts(conn: &Connection, circle_id: &CircleId, page: Page) -> Result<Vec<Post>> {
    let sql = format!(
        r"
        SELECT {POST_COLUMNS} FROM circle_posts
        WHERE circle_id = ?1
        ORDER BY pinned DESC, created_at DESC, id
        LIMIT ?2 OFFSET ?3
        "
    );
    let mut stmt = conn.prepare(&sql)?;
    let posts = stmt
        .query_map(params![circle_id, page.limit, page.offset], post_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(posts)
}

pub(crate) fn set_pinned(conn: &Connection, id: &PostId, pinned: bool) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE circle_posts SET pinned = ?2 WHERE id = ?1",
        params![id, pinned],
    )?;
    Ok(rows == 1)
}

/// Deletes a post; comments and interactions cascade.
pub(crate) fn delete_post(conn: &Connection, id: &PostId) -> Result<bool> {
    let rows = conn.execute("DELETE FROM circle_posts WHERE id = ?1", params![id])?;
    Ok(rows == 1)
}

// ==================== Comments ====================

pub(crate) fn insert_comment(conn: &Connection, comment: &Comment) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO circle_comments (id, post_id, circle_id, author, content, parent_comment_id, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
        params![
            comment.id,
            comment.post_id,
            comment.circle_id,
            comment.author,
            comment.content,
            comment.parent_comment_id,
            comment.created_at,
        ],
    )?;
    conn.execute(
        "UPDATE circle_posts SET comment_count = comment_count + 1 WHERE id = ?1",
        params![comment.post_id],
    )?;
    Ok(())
}

pub(crate) fn get_comment(conn: &Connection, id: &crate::ids::CommentId) -> Result<Option<Comment>> {
    let sql = format!("SELECT {COMMENT_COLUMNS} FROM circle_comments WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id], comment_from_row)
        .optional()?)
}

/// Comments of a post, oldest first.
pub(crate) fn list_comments(conn: &Connection, post_id: &PostId, page: Page) -> Result<Vec<Comment>> {
    let sql = format!(
        r"
        SELECT {COMMENT_COLUMNS} FROM circle_comments
        WHERE post_id = ?1
        ORDER BY created_at ASC, id
        LIMIT ?2 OFFSET ?3
        "
    );
    let mut stmt = conn.prepare(&sql)?;
    let comments = stmt
        .query_map(params![post_id, page.limit, page.offset], comment_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(comments)
}

/// Distinct comment authors on a post (for recomputation after deletion).
pub(crate) fn comment_authors(conn: &Connection, post_id: &PostId) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT author FROM circle_comments WHERE post_id = ?1 ORDER BY author")?;
    let authors = stmt
        .query_map(params![post_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(authors)
}

// ==================== Interactions ====================

/// Records an interaction and bumps its counter, unless it already exists.
pub(crate) fn insert_interaction(
    conn: &Connection,
    post_id: &PostId,
    user: &str,
    kind: InteractionKind,
    now: i64,
) -> Result<bool> {
    let rows = conn.execute(
        r"
        INSERT INTO circle_post_interactions (post_id, user, kind, created_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(post_id, user, kind) DO NOTHING
        ",
        params![post_id, user, kind, now],
    )?;
    if rows == 0 {
        return Ok(false);
    }
    let sql = format!(
        "UPDATE circle_posts SET {col} = {col} + 1 WHERE id = ?1",
        col = counter_column(kind)
    );
    conn.execute(&sql, params![post_id])?;
    Ok(true)
}

/// Removes an interaction and lowers its counter, if it exists.
pub(crate) fn delete_interaction(
    conn: &Connection,
    post_id: &PostId,
    user: &str,
    kind: InteractionKind,
) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM circle_post_interactions WHERE post_id = ?1 AND user = ?2 AND kind = ?3",
        params![post_id, user, kind],
    )?;
    if rows == 0 {
        return Ok(false);
    }
    let sql = format!(
        "UPDATE circle_posts SET {col} = MAX({col} - 1, 0) WHERE id = ?1",
        col = counter_column(kind)
    );
    conn.execute(&sql, params![post_id])?;
    Ok(true)
}

pub(crate) fn has_interaction(
    conn: &Connection,
    post_id: &PostId,
    user: &str,
    kind: InteractionKind,
) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM circle_post_interactions WHERE post_id = ?1 AND user = ?2 AND kind = ?3",
            params![post_id, user, kind],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

// ==================== Aggregates ====================

/// Authored activity of one member in one circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct AuthorCounts {
    pub posts: i64,
    pub comments: i64,
    pub likes_received: i64,
}

/// Counts posts, comments and likes received from the content tables.
pub(crate) fn author_counts(conn: &Connection, circle_id: &CircleId, member: &str) -> Result<AuthorCounts> {
    let (posts, likes_received): (i64, i64) = conn.query_row(
        r"
        SELECT COUNT(*), IFNULL(SUM(like_count), 0)
        FROM circle_posts
        WHERE circle_id = ?1 AND author = ?2
        ",
        params![circle_id, member],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let comments: i64 = conn.query_row(
        "SELECT COUNT(*) FROM circle_comments WHERE circle_id = ?1 AND author = ?2",
        params![circle_id, member],
        |row| row.get(0),
    )?;
    Ok(AuthorCounts {
        posts,
        comments,
        likes_received,
    })
}
