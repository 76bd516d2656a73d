//! Leaderboard rows and rank queries.
//!
//! Ordering everywhere is points descending, then `joined_at` ascending,
//! then member ascending. Only active members are ranked.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::circle::Result;
use crate::ids::CircleId;
use crate::leaderboard::{LeaderboardEntry, RankedEntry};

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LeaderboardEntry> {
    Ok(LeaderboardEntry {
        circle_id: row.get(0)?,
        member: row.get(1)?,
        points: row.get(2)?,
        post_count: row.get(3)?,
        comment_count: row.get(4)?,
        likes_received: row.get(5)?,
        last_updated: row.get(6)?,
    })
}

/// Creates a zero entry if none exists.
pub(crate) fn seed_entry(conn: &Connection, circle_id: &CircleId, member: &str, now: i64) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO circle_leaderboard (circle_id, member, points, post_count, comment_count,
                                        likes_received, last_updated)
        VALUES (?1, ?2, 0, 0, 0, 0, ?3)
        ON CONFLICT(circle_id, member) DO NOTHING
        ",
        params![circle_id, member, now],
    )?;
    Ok(())
}

/// Overwrites an entry with freshly computed values.
pub(crate) fn upsert_entry(conn: &Connection, entry: &LeaderboardEntry) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO circle_leaderboard (circle_id, member, points, post_count, comment_count,
                                        likes_received, last_updated)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(circle_id, member) DO UPDATE SET
            points = excluded.points,
            post_count = excluded.post_count,
            comment_count = excluded.comment_count,
            likes_received = excluded.likes_received,
            last_updated = excluded.last_updated
        ",
        params![
            entry.circle_id,
            entry.member,
            entry.points,
            entry.post_count,
            entry.comment_count,
            entry.likes_received,
            entry.last_updated,
        ],
    )?;
    Ok(())
}

pub(crate) fn get_entry(
    conn: &Connection,
    circle_id: &CircleId,
    member: &str,
) -> Result<Option<LeaderboardEntry>> {
    Ok(conn
        .query_row(
            r"
            SELECT circle_id, member, points, post_count, comment_count, likes_received, last_updated
            FROM circle_leaderboard
            WHERE circle_id = ?1 AND member = ?2
            ",
            params![circle_id, member],
            entry_from_row,
        )
        .optional()?)
}

/// Top entries of active members, with their 1-based rank.
pub(crate) fn top_entries(conn: &Connection, circle_id: &CircleId, limit: u32) -> Result<Vec<RankedEntry>> {
    let mut stmt = conn.prepare(
        r"
        SELECT l.circle_id, l.member, l.points, l.post_count, l.comment_count,
               l.likes_received, l.last_updated, m.joined_at
        FROM circle_leaderboard l
        JOIN circle_memberships m ON m.circle_id = l.circle_id AND m.member = l.member
        WHERE l.circle_id = ?1 AND m.active = 1
        ORDER BY l.points DESC, m.joined_at ASC, l.member ASC
        LIMIT ?2
        ",
    )?;
    let rows = stmt
        .query_map(params![circle_id, limit], |row| {
            Ok((entry_from_row(row)?, row.get::<_, i64>(7)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows
        .into_iter()
        .zip(1_u64..)
        .map(|((entry, joined_at), rank)| RankedEntry {
            entry,
            rank,
            joined_at,
        })
        .collect())
}

/// Entry and rank of one active member.
pub(crate) fn rank_of(conn: &Connection, circle_id: &CircleId, member: &str) -> Result<Option<RankedEntry>> {
    let found = conn
        .query_row(
            r"
            SELECT l.circle_id, l.member, l.points, l.post_count, l.comment_count,
                   l.likes_received, l.last_updated, m.joined_at
            FROM circle_leaderboard l
            JOIN circle_memberships m ON m.circle_id = l.circle_id AND m.member = l.member
            WHERE l.circle_id = ?1 AND l.member = ?2 AND m.active = 1
            ",
            params![circle_id, member],
            |row| Ok((entry_from_row(row)?, row.get::<_, i64>(7)?)),
        )
        .optional()?;

    let Some((entry, joined_at)) = found else {
        return Ok(None);
    };

    let ahead: i64 = conn.query_row(
        r"
        SELECT COUNT(*)
        FROM circle_leaderboard l
        JOIN circle_memberships m ON m.circle_id = l.circle_id AND m.member = l.member
        WHERE l.circle_id = ?1 AND m.active = 1
          AND (l.points > ?2
               OR (l.points = ?2 AND m.joined_at < ?3)
               OR (l.points = ?2 AND m.joined_at = ?3 AND l.member < ?4))
        ",
        params![circle_id, entry.points, joined_at, member],
        |row| row.get(0),
    )?;

    Ok(Some(RankedEntry {
        entry,
        rank: u64::try_from(ahead).unwrap_or(0) + 1,
        joined_at,
    }))
}
