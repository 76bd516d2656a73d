//! Activity log rows.

use rusqlite::{params, Connection, Row};

use crate::activity::{ActivityEntry, ActivityKind};
use crate::circle::Result;
use crate::ids::CircleId;

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<ActivityEntry> {
    Ok(ActivityEntry {
        id: row.get(0)?,
        circle_id: row.get(1)?,
        actor: row.get(2)?,
        kind: row.get(3)?,
        subject: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub(crate) fn append(
    conn: &Connection,
    circle_id: &CircleId,
    actor: &str,
    kind: ActivityKind,
    subject: Option<&str>,
    now: i64,
) -> Result<i64> {
    conn.execute(
        r"
        INSERT INTO circle_activity (circle_id, actor, kind, subject, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ",
        params![circle_id, actor, kind, subject, now],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn recent(
    conn: &Connection,
    circle_id: &CircleId,
    limit: u32,
    before: Option<i64>,
) -> Result<Vec<ActivityEntry>> {
    let mut stmt = conn.prepare(
        r"
        SELECT id, circle_id, actor, kind, subject, created_at
        FROM circle_activity
        WHERE circle_id = ?1 AND (?2 IS NULL OR id < ?2)
        ORDER BY id DESC
        LIMIT ?3
        ",
    )?;
    let entries = stmt
        .query_map(params![circle_id, before, limit], entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

pub(crate) fn for_member(
    conn: &Connection,
    circle_id: &CircleId,
    actor: &str,
    limit: u32,
) -> Result<Vec<ActivityEntry>> {
    let mut stmt = conn.prepare(
        r"
        SELECT id, circle_id, actor, kind, subject, created_at
        FROM circle_activity
        WHERE circle_id = ?1 AND actor = ?2
        ORDER BY id ASC
        LIMIT ?3
        ",
    )?;
    let entries = stmt
        .query_map(params![circle_id, actor, limit], entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}
