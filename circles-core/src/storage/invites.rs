//! Invite rows.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::circle::{Invite, Result};
use crate::ids::{CircleId, InviteId};

const INVITE_COLUMNS: &str = "id, circle_id, invited_by, code, invited_address, used, used_by, \
     used_at, expires_at, created_at";

fn invite_from_row(row: &Row<'_>) -> rusqlite::Result<Invite> {
    Ok(Invite {
        id: row.get(0)?,
        circle_id: row.get(1)?,
        invited_by: row.get(2)?,
        code: row.get(3)?,
        invited_address: row.get(4)?,
        used: row.get(5)?,
        used_by: row.get(6)?,
        used_at: row.get(7)?,
        expires_at: row.get(8)?,
        created_at: row.get(9)?,
    })
}

/// Inserts an invite unless the code collides. Returns whether it was inserted.
pub(crate) fn insert_invite(conn: &Connection, invite: &Invite) -> Result<bool> {
    let rows = conn.execute(
        r"
        INSERT INTO circle_invites (id, circle_id, invited_by, code, invited_address, used,
                                    used_by, used_at, expires_at, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(code) DO NOTHING
        ",
        params![
            invite.id,
            invite.circle_id,
            invite.invited_by,
            invite.code,
            invite.invited_address,
            invite.used,
            invite.used_by,
            invite.used_at,
            invite.expires_at,
            invite.created_at,
        ],
    )?;
    Ok(rows == 1)
}

pub(crate) fn get_by_code(conn: &Connection, code: &str) -> Result<Option<Invite>> {
    let sql = format!("SELECT {INVITE_COLUMNS} FROM circle_invites WHERE code = ?1");
    Ok(conn
        .query_row(&sql, params![code], invite_from_row)
        .optional()?)
}

/// Marks an unused, unexpired invite as used by `identity`.
///
/// The guard in the `WHERE` clause makes this the single point at which
/// concurrent redemptions are decided: exactly one caller sees `true`.
pub(crate) fn mark_used(conn: &Connection, code: &str, identity: &str, now: i64) -> Result<bool> {
    let rows = conn.execute(
        r"
        UPDATE circle_invites SET used = 1, used_by = ?2, used_at = ?3
        WHERE code = ?1 AND used = 0 AND expires_at > ?3
          AND (invited_address IS NULL OR invited_address = ?2)
        ",
        params![code, identity, now],
    )?;
    Ok(rows == 1)
}

/// Invites of a circle, newest first.
pub(crate) fn list_for_circle(conn: &Connection, circle_id: &CircleId) -> Result<Vec<Invite>> {
    let sql = format!(
        "SELECT {INVITE_COLUMNS} FROM circle_invites WHERE circle_id = ?1 ORDER BY created_at DESC, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let invites = stmt
        .query_map(params![circle_id], invite_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(invites)
}

/// Deletes an invite that has not been used. Returns whether a row was removed.
pub(crate) fn delete_unused(conn: &Connection, id: &InviteId) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM circle_invites WHERE id = ?1 AND used = 0",
        params![id],
    )?;
    Ok(rows == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CircleStorage;

    fn create_test_invite(code: &str, invited_address: Option<&str>) -> Invite {
        Invite {
            id: InviteId::generate(),
            circle_id: CircleId::new("c1"),
            invited_by: "alice".to_string(),
            code: code.to_string(),
            invited_address: invited_address.map(str::to_string),
            used: false,
            used_by: None,
            used_at: None,
            expires_at: 1_000,
            created_at: 0,
        }
    }

    fn storage_with_circle() -> CircleStorage {
        let storage = CircleStorage::in_memory().unwrap();
        storage
            .write(|tx| {
                tx.execute(
                    "INSERT INTO circles (id, name, slug, creator, created_at, updated_at) VALUES ('c1', 'C', 'c', 'alice', 0, 0)",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        storage
    }

    #[test]
    fn mark_used_only_once() {
        let storage = storage_with_circle();
        let invite = create_test_invite("code1", None);
        storage.write(|tx| insert_invite(tx, &invite)).unwrap();

        assert!(storage.write(|tx| mark_used(tx, "code1", "bob", 10)).unwrap());
        assert!(!storage
            .write(|tx| mark_used(tx, "code1", "carol", 11))
            .unwrap());

        let stored = storage
            .read(|conn| get_by_code(conn, "code1"))
            .unwrap()
            .unwrap();
        assert!(stored.used);
        assert_eq!(stored.used_by.as_deref(), Some("bob"));
        assert_eq!(stored.used_at, Some(10));
    }

    #[test]
    fn mark_used_respects_expiry_and_address() {
        let storage = storage_with_circle();
        storage
            .write(|tx| insert_invite(tx, &create_test_invite("late", None)))
            .unwrap();
        storage
            .write(|tx| insert_invite(tx, &create_test_invite("bound", Some("bob"))))
            .unwrap();

        assert!(!storage.write(|tx| mark_used(tx, "late", "bob", 1_000)).unwrap());
        assert!(!storage
            .write(|tx| mark_used(tx, "bound", "carol", 10))
            .unwrap());
        assert!(storage.write(|tx| mark_used(tx, "bound", "bob", 10)).unwrap());
    }

    #[test]
    fn duplicate_code_is_rejected() {
        let storage = storage_with_circle();
        assert!(storage
            .write(|tx| insert_invite(tx, &create_test_invite("dup", None)))
            .unwrap());
        assert!(!storage
            .write(|tx| insert_invite(tx, &create_test_invite("dup", None)))
            .unwrap());
    }

    #[test]
    fn delete_unused_keeps_used_invites() {
        let storage = storage_with_circle();
        let used = create_test_invite("used", None);
        let fresh = create_test_invite("fresh", None);
        storage
            .write(|tx| {
                insert_invite(tx, &used)?;
                insert_invite(tx, &fresh)?;
                mark_used(tx, "used", "bob", 1)?;
                Ok(())
            })
            .unwrap();

        assert!(!storage.write(|tx| delete_unused(tx, &used.id)).unwrap());
        assert!(storage.write(|tx| delete_unused(tx, &fresh.id)).unwrap());
        let remaining = storage
            .read(|conn| list_for_circle(conn, &CircleId::new("c1")))
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }
}
