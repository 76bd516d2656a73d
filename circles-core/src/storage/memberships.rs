//! Membership rows.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::circle::{Membership, Page, Result, Role};
use crate::ids::CircleId;

fn membership_from_row(row: &Row<'_>) -> rusqlite::Result<Membership> {
    Ok(Membership {
        circle_id: row.get(0)?,
        member: row.get(1)?,
        role: row.get(2)?,
        joined_at: row.get(3)?,
        active: row.get(4)?,
    })
}

/// Creates an active membership, or reactivates an inactive one.
///
/// Returns `false` when the member is already active, which is how a
/// concurrent duplicate join observes that it lost.
pub(crate) fn activate(
    conn: &Connection,
    circle_id: &CircleId,
    member: &str,
    role: Role,
    now: i64,
) -> Result<bool> {
    let rows = conn.execute(
        r"
        INSERT INTO circle_memberships (circle_id, member, role, joined_at, active)
        VALUES (?1, ?2, ?3, ?4, 1)
        ON CONFLICT(circle_id, member) DO UPDATE SET
            role = excluded.role,
            joined_at = excluded.joined_at,
            active = 1
        WHERE circle_memberships.active = 0
        ",
        params![circle_id, member, role, now],
    )?;
    Ok(rows == 1)
}

/// Deactivates an active membership. Returns whether a row changed.
pub(crate) fn deactivate(conn: &Connection, circle_id: &CircleId, member: &str) -> Result<bool> {
    let rows = conn.execute(
        r"
        UPDATE circle_memberships SET active = 0
        WHERE circle_id = ?1 AND member = ?2 AND active = 1
        ",
        params![circle_id, member],
    )?;
    Ok(rows == 1)
}

pub(crate) fn get(conn: &Connection, circle_id: &CircleId, member: &str) -> Result<Option<Membership>> {
    Ok(conn
        .query_row(
            r"
            SELECT circle_id, member, role, joined_at, active
            FROM circle_memberships
            WHERE circle_id = ?1 AND member = ?2
            ",
            params![circle_id, member],
            membership_from_row,
        )
        .optional()?)
}

/// Returns the membership only if it is active.
pub(crate) fn get_active(
    conn: &Connection,
    circle_id: &CircleId,
    member: &str,
) -> Result<Option<Membership>> {
    Ok(get(conn, circle_id, member)?.filter(|m| m.active))
}

/// Changes the role of an active member. Returns whether a row changed.
pub(crate) fn set_role(
    conn: &Connection,
    circle_id: &CircleId,
    member: &str,
    role: Role,
) -> Result<bool> {
    let rows = conn.execute(
        r"
        UPDATE circle_memberships SET role = ?3
        WHERE circle_id = ?1 AND member = ?2 AND active = 1
        ",
        params![circle_id, member, role],
    )?;
    Ok(rows == 1)
}

/// Active members, earliest join first.
pub(crate) fn list_active(conn: &Connection, circle_id: &CircleId, page: Page) -> Result<Vec<Membership>> {
    let mut stmt = conn.prepare(
        r"
        SELECT circle_id, member, role, joined_at, active
        FROM circle_memberships
        WHERE circle_id = ?1 AND active = 1
        ORDER BY joined_at ASC, member ASC
        LIMIT ?2 OFFSET ?3
        ",
    )?;
    let members = stmt
        .query_map(params![circle_id, page.limit, page.offset], membership_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(members)
}

pub(crate) fn count_active_with_role(conn: &Connection, circle_id: &CircleId, role: Role) -> Result<i64> {
    Ok(conn.query_row(
        r"
        SELECT COUNT(*) FROM circle_memberships
        WHERE circle_id = ?1 AND role = ?2 AND active = 1
        ",
        params![circle_id, role],
        |row| row.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CircleStorage;

    fn count_active(conn: &Connection, circle_id: &CircleId) -> Result<i64> {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM circle_memberships WHERE circle_id = ?1 AND active = 1",
            params![circle_id],
            |row| row.get(0),
        )?)
    }

    #[test]
    fn activate_is_conditional() {
        let storage = CircleStorage::in_memory().unwrap();
        let circle = CircleId::new("c1");
        storage
            .write(|tx| {
                tx.execute(
                    "INSERT INTO circles (id, name, slug, creator, created_at, updated_at) VALUES ('c1', 'C', 'c', 'alice', 0, 0)",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        assert!(storage
            .write(|tx| activate(tx, &circle, "bob", Role::Member, 10))
            .unwrap());
        assert!(!storage
            .write(|tx| activate(tx, &circle, "bob", Role::Member, 20))
            .unwrap());

        let membership = storage
            .read(|conn| get_active(conn, &circle, "bob"))
            .unwrap()
            .unwrap();
        assert_eq!(membership.joined_at, 10, "losing insert must not touch the row");
        assert_eq!(storage.read(|conn| count_active(conn, &circle)).unwrap(), 1);
    }

    #[test]
    fn deactivate_then_reactivate() {
        let storage = CircleStorage::in_memory().unwrap();
        let circle = CircleId::new("c1");
        storage
            .write(|tx| {
                tx.execute(
                    "INSERT INTO circles (id, name, slug, creator, created_at, updated_at) VALUES ('c1', 'C', 'c', 'alice', 0, 0)",
                    [],
                )?;
                activate(tx, &circle, "bob", Role::Moderator, 10)?;
                Ok(())
            })
            .unwrap();

        assert!(storage.write(|tx| deactivate(tx, &circle, "bob")).unwrap());
        assert!(!storage.write(|tx| deactivate(tx, &circle, "bob")).unwrap());
        assert!(storage
            .read(|conn| get_active(conn, &circle, "bob"))
            .unwrap()
            .is_none());

        assert!(storage
            .write(|tx| activate(tx, &circle, "bob", Role::Member, 30))
            .unwrap());
        let membership = storage
            .read(|conn| get(conn, &circle, "bob"))
            .unwrap()
            .unwrap();
        assert!(membership.active);
        assert_eq!(membership.role, Role::Member);
        assert_eq!(membership.joined_at, 30);
    }
}
