//! Circle and role-permission rows.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::circle::{Capabilities, Category, Circle, Page, Result, Role};
use crate::ids::CircleId;

const CIRCLE_COLUMNS: &str = "id, name, slug, description, image_url, banner_url, creator, \
     category, visibility, member_count, created_at, updated_at";

fn circle_from_row(row: &Row<'_>) -> rusqlite::Result<Circle> {
    Ok(Circle {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        description: row.get(3)?,
        image_url: row.get(4)?,
        banner_url: row.get(5)?,
        creator: row.get(6)?,
        category: row.get(7)?,
        visibility: row.get(8)?,
        member_count: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

/// Inserts a circle unless its slug is taken. Returns whether it was inserted.
pub(crate) fn insert_circle(conn: &Connection, circle: &Circle) -> Result<bool> {
    let rows = conn.execute(
        r"
        INSERT INTO circles (id, name, slug, description, image_url, banner_url, creator,
                             category, visibility, member_count, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(slug) DO NOTHING
        ",
        params![
            circle.id,
            circle.name,
            circle.slug,
            circle.description,
            circle.image_url,
            circle.banner_url,
            circle.creator,
            circle.category,
            circle.visibility,
            circle.member_count,
            circle.created_at,
            circle.updated_at,
        ],
    )?;
    Ok(rows == 1)
}

pub(crate) fn get_circle(conn: &Connection, id: &CircleId) -> Result<Option<Circle>> {
    let sql = format!("SELECT {CIRCLE_COLUMNS} FROM circles WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id], circle_from_row)
        .optional()?)
}

pub(crate) fn get_circle_by_slug(conn: &Connection, slug: &str) -> Result<Option<Circle>> {
    let sql = format!("SELECT {CIRCLE_COLUMNS} FROM circles WHERE slug = ?1");
    Ok(conn
        .query_row(&sql, params![slug], circle_from_row)
        .optional()?)
}

/// Public circles, largest first.
pub(crate) fn list_public(
    conn: &Connection,
    category: Option<Category>,
    page: Page,
) -> Result<Vec<Circle>> {
    let sql = format!(
        r"
        SELECT {CIRCLE_COLUMNS} FROM circles
        WHERE visibility = 'public' AND (?1 IS NULL OR category = ?1)
        ORDER BY member_count DESC, created_at DESC, id
        LIMIT ?2 OFFSET ?3
        "
    );
    let mut stmt = conn.prepare(&sql)?;
    let circles = stmt
        .query_map(params![category, page.limit, page.offset], circle_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(circles)
}

/// Public circles whose name, description or slug contains `needle`
/// (case-insensitive for ASCII).
pub(crate) fn search_public(conn: &Connection, needle: &str, limit: u32) -> Result<Vec<Circle>> {
    let pattern = format!("%{}%", escape_like(needle));
    let sql = format!(
        r"
        SELECT {CIRCLE_COLUMNS} FROM circles
        WHERE visibility = 'public'
          AND (name LIKE ?1 ESCAPE '\' OR slug LIKE ?1 ESCAPE '\'
               OR IFNULL(description, '') LIKE ?1 ESCAPE '\')
        ORDER BY member_count DESC, created_at DESC, id
        LIMIT ?2
        "
    );
    let mut stmt = conn.prepare(&sql)?;
    let circles = stmt
        .query_map(params![pattern, limit], circle_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(circles)
}

/// Circles in which `member` holds an active membership, newest join first.
pub(crate) fn circles_for_member(conn: &Connection, member: &str) -> Result<Vec<Circle>> {
    let columns = CIRCLE_COLUMNS
        .split(", ")
        .map(|c| format!("c.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        r"
        SELECT {columns} FROM circles c
        JOIN circle_memberships m ON m.circle_id = c.id
        WHERE m.member = ?1 AND m.active = 1
        ORDER BY m.joined_at DESC, c.id
        "
    );
    let mut stmt = conn.prepare(&sql)?;
    let circles = stmt
        .query_map(params![member], circle_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(circles)
}

/// Rewrites the mutable metadata columns of a circle.
pub(crate) fn update_metadata(conn: &Connection, circle: &Circle) -> Result<bool> {
    let rows = conn.execute(
        r"
        UPDATE circles
        SET name = ?2, description = ?3, image_url = ?4, banner_url = ?5,
            category = ?6, visibility = ?7, updated_at = ?8
        WHERE id = ?1
        ",
        params![
            circle.id,
            circle.name,
            circle.description,
            circle.image_url,
            circle.banner_url,
            circle.category,
            circle.visibility,
            circle.updated_at,
        ],
    )?;
    Ok(rows == 1)
}

/// Atomically adds `delta` to the member count, never going below zero.
pub(crate) fn adjust_member_count(conn: &Connection, id: &CircleId, delta: i64) -> Result<()> {
    conn.execute(
        "UPDATE circles SET member_count = MAX(member_count + ?2, 0) WHERE id = ?1",
        params![id, delta],
    )?;
    Ok(())
}

pub(crate) fn insert_role_permissions(
    conn: &Connection,
    circle_id: &CircleId,
    role: Role,
    caps: &Capabilities,
) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO circle_role_permissions (circle_id, role, can_post, can_comment, can_invite,
            can_moderate, can_manage_treasury, can_create_proposal, can_vote, can_manage_roles)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ",
        params![
            circle_id,
            role,
            caps.can_post,
            caps.can_comment,
            caps.can_invite,
            caps.can_moderate,
            caps.can_manage_treasury,
            caps.can_create_proposal,
            caps.can_vote,
            caps.can_manage_roles,
        ],
    )?;
    Ok(())
}

fn capabilities_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Capabilities> {
    Ok(Capabilities {
        can_post: row.get(offset)?,
        can_comment: row.get(offset + 1)?,
        can_invite: row.get(offset + 2)?,
        can_moderate: row.get(offset + 3)?,
        can_manage_treasury: row.get(offset + 4)?,
        can_create_proposal: row.get(offset + 5)?,
        can_vote: row.get(offset + 6)?,
        can_manage_roles: row.get(offset + 7)?,
    })
}

pub(crate) fn get_role_permissions(
    conn: &Connection,
    circle_id: &CircleId,
    role: Role,
) -> Result<Option<Capabilities>> {
    Ok(conn
        .query_row(
            r"
            SELECT can_post, can_comment, can_invite, can_moderate, can_manage_treasury,
                   can_create_proposal, can_vote, can_manage_roles
            FROM circle_role_permissions
            WHERE circle_id = ?1 AND role = ?2
            ",
            params![circle_id, role],
            |row| capabilities_from_row(row, 0),
        )
        .optional()?)
}

pub(crate) fn list_role_permissions(
    conn: &Connection,
    circle_id: &CircleId,
) -> Result<Vec<(Role, Capabilities)>> {
    let mut stmt = conn.prepare(
        r"
        SELECT role, can_post, can_comment, can_invite, can_moderate, can_manage_treasury,
               can_create_proposal, can_vote, can_manage_roles
        FROM circle_role_permissions
        WHERE circle_id = ?1
        ",
    )?;
    let mut rows = stmt
        .query_map(params![circle_id], |row| {
            Ok((row.get::<_, Role>(0)?, capabilities_from_row(row, 1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.sort_by_key(|(role, _)| Role::ALL.iter().position(|r| r == role));
    Ok(rows)
}

fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circle::Visibility;
    use crate::storage::CircleStorage;

    fn create_test_circle(id: u8, slug: &str) -> Circle {
        Circle {
            id: CircleId::new(format!("circle{id}")),
            name: format!("Test Circle {id}"),
            slug: slug.to_string(),
            description: Some(format!("About circle {id}")),
            image_url: None,
            banner_url: None,
            creator: "alice".to_string(),
            category: Category::Community,
            visibility: Visibility::Public,
            member_count: 1,
            created_at: 1_000_000 + i64::from(id),
            updated_at: 1_000_000 + i64::from(id),
        }
    }

    #[test]
    fn insert_and_get_circle() {
        let storage = CircleStorage::in_memory().unwrap();
        let circle = create_test_circle(1, "test-circle-1");

        storage
            .write(|tx| insert_circle(tx, &circle))
            .unwrap();
        let retrieved = storage
            .read(|conn| get_circle(conn, &circle.id))
            .unwrap()
            .unwrap();
        assert_eq!(retrieved, circle);

        let by_slug = storage
            .read(|conn| get_circle_by_slug(conn, "test-circle-1"))
            .unwrap()
            .unwrap();
        assert_eq!(by_slug.id, circle.id);
    }

    #[test]
    fn duplicate_slug_is_not_inserted() {
        let storage = CircleStorage::in_memory().unwrap();
        let first = create_test_circle(1, "same");
        let second = create_test_circle(2, "same");

        assert!(storage.write(|tx| insert_circle(tx, &first)).unwrap());
        assert!(!storage.write(|tx| insert_circle(tx, &second)).unwrap());
        assert!(storage
            .read(|conn| get_circle(conn, &second.id))
            .unwrap()
            .is_none());
    }

    #[test]
    fn member_count_never_negative() {
        let storage = CircleStorage::in_memory().unwrap();
        let circle = create_test_circle(1, "c");
        storage.write(|tx| insert_circle(tx, &circle)).unwrap();

        storage
            .write(|tx| adjust_member_count(tx, &circle.id, -5))
            .unwrap();
        let retrieved = storage
            .read(|conn| get_circle(conn, &circle.id))
            .unwrap()
            .unwrap();
        assert_eq!(retrieved.member_count, 0);
    }

    #[test]
    fn search_escapes_wildcards() {
        let storage = CircleStorage::in_memory().unwrap();
        let circle = create_test_circle(1, "plain");
        storage.write(|tx| insert_circle(tx, &circle)).unwrap();

        let hits = storage
            .read(|conn| search_public(conn, "%", 10))
            .unwrap();
        assert!(hits.is_empty());
        let hits = storage
            .read(|conn| search_public(conn, "TEST circle", 10))
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn list_public_hides_private_and_filters_category() {
        let storage = CircleStorage::in_memory().unwrap();
        let public = create_test_circle(1, "a");
        let private = Circle {
            visibility: Visibility::Private,
            ..create_test_circle(2, "b")
        };
        let dao = Circle {
            category: Category::Dao,
            member_count: 10,
            ..create_test_circle(3, "c")
        };
        storage
            .write(|tx| {
                insert_circle(tx, &public)?;
                insert_circle(tx, &private)?;
                insert_circle(tx, &dao)?;
                Ok(())
            })
            .unwrap();

        let all = storage
            .read(|conn| list_public(conn, None, Page::default()))
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, dao.id, "largest circle first");

        let daos = storage
            .read(|conn| list_public(conn, Some(Category::Dao), Page::default()))
            .unwrap();
        assert_eq!(daos.len(), 1);
    }

    #[test]
    fn role_permissions_roundtrip_in_role_order() {
        let storage = CircleStorage::in_memory().unwrap();
        let circle = create_test_circle(1, "c");
        storage
            .write(|tx| {
                insert_circle(tx, &circle)?;
                for role in [Role::Viewer, Role::Admin, Role::Member, Role::Moderator] {
                    insert_role_permissions(tx, &circle.id, role, &Capabilities::defaults_for(role))?;
                }
                Ok(())
            })
            .unwrap();

        let rows = storage
            .read(|conn| list_role_permissions(conn, &circle.id))
            .unwrap();
        let roles: Vec<_> = rows.iter().map(|(r, _)| *r).collect();
        assert_eq!(roles, Role::ALL.to_vec());

        let viewer = storage
            .read(|conn| get_role_permissions(conn, &circle.id, Role::Viewer))
            .unwrap()
            .unwrap();
        assert!(!viewer.can_post);
    }
}
