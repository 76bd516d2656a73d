//! Gating rule rows.
//!
//! Parameters are stored as the JSON form of [`RuleParams`]; the
//! `rule_type` column duplicates the tag for indexing and inspection.

use rusqlite::{params, Connection};

use crate::circle::{CircleError, Result};
use crate::gating::{GatingRule, RuleParams};
use crate::ids::{CircleId, RuleId};

pub(crate) fn insert_rule(conn: &Connection, rule: &GatingRule) -> Result<()> {
    let params_json = serde_json::to_string(&rule.params)
        .map_err(|e| CircleError::Storage(format!("Failed to serialize rule params: {e}")))?;

    conn.execute(
        r"
        INSERT INTO circle_gating_rules (id, circle_id, rule_type, params, active, created_by, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
        params![
            rule.id,
            rule.circle_id,
            rule.params.rule_type().as_str(),
            params_json,
            rule.active,
            rule.created_by,
            rule.created_at,
        ],
    )?;
    Ok(())
}

/// Rules of a circle in creation order.
pub(crate) fn list_rules(
    conn: &Connection,
    circle_id: &CircleId,
    active_only: bool,
) -> Result<Vec<GatingRule>> {
    let mut stmt = conn.prepare(
        r"
        SELECT id, circle_id, params, active, created_by, created_at
        FROM circle_gating_rules
        WHERE circle_id = ?1 AND (?2 = 0 OR active = 1)
        ORDER BY created_at ASC, id ASC
        ",
    )?;

    let rows = stmt
        .query_map(params![circle_id, active_only], |row| {
            Ok((
                row.get::<_, RuleId>(0)?,
                row.get::<_, CircleId>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(id, circle_id, params_json, active, created_by, created_at)| {
            let params: RuleParams = serde_json::from_str(&params_json).map_err(|e| {
                CircleError::InvalidData(format!("Invalid params for rule {id}: {e}"))
            })?;
            Ok(GatingRule {
                id,
                circle_id,
                params,
                active,
                created_by,
                created_at,
            })
        })
        .collect()
}

/// Deactivates an active rule. Returns whether a row changed.
pub(crate) fn deactivate_rule(conn: &Connection, circle_id: &CircleId, rule_id: &RuleId) -> Result<bool> {
    let rows = conn.execute(
        r"
        UPDATE circle_gating_rules SET active = 0
        WHERE circle_id = ?1 AND id = ?2 AND active = 1
        ",
        params![circle_id, rule_id],
    )?;
    Ok(rows == 1)
}
