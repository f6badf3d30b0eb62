//! Authorization over the `acls` and `acl_groups` tables.
//!
//! `acls.who` holds either a full lowercased `nick!user@host` identity or a
//! group name; group-to-command grants reuse the same table. `acl_groups`
//! maps group names to member identities. Every comparison happens on the
//! lowercase form of both sides.

use anyhow::{bail, Result};
use sqlx::Row;

use crate::database::Db;

/// Outcome of an authorization check: whether access is granted and which
/// group the command demands (for the denial message).
pub type AclDecision = (bool, Option<String>);

/// The four-step grant check. `required_group` is the registry's snapshot of
/// the command's ACL group, taken by the caller so no query ever runs under
/// the registry lock.
pub async fn check(db: &Db, who: &str, command: &str, required_group: Option<&str>) -> Result<AclDecision> {
    // A command without a group is for everyone.
    let Some(group) = required_group else {
        return Ok((true, None));
    };

    let who_lc = who.to_lowercase();
    let command_lc = command.to_lowercase();

    // Per-user grant.
    let row = sqlx::query("SELECT COUNT(*) FROM acls WHERE command=? AND who=?")
        .bind(&command_lc)
        .bind(&who_lc)
        .fetch_one(db.pool())
        .await?;
    if row.try_get::<i64, _>(0)? >= 1 {
        return Ok((true, Some(group.to_string())));
    }

    // Grant held by one of the user's groups.
    let row = sqlx::query(
        "SELECT COUNT(*) FROM acls a JOIN acl_groups g ON g.group_name=a.who \
         WHERE g.who=? AND a.command=?",
    )
    .bind(&who_lc)
    .bind(&command_lc)
    .fetch_one(db.pool())
    .await?;
    if row.try_get::<i64, _>(0)? >= 1 {
        return Ok((true, Some(group.to_string())));
    }

    // Membership in the group the command itself names.
    let row = sqlx::query("SELECT COUNT(*) FROM acl_groups WHERE group_name=? AND who=?")
        .bind(group.to_lowercase())
        .bind(&who_lc)
        .fetch_one(db.pool())
        .await?;
    if row.try_get::<i64, _>(0)? >= 1 {
        return Ok((true, Some(group.to_string())));
    }

    Ok((false, Some(group.to_string())))
}

pub async fn add_acl(db: &Db, who: &str, command: &str) -> Result<()> {
    sqlx::query("INSERT INTO acls(command, who) VALUES(?, ?)")
        .bind(command.to_lowercase())
        .bind(who.to_lowercase())
        .execute(db.pool())
        .await?;
    Ok(())
}

/// Returns false when no matching row existed.
pub async fn del_acl(db: &Db, who: &str, command: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM acls WHERE command=? AND who=? LIMIT 1")
        .bind(command.to_lowercase())
        .bind(who.to_lowercase())
        .execute(db.pool())
        .await?;
    Ok(result.rows_affected() >= 1)
}

/// Remove every grant and membership for `nick`, whatever host it used.
pub async fn forget_acls(db: &Db, nick: &str) -> Result<()> {
    if nick.contains('%') {
        bail!("nick must not contain wildcards");
    }
    let pattern = format!("{}!%", nick.to_lowercase());

    sqlx::query("DELETE FROM acls WHERE who LIKE ?")
        .bind(&pattern)
        .execute(db.pool())
        .await?;
    sqlx::query("DELETE FROM acl_groups WHERE who LIKE ?")
        .bind(&pattern)
        .execute(db.pool())
        .await?;
    Ok(())
}

/// Copy all group memberships of `from` onto `to`. Per-command rows in
/// `acls` are deliberately not copied.
pub async fn clone_acls(db: &Db, from: &str, to: &str) -> Result<()> {
    let rows = sqlx::query("SELECT group_name FROM acl_groups WHERE who=?")
        .bind(from.to_lowercase())
        .fetch_all(db.pool())
        .await?;

    for row in rows {
        let group: String = row.try_get(0)?;
        sqlx::query("INSERT INTO acl_groups(group_name, who) VALUES(?, ?)")
            .bind(group)
            .bind(to.to_lowercase())
            .execute(db.pool())
            .await?;
    }
    Ok(())
}

/// Rewrite the identity column for every row belonging to `nick`; used when
/// a known user shows up with a new host.
pub async fn update_acls(db: &Db, nick: &str, new_identity: &str) -> Result<()> {
    let pattern = format!("{}!%", nick.to_lowercase());
    let new_identity = new_identity.to_lowercase();

    sqlx::query("UPDATE acls SET who=? WHERE who LIKE ?")
        .bind(&new_identity)
        .bind(&pattern)
        .execute(db.pool())
        .await?;
    sqlx::query("UPDATE acl_groups SET who=? WHERE who LIKE ?")
        .bind(&new_identity)
        .bind(&pattern)
        .execute(db.pool())
        .await?;
    Ok(())
}

pub async fn group_add(db: &Db, who: &str, group: &str) -> Result<()> {
    sqlx::query("INSERT INTO acl_groups(who, group_name) VALUES(?, ?)")
        .bind(who.to_lowercase())
        .bind(group.to_lowercase())
        .execute(db.pool())
        .await?;
    Ok(())
}

pub async fn group_del(db: &Db, who: &str, group: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM acl_groups WHERE who=? AND group_name=? LIMIT 1")
        .bind(who.to_lowercase())
        .bind(group.to_lowercase())
        .execute(db.pool())
        .await?;
    Ok(result.rows_affected() >= 1)
}

/// Commands granted to `who` plus the groups it is a member of, distinct and
/// ordered.
pub async fn list_acls(db: &Db, who: &str) -> Result<Vec<String>> {
    let who = who.to_lowercase();
    let rows = sqlx::query(
        "SELECT DISTINCT item FROM (SELECT command AS item FROM acls WHERE who=? \
         UNION SELECT group_name AS item FROM acl_groups WHERE who=?) AS in_ ORDER BY item",
    )
    .bind(&who)
    .bind(&who)
    .fetch_all(db.pool())
    .await?;

    rows.iter()
        .map(|row| row.try_get::<String, _>(0).map_err(Into::into))
        .collect()
}

pub async fn is_group(db: &Db, group: &str) -> Result<bool> {
    let row = sqlx::query("SELECT COUNT(*) FROM acl_groups WHERE group_name=?")
        .bind(group.to_lowercase())
        .fetch_one(db.pool())
        .await?;
    Ok(row.try_get::<i64, _>(0)? >= 1)
}

/// Every `who` value operators granted commands to; together with the groups
/// plugins declare, this is the `listgroups` view.
pub async fn list_groups(db: &Db) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT DISTINCT who FROM acls")
        .fetch_all(db.pool())
        .await?;

    rows.iter()
        .map(|row| row.try_get::<String, _>(0).map_err(Into::into))
        .collect()
}

/// Commands operators granted to `group`.
pub async fn group_commands(db: &Db, group: &str) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT command FROM acls WHERE who=?")
        .bind(group.to_lowercase())
        .fetch_all(db.pool())
        .await?;

    rows.iter()
        .map(|row| row.try_get::<String, _>(0).map_err(Into::into))
        .collect()
}

/// Member identities of `group`.
pub async fn group_members(db: &Db, group: &str) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT who FROM acl_groups WHERE group_name=?")
        .bind(group.to_lowercase())
        .fetch_all(db.pool())
        .await?;

    rows.iter()
        .map(|row| row.try_get::<String, _>(0).map_err(Into::into))
        .collect()
}
