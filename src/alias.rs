//! The alias/define store (`aliasses` table) and its substitution engine.
//!
//! An *alias* (`is_command=1`) rewrites the command line and re-enters
//! dispatch; a *define* (`is_command=0`) replies with the substituted text
//! directly. A single keyword may have many rows; lookups return them in
//! random order and dispatch queues the surplus into the `next` queue.

use anyhow::Result;
use rand::Rng;
use sqlx::Row;

use crate::database::Db;
use crate::wire::nick_of;

/// One matching row, after escape substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    pub is_command: bool,
    pub text: String,
    pub is_notice: bool,
}

pub async fn add_define(db: &Db, command: &str, is_command: bool, replacement: &str) -> Result<u64> {
    let result = sqlx::query(
        "INSERT INTO aliasses(command, is_command, replacement_text) VALUES(?, ?, ?)",
    )
    .bind(command.to_lowercase())
    .bind(if is_command { 1 } else { 0 })
    .bind(replacement)
    .execute(db.pool())
    .await?;
    Ok(result.last_insert_id())
}

/// Returns false when `nr` did not exist.
pub async fn del_define(db: &Db, nr: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM aliasses WHERE nr=?")
        .bind(nr)
        .execute(db.pool())
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Entries whose keyword contains `what`, newest first.
pub async fn search(db: &Db, what: &str) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query("SELECT command, nr FROM aliasses WHERE command LIKE ? ORDER BY nr DESC")
        .bind(format!("%{}%", what.to_lowercase()))
        .fetch_all(db.pool())
        .await?;

    rows.iter()
        .map(|row| Ok((row.try_get::<String, _>(0)?, row.try_get::<i64, _>(1)?)))
        .collect()
}

/// Keyword and replacement text of entry `nr`.
pub async fn view(db: &Db, nr: i64) -> Result<Option<(String, String)>> {
    let row = sqlx::query("SELECT command, replacement_text FROM aliasses WHERE nr=?")
        .bind(nr)
        .fetch_optional(db.pool())
        .await?;

    match row {
        Some(row) => Ok(Some((row.try_get(0)?, row.try_get(1)?))),
        None => Ok(None),
    }
}

/// Look up every row for the first word of `text` and substitute escapes.
/// `sender` is the invoking `nick!user@host` identity.
pub async fn expand(db: &Db, text: &str, sender: &str) -> Result<Vec<Expansion>> {
    let command = text.split(' ').next().unwrap_or("");

    let rows = sqlx::query(
        "SELECT is_command, replacement_text FROM aliasses WHERE command=? ORDER BY RAND()",
    )
    .bind(command.to_lowercase())
    .fetch_all(db.pool())
    .await?;

    let nick = nick_of(sender);
    let query_text = match text.split_once(' ') {
        Some((_, rest)) => rest.to_string(),
        None => nick.to_string(),
    };

    let mut rng = rand::thread_rng();
    let mut expansions = Vec::with_capacity(rows.len());

    for row in rows {
        let is_command = row.try_get::<i32, _>(0)? != 0;
        let replacement: String = row.try_get(1)?;

        // An alias initially only replaces the command word; the rest of the
        // invocation is carried along.
        let template = if is_command {
            format!("{} {}", replacement, query_text)
        } else {
            replacement
        };

        let substituted = apply_escapes(&template, &query_text, nick, &mut rng);
        expansions.push(Expansion {
            is_command,
            text: substituted.text,
            is_notice: substituted.is_notice,
        });
    }

    Ok(expansions)
}

/// Escapes available to bus-originated channel messages: only %R and %m,
/// there is no invoking user to substitute.
pub fn apply_bus_escapes<R: Rng>(payload: &str, rng: &mut R) -> String {
    let mut text = payload.to_string();

    while let Some(pos) = text.find("%R") {
        let roll: u32 = rng.gen_range(0..=100);
        text.replace_range(pos..pos + 2, &roll.to_string());
    }

    if text.contains("%m") {
        text = text.replace("%m", "");
        text = format!("\u{1}ACTION {}\u{1}", text.trim());
    }

    text
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substituted {
    pub text: String,
    pub is_notice: bool,
}

/// Apply the replacement escapes in their fixed order: %R, %q, %u, %n, %m.
///
/// - `%R`: uniform random integer in [0, 100], sampled per occurrence
/// - `%q`: remainder of the original message after the first space
/// - `%u`: invoking nick
/// - `%n`: strip the marker, deliver as NOTICE
/// - `%m`: strip the marker, wrap the result in a CTCP ACTION
pub fn apply_escapes<R: Rng>(template: &str, query: &str, nick: &str, rng: &mut R) -> Substituted {
    let mut text = template.to_string();

    while let Some(pos) = text.find("%R") {
        let roll: u32 = rng.gen_range(0..=100);
        text.replace_range(pos..pos + 2, &roll.to_string());
    }

    text = text.replace("%q", query);
    text = text.replace("%u", nick);

    let is_notice = text.contains("%n");
    if is_notice {
        text = text.replace("%n", "");
    }

    if text.contains("%m") {
        text = text.replace("%m", "");
        text = format!("\u{1}ACTION {}\u{1}", text.trim());
    }

    Substituted { text, is_notice }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn replaces_query_and_nick() {
        let out = apply_escapes("%u asked for %q", "coffee", "alice", &mut rng());
        assert_eq!(out.text, "alice asked for coffee");
        assert!(!out.is_notice);
    }

    #[test]
    fn random_escape_yields_number_in_range() {
        let out = apply_escapes("roll: %R", "", "alice", &mut rng());
        let value: u32 = out.text.strip_prefix("roll: ").unwrap().parse().unwrap();
        assert!(value <= 100);
    }

    #[test]
    fn each_random_occurrence_is_sampled_separately() {
        let out = apply_escapes("%R %R %R %R %R %R %R %R", "", "a", &mut rng());
        let values: Vec<u32> = out
            .text
            .split(' ')
            .map(|v| v.parse().unwrap())
            .collect();
        assert_eq!(values.len(), 8);
        assert!(values.iter().all(|v| *v <= 100));
        // Eight samples all equal would mean the escape was only rolled once.
        assert!(values.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn notice_flag_strips_marker() {
        let out = apply_escapes("%nsecret reply", "", "alice", &mut rng());
        assert_eq!(out.text, "secret reply");
        assert!(out.is_notice);
    }

    #[test]
    fn action_wraps_in_ctcp() {
        let out = apply_escapes("%mwaves at %u", "", "alice", &mut rng());
        assert_eq!(out.text, "\u{1}ACTION waves at alice\u{1}");
    }

    #[test]
    fn bus_escapes_leave_user_escapes_alone() {
        let out = apply_bus_escapes("%u says %q", &mut rng());
        assert_eq!(out, "%u says %q");

        let out = apply_bus_escapes("%mdoes a thing", &mut rng());
        assert_eq!(out, "\u{1}ACTION does a thing\u{1}");
    }

    #[test]
    fn action_applies_after_other_escapes() {
        let out = apply_escapes("%m%n%u pets %q", "the cat", "alice", &mut rng());
        assert!(out.is_notice);
        assert_eq!(out.text, "\u{1}ACTION alice pets the cat\u{1}");
    }
}
