// ACL and alias store tests against a real MariaDB/MySQL instance.
//
// These need a live database and skip themselves when the environment does
// not provide one. Point them at a scratch database with:
//
//   BUSBOT_TEST_DB_HOST=localhost BUSBOT_TEST_DB_USER=busbot \
//   BUSBOT_TEST_DB_PASSWORD=secret BUSBOT_TEST_DB_DATABASE=busbot_test \
//   cargo test --test live_db_tests

use busbot::acl;
use busbot::alias;
use busbot::config::DbConfig;
use busbot::database::Db;

fn test_db_config() -> Option<DbConfig> {
    Some(DbConfig {
        host: std::env::var("BUSBOT_TEST_DB_HOST").ok()?,
        user: std::env::var("BUSBOT_TEST_DB_USER").ok()?,
        password: std::env::var("BUSBOT_TEST_DB_PASSWORD").ok()?,
        database: std::env::var("BUSBOT_TEST_DB_DATABASE").ok()?,
    })
}

async fn connect() -> Option<Db> {
    let cfg = test_db_config()?;
    let db = Db::connect(&cfg).await.ok()?;

    for ddl in [
        "CREATE TABLE IF NOT EXISTS acls (command VARCHAR(64) NOT NULL, who VARCHAR(255) NOT NULL)",
        "CREATE TABLE IF NOT EXISTS acl_groups (group_name VARCHAR(64) NOT NULL, who VARCHAR(255) NOT NULL)",
        "CREATE TABLE IF NOT EXISTS aliasses (nr INT NOT NULL AUTO_INCREMENT PRIMARY KEY, \
         command VARCHAR(64) NOT NULL, is_command INT NOT NULL, replacement_text VARCHAR(1024) NOT NULL)",
    ] {
        sqlx::query(ddl).execute(db.pool()).await.ok()?;
    }

    Some(db)
}

fn tag() -> String {
    format!(
        "{}{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .subsec_nanos()
    )
}

#[tokio::test]
async fn probe_answers() {
    let Some(db) = connect().await else {
        eprintln!("BUSBOT_TEST_DB_* not set, skipping");
        return;
    };
    db.probe().await.unwrap();
}

#[tokio::test]
async fn acl_grant_paths() {
    let Some(db) = connect().await else {
        eprintln!("BUSBOT_TEST_DB_* not set, skipping");
        return;
    };

    let tag = tag();
    let who = format!("alice!u@h{}", tag);
    let group = format!("games{}", tag);
    let command = format!("roll{}", tag);

    // No grant at all.
    let (allowed, required) = acl::check(&db, &who, &command, Some(group.as_str()))
        .await
        .unwrap();
    assert!(!allowed);
    assert_eq!(required.as_deref(), Some(group.as_str()));

    // No required group means everyone may.
    let (allowed, required) = acl::check(&db, &who, &command, None).await.unwrap();
    assert!(allowed);
    assert!(required.is_none());

    // Membership in the group the command names.
    acl::group_add(&db, &who, &group).await.unwrap();
    let (allowed, _) = acl::check(&db, &who, &command, Some(group.as_str()))
        .await
        .unwrap();
    assert!(allowed);

    // A grant held by the user's group transfers to the user, even for a
    // command demanding some other group.
    let held = format!("deploy{}", tag);
    acl::add_acl(&db, &group, &held).await.unwrap();
    let (allowed, _) = acl::check(&db, &who, &held, Some("elsewhere")).await.unwrap();
    assert!(allowed);

    // A direct per-user grant overrides the group demand.
    let direct = format!("solo{}", tag);
    acl::add_acl(&db, &who, &direct).await.unwrap();
    let (allowed, _) = acl::check(&db, &who, &direct, Some("elsewhere")).await.unwrap();
    assert!(allowed);

    // list_acls shows commands and memberships, ordered and distinct.
    let listing = acl::list_acls(&db, &who).await.unwrap();
    assert!(listing.contains(&direct));
    assert!(listing.contains(&group));

    assert!(acl::is_group(&db, &group).await.unwrap());

    // Cleanup via the same operations the bot exposes.
    assert!(acl::del_acl(&db, &who, &direct).await.unwrap());
    assert!(!acl::del_acl(&db, &who, &direct).await.unwrap());
    acl::forget_acls(&db, "alice").await.unwrap();
    sqlx::query("DELETE FROM acls WHERE who=?")
        .bind(group.to_lowercase())
        .execute(db.pool())
        .await
        .unwrap();
}

#[tokio::test]
async fn clone_copies_group_memberships_only() {
    let Some(db) = connect().await else {
        eprintln!("BUSBOT_TEST_DB_* not set, skipping");
        return;
    };

    let tag = tag();
    let from = format!("carol!c@h{}", tag);
    let to = format!("dave!d@h{}", tag);
    let group = format!("ops{}", tag);
    let command = format!("reboot{}", tag);

    acl::group_add(&db, &from, &group).await.unwrap();
    acl::add_acl(&db, &from, &command).await.unwrap();

    acl::clone_acls(&db, &from, &to).await.unwrap();

    let cloned = acl::list_acls(&db, &to).await.unwrap();
    assert!(cloned.contains(&group));
    // Per-user command rows are not cloned.
    assert!(!cloned.contains(&command));

    for nick in ["carol", "dave"] {
        acl::forget_acls(&db, nick).await.unwrap();
    }
}

#[tokio::test]
async fn update_acls_rewrites_identity() {
    let Some(db) = connect().await else {
        eprintln!("BUSBOT_TEST_DB_* not set, skipping");
        return;
    };

    let tag = tag();
    let nick = format!("erin{}", tag);
    let old_identity = format!("{}!e@old", nick);
    let new_identity = format!("{}!e@new", nick);
    let group = format!("ops{}", tag);

    acl::group_add(&db, &old_identity, &group).await.unwrap();
    acl::update_acls(&db, &nick, &new_identity).await.unwrap();

    let members = acl::group_members(&db, &group).await.unwrap();
    assert!(members.contains(&new_identity));
    assert!(!members.contains(&old_identity));

    acl::forget_acls(&db, &nick).await.unwrap();
}

#[tokio::test]
async fn alias_store_roundtrip() {
    let Some(db) = connect().await else {
        eprintln!("BUSBOT_TEST_DB_* not set, skipping");
        return;
    };

    let tag = tag();
    let keyword = format!("greet{}", tag);

    let nr = alias::add_define(&db, &keyword, false, "hello %u").await.unwrap();
    assert!(nr > 0);

    let found = alias::search(&db, &keyword).await.unwrap();
    assert!(found.iter().any(|(k, n)| *k == keyword && *n == nr as i64));

    let (stored_keyword, replacement) = alias::view(&db, nr as i64).await.unwrap().unwrap();
    assert_eq!(stored_keyword, keyword);
    assert_eq!(replacement, "hello %u");

    let expansions = alias::expand(&db, &keyword, "alice!u@h").await.unwrap();
    assert_eq!(expansions.len(), 1);
    assert!(!expansions[0].is_command);
    assert_eq!(expansions[0].text, "hello alice");

    assert!(alias::del_define(&db, nr as i64).await.unwrap());
    assert!(!alias::del_define(&db, nr as i64).await.unwrap());
    assert!(alias::view(&db, nr as i64).await.unwrap().is_none());
}

#[tokio::test]
async fn multi_row_keyword_yields_all_rows() {
    let Some(db) = connect().await else {
        eprintln!("BUSBOT_TEST_DB_* not set, skipping");
        return;
    };

    let tag = tag();
    let keyword = format!("quote{}", tag);

    let a = alias::add_define(&db, &keyword, false, "first").await.unwrap();
    let b = alias::add_define(&db, &keyword, false, "second").await.unwrap();

    let expansions = alias::expand(&db, &keyword, "alice!u@h").await.unwrap();
    assert_eq!(expansions.len(), 2);
    let mut texts: Vec<&str> = expansions.iter().map(|e| e.text.as_str()).collect();
    texts.sort_unstable();
    assert_eq!(texts, vec!["first", "second"]);

    alias::del_define(&db, a as i64).await.unwrap();
    alias::del_define(&db, b as i64).await.unwrap();
}
