//! Soft-state table of commands known to the bot.
//!
//! Built-ins are seeded at construction and marked hardcoded: they cannot be
//! overridden by bus registrations and never expire. External plugins
//! announce themselves over the bus (`cmd=…|descr=…|agrp=…|athr=…|loc=…`)
//! and must re-announce within 10 seconds or the janitor evicts them into
//! the `gone` table, which remembers when a command stopped responding.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration as TtlDuration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct PluginEntry {
    pub description: String,
    pub acl_group: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub author: String,
    pub location: String,
}

pub struct Registry {
    inner: Mutex<Inner>,
}

struct Inner {
    plugins: HashMap<String, PluginEntry>,
    hardcoded: HashSet<String>,
    gone: HashMap<String, DateTime<Utc>>,
}

/// Built-in commands: name, description, required ACL group.
const BUILTINS: &[(&str, &str, Option<&str>)] = &[
    (
        "addacl",
        "Add an ACL, format: addacl user|group <user|group> group|cmd <group-name|cmd-name>",
        Some("sysops"),
    ),
    (
        "delacl",
        "Remove an ACL, format: delacl <user> group|cmd <group-name|cmd-name>",
        Some("sysops"),
    ),
    ("listacls", "List all ACLs for a user or group", Some("sysops")),
    (
        "deluser",
        "Forget a person; removes all ACLs for that nick",
        Some("sysops"),
    ),
    ("clone", "Clone ACLs from one user to another", Some("sysops")),
    (
        "meet",
        "Use this when a user (nick) has a new hostname",
        Some("sysops"),
    ),
    ("commands", "Show list of known commands", None),
    (
        "help",
        "Help for commands, parameter is the command to get help for",
        None,
    ),
    ("more", "Continue outputting a too long line of text", None),
    ("define", "Define a replacement for text, see ~alias", None),
    ("deldefine", "Delete a define (by number)", None),
    ("alias", "Add a different name for a command", None),
    ("searchdefine", "Search for defines", None),
    ("searchalias", "Search for aliases", None),
    (
        "viewalias",
        "Show the replacement text of an alias or define (by number)",
        None,
    ),
    ("listgroups", "Shows a list of available groups", Some("sysops")),
    (
        "showgroup",
        "Shows a list of commands or members in a group (showgroup commands|members <groupname>)",
        Some("sysops"),
    ),
    ("apro", "Show commands that match a partial text", None),
];

impl Registry {
    pub fn new() -> Self {
        let now = Utc::now();
        let mut plugins = HashMap::new();
        let mut hardcoded = HashSet::new();

        for (name, description, acl_group) in BUILTINS {
            plugins.insert(
                name.to_string(),
                PluginEntry {
                    description: description.to_string(),
                    acl_group: acl_group.map(str::to_string),
                    registered_at: now,
                    author: "built-in".to_string(),
                    location: "busbot".to_string(),
                },
            );
            hardcoded.insert(name.to_string());
        }

        Self {
            inner: Mutex::new(Inner {
                plugins,
                hardcoded,
                gone: HashMap::new(),
            }),
        }
    }

    /// Process a registration payload from the bus.
    pub fn register(&self, payload: &str) -> Result<()> {
        let mut cmd = None;
        let mut description = String::new();
        let mut acl_group = None;
        let mut author = String::new();
        let mut location = String::new();

        for element in payload.split('|') {
            let (key, value) = element
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed registration element {:?}", element))?;

            match key {
                "cmd" => cmd = Some(value.to_string()),
                "descr" => description = value.to_string(),
                "agrp" => acl_group = Some(value.to_string()),
                "athr" => author = value.to_string(),
                "loc" => location = value.to_string(),
                _ => debug!("ignoring registration key {:?}", key),
            }
        }

        let cmd = cmd.ok_or_else(|| anyhow!("cmd missing in plugin registration"))?;

        let mut inner = self.inner.lock().unwrap();

        if inner.hardcoded.contains(&cmd) {
            bail!("cannot override hardcoded command {:?}", cmd);
        }

        if !inner.plugins.contains_key(&cmd) {
            info!("first announcement of {}", cmd);
        }

        inner.plugins.insert(
            cmd.clone(),
            PluginEntry {
                description,
                acl_group,
                registered_at: Utc::now(),
                author,
                location,
            },
        );
        inner.gone.remove(&cmd);

        Ok(())
    }

    /// Snapshot of a single entry; callers that go on to touch the database
    /// use this so no query ever runs under the registry lock.
    pub fn lookup(&self, command: &str) -> Option<PluginEntry> {
        self.inner.lock().unwrap().plugins.get(command).cloned()
    }

    pub fn contains(&self, command: &str) -> bool {
        self.inner.lock().unwrap().plugins.contains_key(command)
    }

    pub fn is_hardcoded(&self, command: &str) -> bool {
        self.inner.lock().unwrap().hardcoded.contains(command)
    }

    /// When the command was evicted, if it is currently gone.
    pub fn gone_since(&self, command: &str) -> Option<DateTime<Utc>> {
        self.inner.lock().unwrap().gone.get(command).copied()
    }

    pub fn names_sorted(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut names: Vec<String> = inner.plugins.keys().cloned().collect();
        names.sort();
        names
    }

    /// Commands whose name contains `needle` (for `apro`).
    pub fn names_matching(&self, needle: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut names: Vec<String> = inner
            .plugins
            .keys()
            .filter(|name| name.contains(needle))
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Groups declared by plugin registrations (for `listgroups`).
    pub fn plugin_groups(&self) -> HashSet<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .plugins
            .values()
            .filter_map(|entry| entry.acl_group.clone())
            .collect()
    }

    /// Commands a plugin put into `group` (for `showgroup commands`).
    pub fn commands_in_group(&self, group: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut names: Vec<String> = inner
            .plugins
            .iter()
            .filter(|(_, entry)| entry.acl_group.as_deref() == Some(group))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn snapshot(&self) -> Vec<(String, PluginEntry)> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<(String, PluginEntry)> = inner
            .plugins
            .iter()
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn gone_snapshot(&self) -> HashMap<String, DateTime<Utc>> {
        self.inner.lock().unwrap().gone.clone()
    }

    /// Drop non-hardcoded entries whose registration is older than `ttl`,
    /// remembering the eviction moment. Returns the evicted names.
    pub fn evict_stale(&self, ttl: TtlDuration) -> Vec<String> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();

        let stale: Vec<String> = inner
            .plugins
            .iter()
            .filter(|(name, entry)| {
                !inner.hardcoded.contains(*name) && now - entry.registered_at >= ttl
            })
            .map(|(name, _)| name.clone())
            .collect();

        for name in &stale {
            inner.plugins.remove(name);
            inner.gone.insert(name.clone(), now);
        }

        stale
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic eviction of plugins that stopped re-announcing themselves.
pub fn spawn_janitor(registry: Arc<Registry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(4900));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            for name in registry.evict_stale(TtlDuration::seconds(10)) {
                warn!("plugin {} timed out, forgetting it", name);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_seeded_and_hardcoded() {
        let registry = Registry::new();
        assert!(registry.contains("addacl"));
        assert!(registry.is_hardcoded("help"));
        assert_eq!(
            registry.lookup("addacl").unwrap().acl_group.as_deref(),
            Some("sysops")
        );
        assert_eq!(registry.lookup("help").unwrap().acl_group, None);
    }

    #[test]
    fn registers_external_plugin() {
        let registry = Registry::new();
        registry
            .register("cmd=roll|descr=Roll dice|agrp=games|athr=dice-plugin|loc=10.0.0.7")
            .unwrap();

        let entry = registry.lookup("roll").unwrap();
        assert_eq!(entry.description, "Roll dice");
        assert_eq!(entry.acl_group.as_deref(), Some("games"));
        assert_eq!(entry.author, "dice-plugin");
        assert!(!registry.is_hardcoded("roll"));
    }

    #[test]
    fn registration_without_cmd_is_rejected() {
        let registry = Registry::new();
        assert!(registry.register("descr=nope").is_err());
        assert!(registry.register("garbage").is_err());
    }

    #[test]
    fn hardcoded_commands_cannot_be_overridden() {
        let registry = Registry::new();
        assert!(registry.register("cmd=help|descr=evil").is_err());
        assert_eq!(
            registry.lookup("help").unwrap().description,
            "Help for commands, parameter is the command to get help for"
        );
    }

    #[test]
    fn eviction_moves_stale_plugins_to_gone() {
        let registry = Registry::new();
        registry.register("cmd=weather|descr=Weather report").unwrap();

        // Nothing is older than 10 seconds yet.
        assert!(registry.evict_stale(TtlDuration::seconds(10)).is_empty());

        let evicted = registry.evict_stale(TtlDuration::zero());
        assert_eq!(evicted, vec!["weather".to_string()]);
        assert!(!registry.contains("weather"));
        assert!(registry.gone_since("weather").is_some());

        // Built-ins survive even a zero TTL.
        assert!(registry.contains("help"));
    }

    #[test]
    fn reregistration_clears_gone() {
        let registry = Registry::new();
        registry.register("cmd=weather|descr=Weather report").unwrap();
        registry.evict_stale(TtlDuration::zero());
        assert!(registry.gone_since("weather").is_some());

        registry.register("cmd=weather|descr=Weather report").unwrap();
        assert!(registry.gone_since("weather").is_none());
        assert!(registry.contains("weather"));
    }

    #[test]
    fn apro_matches_substrings() {
        let registry = Registry::new();
        let matches = registry.names_matching("acl");
        assert!(matches.contains(&"addacl".to_string()));
        assert!(matches.contains(&"delacl".to_string()));
        assert!(matches.contains(&"listacls".to_string()));
        assert!(!matches.contains(&"help".to_string()));
    }
}
