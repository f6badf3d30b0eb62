//! Channel population bookkeeping: who is present and under which
//! `nick!user@host` identity, plus last-known channel topics.
//!
//! Keys are always the lowercased nick. A value is either the sentinel `?`
//! (seen in a NAMES reply, identity not yet resolved) or a full lowercased
//! identity.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::wire::nick_of;

pub const UNRESOLVED: &str = "?";

pub struct Roster {
    users: Mutex<HashMap<String, String>>,
    topics: Mutex<HashMap<String, String>>,
    /// Signaled on every 352 (WHO reply) and 315 (end of WHO).
    who_activity: Notify,
}

impl Roster {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            topics: Mutex::new(HashMap::new()),
            who_activity: Notify::new(),
        }
    }

    /// Record a nick from a NAMES (353) reply. Never downgrades an already
    /// resolved identity back to the sentinel.
    pub fn insert_sentinel(&self, nick: &str) {
        let mut users = self.users.lock().unwrap();
        users
            .entry(nick.to_lowercase())
            .or_insert_with(|| UNRESOLVED.to_string());
    }

    /// Record a full identity from a JOIN prefix or WHO (352) reply.
    pub fn insert_identity(&self, identity: &str) {
        let identity = identity.to_lowercase();
        let nick = nick_of(&identity).to_string();
        self.users.lock().unwrap().insert(nick, identity);
    }

    pub fn remove(&self, nick: &str) {
        self.users.lock().unwrap().remove(&nick.to_lowercase());
    }

    /// NICK change: re-key the entry, keeping the `!user@host` tail.
    pub fn rename(&self, old_identity: &str, new_nick: &str) {
        let old_identity = old_identity.to_lowercase();
        let old_nick = nick_of(&old_identity).to_string();
        let new_nick = new_nick.to_lowercase();

        let mut users = self.users.lock().unwrap();
        users.remove(&old_nick);

        let new_identity = match old_identity.find('!') {
            Some(pos) => format!("{}{}", new_nick, &old_identity[pos..]),
            None => new_nick.clone(),
        };
        users.insert(new_nick, new_identity);
    }

    pub fn get(&self, nick: &str) -> Option<String> {
        self.users.lock().unwrap().get(&nick.to_lowercase()).cloned()
    }

    /// Whether `user` resolves to a known identity. Accepts either a bare
    /// nick (looked up as key, sentinel does not count) or a full identity
    /// (matched against stored values).
    pub fn identity_known(&self, user: &str) -> bool {
        let user = user.to_lowercase();
        let users = self.users.lock().unwrap();

        if user.contains('!') {
            return users.values().any(|identity| *identity == user);
        }

        match users.get(&user) {
            Some(identity) => identity != UNRESOLVED,
            None => false,
        }
    }

    pub fn users_snapshot(&self) -> HashMap<String, String> {
        self.users.lock().unwrap().clone()
    }

    /// Wake any worker blocked in [`wait_for_user`](Self::wait_for_user).
    pub fn note_who_activity(&self) {
        self.who_activity.notify_waiters();
    }

    /// Block until `user` is known or `timeout` elapses. Used after sending
    /// WHO so ACL updates operate on a fresh identity.
    pub async fn wait_for_user(&self, user: &str, timeout: Duration) {
        let deadline = Instant::now() + timeout;

        while !self.identity_known(user) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let _ = tokio::time::timeout(remaining, self.who_activity.notified()).await;
        }
    }

    pub fn set_topic(&self, channel: &str, text: &str) {
        self.topics
            .lock()
            .unwrap()
            .insert(channel.to_string(), text.to_string());
    }

    pub fn topics_snapshot(&self) -> Vec<(String, String)> {
        let topics = self.topics.lock().unwrap();
        topics.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}
