//! The command pipeline: what happens to a PRIVMSG that carries the command
//! prefix, and the built-in administrative commands.
//!
//! Order of play: `next` drain, bounded alias expansion, unknown-command
//! handling (unresponsive plugins, defines, suggestions), the ACL gate, and
//! finally either a built-in below or a republish onto the bus for an
//! out-of-process plugin.

use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeSet;

use crate::acl;
use crate::alias;
use crate::bot::Bot;
use crate::pager::NextEntry;
use crate::roster::UNRESOLVED;
use crate::wire::nick_of;

/// What the internal dispatcher did with a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalRc {
    /// Built-in ran and replied.
    Handled,
    /// Built-in failed; the error has already been reported.
    Error,
    /// Not a built-in, hand it to the bus.
    NotInternal,
}

impl Bot {
    pub(crate) async fn handle_privmsg(&self, prefix: &str, args: &[String]) -> Result<()> {
        if args.len() < 2 || args[1].len() < 2 {
            return Ok(());
        }

        let channel = args[0].clone();
        let mut text = args[1].clone();
        let prefix_len = self.cfg.prefix.len_utf8();

        if text.starts_with(self.cfg.prefix) {
            let rest = &text[prefix_len..];
            if rest == "next" || rest.starts_with("next ") {
                return self.handle_next(&channel, rest).await;
            }

            // Alias expansion. The iteration cap keeps cyclic aliases from
            // spinning forever.
            self.pager.next.clear(&channel);
            for _ in 0..8 {
                let expansions = alias::expand(&self.db, &text[prefix_len..], prefix).await?;
                let Some(first) = expansions.first().cloned() else {
                    break;
                };

                if first.is_command {
                    text = format!("{}{}", self.cfg.prefix, first.text);
                } else {
                    // A define replies directly; sibling rows go to `next`.
                    self.queue_surplus(&channel, &expansions[1..]);
                    return self.deliver(&channel, &first).await;
                }
            }
        }

        if !text.starts_with(self.cfg.prefix) {
            // Plain channel chatter, mirrored for observers on the bus.
            let chan = channel.get(1..).unwrap_or_default();
            self.publish(&format!("from/irc/{}/{}/message", chan, prefix), &args[1])
                .await;
            return Ok(());
        }

        let parts: Vec<String> = text[prefix_len..].split(' ').map(str::to_string).collect();
        let command = parts[0].clone();

        if !self.registry.contains(&command) {
            return self.handle_unknown(&channel, prefix, &command, &text).await;
        }

        let required_group = self
            .registry
            .lookup(&command)
            .and_then(|entry| entry.acl_group);
        let (allowed, group) =
            acl::check(&self.db, prefix, &command, required_group.as_deref()).await?;
        let response = response_channel(&channel, prefix, &self.cfg.nick);

        if !allowed {
            let group = group.unwrap_or_else(|| "(no group)".to_string());
            return self
                .send_error(
                    &response,
                    &format!(
                        "Command \"{}\" denied for user \"{}\", one must be in {}",
                        command, prefix, group
                    ),
                )
                .await;
        }

        match self
            .invoke_internal_commands(prefix, &command, &parts, &response)
            .await?
        {
            InternalRc::Handled | InternalRc::Error => Ok(()),
            InternalRc::NotInternal => {
                if channel == self.cfg.nick {
                    let person = nick_of(prefix);
                    self.publish(
                        &format!("from/irc/\\{}/{}/{}", person, prefix, command),
                        &text,
                    )
                    .await;
                } else {
                    let chan = channel.get(1..).unwrap_or_default();
                    self.publish(&format!("from/irc/{}/{}/{}", chan, prefix, command), &text)
                        .await;
                }
                Ok(())
            }
        }
    }

    /// The command names nothing we know: unresponsive plugin, define, or a
    /// typo worth a suggestion.
    async fn handle_unknown(
        &self,
        channel: &str,
        prefix: &str,
        command: &str,
        text: &str,
    ) -> Result<()> {
        let nick = nick_of(prefix).to_lowercase();
        let is_direct = channel == self.cfg.nick;
        let response = response_channel(channel, prefix, &self.cfg.nick);

        if let Some(since) = self.registry.gone_since(command) {
            let age = (Utc::now() - since).num_milliseconds() as f64 / 1000.0;
            let message = format!(
                "{}: command \"{}\" is unresponsive for {:.2} seconds",
                nick, command, age
            );
            return if is_direct {
                self.send_error(&response, &message).await
            } else {
                self.send_error_notice(&response, &message).await
            };
        }

        let prefix_len = self.cfg.prefix.len_utf8();
        let expansions = alias::expand(&self.db, &text[prefix_len..], prefix).await?;
        let defines: Vec<alias::Expansion> = expansions
            .into_iter()
            .filter(|expansion| !expansion.is_command)
            .collect();
        if let Some(first) = defines.first().cloned() {
            self.queue_surplus(channel, &defines[1..]);
            return self.deliver(channel, &first).await;
        }

        let suggestions = similar_to(command, &self.registry.names_sorted());
        let message = if suggestions.is_empty() {
            format!("{}: command \"{}\" is not known", nick, command)
        } else {
            format!(
                "{}: command \"{}\" is not known (maybe {}?)",
                nick,
                command,
                suggestions.join(" or ")
            )
        };
        if is_direct {
            self.send_error(&response, &message).await
        } else {
            self.send_error_notice(&response, &message).await
        }
    }

    /// Drain the per-channel next queue: one entry, or everything up to the
    /// line budget when the `-a` flag is given.
    async fn handle_next(&self, channel: &str, rest: &str) -> Result<()> {
        if self.pager.next.is_empty(channel) {
            return self.send_ok(channel, "No more \"next\" queued.").await;
        }

        if rest.contains("-a") {
            if let Some(joined) = self.pager.next.drain_joined(channel) {
                return self.send_notice(channel, &joined).await;
            }
        } else if let Some(entry) = self.pager.next.pop(channel) {
            return self.deliver_entry(channel, &entry).await;
        }

        Ok(())
    }

    async fn deliver(&self, channel: &str, expansion: &alias::Expansion) -> Result<()> {
        if expansion.is_notice {
            self.send_notice(channel, &expansion.text).await
        } else {
            self.send_ok(channel, &expansion.text).await
        }
    }

    async fn deliver_entry(&self, channel: &str, entry: &NextEntry) -> Result<()> {
        if entry.is_notice {
            self.send_notice(channel, &entry.text).await
        } else {
            self.send_ok(channel, &entry.text).await
        }
    }

    fn queue_surplus(&self, channel: &str, surplus: &[alias::Expansion]) {
        if surplus.is_empty() {
            return;
        }
        self.pager.next.replace(
            channel,
            surplus
                .iter()
                .map(|expansion| NextEntry {
                    is_notice: expansion.is_notice,
                    text: expansion.text.clone(),
                })
                .collect(),
        );
    }

    /// Run a built-in. `channel` is the response channel; `parts` is the
    /// invocation split on spaces, prefix stripped.
    pub(crate) async fn invoke_internal_commands(
        &self,
        _prefix: &str,
        command: &str,
        parts: &[String],
        channel: &str,
    ) -> Result<InternalRc> {
        // Most ACL commands name a user or group; resolve it up front. The
        // keyword form is `<cmd> user|group <name> ...`, the short form puts
        // the name second.
        let mut target_type: Option<String> = None;
        let mut check_user = String::from("(not given)");
        let mut identifier: Option<String> = None;

        if parts.len() >= 2 {
            if parts.len() >= 3 && (parts[1] == "user" || parts[1] == "group") {
                target_type = Some(parts[1].clone());
                check_user = parts[2].to_lowercase();
            } else {
                check_user = parts[1].to_lowercase();
            }

            if let Some(known) = self.roster.get(&check_user) {
                identifier = Some(known);
            } else if check_user.contains('!') {
                identifier = Some(check_user.clone());
            } else if acl::is_group(&self.db, &check_user).await? {
                identifier = Some(check_user.clone());
            }
        }

        let identifier_known = match identifier.as_deref() {
            Some(id) => self.roster.identity_known(id) || acl::is_group(&self.db, id).await?,
            None => false,
        };

        match command {
            "addacl" => {
                let group_idx = find_key_in_list(parts, "group", 2);
                let cmd_idx = find_key_in_list(parts, "cmd", 2);

                if !identifier_known && target_type.as_deref() == Some("user") {
                    self.invoke_who_and_wait(&check_user).await?;
                    if let Some(known) = self.roster.get(&check_user) {
                        identifier = Some(known);
                    }
                }

                let Some(identifier) = resolved(&identifier) else {
                    self.send_error(channel, &format!("User or group {} is not known", check_user))
                        .await?;
                    return Ok(InternalRc::Error);
                };

                if let Some(group_idx) = group_idx {
                    let group_name = &parts[group_idx + 1];
                    match acl::group_add(&self.db, &identifier, group_name).await {
                        Ok(()) => {
                            self.send_ok(
                                channel,
                                &format!("User {} added to group {}", identifier, group_name),
                            )
                            .await?;
                            Ok(InternalRc::Handled)
                        }
                        Err(e) => {
                            self.send_error(
                                channel,
                                &format!(
                                    "Failed to add {} to group {} ({})",
                                    identifier, group_name, e
                                ),
                            )
                            .await?;
                            Ok(InternalRc::Error)
                        }
                    }
                } else if let Some(cmd_idx) = cmd_idx {
                    let cmd_name = &parts[cmd_idx + 1];
                    if self.registry.contains(cmd_name) {
                        match acl::add_acl(&self.db, &identifier, cmd_name).await {
                            Ok(()) => {
                                self.send_ok(
                                    channel,
                                    &format!(
                                        "ACL added for user or group {} for command {}",
                                        identifier, cmd_name
                                    ),
                                )
                                .await?;
                                Ok(InternalRc::Handled)
                            }
                            Err(_) => {
                                self.send_error(channel, "Failed to add ACL - did it exist already?")
                                    .await?;
                                Ok(InternalRc::Error)
                            }
                        }
                    } else {
                        self.send_error(
                            channel,
                            &format!(
                                "ACL for user {} for command {} NOT added: command/plugin not known",
                                identifier, cmd_name
                            ),
                        )
                        .await?;
                        Ok(InternalRc::Handled)
                    }
                } else {
                    self.send_error(
                        channel,
                        "Usage: addacl user|group <user|group> group|cmd <group-name|cmd-name>",
                    )
                    .await?;
                    Ok(InternalRc::Error)
                }
            }

            "delacl" => {
                let group_idx = find_key_in_list(parts, "group", 2);
                let cmd_idx = find_key_in_list(parts, "cmd", 2);

                if !identifier_known && target_type.as_deref() == Some("user") {
                    self.invoke_who_and_wait(&check_user).await?;
                    if let Some(known) = self.roster.get(&check_user) {
                        identifier = Some(known);
                    }
                }

                let Some(identifier) = resolved(&identifier) else {
                    self.send_error(channel, &format!("User or group {} is not known", check_user))
                        .await?;
                    return Ok(InternalRc::Error);
                };

                if let Some(group_idx) = group_idx {
                    let group_name = &parts[group_idx + 1];
                    match acl::group_del(&self.db, &identifier, group_name).await {
                        Ok(true) => {
                            self.send_ok(
                                channel,
                                &format!("User {} removed from group {}", identifier, group_name),
                            )
                            .await?;
                            Ok(InternalRc::Handled)
                        }
                        Ok(false) => {
                            self.send_error(
                                channel,
                                &format!("User {} was not in group {}", identifier, group_name),
                            )
                            .await?;
                            Ok(InternalRc::Error)
                        }
                        Err(e) => {
                            self.send_error(
                                channel,
                                &format!("Failed to remove from group ({})", e),
                            )
                            .await?;
                            Ok(InternalRc::Error)
                        }
                    }
                } else if let Some(cmd_idx) = cmd_idx {
                    let cmd_name = &parts[cmd_idx + 1];
                    match acl::del_acl(&self.db, &identifier, cmd_name).await {
                        Ok(true) => {
                            self.send_ok(
                                channel,
                                &format!(
                                    "ACL removed for user {} for command {}",
                                    identifier, cmd_name
                                ),
                            )
                            .await?;
                            Ok(InternalRc::Handled)
                        }
                        Ok(false) => {
                            self.send_error(
                                channel,
                                &format!(
                                    "ACL for user {} for command {} not known",
                                    identifier, cmd_name
                                ),
                            )
                            .await?;
                            Ok(InternalRc::Error)
                        }
                        Err(e) => {
                            self.send_error(channel, &format!("Failed to remove ACL ({})", e))
                                .await?;
                            Ok(InternalRc::Error)
                        }
                    }
                } else {
                    self.send_error(
                        channel,
                        "Usage: delacl <user> group|cmd <group-name|cmd-name>",
                    )
                    .await?;
                    Ok(InternalRc::Error)
                }
            }

            "listacls" => {
                if !identifier_known && parts.len() >= 2 {
                    self.invoke_who_and_wait(&check_user).await?;
                    if let Some(known) = self.roster.get(&check_user) {
                        identifier = Some(known);
                    }
                }

                match resolved(&identifier) {
                    Some(identifier) => {
                        let acls = acl::list_acls(&self.db, &identifier).await?;
                        self.send_ok(
                            channel,
                            &format!("ACLs for user {}: \"{}\"", identifier, acls.join(", ")),
                        )
                        .await?;
                    }
                    None => {
                        self.send_error(channel, "Please provide a nick").await?;
                    }
                }
                Ok(InternalRc::Handled)
            }

            "meet" => {
                if parts.len() == 2 {
                    let user = &parts[1];
                    self.invoke_who_and_wait(user).await?;

                    match self.roster.get(user) {
                        Some(identity) if identity != UNRESOLVED => {
                            match acl::update_acls(&self.db, user, &identity).await {
                                Ok(()) => {
                                    self.send_ok(
                                        channel,
                                        &format!("User {} updated to {}", user, identity),
                                    )
                                    .await?;
                                }
                                Err(e) => {
                                    self.send_error(
                                        channel,
                                        &format!("Failed to update ACLs for {} ({})", user, e),
                                    )
                                    .await?;
                                }
                            }
                        }
                        _ => {
                            self.send_error(channel, &format!("User {} is not known", user))
                                .await?;
                        }
                    }
                } else {
                    self.send_error(channel, "Meet parameter missing").await?;
                }
                Ok(InternalRc::Handled)
            }

            "commands" => {
                let known = self.registry.names_sorted().join(", ");
                self.send_ok(channel, &format!("Known commands: {}", known))
                    .await?;
                Ok(InternalRc::Handled)
            }

            "define" | "alias" => {
                if parts.len() >= 3 {
                    let keyword = &parts[1];
                    if self.registry.contains(keyword) {
                        self.send_error(channel, "Cannot override internal/plugin commands")
                            .await?;
                        Ok(InternalRc::Error)
                    } else {
                        match alias::add_define(
                            &self.db,
                            keyword,
                            command == "alias",
                            &parts[2..].join(" "),
                        )
                        .await
                        {
                            Ok(nr) => {
                                self.send_ok(channel, &format!("{} added (number: {})", command, nr))
                                    .await?;
                                Ok(InternalRc::Handled)
                            }
                            Err(e) => {
                                self.send_error(
                                    channel,
                                    &format!("Failed to add {} ({})", command, e),
                                )
                                .await?;
                                Ok(InternalRc::Error)
                            }
                        }
                    }
                } else {
                    self.send_error(channel, &format!("{} missing arguments", command))
                        .await?;
                    Ok(InternalRc::Error)
                }
            }

            "searchdefine" | "searchalias" => {
                if parts.len() >= 2 {
                    let found = alias::search(&self.db, &parts[1]).await?;
                    if found.is_empty() {
                        self.send_error(channel, "None found").await?;
                    } else {
                        let listing = found
                            .iter()
                            .map(|(keyword, nr)| format!("{}: {}", keyword, nr))
                            .collect::<Vec<String>>()
                            .join(", ");
                        self.send_ok(channel, &listing).await?;
                    }
                } else {
                    self.send_error(channel, &format!("{} missing arguments", command))
                        .await?;
                }
                Ok(InternalRc::Handled)
            }

            "viewalias" => {
                if parts.len() == 2 {
                    match parts[1].parse::<i64>() {
                        Ok(nr) => match alias::view(&self.db, nr).await? {
                            Some((keyword, replacement)) => {
                                self.send_ok(
                                    channel,
                                    &format!("Alias {} ({}): {}", nr, keyword, replacement),
                                )
                                .await?;
                            }
                            None => {
                                self.send_error(channel, &format!("Alias {} not known", nr))
                                    .await?;
                            }
                        },
                        Err(_) => {
                            self.send_error(
                                channel,
                                &format!("Parameter {} is not a number", parts[1]),
                            )
                            .await?;
                        }
                    }
                } else {
                    self.send_error(channel, "viewalias missing arguments").await?;
                }
                Ok(InternalRc::Handled)
            }

            "deldefine" => {
                if parts.len() == 2 {
                    match parts[1].parse::<i64>() {
                        Ok(nr) => match alias::del_define(&self.db, nr).await {
                            Ok(true) => {
                                self.send_ok(channel, &format!("Define {} deleted", nr)).await?;
                            }
                            Ok(false) => {
                                self.send_error(channel, &format!("Failed to delete {}", nr))
                                    .await?;
                            }
                            Err(e) => {
                                self.send_error(
                                    channel,
                                    &format!("Failed to delete {} ({})", nr, e),
                                )
                                .await?;
                            }
                        },
                        Err(_) => {
                            self.send_error(
                                channel,
                                &format!("Parameter {} is not a number", parts[1]),
                            )
                            .await?;
                        }
                    }
                } else {
                    self.send_error(channel, "deldefine missing arguments").await?;
                }
                Ok(InternalRc::Handled)
            }

            "help" => {
                if parts.len() == 2 {
                    match self.registry.lookup(&parts[1]) {
                        Some(entry) => {
                            let group = entry.acl_group.as_deref().unwrap_or("none");
                            self.send_ok(
                                channel,
                                &format!("{} (group: {})", entry.description, group),
                            )
                            .await?;
                        }
                        None => {
                            self.send_error(channel, "Command/plugin not known").await?;
                        }
                    }
                } else {
                    let known = self.registry.names_sorted().join(", ");
                    self.send_ok(channel, &format!("Known commands: {}", known))
                        .await?;
                }
                Ok(InternalRc::Handled)
            }

            "more" => {
                self.send_more(channel).await?;
                Ok(InternalRc::Handled)
            }

            "deluser" => {
                if parts.len() == 2 {
                    let user = &parts[1];
                    if !user.contains('%') && acl::forget_acls(&self.db, user).await.is_ok() {
                        self.send_ok(channel, &format!("User {} forgotten", user)).await?;
                    } else {
                        self.send_error(
                            channel,
                            &format!("User {} not known or some other error", user),
                        )
                        .await?;
                    }
                } else {
                    self.send_error(channel, "User not specified").await?;
                }
                Ok(InternalRc::Handled)
            }

            "clone" => {
                if parts.len() == 3 {
                    let from = parts[1].clone();
                    let to = parts[2].clone();
                    let from_nick = nick_of(&from).to_lowercase();
                    let to_nick = nick_of(&to).to_lowercase();

                    if !self.roster.identity_known(&from_nick) {
                        self.invoke_who_and_wait(&from_nick).await?;
                    }
                    if !self.roster.identity_known(&to_nick) {
                        self.invoke_who_and_wait(&to_nick).await?;
                    }

                    let from_id = self
                        .roster
                        .get(&from_nick)
                        .filter(|id| id.as_str() != UNRESOLVED);
                    let to_id = self
                        .roster
                        .get(&to_nick)
                        .filter(|id| id.as_str() != UNRESOLVED);

                    match (from_id, to_id) {
                        (Some(from_id), Some(to_id)) => {
                            match acl::clone_acls(&self.db, &from_id, &to_id).await {
                                Ok(()) => {
                                    self.send_ok(
                                        channel,
                                        &format!("User {} cloned (to {})", from, to),
                                    )
                                    .await?;
                                }
                                Err(e) => {
                                    self.send_error(
                                        channel,
                                        &format!("Cannot clone {} to {}: {}", from, to, e),
                                    )
                                    .await?;
                                }
                            }
                        }
                        _ => {
                            self.send_error(
                                channel,
                                &format!("Either {} or {} is unknown", from, to),
                            )
                            .await?;
                        }
                    }
                } else {
                    self.send_error(channel, "User \"from\" and/or \"to\" not specified")
                        .await?;
                }
                Ok(InternalRc::Handled)
            }

            "listgroups" => {
                let mut groups: BTreeSet<String> =
                    acl::list_groups(&self.db).await?.into_iter().collect();
                groups.extend(self.registry.plugin_groups());

                let listing = if groups.is_empty() {
                    "(none)".to_string()
                } else {
                    groups.into_iter().collect::<Vec<String>>().join(", ")
                };
                self.send_ok(channel, &format!("Defined groups: {}", listing))
                    .await?;
                Ok(InternalRc::Handled)
            }

            "showgroup" => {
                if parts.len() == 3 {
                    let which = parts[1].to_lowercase();
                    let group = &parts[2];

                    match which.as_str() {
                        "commands" => {
                            let mut commands: BTreeSet<String> = acl::group_commands(&self.db, group)
                                .await?
                                .into_iter()
                                .collect();
                            commands.extend(self.registry.commands_in_group(group));
                            self.send_ok(
                                channel,
                                &format!(
                                    "Commands in group {}: {}",
                                    group,
                                    commands.into_iter().collect::<Vec<String>>().join(", ")
                                ),
                            )
                            .await?;
                        }
                        "members" => {
                            let members: BTreeSet<String> = acl::group_members(&self.db, group)
                                .await?
                                .iter()
                                .map(|member| nick_of(member).to_string())
                                .collect();
                            self.send_ok(
                                channel,
                                &format!(
                                    "Members in group {}: {}",
                                    group,
                                    members.into_iter().collect::<Vec<String>>().join(", ")
                                ),
                            )
                            .await?;
                        }
                        _ => {
                            self.send_error(channel, "Command is: showgroup members|commands <groupname>")
                                .await?;
                        }
                    }
                } else {
                    self.send_error(channel, "Command is: showgroup members|commands <groupname>")
                        .await?;
                }
                Ok(InternalRc::Handled)
            }

            "apro" => {
                if parts.len() >= 2 {
                    let which = parts[1].to_lowercase();
                    let matching = self.registry.names_matching(&which);
                    if matching.is_empty() {
                        self.send_ok(channel, &format!("Nothing matches with \"{}\"", which))
                            .await?;
                    } else {
                        self.send_ok(
                            channel,
                            &format!("Try one of the following: {}", matching.join(", ")),
                        )
                        .await?;
                    }
                } else {
                    self.send_error(channel, "apro missing arguments").await?;
                }
                Ok(InternalRc::Handled)
            }

            _ => Ok(InternalRc::NotInternal),
        }
    }
}

/// Replies to a channel invocation go to the channel; replies to a direct
/// message go to the sender's bare nick.
pub fn response_channel(channel: &str, sender: &str, own_nick: &str) -> String {
    if channel == own_nick {
        nick_of(sender).to_string()
    } else {
        channel.to_string()
    }
}

/// Position of keyword `key` in `parts` at or after `start`, provided an
/// argument follows it.
pub fn find_key_in_list(parts: &[String], key: &str, start: usize) -> Option<usize> {
    parts
        .iter()
        .enumerate()
        .skip(start)
        .find(|(_, part)| part.as_str() == key)
        .map(|(idx, _)| idx)
        .filter(|idx| idx + 1 < parts.len())
}

fn resolved(identifier: &Option<String>) -> Option<String> {
    match identifier {
        Some(id) if id != UNRESOLVED => Some(id.clone()),
        _ => None,
    }
}

/// Up to three known command names close to `wrong`: small edit distance or
/// substring containment.
pub fn similar_to(wrong: &str, known: &[String]) -> Vec<String> {
    let wrong = wrong.to_lowercase();
    if wrong.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, &String)> = known
        .iter()
        .filter_map(|name| {
            let distance = levenshtein(&wrong, name);
            if distance <= 2 || name.contains(&wrong) || wrong.contains(name.as_str()) {
                Some((distance, name))
            } else {
                None
            }
        })
        .collect();

    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    scored.into_iter().take(3).map(|(_, name)| name.clone()).collect()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut row = Vec::with_capacity(b.len() + 1);
        row.push(i + 1);
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            row.push((prev[j] + cost).min(prev[j + 1] + 1).min(row[j] + 1));
        }
        prev = row;
    }
    prev[b.len()]
}
