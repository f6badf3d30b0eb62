//! The bot aggregate: everything a dispatch worker needs to act on a line,
//! plus the handlers that turn IRC events and bus messages into state
//! changes and output.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::alias;
use crate::bus::Bus;
use crate::config::IrcConfig;
use crate::database::Db;
use crate::pager::Pager;
use crate::registry::Registry;
use crate::roster::Roster;
use crate::session::{SessionState, Shared};
use crate::wire::{self, nick_of};

/// How long to wait for a 352 after issuing WHO.
const WHO_WAIT: Duration = Duration::from_secs(5);

pub struct Bot {
    pub(crate) cfg: IrcConfig,
    pub(crate) irc_tx: mpsc::Sender<String>,
    pub(crate) session: Arc<Shared>,
    pub(crate) roster: Arc<Roster>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) db: Db,
    pub(crate) bus: Bus,
    pub(crate) pager: Pager,
}

impl Bot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: IrcConfig,
        irc_tx: mpsc::Sender<String>,
        session: Arc<Shared>,
        roster: Arc<Roster>,
        registry: Arc<Registry>,
        db: Db,
        bus: Bus,
    ) -> Self {
        let pager = Pager::new(cfg.use_notice, irc_tx.clone());
        Self {
            cfg,
            irc_tx,
            session,
            roster,
            registry,
            db,
            bus,
            pager,
        }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub(crate) async fn send_line(&self, line: String) -> Result<()> {
        self.irc_tx.send(line).await?;
        Ok(())
    }

    pub(crate) async fn send_ok(&self, channel: &str, text: &str) -> Result<()> {
        self.pager.privmsg.send(channel, text).await
    }

    pub(crate) async fn send_notice(&self, channel: &str, text: &str) -> Result<()> {
        self.pager.notice.send(channel, text).await
    }

    pub(crate) async fn send_error(&self, channel: &str, text: &str) -> Result<()> {
        self.pager
            .privmsg
            .send(channel, &format!("\u{3}4ERROR: \u{2}{}", text))
            .await
    }

    pub(crate) async fn send_error_notice(&self, channel: &str, text: &str) -> Result<()> {
        self.pager
            .notice
            .send(channel, &format!("\u{3}4ERROR: \u{2}{}", text))
            .await
    }

    pub(crate) async fn send_more(&self, channel: &str) -> Result<()> {
        if !self.pager.send_more(channel).await? {
            self.send_ok(channel, "No more more (baby don't hurt me)").await?;
        }
        Ok(())
    }

    /// Best-effort publish; a broken bus must not take a worker down.
    pub(crate) async fn publish(&self, topic: &str, payload: &str) {
        if let Err(e) = self.bus.publish(topic, payload).await {
            error!("publish to {} failed: {:#}", topic, e);
        }
    }

    /// Mirror a worker failure to the owner nick when one is configured.
    pub(crate) async fn report_failure(&self, line: &str, error: &anyhow::Error) {
        if self.cfg.owner.is_empty() {
            return;
        }
        let _ = self
            .send_notice(
                &self.cfg.owner,
                &format!("error handling {:?}: {:#}", line, error),
            )
            .await;
    }

    /// Issue WHO for `user` and wait (bounded) until the roster knows it.
    pub(crate) async fn invoke_who_and_wait(&self, user: &str) -> Result<()> {
        self.send_line(wire::who(user)).await?;
        self.roster.wait_for_user(user, WHO_WAIT).await;
        Ok(())
    }

    /// Inbound bus subscriptions. `to/irc/+/privmsg` covers both the
    /// configured channels and `\nick` private-message response channels.
    pub async fn subscribe_topics(&self) -> Result<()> {
        for channel in &self.cfg.channels {
            let chan = channel.trim_start_matches('#');
            self.bus.subscribe(&format!("to/irc/{}/notice", chan)).await?;
            self.bus.subscribe(&format!("to/irc/{}/topic", chan)).await?;
        }
        self.bus.subscribe("to/irc/+/privmsg").await?;
        self.bus.subscribe("to/irc-person/#").await?;
        self.bus.subscribe("to/bot/register").await?;
        self.bus.subscribe("to/bot/request").await?;
        Ok(())
    }

    /// Ask plugins to announce themselves and publish bot parameters.
    pub async fn announce(&self) -> Result<()> {
        self.bus.publish("from/bot/command", "register").await?;
        self.bus
            .publish_retained("from/bot/parameter/prefix", &self.cfg.prefix.to_string())
            .await?;
        Ok(())
    }

    /// Handle one framed IRC line. Runs on a worker task; every error is
    /// logged by the caller, nothing crosses the task boundary.
    pub async fn handle_line(&self, raw: &str) -> Result<()> {
        let line = wire::parse(raw)?;
        let prefix = line.prefix.as_str();
        let args = &line.args;

        // Presence events are mirrored onto the bus for observers.
        if matches!(
            line.command.as_str(),
            "JOIN" | "PART" | "KICK" | "NICK" | "QUIT"
        ) {
            let chan = args
                .first()
                .and_then(|a| a.get(1..))
                .unwrap_or_default();
            self.publish(
                &format!("from/irc/{}/{}/{}", chan, prefix, line.command),
                &args.join(" "),
            )
            .await;
        }

        match line.command.as_str() {
            "001" => {
                if self.session.state() == SessionState::UserWait {
                    self.session.set_state(SessionState::ConnectedJoin);
                } else {
                    warn!("001 received in state {:?}", self.session.state());
                    self.session.set_state(SessionState::Disconnecting);
                }
            }
            "352" => {
                // WHO reply: <me> <chan> <user> <host> <server> <nick> ...
                if args.len() >= 6 {
                    self.roster
                        .insert_identity(&format!("{}!{}@{}", args[5], args[2], args[3]));
                }
                self.roster.note_who_activity();
            }
            "315" => {
                self.roster.note_who_activity();
            }
            "353" => {
                if args.len() >= 4 {
                    for nick in args[3].split_whitespace() {
                        let nick = nick.trim_start_matches(['@', '+', '%', '&', '~']);
                        if !nick.is_empty() {
                            self.roster.insert_sentinel(nick);
                        }
                    }
                }
            }
            "331" | "332" => {
                if args.len() >= 3 {
                    let chan = args[1].trim_start_matches('#');
                    self.roster.set_topic(chan, &args[2]);
                    self.publish(&format!("from/irc/{}/topic", chan), &args[2]).await;
                }
            }
            "JOIN" => {
                if let Some(channel) = args.first() {
                    if self.session.state() == SessionState::ConnectedWait
                        && self.session.mark_joined(channel)
                    {
                        self.session.set_state(SessionState::Running);
                    }
                }
                if !prefix.is_empty() {
                    self.roster.insert_identity(prefix);
                }
            }
            "PART" | "QUIT" => {
                self.roster.remove(nick_of(prefix));
            }
            "KICK" => {
                if args.len() >= 2 {
                    self.roster.remove(&args[1]);
                }
            }
            "NICK" => {
                if let Some(new_nick) = args.first() {
                    self.roster.rename(prefix, new_nick);
                }
            }
            "PING" => {
                self.send_line(wire::pong(args.first().map(String::as_str)))
                    .await?;
            }
            "PRIVMSG" => {
                self.handle_privmsg(prefix, args).await?;
            }
            "NOTICE" => {
                if args.len() >= 2 {
                    let chan = args[0].get(1..).unwrap_or_default();
                    self.publish(&format!("from/irc/{}/{}/notice", chan, prefix), &args[1])
                        .await;
                }
            }
            "TOPIC" => {
                if args.len() >= 2 {
                    let chan = args[0].trim_start_matches('#');
                    self.roster.set_topic(chan, &args[1]);
                    self.publish(&format!("from/irc/{}/topic", chan), &args[1]).await;
                }
            }
            "INVITE" => {
                // Never follow an invite into an arbitrary channel; re-join
                // the configured set only.
                for channel in &self.cfg.channels {
                    self.send_line(wire::join(channel)).await?;
                }
            }
            _ => {
                debug!("command {:?} is not handled (from {:?})", line.command, prefix);
            }
        }

        Ok(())
    }

    /// Route one inbound bus message, after stripping the topic prefix.
    pub async fn handle_bus_message(&self, topic: &str, payload: &str) -> Result<()> {
        let Some(topic) = topic.strip_prefix(self.bus.prefix()) else {
            warn!("topic {:?} lacks the configured prefix", topic);
            return Ok(());
        };

        // Anything with a line break could smuggle extra IRC commands.
        if payload.contains('\n') || payload.contains('\r') {
            error!("invalid content to send for {}", topic);
            return Ok(());
        }

        let parts: Vec<&str> = topic.split('/').collect();

        match parts.as_slice() {
            ["to", "irc", target, "privmsg"] => {
                if target.starts_with('\\') {
                    // Reply into a private conversation.
                    self.send_ok(target, payload).await?;
                } else if self.is_configured_channel(target) {
                    let text = alias::apply_bus_escapes(payload, &mut rand::thread_rng());
                    self.send_ok(&format!("#{}", target), &text).await?;
                } else {
                    warn!("privmsg for unknown channel {:?}", target);
                }
            }
            ["to", "irc", target, "notice"] => {
                self.send_line(wire::notice(&format!("#{}", target), payload))
                    .await?;
            }
            ["to", "irc", target, "topic"] => {
                self.send_line(wire::topic(&format!("#{}", target), payload))
                    .await?;
            }
            ["to", "irc-person", nick] => {
                let nick = nick.strip_prefix('\\').unwrap_or(nick);
                self.send_line(wire::privmsg(nick, payload)).await?;
            }
            ["to", "bot", "register"] => {
                if let Err(e) = self.registry.register(payload) {
                    warn!("plugin registration rejected: {:#}", e);
                }
            }
            ["to", "bot", "request"] => {
                if payload.trim() == "topics" {
                    for (channel, text) in self.roster.topics_snapshot() {
                        self.publish(&format!("from/irc/{}/topic", channel), &text).await;
                    }
                } else {
                    warn!("unknown bot request {:?}", payload);
                }
            }
            _ => {
                warn!("invalid topic {:?}", topic);
            }
        }

        Ok(())
    }

    fn is_configured_channel(&self, bare: &str) -> bool {
        self.cfg
            .channels
            .iter()
            .any(|c| c.trim_start_matches('#') == bare)
    }
}
