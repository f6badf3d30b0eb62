//! Continuation handling for replies that exceed the IRC line budget.
//!
//! Every channel has two independent more-buffers, one for PRIVMSG output
//! and one for NOTICE output. A reply longer than [`LIMIT`] is stored and
//! emitted chunk by chunk; each chunk but the last carries a `(N more)`
//! suffix and the `more` command sends the next one. The next queue holds
//! surplus results of a multi-row alias expansion for the `next` command.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Maximum reply length before the pager kicks in.
pub const LIMIT: usize = 450;
/// How far past [`LIMIT`] we will look for a space to break on.
const SLACK: usize = 25;

pub struct MoreBuffer {
    /// "PRIVMSG" or "NOTICE".
    command: &'static str,
    buffers: Mutex<HashMap<String, String>>,
    tx: mpsc::Sender<String>,
}

impl MoreBuffer {
    pub fn new(command: &'static str, tx: mpsc::Sender<String>) -> Self {
        Self {
            command,
            buffers: Mutex::new(HashMap::new()),
            tx,
        }
    }

    pub fn has_more(&self, channel: &str) -> bool {
        self.buffers
            .lock()
            .unwrap()
            .get(key(channel))
            .is_some_and(|buffer| !buffer.is_empty())
    }

    /// Deliver `text` to `channel`, paging it when too long. A channel name
    /// with a leading `\` is a private-message target; buffers are keyed by
    /// the bare name so a later `more` from that conversation finds them.
    pub async fn send(&self, channel: &str, text: &str) -> anyhow::Result<()> {
        let channel = key(channel);
        if text.len() > LIMIT {
            self.buffers
                .lock()
                .unwrap()
                .insert(channel.to_string(), text.to_string());
            self.send_more(channel).await
        } else {
            self.buffers.lock().unwrap().remove(channel);
            self.emit(channel, text).await
        }
    }

    /// Emit the next chunk of the channel's buffer, or the fixed no-more
    /// line when nothing is pending.
    pub async fn send_more(&self, channel: &str) -> anyhow::Result<()> {
        let channel = key(channel);
        let chunk = {
            let mut buffers = self.buffers.lock().unwrap();
            match buffers.get_mut(channel) {
                Some(buffer) if !buffer.is_empty() => {
                    let cut = split_point(buffer);
                    let chunk = buffer[..cut].trim().to_string();
                    let rest = buffer[cut..].trim().to_string();
                    let remaining = rest.len();
                    *buffer = rest;
                    Some((chunk, remaining))
                }
                _ => None,
            }
        };

        match chunk {
            Some((chunk, remaining)) => {
                let n = remaining.div_ceil(LIMIT);
                let line = if n > 0 {
                    format!("{} ({} more)", chunk, n)
                } else {
                    chunk
                };
                self.emit(channel, &line).await
            }
            None => self.emit(channel, "No more more").await,
        }
    }

    async fn emit(&self, channel: &str, text: &str) -> anyhow::Result<()> {
        self.tx
            .send(format!("{} {} :{}", self.command, key(channel), text))
            .await?;
        Ok(())
    }
}

/// Buffer key and emission target: the channel name without the `\` marker
/// private-message response channels carry.
fn key(channel: &str) -> &str {
    channel.strip_prefix('\\').unwrap_or(channel)
}

/// Where to cut the next chunk: the last space in the `[LIMIT, LIMIT+SLACK]`
/// window, or a hard cut at [`LIMIT`] when the window has none. Cuts are
/// nudged down to char boundaries so multi-byte text never splits mid-char.
fn split_point(buffer: &str) -> usize {
    if buffer.len() <= LIMIT {
        return buffer.len();
    }

    let window_end = floor_boundary(buffer, (LIMIT + SLACK).min(buffer.len()));
    let window_start = floor_boundary(buffer, LIMIT);

    match buffer[window_start..window_end].rfind(' ') {
        Some(pos) => window_start + pos,
        None => window_start,
    }
}

fn floor_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// One queued alias-expansion result.
#[derive(Debug, Clone)]
pub struct NextEntry {
    pub is_notice: bool,
    pub text: String,
}

pub struct NextQueue {
    inner: Mutex<HashMap<String, Vec<NextEntry>>>,
}

impl NextQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn clear(&self, channel: &str) {
        self.inner.lock().unwrap().remove(channel);
    }

    pub fn replace(&self, channel: &str, entries: Vec<NextEntry>) {
        self.inner.lock().unwrap().insert(channel.to_string(), entries);
    }

    pub fn pop(&self, channel: &str) -> Option<NextEntry> {
        let mut inner = self.inner.lock().unwrap();
        let queue = inner.get_mut(channel)?;
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }

    /// Drain entries joined by ` / ` until roughly [`LIMIT`] chars are
    /// collected (the `next -a` form).
    pub fn drain_joined(&self, channel: &str) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        let queue = inner.get_mut(channel)?;
        if queue.is_empty() {
            return None;
        }

        let mut joined = String::new();
        while joined.len() < LIMIT && !queue.is_empty() {
            if !joined.is_empty() {
                joined.push_str(" / ");
            }
            joined.push_str(&queue.remove(0).text);
        }
        Some(joined)
    }

    pub fn is_empty(&self, channel: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .get(channel)
            .map_or(true, |queue| queue.is_empty())
    }
}

impl Default for NextQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-bot paging state: one buffer per output kind plus the next queue.
pub struct Pager {
    pub privmsg: MoreBuffer,
    pub notice: MoreBuffer,
    pub next: NextQueue,
}

impl Pager {
    pub fn new(use_notice: bool, tx: mpsc::Sender<String>) -> Self {
        Self {
            privmsg: MoreBuffer::new("PRIVMSG", tx.clone()),
            notice: MoreBuffer::new(if use_notice { "NOTICE" } else { "PRIVMSG" }, tx),
            next: NextQueue::new(),
        }
    }

    /// Continue whichever buffer has pending output, NOTICE first. Returns
    /// false when both are empty.
    pub async fn send_more(&self, channel: &str) -> anyhow::Result<bool> {
        if self.notice.has_more(channel) {
            self.notice.send_more(channel).await?;
            Ok(true)
        } else if self.privmsg.has_more(channel) {
            self.privmsg.send_more(channel).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn short_text_goes_out_unpaged() {
        let (tx, mut rx) = mpsc::channel(16);
        let pager = MoreBuffer::new("PRIVMSG", tx);

        pager.send("#c", "hello world").await.unwrap();

        let lines = collect(&mut rx).await;
        assert_eq!(lines, vec!["PRIVMSG #c :hello world"]);
        assert!(!pager.has_more("#c"));
    }

    #[tokio::test]
    async fn long_text_is_paged_with_more_suffix() {
        let (tx, mut rx) = mpsc::channel(16);
        let pager = MoreBuffer::new("PRIVMSG", tx);

        let words = "word ".repeat(300); // 1500 chars
        let text = words.trim();
        pager.send("#c", text).await.unwrap();

        let lines = collect(&mut rx).await;
        assert_eq!(lines.len(), 1);
        let first = lines[0].strip_prefix("PRIVMSG #c :").unwrap();
        assert!(first.len() <= LIMIT + SLACK + 16);
        assert!(first.ends_with("(3 more)"), "got {:?}", first);
        assert!(pager.has_more("#c"));
    }

    #[tokio::test]
    async fn more_chunks_reassemble_original_text() {
        let (tx, mut rx) = mpsc::channel(32);
        let pager = MoreBuffer::new("PRIVMSG", tx);

        let words = "word ".repeat(300);
        let text = words.trim().to_string();
        pager.send("#c", &text).await.unwrap();

        while pager.has_more("#c") {
            pager.send_more("#c").await.unwrap();
        }

        let mut reassembled = String::new();
        let lines = collect(&mut rx).await;
        for line in &lines {
            let body = line.strip_prefix("PRIVMSG #c :").unwrap();
            let chunk = match body.rfind(" (") {
                Some(pos) if body.ends_with("more)") => &body[..pos],
                _ => body,
            };
            if !reassembled.is_empty() {
                reassembled.push(' ');
            }
            reassembled.push_str(chunk);
        }

        assert_eq!(reassembled, text);
        assert_eq!(lines.len(), 4);

        // A further more yields the fixed line.
        pager.send_more("#c").await.unwrap();
        let lines = collect(&mut rx).await;
        assert_eq!(lines, vec!["PRIVMSG #c :No more more"]);
    }

    #[tokio::test]
    async fn chunks_break_on_word_boundaries() {
        let (tx, mut rx) = mpsc::channel(16);
        let pager = MoreBuffer::new("NOTICE", tx);

        let words = "abcdefg ".repeat(120); // 960 chars
        pager.send("#c", words.trim()).await.unwrap();

        let lines = collect(&mut rx).await;
        let first = lines[0].strip_prefix("NOTICE #c :").unwrap();
        let chunk = first.strip_suffix(" (2 more)").unwrap_or(first);
        assert!(chunk.ends_with("abcdefg"), "mid-word split: {:?}", chunk);
    }

    #[tokio::test]
    async fn hard_cut_lands_on_char_boundary() {
        let (tx, mut rx) = mpsc::channel(16);
        let pager = MoreBuffer::new("PRIVMSG", tx);

        // No spaces anywhere, multi-byte characters across the cut window.
        let text = "ü".repeat(400); // 800 bytes
        pager.send("#c", &text).await.unwrap();

        let lines = collect(&mut rx).await;
        assert_eq!(lines.len(), 1);
        assert!(pager.has_more("#c"));
    }

    #[tokio::test]
    async fn pm_target_strips_backslash_but_keys_buffer_by_name() {
        let (tx, mut rx) = mpsc::channel(16);
        let pager = MoreBuffer::new("PRIVMSG", tx);

        pager.send("\\alice", "psst").await.unwrap();
        let lines = collect(&mut rx).await;
        assert_eq!(lines, vec!["PRIVMSG alice :psst"]);
    }

    #[test]
    fn next_queue_pops_in_order() {
        let queue = NextQueue::new();
        queue.replace(
            "#c",
            vec![
                NextEntry { is_notice: false, text: "one".into() },
                NextEntry { is_notice: true, text: "two".into() },
            ],
        );

        assert!(!queue.is_empty("#c"));
        assert_eq!(queue.pop("#c").unwrap().text, "one");
        let second = queue.pop("#c").unwrap();
        assert_eq!(second.text, "two");
        assert!(second.is_notice);
        assert!(queue.pop("#c").is_none());
        assert!(queue.is_empty("#c"));
    }

    #[test]
    fn drain_joined_concatenates_up_to_limit() {
        let queue = NextQueue::new();
        queue.replace(
            "#c",
            (0..100)
                .map(|i| NextEntry { is_notice: false, text: format!("entry {}", i) })
                .collect(),
        );

        let joined = queue.drain_joined("#c").unwrap();
        assert!(joined.starts_with("entry 0 / entry 1"));
        assert!(joined.len() >= LIMIT);
        assert!(!queue.is_empty("#c"));
    }
}
