//! Claude Code session log watcher
//!
//! Claude Code appends one JSON object per line to `*.jsonl` files under
//! `~/.claude/projects`. The watcher polls that tree, remembers a byte offset
//! per file and hands back every new assistant reply:
//!
//! - files present when watching starts are read from their current end
//! - files that appear later are read from the start
//! - a file that shrinks (truncated or rewritten) is read again from 0
//! - a trailing line without its newline is left for the next poll

use crate::sequencer::SpeechWorker;
use crate::Result;
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use walkdir::WalkDir;

/// Environment variable overriding the watched directory
pub const WATCH_DIR_ENV: &str = "CLAUDE_WATCH_DIR";

/// `~/.claude/projects`
pub fn default_watch_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".claude").join("projects"))
}

/// An assistant reply found in a session log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMessage {
    pub text: String,
    pub timestamp: Option<String>,
    pub session_id: Option<String>,
    pub source: PathBuf,
}

#[derive(Debug, Deserialize)]
struct LogRecord {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<RecordMessage>,
    timestamp: Option<String>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordMessage {
    content: Option<serde_json::Value>,
}

/// Parse one log line
///
/// `Ok(None)` for valid JSON that is not a speakable assistant reply: other
/// record types, tool calls, or an empty first text block.
pub fn parse_line(line: &str, source: &Path) -> Result<Option<SessionMessage>> {
    let record: LogRecord = serde_json::from_str(line)?;
    if record.kind.as_deref() != Some("assistant") {
        return Ok(None);
    }

    let text = record
        .message
        .as_ref()
        .and_then(|m| m.content.as_ref())
        .and_then(|c| c.as_array())
        .and_then(|items| items.first())
        .and_then(|first| first.get("text"))
        .and_then(|t| t.as_str())
        .filter(|t| !t.trim().is_empty());

    Ok(text.map(|text| SessionMessage {
        text: text.to_string(),
        timestamp: record.timestamp,
        session_id: record.session_id,
        source: source.to_path_buf(),
    }))
}

/// Appends every detected reply to a plain-text log
pub struct Transcript {
    path: PathBuf,
}

impl Transcript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, message: &SessionMessage) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(
            file,
            "[{}] {}",
            message.timestamp.as_deref().unwrap_or("N/A"),
            message
                .source
                .file_name()
                .map(|n| n.to_string_lossy())
                .unwrap_or_default()
        )?;
        writeln!(file, "{}", message.text)?;
        writeln!(file, "{}", "-".repeat(50))?;
        Ok(())
    }
}

/// Polls a directory tree of session logs
pub struct SessionLogWatcher {
    root: PathBuf,
    offsets: HashMap<PathBuf, u64>,
    /// Present at startup but unreadable then; history skipped once readable
    unprimed: HashSet<PathBuf>,
    primed: bool,
}

impl SessionLogWatcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            offsets: HashMap::new(),
            unprimed: HashSet::new(),
            primed: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of files being tracked
    pub fn tracked_files(&self) -> usize {
        self.offsets.len()
    }

    /// Skip the history of every log that already exists
    pub fn prime(&mut self) {
        for path in self.log_files() {
            match last_line_end(&path) {
                Ok(offset) => {
                    self.offsets.insert(path, offset);
                }
                Err(e) => {
                    warn!("Cannot read {:?} yet, its history will be skipped: {}", path, e);
                    self.unprimed.insert(path);
                }
            }
        }
        self.primed = true;
        info!("Watching {} session log(s) under {:?}", self.offsets.len(), self.root);
    }

    /// Collect assistant replies appended since the previous poll
    pub fn poll(&mut self) -> Vec<SessionMessage> {
        if !self.primed {
            self.prime();
        }

        let files = self.log_files();
        self.offsets.retain(|path, _| files.contains(path));
        self.unprimed.retain(|path| files.contains(path));

        let mut messages = Vec::new();
        for path in files {
            if let Err(e) = self.read_new_lines(&path, &mut messages) {
                warn!("Failed to read {:?}: {}", path, e);
            }
        }
        messages
    }

    fn read_new_lines(&mut self, path: &Path, messages: &mut Vec<SessionMessage>) -> Result<()> {
        if self.unprimed.contains(path) {
            let offset = last_line_end(path)?;
            debug!("Skipped history of {:?} up to byte {}", path, offset);
            self.unprimed.remove(path);
            self.offsets.insert(path.to_path_buf(), offset);
        }

        let len = fs::metadata(path)?.len();
        let offset = match self.offsets.get(path) {
            Some(&offset) if len < offset => {
                info!("{:?} was truncated; reading from the start", path);
                0
            }
            Some(&offset) => offset,
            None => {
                debug!("New session log {:?}", path);
                0
            }
        };
        self.offsets.insert(path.to_path_buf(), offset);
        if len == offset {
            return Ok(());
        }

        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let complete = match bytes.iter().rposition(|&b| b == b'\n') {
            Some(idx) => idx + 1,
            None => return Ok(()),
        };

        for line in bytes[..complete].split(|&b| b == b'\n') {
            let line = String::from_utf8_lossy(line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_line(line, path) {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => {}
                Err(e) => warn!("Skipping malformed line in {:?}: {}", path, e),
            }
        }

        self.offsets.insert(path.to_path_buf(), offset + complete as u64);
        Ok(())
    }

    fn log_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(err) => {
                    debug!("Skipping unreadable entry: {}", err);
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        files.sort();
        files
    }

    /// Poll until `running` clears, feeding replies to `worker`
    ///
    /// Every batch stops whatever is being spoken before it is queued.
    pub fn run(
        mut self,
        worker: &SpeechWorker,
        transcript: Option<&Transcript>,
        interval: Duration,
        running: &AtomicBool,
    ) {
        self.prime();

        while running.load(Ordering::Relaxed) {
            let messages = self.poll();
            if !messages.is_empty() {
                let epoch = worker.supersede();
                for message in messages {
                    announce(&message);
                    if let Some(transcript) = transcript {
                        if let Err(e) = transcript.record(&message) {
                            warn!("Failed to write transcript {:?}: {}", transcript.path(), e);
                        }
                    }
                    if !worker.submit(message.text, epoch) {
                        warn!("Speech worker is gone; stopping watcher");
                        return;
                    }
                }
            }
            sleep_while_running(interval, running);
        }
        debug!("Session log watcher stopped");
    }
}

fn announce(message: &SessionMessage) {
    let preview: String = message.text.chars().take(100).collect();
    let ellipsis = if message.text.chars().count() > 100 { "..." } else { "" };
    println!(
        "Reply detected ({}) in {}",
        message.timestamp.as_deref().unwrap_or("N/A"),
        message
            .source
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default()
    );
    println!("  {}{}", preview.replace('\n', " "), ellipsis);
}

fn sleep_while_running(interval: Duration, running: &AtomicBool) {
    let step = Duration::from_millis(50);
    let mut slept = Duration::ZERO;
    while slept < interval && running.load(Ordering::Relaxed) {
        let nap = step.min(interval - slept);
        thread::sleep(nap);
        slept += nap;
    }
}

/// Offset just past the last newline, so a half-written line is not lost
fn last_line_end(path: &Path) -> Result<u64> {
    let bytes = fs::read(path)?;
    Ok(bytes
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|idx| idx as u64 + 1)
        .unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant(text: &str) -> String {
        serde_json::json!({
            "type": "assistant",
            "timestamp": "2026-01-01T00:00:00Z",
            "sessionId": "abc",
            "message": {"content": [{"type": "text", "text": text}]}
        })
        .to_string()
    }

    #[test]
    fn test_parse_assistant_reply() {
        let msg = parse_line(&assistant("こんにちは"), Path::new("s.jsonl"))
            .unwrap()
            .unwrap();
        assert_eq!(msg.text, "こんにちは");
        assert_eq!(msg.session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_parse_ignores_other_records() {
        let user = r#"{"type":"user","message":{"content":[{"text":"hi"}]}}"#;
        assert!(parse_line(user, Path::new("s")).unwrap().is_none());

        let tool_use = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"x"}]}}"#;
        assert!(parse_line(tool_use, Path::new("s")).unwrap().is_none());

        let string_content = r#"{"type":"assistant","message":{"content":"plain"}}"#;
        assert!(parse_line(string_content, Path::new("s")).unwrap().is_none());

        assert!(parse_line("not json", Path::new("s")).is_err());
    }

    #[test]
    fn test_existing_history_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("old.jsonl");
        fs::write(&log, format!("{}\n", assistant("history"))).unwrap();

        let mut watcher = SessionLogWatcher::new(dir.path());
        watcher.prime();
        assert!(watcher.poll().is_empty());

        let mut file = OpenOptions::new().append(true).open(&log).unwrap();
        writeln!(file, "{}", assistant("fresh")).unwrap();
        let texts: Vec<_> = watcher.poll().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["fresh"]);
    }

    #[test]
    fn test_unreadable_at_startup_skips_history_later() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("locked.jsonl");
        fs::write(&log, format!("{}
", assistant("history"))).unwrap();

        let mut watcher = SessionLogWatcher::new(dir.path());
        watcher.prime();
        // As left by a prime that could not read the file
        watcher.offsets.remove(&log);
        watcher.unprimed.insert(log.clone());

        assert!(watcher.poll().is_empty());
        assert!(watcher.unprimed.is_empty());

        let mut file = OpenOptions::new().append(true).open(&log).unwrap();
        writeln!(file, "{}", assistant("fresh")).unwrap();
        let texts: Vec<_> = watcher.poll().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["fresh"]);
    }

    #[test]
    fn test_new_file_read_from_start_and_partial_line_deferred() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = SessionLogWatcher::new(dir.path());
        watcher.prime();

        let nested = dir.path().join("project");
        fs::create_dir(&nested).unwrap();
        let log = nested.join("new.jsonl");
        let line = assistant("first");
        let (head, tail) = line.split_at(10);
        fs::write(&log, head).unwrap();
        assert!(watcher.poll().is_empty());

        let mut file = OpenOptions::new().append(true).open(&log).unwrap();
        write!(file, "{}\nnot json\n", tail).unwrap();
        let texts: Vec<_> = watcher.poll().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["first"]);
    }

    #[test]
    fn test_truncated_file_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("s.jsonl");
        fs::write(&log, format!("{}\n{}\n", assistant("one"), assistant("two"))).unwrap();

        let mut watcher = SessionLogWatcher::new(dir.path());
        watcher.prime();

        fs::write(&log, format!("{}\n", assistant("again"))).unwrap();
        let texts: Vec<_> = watcher.poll().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["again"]);
    }

    #[test]
    fn test_transcript_appends() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = Transcript::new(dir.path().join("replies.log"));
        let message = parse_line(&assistant("記録"), Path::new("s.jsonl"))
            .unwrap()
            .unwrap();
        transcript.record(&message).unwrap();
        transcript.record(&message).unwrap();

        let contents = fs::read_to_string(transcript.path()).unwrap();
        assert_eq!(contents.matches("記録").count(), 2);
        assert!(contents.contains("s.jsonl"));
    }
}
