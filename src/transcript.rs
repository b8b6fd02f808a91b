//! Chat transcript
//!
//! Append-only record of everything shown in the chat window: lines we
//! sent, lines the peer sent and system notices. Can be cleared and saved
//! to a text file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscriptError {
    #[error("Error saving file {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where a transcript line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Sent by us
    Local,
    /// Received from the peer
    Remote,
    /// Connection notice
    System,
}

/// A single transcript entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub origin: Origin,
    pub text: String,
}

impl TranscriptLine {
    /// Text as it appears in a saved transcript
    pub fn render(&self) -> String {
        match self.origin {
            Origin::Local => format!("SENT: {}", self.text),
            Origin::Remote => format!("RECEIVED: {}", self.text),
            Origin::System => self.text.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Transcript {
    lines: Vec<TranscriptLine>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line and return it for display
    pub fn push(&mut self, origin: Origin, text: impl Into<String>) -> &TranscriptLine {
        self.lines.push(TranscriptLine {
            origin,
            text: text.into(),
        });
        &self.lines[self.lines.len() - 1]
    }

    pub fn push_local(&mut self, text: impl Into<String>) -> &TranscriptLine {
        self.push(Origin::Local, text)
    }

    pub fn push_remote(&mut self, text: impl Into<String>) -> &TranscriptLine {
        self.push(Origin::Remote, text)
    }

    pub fn push_system(&mut self, text: impl Into<String>) -> &TranscriptLine {
        self.push(Origin::System, text)
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn lines(&self) -> &[TranscriptLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Whole transcript as text, one entry per line
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.render());
            out.push('\n');
        }
        out
    }

    /// Write the transcript to `path`, replacing any existing file
    pub fn save(&self, path: &Path) -> Result<(), TranscriptError> {
        fs::write(path, self.render()).map_err(|source| TranscriptError::Save {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transcript {
        let mut t = Transcript::new();
        t.push_system("Connected to 127.0.0.1:1501");
        t.push_local("hi");
        t.push_remote("hello");
        t
    }

    #[test]
    fn test_render() {
        assert_eq!(
            sample().render(),
            "Connected to 127.0.0.1:1501\nSENT: hi\nRECEIVED: hello\n"
        );
    }

    #[test]
    fn test_clear() {
        let mut t = sample();
        assert_eq!(t.lines().len(), 3);
        t.clear();
        assert!(t.is_empty());
        assert_eq!(t.render(), "");
    }

    #[test]
    fn test_push_returns_entry() {
        let mut t = Transcript::new();
        let line = t.push_remote("x").clone();
        assert_eq!(line.origin, Origin::Remote);
        assert_eq!(t.lines(), &[line]);
    }

    #[test]
    fn test_save() {
        let path = std::env::temp_dir().join(format!("twochat-test-{}.txt", std::process::id()));
        sample().save(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(content, sample().render());
    }

    #[test]
    fn test_save_to_missing_dir_fails() {
        let path = std::env::temp_dir()
            .join("twochat-no-such-dir")
            .join("nested")
            .join("t.txt");
        assert!(matches!(
            sample().save(&path),
            Err(TranscriptError::Save { .. })
        ));
    }
}
