//! Console output using crossterm
//!
//! Prints transcript lines with a color per origin. Output goes through a
//! generic writer so it can be captured in tests.

use std::io::{self, Write};

use crossterm::{
    queue,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
};

use crate::core::ConnectionState;
use crate::transcript::{Origin, TranscriptLine};

pub const HELP: &str = "\
Commands:
  /listen [port]          Wait for a peer to connect
  /connect [host] [port]  Connect to a listening peer (also host:port)
  /disconnect             Close the connection
  /clear                  Clear the transcript
  /save [path]            Save the transcript to a file
  /status                 Show the connection state
  /help                   Show this help
  /quit                   Exit
Anything else is sent to the peer once connected. Start a message with // to send a leading /.";

/// Console printer
pub struct Console<W: Write> {
    out: W,
    /// Whether to emit color escape sequences
    color: bool,
}

impl Console<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout(), true)
    }
}

impl<W: Write> Console<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    fn color_for(origin: Origin) -> Color {
        match origin {
            Origin::Local => Color::Cyan,
            Origin::Remote => Color::Green,
            Origin::System => Color::DarkGrey,
        }
    }

    /// Print one transcript entry
    pub fn line(&mut self, line: &TranscriptLine) -> io::Result<()> {
        if self.color {
            queue!(
                self.out,
                SetForegroundColor(Self::color_for(line.origin)),
                Print(line.render()),
                ResetColor,
                Print("\n")
            )?;
        } else {
            writeln!(self.out, "{}", line.render())?;
        }
        self.out.flush()
    }

    /// Print an error message
    pub fn error(&mut self, message: &str) -> io::Result<()> {
        if self.color {
            queue!(
                self.out,
                SetForegroundColor(Color::Red),
                SetAttribute(Attribute::Bold),
                Print("error: "),
                SetAttribute(Attribute::Reset),
                SetForegroundColor(Color::Red),
                Print(message),
                ResetColor,
                Print("\n")
            )?;
        } else {
            writeln!(self.out, "error: {}", message)?;
        }
        self.out.flush()
    }

    /// Print informational text that is not part of the transcript
    pub fn info(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out, "{}", message)?;
        self.out.flush()
    }

    pub fn status(&mut self, state: Option<ConnectionState>, detail: &str) -> io::Result<()> {
        let label = match state {
            Some(state) => state.to_string(),
            None => "NO SESSION".to_string(),
        };
        if self.color {
            queue!(
                self.out,
                SetAttribute(Attribute::Bold),
                Print(format!("[{}]", label)),
                SetAttribute(Attribute::Reset),
                Print(format!(" {}\n", detail))
            )?;
        } else {
            writeln!(self.out, "[{}] {}", label, detail)?;
        }
        self.out.flush()
    }

    pub fn help(&mut self) -> io::Result<()> {
        self.info(HELP)
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    #[cfg(test)]
    pub fn out_ref(&self) -> &W {
        &self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> Console<Vec<u8>> {
        Console::new(Vec::new(), false)
    }

    #[test]
    fn test_plain_lines() {
        let mut console = plain();
        console
            .line(&TranscriptLine {
                origin: Origin::Remote,
                text: "hi".into(),
            })
            .unwrap();
        console.error("nope").unwrap();
        console
            .status(Some(ConnectionState::Connected), "127.0.0.1:1501")
            .unwrap();
        console.status(None, "").unwrap();

        let text = String::from_utf8(console.into_inner()).unwrap();
        assert_eq!(
            text,
            "RECEIVED: hi\nerror: nope\n[CONNECTED] 127.0.0.1:1501\n[NO SESSION] \n"
        );
    }

    #[test]
    fn test_colored_line_contains_text() {
        let mut console = Console::new(Vec::new(), true);
        console
            .line(&TranscriptLine {
                origin: Origin::Local,
                text: "hello".into(),
            })
            .unwrap();

        let text = String::from_utf8(console.into_inner()).unwrap();
        assert!(text.contains("SENT: hello"));
        assert!(text.contains('\x1b'));
    }
}
