//! Text command parsing for websocket clients.
//!
//! A websocket frame carries one command in plain text:
//!
//! ```text
//! SET greeting hello
//! QWATCH "SELECT $key, $value WHERE $key LIKE 'user:*'"
//! ```
//!
//! Tokens are separated by whitespace. A double-quoted token may contain
//! whitespace, and `\"` inside it stands for a literal quote. The command
//! name is case-insensitive and normalized to upper case.

use crate::error::ProtocolError;

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Upper-cased command name, e.g. `GET`.
    pub name: String,
    /// Remaining tokens, unquoted.
    pub args: Vec<String>,
}

impl Command {
    /// Builds a command directly. The name is upper-cased.
    pub fn new(name: &str, args: Vec<String>) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            args,
        }
    }

    /// Parses one websocket text frame into a command.
    ///
    /// Returns [`ProtocolError::EmptyCommand`] when the frame holds
    /// nothing but whitespace, so callers can skip it silently.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let mut tokens = tokenize(text.trim())?.into_iter();
        let name = tokens.next().ok_or(ProtocolError::EmptyCommand)?;
        if name.is_empty() {
            return Err(ProtocolError::EmptyCommand);
        }
        Ok(Self::new(&name, tokens.collect()))
    }

    /// Returns the first argument, which is the key for single-key commands.
    pub fn key(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

fn tokenize(input: &str) -> Result<Vec<String>, ProtocolError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let Some(&first) = chars.peek() else {
            return Ok(tokens);
        };

        let mut token = String::new();
        if first == '"' {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' if chars.peek() == Some(&'"') => {
                        chars.next();
                        token.push('"');
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    other => token.push(other),
                }
            }
            if !closed {
                return Err(ProtocolError::UnbalancedQuotes);
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                token.push(c);
            }
        }
        tokens.push(token);
    }
}
