//! Command-line tokenization with shell-like quoting semantics
//!
//! Splits a single command string into an ordered argument list. Single and
//! double quotes group whitespace into one token; a backslash escapes a
//! quote character or another backslash (stripping the quote semantics of
//! the escaped character); every other backslash passes through literally.
//!
//! Tokens are materialized once into a single scratch buffer owned by the
//! returned [`CommandLine`] and handed out as string slices — individual
//! tokens are never copied.

use crate::{ProcError, Result};

/// Maximum accepted command-string length in bytes
pub const MAX_COMMAND_LEN: usize = 65536;

/// Constant added to the whitespace count when estimating the argument bound
const ARGV_ESTIMATE_BASE: usize = 16;

/// Hard upper bound on the estimated argument count
const ARGV_HARD_CAP: usize = u16::MAX as usize;

/// An argument vector tokenized from one command string.
///
/// Owns the backing scratch buffer; tokens are non-overlapping slices of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    buf: String,
    spans: Vec<(usize, usize)>,
}

impl CommandLine {
    /// Number of tokens
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Whether the command contained no tokens at all
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// The token at `index`, if any
    pub fn get(&self, index: usize) -> Option<&str> {
        self.spans.get(index).map(|&(lo, hi)| &self.buf[lo..hi])
    }

    /// Iterate over all tokens in order
    pub fn args(&self) -> impl Iterator<Item = &str> + '_ {
        self.spans.iter().map(move |&(lo, hi)| &self.buf[lo..hi])
    }
}

/// Tokenize a command string into an argument vector.
///
/// Fails with [`ProcError::Overflow`] when the command exceeds
/// [`MAX_COMMAND_LEN`], and with [`ProcError::TooManyArguments`] when the
/// token count reaches the argument bound estimated up front from the
/// command's whitespace count — the call fails rather than silently
/// truncating. Unterminated quotes are permissive: the token runs to the
/// end of the string.
pub fn tokenize(cmd: &str) -> Result<CommandLine> {
    if cmd.len() > MAX_COMMAND_LEN {
        return Err(ProcError::Overflow(format!(
            "command is {} bytes, limit is {}",
            cmd.len(),
            MAX_COMMAND_LEN
        )));
    }

    // Size the argument array once, from the whitespace count plus a constant
    let whitespace = cmd.bytes().filter(u8::is_ascii_whitespace).count();
    let bound = (ARGV_ESTIMATE_BASE + whitespace).min(ARGV_HARD_CAP);

    let mut buf = String::with_capacity(cmd.len());
    let mut spans: Vec<(usize, usize)> = Vec::new();
    // Current quote state: None, or the quote character we are inside of
    let mut quote: Option<char> = None;
    // Byte offset in `buf` where the current token began
    let mut start: Option<usize> = None;

    let mut push_token = |spans: &mut Vec<(usize, usize)>, lo: usize, hi: usize| -> Result<()> {
        if spans.len() + 1 >= bound {
            return Err(ProcError::TooManyArguments(format!(
                "command produced more than {} arguments",
                bound
            )));
        }
        spans.push((lo, hi));
        Ok(())
    };

    let mut chars = cmd.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            // An escaped quote or backslash collapses to the bare character,
            // carrying no quote semantics
            '\\' if matches!(chars.peek(), Some('"') | Some('\'') | Some('\\')) => {
                if start.is_none() {
                    start = Some(buf.len());
                }
                if let Some(escaped) = chars.next() {
                    buf.push(escaped);
                }
            }
            // Matching closing quote ends quoting; the delimiter is dropped
            '"' | '\'' if quote == Some(ch) => {
                quote = None;
            }
            // Opening quote: enter quoted state and anchor the token
            '"' | '\'' if quote.is_none() => {
                quote = Some(ch);
                if start.is_none() {
                    start = Some(buf.len());
                }
            }
            // Unescaped whitespace outside quoting terminates the token
            c if quote.is_none() && c.is_ascii_whitespace() => {
                if let Some(lo) = start.take() {
                    push_token(&mut spans, lo, buf.len())?;
                }
            }
            c => {
                if start.is_none() {
                    start = Some(buf.len());
                }
                buf.push(c);
            }
        }
    }

    // Trailing token, including one left open by an unterminated quote
    if let Some(lo) = start.take() {
        push_token(&mut spans, lo, buf.len())?;
    }

    Ok(CommandLine { buf, spans })
}
