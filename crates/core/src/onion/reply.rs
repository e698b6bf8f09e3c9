/// Control protocol reply parsing
///
/// A reply is one or more lines of the form `<status><sep><text>` where the
/// separator is `-` for a mid line, `+` for a line followed by a data
/// block terminated by a lone `.`, and a space for the final line.

use super::ProvisionError;

/// Position of a line within a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Mid,
    Data,
    End,
}

/// A single status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub status: u16,
    pub kind: LineKind,
    pub text: String,
}

impl ReplyLine {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Parse one line, without its trailing CRLF
pub fn parse_line(line: &str) -> Result<ReplyLine, ProvisionError> {
    let bytes = line.as_bytes();
    if bytes.len() < 4 {
        return Err(ProvisionError::MalformedReply(format!(
            "line too short: {:?}",
            line
        )));
    }

    if !bytes[..3].iter().all(u8::is_ascii_digit) {
        return Err(ProvisionError::MalformedReply(format!(
            "non-numeric status: {:?}",
            line
        )));
    }
    let status = bytes[..3]
        .iter()
        .fold(0u16, |acc, digit| acc * 10 + u16::from(digit - b'0'));

    let kind = match bytes[3] {
        b'-' => LineKind::Mid,
        b'+' => LineKind::Data,
        b' ' => LineKind::End,
        other => {
            return Err(ProvisionError::MalformedReply(format!(
                "unexpected separator {:?}",
                other as char
            )))
        }
    };

    Ok(ReplyLine {
        status,
        kind,
        text: line[4..].to_string(),
    })
}

/// A complete successful reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    /// Text of every status line, in order
    pub lines: Vec<String>,
    /// Contents of any data blocks
    pub data: Vec<String>,
}

impl Reply {
    /// Value of the first `key=value` argument named `key` on any line
    pub fn value(&self, key: &str) -> Option<String> {
        self.lines.iter().find_map(|line| {
            keyword_args(line)
                .into_iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v)
        })
    }

    /// The first line starting with `keyword`, without the keyword
    pub fn line(&self, keyword: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            line.strip_prefix(keyword)
                .filter(|rest| rest.is_empty() || rest.starts_with(' '))
                .map(str::trim_start)
        })
    }
}

/// Incremental reply assembler
#[derive(Debug, Default)]
pub struct ReplyParser {
    status: u16,
    lines: Vec<String>,
    data: Vec<String>,
    in_data: bool,
}

impl ReplyParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns the reply once its final line arrives
    pub fn push(&mut self, line: &str) -> Result<Option<Reply>, ProvisionError> {
        let line = line.trim_end_matches(['\r', '\n']);

        if self.in_data {
            if line == "." {
                self.in_data = false;
            } else {
                // Leading dots are escaped by doubling
                let unescaped = line.strip_prefix('.').filter(|l| l.starts_with('.'));
                self.data.push(unescaped.unwrap_or(line).to_string());
            }
            return Ok(None);
        }

        let parsed = parse_line(line)?;
        if !parsed.is_success() {
            return Err(ProvisionError::Protocol {
                status: parsed.status,
                text: parsed.text,
            });
        }

        self.status = parsed.status;
        self.lines.push(parsed.text);

        match parsed.kind {
            LineKind::Mid => Ok(None),
            LineKind::Data => {
                self.in_data = true;
                Ok(None)
            }
            LineKind::End => Ok(Some(Reply {
                status: self.status,
                lines: std::mem::take(&mut self.lines),
                data: std::mem::take(&mut self.data),
            })),
        }
    }
}

/// Split `KEY=value KEY="quoted value"` arguments; bare words are skipped
pub(crate) fn keyword_args(text: &str) -> Vec<(String, String)> {
    let mut args = Vec::new();
    let mut chars = text.chars().peekable();

    loop {
        while chars.next_if_eq(&' ').is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && *c != ' ') {
            key.push(c);
        }

        if chars.next_if_eq(&'=').is_none() {
            continue;
        }

        let mut value = String::new();
        if chars.next_if_eq(&'"').is_some() {
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    c => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| *c != ' ') {
                value.push(c);
            }
        }

        args.push((key, value));
    }

    args
}
