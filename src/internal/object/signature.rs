//! The author/committer/tagger line format shared by commits and tags:
//! `{name} <{email}> {timestamp} {offset}`.

use std::fmt::Display;

use bstr::ByteSlice;

use crate::errors::VaultError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Signed timezone offset in minutes, e.g. `+0800` is `480`.
    pub offset_minutes: i32,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, timestamp: i64) -> Self {
        Signature {
            name: name.into(),
            email: email.into(),
            timestamp,
            offset_minutes: 0,
        }
    }

    /// Splits a raw archive `fullname` (`"Name <email>"`, no guarantee the
    /// email part is present or well-formed) into name/email, the way the
    /// git-bare cooker needs to re-embed a revision's author/committer
    /// without going through the `"{label} ... {ts} {offset}"` line parser
    /// (spec §4.6, §9 "Display-name bypass": the bytes used here must be
    /// the raw `fullname`, never a display-name substitute).
    pub fn from_fullname(fullname: &[u8], timestamp: i64, offset_minutes: i32) -> Self {
        let text = String::from_utf8_lossy(fullname);
        if let (Some(start), Some(end)) = (text.find('<'), text.rfind('>')) {
            if start < end {
                return Signature {
                    name: text[..start].trim().to_string(),
                    email: text[start + 1..end].to_string(),
                    timestamp,
                    offset_minutes,
                };
            }
        }
        Signature {
            name: text.into_owned(),
            email: String::new(),
            timestamp,
            offset_minutes,
        }
    }

    /// Parses a `"{label} {name} <{email}> {timestamp} {offset}"` line, where
    /// `label` is `author`, `committer` or `tagger` and has already been
    /// stripped by the caller along with the trailing newline.
    pub fn from_data(data: Vec<u8>) -> Result<Self, VaultError> {
        let text = data
            .to_str()
            .map_err(|_| VaultError::MalformedObject("signature line is not utf-8".to_string()))?;

        // Skip the leading label word ("author "/"committer "/"tagger ").
        let rest = text
            .split_once(' ')
            .map(|(_, rest)| rest)
            .ok_or_else(|| VaultError::MalformedObject("empty signature line".to_string()))?;

        let email_start = rest
            .find('<')
            .ok_or_else(|| VaultError::MalformedObject("signature missing '<'".to_string()))?;
        let email_end = rest
            .find('>')
            .ok_or_else(|| VaultError::MalformedObject("signature missing '>'".to_string()))?;

        let name = rest[..email_start].trim().to_string();
        let email = rest[email_start + 1..email_end].to_string();

        let tail = rest[email_end + 1..].trim();
        let mut parts = tail.split_whitespace();
        let timestamp: i64 = parts
            .next()
            .ok_or_else(|| VaultError::MalformedObject("signature missing timestamp".to_string()))?
            .parse()
            .map_err(|_| VaultError::MalformedObject("signature timestamp not an integer".to_string()))?;
        let offset_str = parts.next().unwrap_or("+0000");
        let offset_minutes = parse_offset(offset_str)?;

        Ok(Signature {
            name,
            email,
            timestamp,
            offset_minutes,
        })
    }

    pub fn to_data(&self) -> Result<Vec<u8>, VaultError> {
        Ok(self.to_string().into_bytes())
    }
}

fn parse_offset(s: &str) -> Result<i32, VaultError> {
    if s.len() != 5 {
        return Err(VaultError::MalformedObject(format!(
            "malformed timezone offset: {s}"
        )));
    }
    let sign = match &s[0..1] {
        "+" => 1,
        "-" => -1,
        _ => {
            return Err(VaultError::MalformedObject(format!(
                "malformed timezone offset: {s}"
            )));
        }
    };
    let hours: i32 = s[1..3]
        .parse()
        .map_err(|_| VaultError::MalformedObject(format!("malformed timezone offset: {s}")))?;
    let minutes: i32 = s[3..5]
        .parse()
        .map_err(|_| VaultError::MalformedObject(format!("malformed timezone offset: {s}")))?;
    Ok(sign * (hours * 60 + minutes))
}

fn format_offset(offset_minutes: i32) -> String {
    let sign = if offset_minutes < 0 { '-' } else { '+' };
    let abs = offset_minutes.abs();
    format!("{sign}{:02}{:02}", abs / 60, abs % 60)
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} <{}> {} {}",
            self.name,
            self.email,
            self.timestamp,
            format_offset(self.offset_minutes)
        )
    }
}
