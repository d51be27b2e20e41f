//! Identity lines (`author`, `committer`, `tagger`) as they appear in
//! commit and tag objects: a name, an email in angle brackets, a Unix
//! timestamp and a timezone offset.

use std::fmt::{self, Display};

use bstr::ByteSlice;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// Which header token the identity line carries.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    Author,
    Committer,
    Tagger,
}

impl SignatureKind {
    pub fn to_bytes(&self) -> &'static [u8] {
        match self {
            SignatureKind::Author => b"author",
            SignatureKind::Committer => b"committer",
            SignatureKind::Tagger => b"tagger",
        }
    }

    pub fn from_bytes(s: &[u8]) -> Result<SignatureKind, GitError> {
        match s {
            b"author" => Ok(SignatureKind::Author),
            b"committer" => Ok(SignatureKind::Committer),
            b"tagger" => Ok(SignatureKind::Tagger),
            _ => Err(GitError::Corrupt(
                String::from_utf8_lossy(s).to_string(),
                "not a valid signature kind".to_string(),
            )),
        }
    }
}

impl Display for SignatureKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.to_bytes()))
    }
}

/// One identity line of a commit or tag object.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub kind: SignatureKind,
    pub name: String,
    pub email: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Offset in `+HHMM` / `-HHMM` form, as written.
    pub timezone: String,
}

impl Signature {
    /// Build an identity stamped with the current time in UTC.
    pub fn now(kind: SignatureKind, name: &str, email: &str) -> Signature {
        Signature {
            kind,
            name: name.to_string(),
            email: email.to_string(),
            timestamp: Utc::now().timestamp(),
            timezone: "+0000".to_string(),
        }
    }

    /// Parse a full identity line, e.g.
    /// `author A U Thor <author@example.com> 1757467768 +0800`.
    pub fn from_data(data: Vec<u8>) -> Result<Signature, GitError> {
        let corrupt = |reason: &str| {
            GitError::Corrupt(
                String::from_utf8_lossy(&data).to_string(),
                reason.to_string(),
            )
        };

        let kind_end = data.find_byte(b' ').ok_or_else(|| corrupt("no kind token"))?;
        let kind = SignatureKind::from_bytes(&data[..kind_end])?;
        let rest = &data[kind_end + 1..];
        let sig = Signature::parse_ident(kind, rest).map_err(|_| corrupt("malformed identity"))?;
        Ok(sig)
    }

    /// Parse the identity portion without a kind token, e.g.
    /// `A U Thor <author@example.com> 1757467768 +0800`. Reflog lines
    /// use this form.
    pub fn parse_ident(kind: SignatureKind, rest: &[u8]) -> Result<Signature, GitError> {
        let corrupt = |reason: &str| {
            GitError::Corrupt(
                String::from_utf8_lossy(rest).to_string(),
                reason.to_string(),
            )
        };

        let email_start = rest.find_byte(b'<').ok_or_else(|| corrupt("no email"))?;
        let email_end = rest.find_byte(b'>').ok_or_else(|| corrupt("no email end"))?;
        if email_end < email_start {
            return Err(corrupt("mismatched email brackets"));
        }
        let name = rest[..email_start]
            .trim_with(|c| c == ' ')
            .to_str()
            .map_err(|_| corrupt("name is not UTF-8"))?
            .to_string();
        let email = rest[email_start + 1..email_end]
            .to_str()
            .map_err(|_| corrupt("email is not UTF-8"))?
            .to_string();

        let tail = rest[email_end + 1..].trim_with(|c| c == ' ');
        let mut fields = tail.split_str(b" ");
        let timestamp: i64 = fields
            .next()
            .and_then(|f| f.to_str().ok())
            .and_then(|f| f.parse().ok())
            .ok_or_else(|| corrupt("bad timestamp"))?;
        let timezone = fields
            .next()
            .and_then(|f| f.to_str().ok())
            .unwrap_or("+0000")
            .to_string();

        Ok(Signature {
            kind,
            name,
            email,
            timestamp,
            timezone,
        })
    }

    /// Serialize the full identity line, including the kind token.
    pub fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        data.extend(self.kind.to_bytes());
        data.push(b' ');
        data.extend(self.ident().as_bytes());
        Ok(data)
    }

    /// The identity portion without the kind token, as used by reflogs.
    pub fn ident(&self) -> String {
        format!(
            "{} <{}> {} {}",
            self.name, self.email, self.timestamp, self.timezone
        )
    }

    /// Byte length of the full identity line produced by
    /// [`Signature::to_data`].
    pub fn encoded_len(&self) -> usize {
        self.kind.to_bytes().len() + 1 + self.ident().len()
    }

    /// Timestamp as a UTC datetime.
    pub fn when(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.ident())
    }
}
