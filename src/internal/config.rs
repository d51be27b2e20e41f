//! Reader and writer for the git configuration file syntax used by the
//! repository's `config` file:
//!
//! ```text
//! [core]
//!     bare = false
//! [remote "origin"]
//!     url = https://example.com/repo.git
//!     fetch = +refs/heads/*:refs/remotes/origin/*
//! ```
//!
//! Section and key names compare case-insensitively; subsection names
//! are case-sensitive. Keys may repeat (multi-valued). Only the
//! features the repository core consumes are implemented; there is no
//! system/global chaining here.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::errors::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ConfigEntry {
    section: String,
    subsection: Option<String>,
    key: String,
    value: String,
}

/// Parsed configuration, preserving entry order.
#[derive(Debug, Clone, Default)]
pub struct Config {
    entries: Vec<ConfigEntry>,
}

fn section_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Parse the right-hand side of `key = value`: a trailing comment
/// starts only outside quotes, and surrounding quotes come off after
/// the comment is cut.
fn parse_value(raw: &str) -> String {
    let raw = raw.trim();
    let mut in_quotes = false;
    let mut cut = raw.len();
    for (i, c) in raw.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '#' | ';' if !in_quotes => {
                cut = i;
                break;
            }
            _ => {}
        }
    }
    let mut value = raw[..cut].trim_end();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value = &value[1..value.len() - 1];
    }
    value.to_string()
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    /// Parse configuration text.
    pub fn parse(text: &str) -> Result<Config, GitError> {
        let corrupt =
            |line: &str, reason: &str| GitError::Corrupt(line.to_string(), format!("config: {reason}"));

        let mut entries = Vec::new();
        let mut section: Option<(String, Option<String>)> = None;

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let rest = rest
                    .strip_suffix(']')
                    .ok_or_else(|| corrupt(raw_line, "unterminated section header"))?;
                let (name, subsection) = match rest.split_once(' ') {
                    None => (rest.trim(), None),
                    Some((name, sub)) => {
                        let sub = sub.trim();
                        let sub = sub
                            .strip_prefix('"')
                            .and_then(|s| s.strip_suffix('"'))
                            .ok_or_else(|| corrupt(raw_line, "subsection is not quoted"))?;
                        (name.trim(), Some(sub.replace("\\\"", "\"").replace("\\\\", "\\")))
                    }
                };
                if name.is_empty() {
                    return Err(corrupt(raw_line, "empty section name"));
                }
                section = Some((name.to_ascii_lowercase(), subsection));
                continue;
            }

            let Some((section_name, subsection)) = &section else {
                return Err(corrupt(raw_line, "entry before any section header"));
            };
            let (key, value) = match line.split_once('=') {
                Some((key, value)) => (key.trim(), parse_value(value)),
                // A bare key means boolean true; anything after a
                // comment marker is noise.
                None => {
                    let key = line
                        .split(['#', ';'])
                        .next()
                        .unwrap_or_default()
                        .trim();
                    (key, "true".to_string())
                }
            };
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return Err(corrupt(raw_line, "invalid key name"));
            }
            entries.push(ConfigEntry {
                section: section_name.clone(),
                subsection: subsection.clone(),
                key: key.to_ascii_lowercase(),
                value,
            });
        }
        Ok(Config { entries })
    }

    /// Load a config file; an absent file reads as empty.
    pub fn load(path: &Path) -> Result<Config, GitError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::new()),
            Err(e) => return Err(GitError::IO(e)),
        };
        Config::parse(&text)
    }

    /// All values of a key, in file order.
    pub fn get_all(&self, section: &str, subsection: Option<&str>, key: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| {
                section_eq(&e.section, section)
                    && e.subsection.as_deref() == subsection
                    && e.key.eq_ignore_ascii_case(key)
            })
            .map(|e| e.value.as_str())
            .collect()
    }

    /// The last value of a key, matching git's "last one wins" rule.
    pub fn get_string(&self, section: &str, subsection: Option<&str>, key: &str) -> Option<&str> {
        self.get_all(section, subsection, key).pop()
    }

    /// Boolean coercion: true/yes/on/1 and the bare-key form are true;
    /// false/no/off/0/"" are false.
    pub fn get_bool(&self, section: &str, subsection: Option<&str>, key: &str) -> Option<bool> {
        let value = self.get_string(section, subsection, key)?;
        match value.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" | "" => Some(false),
            _ => None,
        }
    }

    pub fn get_int(&self, section: &str, subsection: Option<&str>, key: &str) -> Option<i64> {
        self.get_string(section, subsection, key)?.parse().ok()
    }

    /// Replace (or add) the single value of a key.
    pub fn set_string(&mut self, section: &str, subsection: Option<&str>, key: &str, value: &str) {
        let section = section.to_ascii_lowercase();
        let key = key.to_ascii_lowercase();
        self.entries.retain(|e| {
            !(section_eq(&e.section, &section)
                && e.subsection.as_deref() == subsection
                && e.key == key)
        });
        self.entries.push(ConfigEntry {
            section,
            subsection: subsection.map(str::to_string),
            key,
            value: value.to_string(),
        });
    }

    /// Names of all subsections of a section (e.g. configured remotes).
    pub fn subsections(&self, section: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if section_eq(&entry.section, section) {
                if let Some(sub) = entry.subsection.as_deref() {
                    if !out.contains(&sub) {
                        out.push(sub);
                    }
                }
            }
        }
        out
    }

    /// All key names present in a section (for unknown-extension checks).
    pub fn keys(&self, section: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if section_eq(&entry.section, section) && entry.subsection.is_none() {
                let key = entry.key.as_str();
                if !out.contains(&key) {
                    out.push(key);
                }
            }
        }
        out
    }

    /// Serialize back to config text, grouping by section.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let mut written: Vec<(String, Option<String>)> = Vec::new();
        for entry in &self.entries {
            let header = (entry.section.clone(), entry.subsection.clone());
            if !written.contains(&header) {
                match &entry.subsection {
                    None => {
                        let _ = writeln!(out, "[{}]", entry.section);
                    }
                    Some(sub) => {
                        let escaped = sub.replace('\\', "\\\\").replace('"', "\\\"");
                        let _ = writeln!(out, "[{} \"{}\"]", entry.section, escaped);
                    }
                }
                for peer in &self.entries {
                    if section_eq(&peer.section, &entry.section)
                        && peer.subsection == entry.subsection
                    {
                        let _ = writeln!(out, "\t{} = {}", peer.key, peer.value);
                    }
                }
                written.push(header);
            }
        }
        out
    }

    /// Write the file in place.
    pub fn save(&self, path: &Path) -> Result<(), GitError> {
        fs::write(path, self.to_text())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# repository settings
[core]
    repositoryformatversion = 0
    bare = false
    filemode = true
[remote "origin"]
    url = https://example.com/repo.git
    fetch = +refs/heads/*:refs/remotes/origin/*
[branch "main"]
    remote = origin
    merge = refs/heads/main
[branch "main"]
    rebase    ; bare key is true
"#;

    /// Sections, subsections, comments and bare keys parse.
    #[test]
    fn parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.get_string("core", None, "bare"), Some("false"));
        assert_eq!(config.get_bool("core", None, "bare"), Some(false));
        assert_eq!(config.get_bool("core", None, "filemode"), Some(true));
        assert_eq!(config.get_int("core", None, "repositoryformatversion"), Some(0));
        assert_eq!(
            config.get_string("remote", Some("origin"), "url"),
            Some("https://example.com/repo.git")
        );
        assert_eq!(
            config.get_string("branch", Some("main"), "merge"),
            Some("refs/heads/main")
        );
        assert_eq!(config.get_bool("branch", Some("main"), "rebase"), Some(true));
        assert_eq!(config.get_string("core", None, "missing"), None);
    }

    /// Section and key names are case-insensitive; subsections are not.
    #[test]
    fn case_sensitivity() {
        let config = Config::parse("[CoRe]\n\tBare = TRUE\n").unwrap();
        assert_eq!(config.get_bool("core", None, "bare"), Some(true));

        let config = Config::parse("[branch \"Main\"]\n\tremote = origin\n").unwrap();
        assert_eq!(config.get_string("branch", Some("Main"), "remote"), Some("origin"));
        assert_eq!(config.get_string("branch", Some("main"), "remote"), None);
    }

    /// Quotes come off after a trailing comment is cut, and comment
    /// markers inside quotes are literal.
    #[test]
    fn quoted_values_and_comments() {
        let text = "[user]\n\
                    \tname = \"quoted\" ; trailing comment\n\
                    \temail = \"has # hash\"\n\
                    \tplain = value # comment\n";
        let config = Config::parse(text).unwrap();
        assert_eq!(config.get_string("user", None, "name"), Some("quoted"));
        assert_eq!(config.get_string("user", None, "email"), Some("has # hash"));
        assert_eq!(config.get_string("user", None, "plain"), Some("value"));
    }

    /// Repeated keys accumulate; get_string takes the last.
    #[test]
    fn multi_valued_keys() {
        let text = "[remote \"origin\"]\n\tfetch = a\n\tfetch = b\n";
        let config = Config::parse(text).unwrap();
        assert_eq!(config.get_all("remote", Some("origin"), "fetch"), vec!["a", "b"]);
        assert_eq!(config.get_string("remote", Some("origin"), "fetch"), Some("b"));
    }

    /// set_string replaces all prior values; round-trips through text.
    #[test]
    fn set_and_round_trip() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.set_string("core", None, "bare", "true");
        config.set_string("extensions", None, "refsStorage", "reftree");

        let reparsed = Config::parse(&config.to_text()).unwrap();
        assert_eq!(reparsed.get_bool("core", None, "bare"), Some(true));
        assert_eq!(
            reparsed.get_string("extensions", None, "refsstorage"),
            Some("reftree")
        );
        assert_eq!(
            reparsed.get_string("remote", Some("origin"), "url"),
            Some("https://example.com/repo.git")
        );
    }

    /// Malformed headers and keys are corrupt, entries need a section.
    #[test]
    fn reject_malformed() {
        assert!(Config::parse("[core\nbare = true\n").is_err());
        assert!(Config::parse("bare = true\n").is_err());
        assert!(Config::parse("[core]\nbad key = 1\n").is_err());
    }

    /// Subsection listing drives remote discovery.
    #[test]
    fn subsection_listing() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.subsections("remote"), vec!["origin"]);
        assert_eq!(config.subsections("branch"), vec!["main"]);
        assert_eq!(config.keys("core").len(), 3);
    }
}
