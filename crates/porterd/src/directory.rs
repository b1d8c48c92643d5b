//! Contact roster.
//!
//! Maps responsible-party names to their messaging channel addresses.
//! Loaded from a TOML file at startup; lookups are case-insensitive.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("roster file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("bad roster TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level roster file structure.
#[derive(Debug, Clone, Deserialize)]
struct RosterFile {
    #[serde(default)]
    contact: Vec<Contact>,
}

/// One reachable responsible party.
#[derive(Debug, Clone, Deserialize)]
pub struct Contact {
    pub name: String,
    /// Messaging channel address, e.g. "+15550001111".
    pub channel: String,
}

/// In-memory contact directory.
#[derive(Debug, Clone)]
pub struct ContactDirectory {
    contacts: Vec<Contact>,
}

impl ContactDirectory {
    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DirectoryError::Io(path.display().to_string(), e))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, DirectoryError> {
        let file: RosterFile = toml::from_str(text)?;
        Ok(Self {
            contacts: file.contact,
        })
    }

    /// Empty directory; every lookup misses.
    pub fn empty() -> Self {
        Self {
            contacts: Vec::new(),
        }
    }

    /// Look up a contact by case-insensitive name.
    pub fn lookup(&self, name: &str) -> Option<&Contact> {
        self.contacts
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROSTER: &str = r#"
[[contact]]
name = "Dave"
channel = "+15550001111"

[[contact]]
name = "Priya"
channel = "+15550002222"
"#;

    #[test]
    fn test_parse_roster() {
        let dir = ContactDirectory::parse(ROSTER).unwrap();
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.lookup("Dave").unwrap().channel, "+15550001111");
    }

    #[test]
    fn test_lookup_case_insensitive() {
        let dir = ContactDirectory::parse(ROSTER).unwrap();
        assert_eq!(dir.lookup("priya").unwrap().channel, "+15550002222");
        assert_eq!(dir.lookup("DAVE").unwrap().name, "Dave");
    }

    #[test]
    fn test_lookup_miss() {
        let dir = ContactDirectory::parse(ROSTER).unwrap();
        assert!(dir.lookup("nobody").is_none());
    }

    #[test]
    fn test_empty_roster_file() {
        let dir = ContactDirectory::parse("").unwrap();
        assert!(dir.is_empty());
    }
}
