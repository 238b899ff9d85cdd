//! Command word to audio resource mapping.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{AtError, AtResult};

/// Read-only mapping loaded once at startup.
///
/// Source format is one `key value` pair per line, split on the first run
/// of whitespace so values may contain spaces. Blank lines and lines
/// starting with `#` are skipped; a repeated key overrides the earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Playlist {
    entries: BTreeMap<String, PathBuf>,
}

impl Playlist {
    /// Load a playlist file.
    pub fn load(path: impl AsRef<Path>) -> AtResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let playlist: Playlist = content.parse()?;
        info!(
            "Loaded {} playlist entries from {}",
            playlist.len(),
            path.display()
        );
        Ok(playlist)
    }

    /// Resolve a command word.
    pub fn get(&self, key: &str) -> Option<&Path> {
        self.entries
            .get(key)
            .map(PathBuf::as_path)
    }

    /// All command words, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries
            .keys()
            .map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries
            .len()
    }

    /// `true` if nothing was loaded.
    pub fn is_empty(&self) -> bool {
        self.entries
            .is_empty()
    }

    /// Reply sent for unknown command words: every key on its own `> ` line.
    ///
    /// ```
    /// use wurlitzer::Playlist;
    ///
    /// let playlist: Playlist = "jazz /srv/jazz.mp3\nblues /srv/blues.mp3".parse().unwrap();
    /// assert_eq!(playlist.reply_text(), "> blues\n> jazz");
    /// ```
    pub fn reply_text(&self) -> String {
        self.keys()
            .map(|k| format!("> {}", k))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl FromStr for Playlist {
    type Err = AtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut entries = BTreeMap::new();
        for (index, raw) in s
            .lines()
            .enumerate()
        {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once(char::is_whitespace)
                .map(|(k, v)| (k, v.trim()))
                .filter(|(_, v)| !v.is_empty())
                .ok_or_else(|| AtError::Playlist {
                    line: index + 1,
                    message: format!("expected `key value`, got {:?}", line),
                })?;
            if entries
                .insert(key.to_string(), PathBuf::from(value))
                .is_some()
            {
                debug!("Playlist key {:?} redefined on line {}", key, index + 1);
            }
        }
        Ok(Playlist { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let playlist: Playlist = "jazz /srv/audio/take five.mp3\n\n# comment\nrock\t/srv/rock.ogg\n"
            .parse()
            .unwrap();
        assert_eq!(playlist.len(), 2);
        assert_eq!(
            playlist.get("jazz"),
            Some(Path::new("/srv/audio/take five.mp3"))
        );
        assert_eq!(playlist.get("rock"), Some(Path::new("/srv/rock.ogg")));
        assert_eq!(playlist.get("Jazz"), None);
    }

    #[test]
    fn test_missing_value_is_error() {
        match "jazz /a.mp3\nlonely\n".parse::<Playlist>() {
            Err(AtError::Playlist { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_later_duplicate_wins() {
        let playlist: Playlist = "a /1.mp3\na /2.mp3"
            .parse()
            .unwrap();
        assert_eq!(playlist.get("a"), Some(Path::new("/2.mp3")));
    }

    #[test]
    fn test_empty_reply() {
        let playlist = Playlist::default();
        assert!(playlist.is_empty());
        assert_eq!(playlist.reply_text(), "");
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Playlist::load("/nonexistent/playlist.txt"),
            Err(AtError::Io(_))
        ));
    }
}
