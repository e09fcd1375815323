use crate::thumbnail::COMMONS_PREFIX;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Commons paths of dataset images known to return 404
const BUILTIN_BANNED: &[&str] = &[
    "5/50/50_Afghanis_of_Afghanistan_in_2002_Reverse.png",
    "4/4d/Nordamerikanische_Kulturareale_en.png",
    "e/ea/Park_Jihoon_GQ.png",
    "2/21/Breakers_Website_New_Logo_%281%29.png",
    "d/d2/StaatslijnC.png",
    "2/28/Logo_de_la_F%C3%A9d%C3%A9ration_de_Parkour.png",
];

/// Image URLs excluded from verification
#[derive(Debug, Clone, Default)]
pub struct BanList {
    urls: HashSet<String>,
}

impl BanList {
    /// The versioned list of known-dead URLs
    pub fn builtin() -> Self {
        Self::from_urls(BUILTIN_BANNED.iter().map(|path| format!("{COMMONS_PREFIX}{path}")))
    }

    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }

    /// Add URLs from a file with one URL per line; blank lines and `#` comments are
    /// ignored. Returns the number of URLs read.
    pub fn extend_from_file(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ban list {}", path.display()))?;
        let mut added = 0;
        for line in content.lines() {
            let url = line.trim();
            if url.is_empty() || url.starts_with('#') {
                continue;
            }
            self.urls.insert(url.to_string());
            added += 1;
        }
        info!("Loaded {} banned URLs from {}", added, path.display());
        Ok(added)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_entries() {
        let bans = BanList::builtin();
        assert_eq!(bans.len(), 6);
        assert!(bans.contains(
            "https://upload.wikimedia.org/wikipedia/commons/d/d2/StaatslijnC.png"
        ));
        assert!(!bans.contains("https://upload.wikimedia.org/wikipedia/commons/d/d2/Other.png"));
    }

    #[test]
    fn test_extend_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bans.txt");
        std::fs::write(&path, "# dead links\n\nhttps://x/a.png\n  https://x/b.png  \n").unwrap();

        let mut bans = BanList::default();
        assert_eq!(bans.extend_from_file(&path).unwrap(), 2);
        assert!(bans.contains("https://x/a.png"));
        assert!(bans.contains("https://x/b.png"));
        assert!(!bans.contains("# dead links"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut bans = BanList::builtin();
        assert!(bans.extend_from_file(&dir.path().join("nope.txt")).is_err());
    }
}
