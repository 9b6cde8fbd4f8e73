use changelog_core::paths::CONFIG_FILE;
use std::path::{Path, PathBuf};

/// Resolve the docs repository root.
///
/// Priority:
/// 1. `--root` flag / `CHANGELOG_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `changelog.yaml`
/// 3. Walk upward from `cwd` looking for `.git/`
/// 4. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    discover_root(&cwd)
}

fn discover_root(start: &Path) -> PathBuf {
    find_upward(start, |dir| dir.join(CONFIG_FILE).is_file())
        .or_else(|| find_upward(start, |dir| dir.join(".git").exists()))
        .unwrap_or_else(|| start.to_path_buf())
}

fn find_upward(start: &Path, matches: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| matches(dir))
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve_root(Some(dir.path())), dir.path());
    }

    #[test]
    fn config_file_beats_git_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let docs = dir.path().join("site");
        std::fs::create_dir_all(docs.join("docs/updates")).unwrap();
        std::fs::write(docs.join(CONFIG_FILE), "").unwrap();

        assert_eq!(discover_root(&docs.join("docs/updates")), docs);
    }

    #[test]
    fn falls_back_to_git_then_start() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let deep = dir.path().join("a/b");
        std::fs::create_dir_all(&deep).unwrap();
        assert_eq!(discover_root(&deep), dir.path());

        let bare = TempDir::new().unwrap();
        // A temp dir may itself sit under a repository; only assert when it does not.
        if find_upward(bare.path(), |d| {
            d.join(".git").exists() || d.join(CONFIG_FILE).is_file()
        })
        .is_none()
        {
            assert_eq!(discover_root(bare.path()), bare.path());
        }
    }
}
