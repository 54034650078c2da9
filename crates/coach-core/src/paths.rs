use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const COACH_DIR: &str = ".coach";
pub const CONFIG_FILE: &str = ".coach/config.yaml";
pub const DATABASE_FILE: &str = ".coach/engine.redb";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn coach_dir(root: &Path) -> PathBuf {
    root.join(COACH_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn database_path(root: &Path) -> PathBuf {
    root.join(DATABASE_FILE)
}

/// Whether `root` holds an initialized `.coach/` directory.
pub fn is_initialized(root: &Path) -> bool {
    coach_dir(root).is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_nest_under_coach_dir() {
        let root = Path::new("/srv/study");
        assert_eq!(config_path(root), PathBuf::from("/srv/study/.coach/config.yaml"));
        assert_eq!(database_path(root), PathBuf::from("/srv/study/.coach/engine.redb"));
        assert!(database_path(root).starts_with(coach_dir(root)));
    }
}
