use crate::config::{CONFIG_FILENAME, DEFAULT_DB_FILENAME, DEFAULT_LOG_FILENAME};
use crate::error::{BeadsError, Result};
use crate::storage::{CONFIG_ISSUE_PREFIX, SqliteStorage};
use crate::util::validate_prefix;
use std::fs;
use std::path::Path;

const CONFIG_TEMPLATE: &str = r"# Beads Project Configuration
# actor: alice
# daemon:
#   auto-commit: false
#   auto-pull: false
#   auto-push: false
#   interval: 30s
#   remote: origin
";

const GITIGNORE: &str = r"# Database
*.db
*.db-shm
*.db-wal

# Daemon
*.lock
daemon.log

# Backups and temporary files
.br_history/
*.tmp
";

/// Execute the init command.
///
/// # Errors
///
/// Returns an error if the directory or database cannot be created.
pub fn execute(prefix: Option<String>, force: bool, root_dir: Option<&Path>) -> Result<()> {
    if let Some(prefix) = &prefix {
        validate_prefix(prefix)?;
    }

    let base_dir = root_dir.unwrap_or_else(|| Path::new("."));
    let beads_dir = base_dir.join(".beads");
    let db_path = beads_dir.join(DEFAULT_DB_FILENAME);

    if beads_dir.exists() {
        if db_path.exists() && !force {
            return Err(BeadsError::AlreadyInitialized { path: db_path });
        }
    } else {
        fs::create_dir(&beads_dir)?;
    }

    let mut storage = SqliteStorage::open(&db_path)?;
    if let Some(prefix) = &prefix {
        storage.set_config(CONFIG_ISSUE_PREFIX, prefix)?;
    }

    let metadata_path = beads_dir.join("metadata.json");
    if !metadata_path.exists() || force {
        let metadata = serde_json::json!({
            "database": DEFAULT_DB_FILENAME,
            "jsonl_export": DEFAULT_LOG_FILENAME,
        });
        fs::write(metadata_path, serde_json::to_string_pretty(&metadata)?)?;
    }

    let config_path = beads_dir.join(CONFIG_FILENAME);
    if !config_path.exists() || (force && prefix.is_some()) {
        let mut config = String::new();
        if let Some(prefix) = &prefix {
            config.push_str(&format!("issue-prefix: {prefix}\n"));
        }
        config.push_str(CONFIG_TEMPLATE);
        fs::write(config_path, config)?;
    }

    let log_path = beads_dir.join(DEFAULT_LOG_FILENAME);
    if !log_path.exists() {
        fs::write(&log_path, "")?;
    }

    let gitignore_path = beads_dir.join(".gitignore");
    if !gitignore_path.exists() {
        fs::write(gitignore_path, GITIGNORE)?;
    }

    tracing::info!(path = %beads_dir.display(), "initialized workspace");
    println!("Initialized beads workspace in {}", beads_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLayer;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_beads_directory() {
        let temp_dir = TempDir::new().unwrap();
        execute(None, false, Some(temp_dir.path())).unwrap();

        let beads = temp_dir.path().join(".beads");
        assert!(beads.join("beads.db").exists());
        assert!(beads.join("metadata.json").exists());
        assert!(beads.join("config.yaml").exists());
        assert!(beads.join(".gitignore").exists());
        assert_eq!(fs::read_to_string(beads.join("issues.jsonl")).unwrap(), "");
    }

    #[test]
    fn test_init_with_prefix() {
        let temp_dir = TempDir::new().unwrap();
        execute(Some("test".to_string()), false, Some(temp_dir.path())).unwrap();

        let beads = temp_dir.path().join(".beads");
        let storage = SqliteStorage::open(&beads.join("beads.db")).unwrap();
        assert_eq!(
            storage.get_config(CONFIG_ISSUE_PREFIX).unwrap(),
            Some("test".to_string())
        );
        let layer = ConfigLayer::from_yaml(&beads.join("config.yaml")).unwrap();
        assert_eq!(layer.get("issue-prefix"), Some("test"));
    }

    #[test]
    fn test_init_fails_if_already_initialized() {
        let temp_dir = TempDir::new().unwrap();
        execute(None, false, Some(temp_dir.path())).unwrap();

        let err = execute(None, false, Some(temp_dir.path())).unwrap_err();
        assert!(matches!(err, BeadsError::AlreadyInitialized { .. }));
    }

    #[test]
    fn test_init_force_overwrites_prefix() {
        let temp_dir = TempDir::new().unwrap();
        execute(Some("first".to_string()), false, Some(temp_dir.path())).unwrap();
        execute(Some("second".to_string()), true, Some(temp_dir.path())).unwrap();

        let storage =
            SqliteStorage::open(&temp_dir.path().join(".beads/beads.db")).unwrap();
        assert_eq!(
            storage.get_config(CONFIG_ISSUE_PREFIX).unwrap(),
            Some("second".to_string())
        );
    }

    #[test]
    fn test_gitignore_excludes_local_state() {
        let temp_dir = TempDir::new().unwrap();
        execute(None, false, Some(temp_dir.path())).unwrap();

        let content = fs::read_to_string(temp_dir.path().join(".beads/.gitignore")).unwrap();
        for pattern in ["*.db", "*.db-wal", "*.lock", "daemon.log", ".br_history/"] {
            assert!(content.contains(pattern), "missing {pattern}");
        }
    }
}
