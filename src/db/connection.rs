//! SQLite connection management for the table store and the metadata registry

use crate::error::{IntakeError, Result};
use rusqlite::Connection;
use std::path::PathBuf;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a connection string points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Memory,
    File(PathBuf),
}

/// Parse `sqlite:///path`, `sqlite://:memory:`, `:memory:` or a bare path
pub fn parse_database_url(url: &str) -> Result<DatabaseTarget> {
    let url = url.trim();
    if url.is_empty() {
        return Err(IntakeError::Config("empty database url".to_string()));
    }

    let path = match url.strip_prefix("sqlite:") {
        Some(rest) => {
            let rest = rest.strip_prefix("//").unwrap_or(rest);
            // sqlite:///./data/x.db: the third slash belongs to the scheme
            rest.strip_prefix('/').unwrap_or(rest)
        }
        None if url.contains("://") => {
            return Err(IntakeError::Config(format!("unsupported database url: {}", url)));
        }
        None => url,
    };

    if path.is_empty() || path == ":memory:" {
        return Ok(DatabaseTarget::Memory);
    }
    Ok(DatabaseTarget::File(PathBuf::from(path)))
}

/// Open (creating parent directories as needed) the database at `url`
pub fn open_connection(url: &str) -> Result<Connection> {
    let conn = match parse_database_url(url)? {
        DatabaseTarget::Memory => Connection::open_in_memory()?,
        DatabaseTarget::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(&path)
                .map_err(|e| IntakeError::Database(format!("Failed to open {}: {}", path.display(), e)))?
        }
    };
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_database_url() {
        assert_eq!(
            parse_database_url("sqlite:///./data/sql_agent.db").unwrap(),
            DatabaseTarget::File(PathBuf::from("./data/sql_agent.db"))
        );
        assert_eq!(
            parse_database_url("sqlite:////var/lib/meta.db").unwrap(),
            DatabaseTarget::File(PathBuf::from("/var/lib/meta.db"))
        );
        assert_eq!(parse_database_url("sqlite://:memory:").unwrap(), DatabaseTarget::Memory);
        assert_eq!(parse_database_url(":memory:").unwrap(), DatabaseTarget::Memory);
        assert_eq!(
            parse_database_url("data/tables.db").unwrap(),
            DatabaseTarget::File(PathBuf::from("data/tables.db"))
        );
        assert!(parse_database_url("postgres://localhost/db").is_err());
        assert!(parse_database_url("").is_err());
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/tables.db");
        let url = format!("sqlite:///{}", path.display());
        open_connection(&url).unwrap();
        assert!(path.exists());
    }
}
