//! Backup counters - how often each repository/branch was backed up
//!
//! An operational counter for external monitoring: every successful update
//! or clone increments the count for `(repository, branch)`. The SQLite
//! store lives at `XDG_DATA_HOME/orgmirror/state.db` by default.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Current count for one repository/branch pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupCount {
    pub repo: String,
    pub branch: String,
    pub count: u64,
    pub last_backup_at: DateTime<Utc>,
}

/// Sink for successful backups
pub trait BackupCounter: Send + Sync {
    fn record_backup(&self, repo: &str, branch: &str) -> Result<()>;

    /// All counters, ordered by repository then branch
    fn counts(&self) -> Result<Vec<BackupCount>>;
}

/// In-process counter; nothing survives the run
#[derive(Debug, Default)]
pub struct MemoryCounter {
    counts: Mutex<HashMap<(String, String), (u64, DateTime<Utc>)>>,
}

impl MemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackupCounter for MemoryCounter {
    fn record_backup(&self, repo: &str, branch: &str) -> Result<()> {
        let mut counts = self
            .counts
            .lock()
            .map_err(|_| anyhow!("Backup counter lock poisoned"))?;
        let entry = counts
            .entry((repo.to_string(), branch.to_string()))
            .or_insert((0, Utc::now()));
        entry.0 += 1;
        entry.1 = Utc::now();
        Ok(())
    }

    fn counts(&self) -> Result<Vec<BackupCount>> {
        let counts = self
            .counts
            .lock()
            .map_err(|_| anyhow!("Backup counter lock poisoned"))?;
        let mut rows: Vec<BackupCount> = counts
            .iter()
            .map(|((repo, branch), (count, at))| BackupCount {
                repo: repo.clone(),
                branch: branch.clone(),
                count: *count,
                last_backup_at: *at,
            })
            .collect();
        rows.sort_by(|a, b| (&a.repo, &a.branch).cmp(&(&b.repo, &b.branch)));
        Ok(rows)
    }
}

/// State database manager
pub struct StateDb {
    conn: Mutex<Connection>,
}

impl StateDb {
    /// Open or create the state database at a specific path
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;

        info!("State database opened at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;
        Ok(db)
    }

    fn connection(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("State database lock poisoned"))
    }

    fn initialize(&self) -> Result<()> {
        self.connection()?
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS backup_counts (
                    repo TEXT NOT NULL,
                    branch TEXT NOT NULL,
                    count INTEGER NOT NULL DEFAULT 0,
                    last_backup_at TEXT NOT NULL,
                    PRIMARY KEY (repo, branch)
                );
                "#,
            )
            .context("Failed to initialize database schema")?;

        debug!("Database schema initialized");
        Ok(())
    }
}

impl BackupCounter for StateDb {
    fn record_backup(&self, repo: &str, branch: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        self.connection()?
            .execute(
                r#"
                INSERT INTO backup_counts (repo, branch, count, last_backup_at)
                VALUES (?1, ?2, 1, ?3)
                ON CONFLICT(repo, branch) DO UPDATE SET
                    count = count + 1,
                    last_backup_at = ?3
                "#,
                params![repo, branch, now],
            )
            .with_context(|| format!("Failed to record backup of {}", repo))?;

        Ok(())
    }

    fn counts(&self) -> Result<Vec<BackupCount>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT repo, branch, count, last_backup_at FROM backup_counts ORDER BY repo, branch",
            )
            .context("Failed to prepare counter query")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .context("Failed to query backup counters")?;

        let mut counts = Vec::new();
        for row in rows {
            let (repo, branch, count, at) = row.context("Failed to read counter row")?;
            let last_backup_at = DateTime::parse_from_rfc3339(&at)
                .map(|dt| dt.with_timezone(&Utc))
                .with_context(|| format!("Invalid timestamp for {}: {}", repo, at))?;
            counts.push(BackupCount {
                repo,
                branch,
                count: count.max(0) as u64,
                last_backup_at,
            });
        }

        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(counter: &dyn BackupCounter) {
        counter.record_backup("widgets", "main").unwrap();
        counter.record_backup("widgets", "main").unwrap();
        counter.record_backup("widgets", "develop").unwrap();
        counter.record_backup("gadgets", "master").unwrap();

        let counts = counter.counts().unwrap();
        let summary: Vec<(&str, &str, u64)> = counts
            .iter()
            .map(|c| (c.repo.as_str(), c.branch.as_str(), c.count))
            .collect();

        assert_eq!(
            summary,
            vec![
                ("gadgets", "master", 1),
                ("widgets", "develop", 1),
                ("widgets", "main", 2),
            ]
        );
    }

    #[test]
    fn test_memory_counter() {
        exercise(&MemoryCounter::new());
    }

    #[test]
    fn test_state_db_in_memory() {
        exercise(&StateDb::open_in_memory().unwrap());
    }

    #[test]
    fn test_state_db_persists_across_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.db");

        StateDb::open_at(&path).unwrap().record_backup("widgets", "main").unwrap();
        let db = StateDb::open_at(&path).unwrap();
        db.record_backup("widgets", "main").unwrap();

        let counts = db.counts().unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].count, 2);
    }
}
