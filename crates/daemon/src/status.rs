use std::path::{Path, PathBuf};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open status database {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("status database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Which phases still need to run for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    NeedsBackupAndConvert,
    NeedsBackup,
    NeedsConvert,
    Done,
}

/// Completion flags for one input file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessStatus {
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    pub backup: bool,
    pub convert: bool,
}

impl ProcessStatus {
    pub fn new(input_file: PathBuf, output_file: PathBuf) -> Self {
        Self {
            input_file,
            output_file,
            backup: false,
            convert: false,
        }
    }

    /// A file is finished only once both phases have succeeded
    pub fn should_process(&self) -> bool {
        !(self.backup && self.convert)
    }

    pub fn state(&self) -> FileState {
        match (self.backup, self.convert) {
            (false, false) => FileState::NeedsBackupAndConvert,
            (false, true) => FileState::NeedsBackup,
            (true, false) => FileState::NeedsConvert,
            (true, true) => FileState::Done,
        }
    }
}

/// Durable per-file status keyed by input path
///
/// Single-writer: the orchestrator owns the only handle, so rows need no locking.
pub struct ProcessedDatabase {
    conn: Connection,
}

impl ProcessedDatabase {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS processed (
                input TEXT PRIMARY KEY,
                output TEXT,
                backup BOOLEAN,
                convert BOOLEAN
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    /// Stored status for `input_file`, inserting an all-false row when none exists
    pub fn get(&self, input_file: &Path, output_file: &Path) -> Result<ProcessStatus, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT backup, convert FROM processed WHERE input = ?1",
                params![path_key(input_file)],
                |row| Ok((row.get::<_, bool>(0)?, row.get::<_, bool>(1)?)),
            )
            .optional()?;

        match found {
            Some((backup, convert)) => {
                let status = ProcessStatus {
                    input_file: input_file.to_path_buf(),
                    output_file: output_file.to_path_buf(),
                    backup,
                    convert,
                };
                debug!("Found status: {:?}", status);
                Ok(status)
            }
            None => {
                let status = ProcessStatus::new(input_file.to_path_buf(), output_file.to_path_buf());
                debug!("No status for {}, saving new", input_file.display());
                self.save(&status)?;
                Ok(status)
            }
        }
    }

    /// Upsert by input path; the last write wins
    pub fn save(&self, status: &ProcessStatus) -> Result<(), StoreError> {
        debug!("Saving status: {:?}", status);
        self.conn.execute(
            "REPLACE INTO processed (input, output, backup, convert) VALUES (?1, ?2, ?3, ?4)",
            params![
                path_key(&status.input_file),
                path_key(&status.output_file),
                status.backup,
                status.convert
            ],
        )?;
        Ok(())
    }

    /// Every row with both phases complete
    pub fn all_success(&self) -> Result<Vec<ProcessStatus>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT input, output, backup, convert FROM processed WHERE backup AND convert ORDER BY input")?;
        let rows = stmt.query_map([], |row| {
            Ok(ProcessStatus {
                input_file: PathBuf::from(row.get::<_, String>(0)?),
                output_file: PathBuf::from(row.get::<_, String>(1)?),
                backup: row.get(2)?,
                convert: row.get(3)?,
            })
        })?;
        let statuses = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(statuses)
    }

    /// Completed rows whose input and output files are both still on disk
    pub fn all_existing_success(&self) -> Result<Vec<ProcessStatus>, StoreError> {
        Ok(self
            .all_success()?
            .into_iter()
            .filter(|s| s.input_file.exists() && s.output_file.exists())
            .collect())
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
