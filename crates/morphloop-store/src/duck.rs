//! DuckDB-backed project store.

use std::collections::BTreeSet;
use std::path::Path;

use duckdb::{Connection, params};
use morphloop_core::{
    AnnotationRecord, AnnotationWord, CycleSnapshot, FileId, FileRole, ModelConfig, Project,
    QueryStrategy, Stage, StoredFile, ValidationStatus,
};
use tracing::info;

use crate::{ProjectStore, StoreError};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS project (
        id                  INTEGER PRIMARY KEY,
        stage               VARCHAR NOT NULL,
        increment_size      BIGINT  NOT NULL,
        total_iterations    BIGINT  NOT NULL,
        strategy            VARCHAR NOT NULL,
        current_iteration   BIGINT  NOT NULL,
        cumulative_selected BIGINT  NOT NULL
    );
    CREATE SEQUENCE IF NOT EXISTS file_id_seq START 1;
    CREATE TABLE IF NOT EXISTS files (
        id          BIGINT PRIMARY KEY DEFAULT nextval('file_id_seq'),
        name        VARCHAR NOT NULL,
        size        BIGINT  NOT NULL,
        content     VARCHAR NOT NULL,
        role        VARCHAR,
        validation  VARCHAR NOT NULL
    );
    CREATE TABLE IF NOT EXISTS cycles (
        cycle           BIGINT PRIMARY KEY,
        precision       DOUBLE  NOT NULL,
        recall          DOUBLE  NOT NULL,
        f1              DOUBLE  NOT NULL,
        annotated_count BIGINT  NOT NULL,
        increment_text  VARCHAR NOT NULL,
        residual_text   VARCHAR NOT NULL,
        evaluation_text VARCHAR NOT NULL,
        completed_at    VARCHAR NOT NULL
    );
    CREATE TABLE IF NOT EXISTS annotations (
        cycle       BIGINT  NOT NULL,
        word_id     VARCHAR NOT NULL,
        position    BIGINT  NOT NULL,
        word        VARCHAR NOT NULL,
        confidence  DOUBLE  NOT NULL,
        boundaries  VARCHAR NOT NULL,
        confirmed   BOOLEAN NOT NULL,
        PRIMARY KEY (cycle, word_id)
    );
";

const FILE_COLUMNS: &str = "id, name, size, content, role, validation";
const CYCLE_COLUMNS: &str = "cycle, precision, recall, f1, annotated_count, \
     increment_text, residual_text, evaluation_text, completed_at";

/// DuckDB project store.
///
/// Supports both in-memory (ephemeral) and persistent (file-backed) modes.
/// Use [`open`](Self::open) for in-memory and [`open_persistent`](Self::open_persistent)
/// for a database that survives across process restarts. Tables are created
/// on open if missing.
pub struct DuckStore {
    conn: Connection,
}

impl DuckStore {
    /// Open an in-memory DuckDB database.
    pub fn open() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open or create a persistent DuckDB database at the given path.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let store = Self::init(Connection::open(path)?)?;
        info!(path = %path.display(), "opened project database");
        Ok(store)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Write the cycle history (metrics only, no snapshot texts) to a Parquet file.
    pub fn export_cycles_parquet(&self, path: &Path) -> Result<usize, StoreError> {
        let target = path.display().to_string().replace('\'', "''");
        let sql = format!(
            "COPY (SELECT cycle, precision, recall, f1, annotated_count, completed_at
                   FROM cycles ORDER BY cycle)
             TO '{target}' (FORMAT PARQUET)"
        );
        self.conn.execute_batch(&sql)?;
        let rows = self.count_table("cycles")?;
        info!(rows, path = %path.display(), "exported cycle history");
        Ok(rows)
    }

    fn count_table(&self, table: &str) -> Result<usize, StoreError> {
        let sql = format!("SELECT count(*)::BIGINT FROM {table}");
        let n: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn query_files(
        &self,
        where_clause: &str,
        id: Option<FileId>,
    ) -> Result<Vec<StoredFile>, StoreError> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files {where_clause} ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let map = |row: &duckdb::Row<'_>| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        };
        let rows: Vec<_> = match id {
            Some(id) => stmt.query_map(params![id], map)?.collect::<Result<_, _>>()?,
            None => stmt.query_map([], map)?.collect::<Result<_, _>>()?,
        };

        rows.into_iter()
            .map(|(id, name, size, content, role, validation)| {
                Ok(StoredFile {
                    id,
                    name,
                    size: size as u64,
                    content,
                    role: role.map(|r| r.parse::<FileRole>()).transpose()?,
                    validation: validation.parse::<ValidationStatus>()?,
                })
            })
            .collect()
    }

    fn query_cycles(
        &self,
        where_clause: &str,
        cycle: Option<u32>,
    ) -> Result<Vec<CycleSnapshot>, StoreError> {
        let sql = format!("SELECT {CYCLE_COLUMNS} FROM cycles {where_clause} ORDER BY cycle");
        let mut stmt = self.conn.prepare(&sql)?;
        let map = |row: &duckdb::Row<'_>| {
            Ok(CycleSnapshot {
                cycle: row.get::<_, i64>(0)? as u32,
                precision: row.get(1)?,
                recall: row.get(2)?,
                f1: row.get(3)?,
                annotated_count: row.get::<_, i64>(4)? as u64,
                increment_text: row.get(5)?,
                residual_text: row.get(6)?,
                evaluation_text: row.get(7)?,
                completed_at: row.get(8)?,
            })
        };
        let rows = match cycle {
            Some(n) => stmt
                .query_map(params![n as i64], map)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map)?.collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }

    fn require_file(&self, id: FileId) -> Result<(), StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT count(*)::BIGINT FROM files WHERE id = ?", params![id], |row| {
                row.get(0)
            })?;
        if n == 0 {
            return Err(StoreError::FileNotFound(id));
        }
        Ok(())
    }

    fn insert_annotation(
        &self,
        record: &AnnotationRecord,
        position: i64,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO annotations
                 (cycle, word_id, position, word, confidence, boundaries, confirmed)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                record.cycle as i64,
                record.word.id,
                position,
                record.word.word,
                record.word.confidence,
                encode_boundaries(&record.word.boundaries),
                record.confirmed,
            ],
        )?;
        Ok(())
    }
}

impl ProjectStore for DuckStore {
    fn load_project(&self) -> Result<Option<Project>, StoreError> {
        let row = self.conn.query_row(
            "SELECT stage, increment_size, total_iterations, strategy,
                    current_iteration, cumulative_selected
             FROM project WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        );
        let (stage, increment, total, strategy, iteration, cumulative) = match row {
            Ok(row) => row,
            Err(duckdb::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Project {
            stage: stage.parse::<Stage>()?,
            config: ModelConfig {
                increment_size: increment as u32,
                total_iterations: total as u32,
                strategy: strategy.parse::<QueryStrategy>()?,
            },
            current_iteration: iteration as u32,
            cumulative_selected: cumulative as u64,
        }))
    }

    fn save_project(&self, project: &Project) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO project VALUES (1, ?, ?, ?, ?, ?, ?)",
            params![
                project.stage.as_str(),
                project.config.increment_size as i64,
                project.config.total_iterations as i64,
                project.config.strategy.as_str(),
                project.current_iteration as i64,
                project.cumulative_selected as i64,
            ],
        )?;
        Ok(())
    }

    fn insert_file(&self, name: &str, content: &str) -> Result<StoredFile, StoreError> {
        let id: i64 = self.conn.query_row(
            "INSERT INTO files (name, size, content, role, validation)
             VALUES (?, ?, ?, NULL, ?) RETURNING id",
            params![
                name,
                content.len() as i64,
                content,
                ValidationStatus::Pending.as_str()
            ],
            |row| row.get(0),
        )?;
        info!(file_id = id, name, size = content.len(), "stored file");
        Ok(StoredFile {
            id,
            name: name.to_string(),
            size: content.len() as u64,
            content: content.to_string(),
            role: None,
            validation: ValidationStatus::Pending,
        })
    }

    fn file(&self, id: FileId) -> Result<Option<StoredFile>, StoreError> {
        Ok(self.query_files("WHERE id = ?", Some(id))?.into_iter().next())
    }

    fn files(&self) -> Result<Vec<StoredFile>, StoreError> {
        self.query_files("", None)
    }

    fn update_file_content(&self, id: FileId, content: &str) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE files SET content = ?, size = ? WHERE id = ?",
            params![content, content.len() as i64, id],
        )?;
        if changed == 0 {
            return Err(StoreError::FileNotFound(id));
        }
        Ok(())
    }

    fn assign_role(&self, id: FileId, role: FileRole) -> Result<(), StoreError> {
        self.require_file(id)?;
        self.conn.execute(
            "UPDATE files SET role = NULL WHERE role = ? AND id <> ?",
            params![role.as_str(), id],
        )?;
        self.conn.execute(
            "UPDATE files SET role = ? WHERE id = ?",
            params![role.as_str(), id],
        )?;
        Ok(())
    }

    fn set_validation(&self, id: FileId, status: ValidationStatus) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE files SET validation = ? WHERE id = ?",
            params![status.as_str(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::FileNotFound(id));
        }
        Ok(())
    }

    fn upsert_cycle(&self, snapshot: &CycleSnapshot) -> Result<(), StoreError> {
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO cycles ({CYCLE_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                snapshot.cycle as i64,
                snapshot.precision,
                snapshot.recall,
                snapshot.f1,
                snapshot.annotated_count as i64,
                snapshot.increment_text,
                snapshot.residual_text,
                snapshot.evaluation_text,
                snapshot.completed_at,
            ],
        )?;
        Ok(())
    }

    fn cycle(&self, cycle: u32) -> Result<Option<CycleSnapshot>, StoreError> {
        Ok(self
            .query_cycles("WHERE cycle = ?", Some(cycle))?
            .into_iter()
            .next())
    }

    fn cycles(&self) -> Result<Vec<CycleSnapshot>, StoreError> {
        self.query_cycles("", None)
    }

    fn put_annotations(&self, cycle: u32, records: &[AnnotationRecord]) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM annotations WHERE cycle = ?",
            params![cycle as i64],
        )?;
        for (position, record) in records.iter().enumerate() {
            self.insert_annotation(record, position as i64)?;
        }
        Ok(())
    }

    fn update_annotation(&self, record: &AnnotationRecord) -> Result<(), StoreError> {
        let existing = self.conn.query_row(
            "SELECT position FROM annotations WHERE cycle = ? AND word_id = ?",
            params![record.cycle as i64, record.word.id],
            |row| row.get::<_, i64>(0),
        );
        let position = match existing {
            Ok(position) => position,
            Err(duckdb::Error::QueryReturnedNoRows) => self.conn.query_row(
                "SELECT coalesce(max(position) + 1, 0)::BIGINT FROM annotations WHERE cycle = ?",
                params![record.cycle as i64],
                |row| row.get::<_, i64>(0),
            )?,
            Err(e) => return Err(e.into()),
        };
        self.insert_annotation(record, position)
    }

    fn annotations(&self, cycle: u32) -> Result<Vec<AnnotationRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT word_id, word, confidence, boundaries, confirmed
             FROM annotations WHERE cycle = ? ORDER BY position",
        )?;
        let rows = stmt
            .query_map(params![cycle as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, word, confidence, boundaries, confirmed)| {
                Ok(AnnotationRecord {
                    cycle,
                    word: AnnotationWord {
                        id,
                        word,
                        confidence,
                        boundaries: decode_boundaries(&boundaries)?,
                    },
                    confirmed,
                })
            })
            .collect()
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "DELETE FROM annotations;
             DELETE FROM cycles;
             DELETE FROM files;
             DELETE FROM project;",
        )?;
        info!("cleared project database");
        Ok(())
    }
}

fn encode_boundaries(boundaries: &BTreeSet<usize>) -> String {
    boundaries
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn decode_boundaries(text: &str) -> Result<BTreeSet<usize>, StoreError> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| StoreError::Corrupt(format!("boundary index {s:?}")))
        })
        .collect()
}
