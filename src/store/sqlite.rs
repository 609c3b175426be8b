//! SQLite run store

use super::RunStore;
use super::error::StoreError;
use super::records::{
    RunRecord, RunStatus, StepCompletion, StepRecord, StepStatus, now_timestamp,
};
use super::schema::init_schema;
use crate::template::RunContext;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const RUN_COLUMNS: &str = "id, workflow_id, task, status, context, created_at, updated_at";

const STEP_COLUMNS: &str = "id, run_id, step_index, step_name, agent, status, input_template, \
                            resolved_input, output, error, created_at, updated_at";

impl ToSql for RunStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RunStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for StepStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for StepStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl FromSql for RunContext {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        RunContext::from_json(value.as_str()?).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        task: row.get(2)?,
        status: row.get(3)?,
        context: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn row_to_step(row: &Row<'_>) -> rusqlite::Result<StepRecord> {
    Ok(StepRecord {
        id: row.get(0)?,
        run_id: row.get(1)?,
        step_index: row.get(2)?,
        step_name: row.get(3)?,
        agent: row.get(4)?,
        status: row.get(5)?,
        input_template: row.get(6)?,
        resolved_input: row.get(7)?,
        output: row.get(8)?,
        error: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn load_run(conn: &Connection, run_id: &str) -> Result<RunRecord, StoreError> {
    conn.query_row(
        &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
        [run_id],
        row_to_run,
    )
    .optional()?
    .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))
}

/// Load a step that is about to move to `next`
fn load_step_for(
    conn: &Connection,
    step_id: &str,
    next: StepStatus,
) -> Result<StepRecord, StoreError> {
    let step = conn
        .query_row(
            &format!("SELECT {STEP_COLUMNS} FROM steps WHERE id = ?1"),
            [step_id],
            row_to_step,
        )
        .optional()?
        .ok_or_else(|| StoreError::StepNotFound(step_id.to_string()))?;

    if !step.status.can_transition_to(next) {
        return Err(StoreError::StepTransition {
            step_id: step_id.to_string(),
            expected: StepStatus::Running,
            actual: step.status,
        });
    }
    Ok(step)
}

/// SQLite-backed [`RunStore`]
///
/// One connection per store, guarded by a mutex. Separate processes (or
/// separate stores on the same file) coordinate through SQLite locking;
/// every write runs in an immediate transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database file
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        init_schema(&conn)?;

        tracing::debug!(path = %path.display(), "Opened run database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut conn)
    }

    /// Number of run rows and step rows
    pub fn row_counts(&self) -> Result<(u64, u64), StoreError> {
        self.with_conn(|conn| {
            let runs: i64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
            let steps: i64 = conn.query_row("SELECT COUNT(*) FROM steps", [], |row| row.get(0))?;
            Ok((runs as u64, steps as u64))
        })
    }
}

impl RunStore for SqliteStore {
    fn create_run(&self, run: &RunRecord, steps: &[StepRecord]) -> Result<(), StoreError> {
        let context = run.context.to_json()?;

        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            tx.execute(
                &format!("INSERT INTO runs ({RUN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                params![
                    run.id,
                    run.workflow_id,
                    run.task,
                    run.status,
                    context,
                    run.created_at,
                    run.updated_at,
                ],
            )?;

            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO steps ({STEP_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ))?;
                for step in steps {
                    stmt.execute(params![
                        step.id,
                        step.run_id,
                        step.step_index,
                        step.step_name,
                        step.agent,
                        step.status,
                        step.input_template,
                        step.resolved_input,
                        step.output,
                        step.error,
                        step.created_at,
                        step.updated_at,
                    ])?;
                }
            }

            tx.commit()?;
            Ok(())
        })
    }

    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError> {
        self.with_conn(|conn| {
            let run = conn
                .query_row(
                    &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                    [run_id],
                    row_to_run,
                )
                .optional()?;
            Ok(run)
        })
    }

    fn find_runs_by_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<RunRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM runs
                 WHERE substr(id, 1, length(?1)) = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2"
            ))?;
            let runs = stmt
                .query_map(params![prefix, limit as i64], row_to_run)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(runs)
        })
    }

    fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM runs ORDER BY created_at DESC, id DESC LIMIT ?1"
            ))?;
            let runs = stmt
                .query_map([limit as i64], row_to_run)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(runs)
        })
    }

    fn get_steps(&self, run_id: &str) -> Result<Vec<StepRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STEP_COLUMNS} FROM steps WHERE run_id = ?1 ORDER BY step_index"
            ))?;
            let steps = stmt
                .query_map([run_id], row_to_step)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(steps)
        })
    }

    fn get_step(&self, step_id: &str) -> Result<Option<StepRecord>, StoreError> {
        self.with_conn(|conn| {
            let step = conn
                .query_row(
                    &format!("SELECT {STEP_COLUMNS} FROM steps WHERE id = ?1"),
                    [step_id],
                    row_to_step,
                )
                .optional()?;
            Ok(step)
        })
    }

    fn claim_next(
        &self,
        agent_id: &str,
        resolve: &mut dyn FnMut(&StepRecord, &RunRecord) -> String,
    ) -> Result<Option<StepRecord>, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = now_timestamp();

            // Compare-and-swap on status: the outer `status = 'pending'` guard
            // makes the transition a no-op if anyone got there first.
            let claimed = tx
                .query_row(
                    &format!(
                        "UPDATE steps SET status = 'running', updated_at = ?2
                         WHERE id = (
                             SELECT s.id FROM steps s
                             JOIN runs r ON r.id = s.run_id
                             WHERE s.status = 'pending'
                               AND r.status = 'running'
                               AND r.workflow_id || '_' || s.agent = ?1
                             ORDER BY s.step_index, r.created_at, r.id
                             LIMIT 1
                         )
                         AND status = 'pending'
                         RETURNING {STEP_COLUMNS}"
                    ),
                    params![agent_id, now],
                    row_to_step,
                )
                .optional()?;

            let Some(mut step) = claimed else {
                return Ok(None);
            };

            let run = load_run(&tx, &step.run_id)?;
            let resolved = resolve(&step, &run);

            tx.execute(
                "UPDATE steps SET resolved_input = ?1 WHERE id = ?2",
                params![resolved, step.id],
            )?;
            tx.commit()?;

            step.resolved_input = Some(resolved);
            Ok(Some(step))
        })
    }

    fn complete_step(
        &self,
        step_id: &str,
        output: &str,
        update_context: &mut dyn FnMut(&mut RunContext),
    ) -> Result<StepCompletion, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = now_timestamp();

            let step = load_step_for(&tx, step_id, StepStatus::Completed)?;
            tx.execute(
                "UPDATE steps SET status = 'completed', output = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'running'",
                params![output, now, step.id],
            )?;

            let run = load_run(&tx, &step.run_id)?;
            if run.status != RunStatus::Running {
                tx.commit()?;
                return Ok(StepCompletion::RunInactive {
                    run_id: run.id,
                    status: run.status,
                });
            }

            let mut context = run.context.clone();
            update_context(&mut context);
            let context_json = context.to_json()?;

            let next: Option<(String, u32)> = tx
                .query_row(
                    "UPDATE steps SET status = 'pending', updated_at = ?2
                     WHERE id = (
                         SELECT id FROM steps
                         WHERE run_id = ?1 AND status = 'waiting'
                         ORDER BY step_index
                         LIMIT 1
                     )
                     RETURNING id, step_index",
                    params![run.id, now],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let completion = match next {
                Some((next_step_id, next_step_index)) => {
                    tx.execute(
                        "UPDATE runs SET context = ?1, updated_at = ?2 WHERE id = ?3",
                        params![context_json, now, run.id],
                    )?;
                    StepCompletion::Advanced {
                        run_id: run.id,
                        next_step_id,
                        next_step_index,
                    }
                }
                None => {
                    tx.execute(
                        "UPDATE runs SET context = ?1, status = ?2, updated_at = ?3 WHERE id = ?4",
                        params![context_json, RunStatus::Completed, now, run.id],
                    )?;
                    StepCompletion::RunCompleted { run_id: run.id }
                }
            };

            tx.commit()?;
            Ok(completion)
        })
    }

    fn fail_step(&self, step_id: &str, error: &str) -> Result<StepRecord, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = now_timestamp();

            let mut step = load_step_for(&tx, step_id, StepStatus::Failed)?;
            tx.execute(
                "UPDATE steps SET status = 'failed', error = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'running'",
                params![error, now, step.id],
            )?;
            tx.execute(
                "UPDATE runs SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![RunStatus::Failed, now, step.run_id, RunStatus::Running],
            )?;
            tx.commit()?;

            step.status = StepStatus::Failed;
            step.error = Some(error.to_string());
            step.updated_at = now;
            Ok(step)
        })
    }

    fn transition_run(
        &self,
        run_id: &str,
        from: RunStatus,
        to: RunStatus,
    ) -> Result<bool, StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::RunTransition {
                run_id: run_id.to_string(),
                from,
                to,
            });
        }

        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE runs SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![to, now_timestamp(), run_id, from],
            )?;
            Ok(changed > 0)
        })
    }
}
