//! Concurrent fan-out of execution units over their claimed handles.
//!
//! Units run on scoped threads and are always joined: a failing unit never
//! cancels its siblings, so every side effect completes before the call
//! reports. Results stay positionally aligned with the units. When any unit
//! fails the call fails with the lowest-indexed failure; the rest are kept as
//! suppressed errors.

use std::panic::{catch_unwind, AssertUnwindSafe};

use shardline_common::error::ExecutionError;
use shardline_common::types::GeneratedKeyMode;
use shardline_common::value::Value;
use shardline_observability::record_unit_failure;

use super::pool::BackendHandle;
use crate::backend::ResultCursor;
use crate::route::ExecutionUnit;

/// Summed update count plus generated keys per unit, in unit order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub update_count: u64,
    pub generated_keys: Vec<Vec<Value>>,
}

impl UpdateOutcome {
    fn from_units(per_unit: Vec<(u64, Vec<Value>)>) -> Self {
        let mut outcome = UpdateOutcome::default();
        for (count, keys) in per_unit {
            outcome.update_count += count;
            outcome.generated_keys.push(keys);
        }
        outcome
    }
}

pub enum ExecuteOutcome {
    Query(Vec<Box<dyn ResultCursor>>),
    Update(UpdateOutcome),
}

enum UnitResult {
    Cursor(Box<dyn ResultCursor>),
    Count(u64, Vec<Value>),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FanoutExecutor {
    /// 0 = one thread per unit.
    max_workers: usize,
}

impl FanoutExecutor {
    pub fn new(max_workers: usize) -> Self {
        Self { max_workers }
    }

    pub fn execute_query(
        &self,
        units: &[ExecutionUnit],
        handles: &mut [BackendHandle],
    ) -> Result<Vec<Box<dyn ResultCursor>>, ExecutionError> {
        self.run_all(units, handles, |unit, handle| {
            handle
                .statement_mut()
                .execute_query(&unit.sql, &unit.parameters)
        })
    }

    pub fn execute_update(
        &self,
        units: &[ExecutionUnit],
        handles: &mut [BackendHandle],
        keys: &GeneratedKeyMode,
    ) -> Result<UpdateOutcome, ExecutionError> {
        let per_unit = self.run_all(units, handles, |unit, handle| {
            let statement = handle.statement_mut();
            let count = statement.execute_update(&unit.sql, &unit.parameters, keys)?;
            let generated = if keys.requests_keys() {
                statement.generated_keys()?
            } else {
                Vec::new()
            };
            Ok((count, generated))
        })?;
        Ok(UpdateOutcome::from_units(per_unit))
    }

    /// Generic execution. The outcome is a query when any unit produced a
    /// cursor.
    pub fn execute(
        &self,
        units: &[ExecutionUnit],
        handles: &mut [BackendHandle],
        keys: &GeneratedKeyMode,
    ) -> Result<ExecuteOutcome, ExecutionError> {
        let per_unit = self.run_all(units, handles, |unit, handle| {
            let statement = handle.statement_mut();
            if statement.execute(&unit.sql, &unit.parameters, keys)? {
                let cursor = statement.result_cursor().ok_or_else(|| {
                    ExecutionError::backend(&unit.data_source, "result cursor missing after execute")
                })?;
                return Ok(UnitResult::Cursor(cursor));
            }
            let count = statement.update_count().unwrap_or(0);
            let generated = if keys.requests_keys() {
                statement.generated_keys()?
            } else {
                Vec::new()
            };
            Ok(UnitResult::Count(count, generated))
        })?;

        if per_unit.iter().any(|r| matches!(r, UnitResult::Cursor(_))) {
            let cursors = per_unit
                .into_iter()
                .filter_map(|r| match r {
                    UnitResult::Cursor(c) => Some(c),
                    UnitResult::Count(..) => None,
                })
                .collect();
            return Ok(ExecuteOutcome::Query(cursors));
        }
        let counts = per_unit
            .into_iter()
            .filter_map(|r| match r {
                UnitResult::Count(n, keys) => Some((n, keys)),
                UnitResult::Cursor(_) => None,
            })
            .collect();
        Ok(ExecuteOutcome::Update(UpdateOutcome::from_units(counts)))
    }

    fn run_all<T, F>(
        &self,
        units: &[ExecutionUnit],
        handles: &mut [BackendHandle],
        task: F,
    ) -> Result<Vec<T>, ExecutionError>
    where
        T: Send,
        F: Fn(&ExecutionUnit, &mut BackendHandle) -> Result<T, ExecutionError> + Sync,
    {
        debug_assert_eq!(units.len(), handles.len());
        let n = units.len().min(handles.len());
        let mut slots: Vec<Option<Result<T, ExecutionError>>> = (0..n).map(|_| None).collect();

        if n == 1 {
            slots[0] = Some(run_guarded(0, &task, &units[0], &mut handles[0]));
        } else if n > 1 {
            let workers = if self.max_workers == 0 {
                n
            } else {
                self.max_workers.min(n)
            };
            tracing::debug!(units = n, workers, "fanning out execution units");

            let mut buckets: Vec<Vec<(usize, &ExecutionUnit, &mut BackendHandle)>> =
                (0..workers).map(|_| Vec::new()).collect();
            for (i, (unit, handle)) in units.iter().zip(handles.iter_mut()).enumerate() {
                buckets[i % workers].push((i, unit, handle));
            }

            std::thread::scope(|s| {
                let task = &task;
                let joins: Vec<_> = buckets
                    .into_iter()
                    .map(|bucket| {
                        s.spawn(move || {
                            bucket
                                .into_iter()
                                .map(|(i, unit, handle)| (i, run_guarded(i, task, unit, handle)))
                                .collect::<Vec<_>>()
                        })
                    })
                    .collect();
                for join in joins {
                    // Units of a worker that died without reporting stay empty
                    // and are treated as panicked below.
                    if let Ok(results) = join.join() {
                        for (i, result) in results {
                            slots[i] = Some(result);
                        }
                    }
                }
            });
        }

        let mut outputs = Vec::with_capacity(n);
        let mut first: Option<(usize, ExecutionError)> = None;
        let mut suppressed = Vec::new();
        for (i, slot) in slots.into_iter().enumerate() {
            match slot.unwrap_or(Err(ExecutionError::Panicked { unit_index: i })) {
                Ok(value) => outputs.push(value),
                Err(e) => {
                    let data_source = &units[i].data_source;
                    tracing::warn!(unit = i, data_source = %data_source, error = %e, "execution unit failed");
                    record_unit_failure(data_source);
                    if first.is_none() {
                        first = Some((i, e));
                    } else {
                        suppressed.push((i, e));
                    }
                }
            }
        }

        match first {
            None => Ok(outputs),
            Some((unit_index, source)) => Err(ExecutionError::UnitFailed {
                unit_index,
                data_source: units[unit_index].data_source.clone(),
                source: Box::new(source),
                suppressed,
            }),
        }
    }
}

fn run_guarded<T, F>(
    index: usize,
    task: &F,
    unit: &ExecutionUnit,
    handle: &mut BackendHandle,
) -> Result<T, ExecutionError>
where
    F: Fn(&ExecutionUnit, &mut BackendHandle) -> Result<T, ExecutionError>,
{
    catch_unwind(AssertUnwindSafe(|| task(unit, handle)))
        .unwrap_or(Err(ExecutionError::Panicked { unit_index: index }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::backend::{collect_rows, PhysicalConnection};
    use crate::executor::pool::HandlePool;
    use crate::test_support::StubConnection;

    fn unit(ds: &str, sql: &str) -> ExecutionUnit {
        ExecutionUnit {
            data_source: ds.into(),
            sql: sql.into(),
            parameters: vec![],
        }
    }

    fn claim_all(pool: &mut HandlePool, stubs: &[Arc<StubConnection>], units: &[ExecutionUnit]) {
        for (stub, unit) in stubs.iter().zip(units) {
            let conn: Arc<dyn PhysicalConnection> = stub.clone();
            pool.claim(&conn, &unit.sql).unwrap();
        }
    }

    #[test]
    fn test_update_counts_are_summed() {
        let stubs = vec![
            Arc::new(StubConnection::new("ds_0").with_update_count(2)),
            Arc::new(StubConnection::new("ds_1").with_update_count(5)),
        ];
        let units = vec![unit("ds_0", "UPDATE t_0 SET a = 1"), unit("ds_1", "UPDATE t_1 SET a = 1")];
        let mut pool = HandlePool::new(0);
        claim_all(&mut pool, &stubs, &units);

        let outcome = FanoutExecutor::default()
            .execute_update(&units, pool.active_mut(), &GeneratedKeyMode::NoGeneratedKeys)
            .unwrap();
        assert_eq!(outcome.update_count, 7);
        assert_eq!(outcome.generated_keys, vec![Vec::<Value>::new(), vec![]]);
    }

    #[test]
    fn test_failure_waits_for_siblings_and_names_failing_unit() {
        let stubs = vec![
            Arc::new(
                StubConnection::new("ds_0")
                    .with_update_count(3)
                    .with_delay(Duration::from_millis(50)),
            ),
            Arc::new(StubConnection::new("ds_1").failing("disk full")),
        ];
        let units = vec![unit("ds_0", "DELETE FROM t_0"), unit("ds_1", "DELETE FROM t_1")];
        let mut pool = HandlePool::new(0);
        claim_all(&mut pool, &stubs, &units);

        let err = FanoutExecutor::default()
            .execute_update(&units, pool.active_mut(), &GeneratedKeyMode::NoGeneratedKeys)
            .unwrap_err();
        match &err {
            ExecutionError::UnitFailed {
                unit_index,
                data_source,
                source,
                suppressed,
            } => {
                assert_eq!(*unit_index, 1);
                assert_eq!(data_source, "ds_1");
                assert!(source.to_string().contains("disk full"));
                assert!(suppressed.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(stubs[0].executed(), vec!["DELETE FROM t_0"]);
    }

    #[test]
    fn test_all_failures_are_reported() {
        let stubs = vec![
            Arc::new(StubConnection::new("ds_0").failing("a")),
            Arc::new(StubConnection::new("ds_1").with_update_count(1)),
            Arc::new(StubConnection::new("ds_2").failing("c")),
        ];
        let units = vec![unit("ds_0", "q"), unit("ds_1", "q"), unit("ds_2", "q")];
        let mut pool = HandlePool::new(0);
        claim_all(&mut pool, &stubs, &units);

        let err = FanoutExecutor::default()
            .execute_update(&units, pool.active_mut(), &GeneratedKeyMode::NoGeneratedKeys)
            .unwrap_err();
        assert_eq!(err.failed_units(), vec![0, 2]);
        assert_eq!(stubs[1].executed().len(), 1);
    }

    #[test]
    fn test_panicking_unit_becomes_error() {
        let stubs = vec![
            Arc::new(StubConnection::new("ds_0").with_update_count(1)),
            Arc::new(StubConnection::new("ds_1").panicking()),
        ];
        let units = vec![unit("ds_0", "q"), unit("ds_1", "q")];
        let mut pool = HandlePool::new(0);
        claim_all(&mut pool, &stubs, &units);

        let err = FanoutExecutor::default()
            .execute_update(&units, pool.active_mut(), &GeneratedKeyMode::NoGeneratedKeys)
            .unwrap_err();
        let ExecutionError::UnitFailed { source, .. } = err else {
            panic!("expected unit failure");
        };
        assert!(matches!(*source, ExecutionError::Panicked { unit_index: 1 }));
    }

    #[test]
    fn test_bounded_workers_keep_unit_order() {
        let stubs: Vec<Arc<StubConnection>> = (0..5)
            .map(|i| {
                Arc::new(
                    StubConnection::new(&format!("ds_{i}"))
                        .with_rows(&["id"], vec![vec![Value::Int64(i)]]),
                )
            })
            .collect();
        let units: Vec<ExecutionUnit> = (0..5).map(|i| unit(&format!("ds_{i}"), "SELECT id FROM t")).collect();
        let mut pool = HandlePool::new(0);
        claim_all(&mut pool, &stubs, &units);

        let cursors = FanoutExecutor::new(2)
            .execute_query(&units, pool.active_mut())
            .unwrap();
        let ids: Vec<Value> = cursors
            .into_iter()
            .flat_map(|mut c| collect_rows(c.as_mut()).unwrap())
            .map(|mut row| row.remove(0))
            .collect();
        assert_eq!(ids, (0..5).map(Value::Int64).collect::<Vec<_>>());
    }

    #[test]
    fn test_generated_keys_only_when_requested() {
        let stubs = vec![
            Arc::new(StubConnection::new("ds_0").with_update_count(1).with_keys(vec![Value::Int64(10)])),
            Arc::new(StubConnection::new("ds_1").with_update_count(1).with_keys(vec![Value::Int64(11)])),
        ];
        let units = vec![unit("ds_0", "INSERT"), unit("ds_1", "INSERT")];
        let mut pool = HandlePool::new(0);
        claim_all(&mut pool, &stubs, &units);
        let executor = FanoutExecutor::default();

        let outcome = executor
            .execute_update(&units, pool.active_mut(), &GeneratedKeyMode::ReturnGeneratedKeys)
            .unwrap();
        assert_eq!(
            outcome.generated_keys,
            vec![vec![Value::Int64(10)], vec![Value::Int64(11)]]
        );

        let outcome = executor
            .execute_update(&units, pool.active_mut(), &GeneratedKeyMode::NoGeneratedKeys)
            .unwrap();
        assert!(outcome.generated_keys.iter().all(Vec::is_empty));
    }

    #[test]
    fn test_execute_distinguishes_query_and_update() {
        let stubs = vec![
            Arc::new(StubConnection::new("ds_0").with_update_count(4).with_rows(&["a"], vec![])),
        ];
        let mut pool = HandlePool::new(0);
        let executor = FanoutExecutor::default();

        let select = vec![unit("ds_0", "SELECT a FROM t")];
        claim_all(&mut pool, &stubs, &select);
        let outcome = executor
            .execute(&select, pool.active_mut(), &GeneratedKeyMode::NoGeneratedKeys)
            .unwrap();
        assert!(matches!(outcome, ExecuteOutcome::Query(ref c) if c.len() == 1));
        pool.rotate();

        let update = vec![unit("ds_0", "UPDATE t SET a = 1")];
        claim_all(&mut pool, &stubs, &update);
        let outcome = executor
            .execute(&update, pool.active_mut(), &GeneratedKeyMode::NoGeneratedKeys)
            .unwrap();
        let ExecuteOutcome::Update(update) = outcome else {
            panic!("expected update outcome");
        };
        assert_eq!(update.update_count, 4);
    }
}
