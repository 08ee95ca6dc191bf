//! Logical statement handle.
//!
//! Every call runs parse → route → rewrite → claim handles → fan out →
//! merge, then rotates the handle pool whether the call succeeded or not.
//! Routing state lives in a per-call context that is dropped when the call
//! returns; only the outcome read back by `generated_keys`, `result_set` and
//! `update_count` is kept until the next call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use shardline_common::error::{ExecutionError, ShardlineError, ShardlineResult};
use shardline_common::types::{GeneratedKeyMode, StatementKind};
use shardline_common::value::Value;
use shardline_core::backend::{ResultCursor, StatementOptions};
use shardline_core::executor::{ExecuteOutcome, HandlePool, UpdateOutcome};
use shardline_core::route::{ExecutionUnit, RouteResult};
use shardline_observability::record_call_metrics;

use crate::connection::ShardingConnection;
use crate::generated_keys::GeneratedKeysCursor;

enum CallKind {
    Query,
    Update(GeneratedKeyMode),
    Execute(GeneratedKeyMode),
}

enum CallResult {
    Cursor(Box<dyn ResultCursor>),
    Update(UpdateOutcome),
}

/// Per-call state, rebuilt at the start of every call.
struct CallContext {
    route: RouteResult,
}

struct GeneratedKeys {
    column: String,
    per_unit: Vec<Vec<Value>>,
}

/// What a finished call leaves behind.
struct CallOutcome {
    kind: StatementKind,
    generated_keys: Option<GeneratedKeys>,
    result_set: Option<Box<dyn ResultCursor>>,
    update_count: Option<u64>,
}

impl CallOutcome {
    fn new(context: CallContext) -> Self {
        Self {
            kind: context.route.statement.kind,
            generated_keys: None,
            result_set: None,
            update_count: None,
        }
    }

    fn with_update(context: CallContext, update: UpdateOutcome) -> Self {
        let generated_keys = context.route.generated_key.clone().map(|d| GeneratedKeys {
            column: d.column,
            per_unit: update.generated_keys,
        });
        Self {
            generated_keys,
            update_count: Some(update.update_count),
            ..Self::new(context)
        }
    }
}

pub struct ShardingStatement {
    connection: Arc<ShardingConnection>,
    pool: HandlePool,
    options: StatementOptions,
    /// Set once any call on this statement asked for generated keys.
    return_generated_keys: bool,
    last: Option<CallOutcome>,
    closed: bool,
}

impl ShardingStatement {
    pub(crate) fn new(connection: Arc<ShardingConnection>, options: StatementOptions) -> Self {
        let max_retained = connection.context().pool_config().max_retained_handles;
        Self {
            connection,
            pool: HandlePool::new(max_retained),
            options,
            return_generated_keys: false,
            last: None,
            closed: false,
        }
    }

    pub fn execute_query(&mut self, sql: &str) -> ShardlineResult<Box<dyn ResultCursor>> {
        let (context, result) = self.call(sql, CallKind::Query)?;
        self.last = Some(CallOutcome::new(context));
        match result {
            CallResult::Cursor(cursor) => Ok(cursor),
            CallResult::Update(_) => Err(ShardlineError::Internal(
                "query call produced an update count".into(),
            )),
        }
    }

    pub fn execute_update(&mut self, sql: &str) -> ShardlineResult<u64> {
        self.execute_update_with_keys(sql, GeneratedKeyMode::NoGeneratedKeys)
    }

    pub fn execute_update_with_keys(
        &mut self,
        sql: &str,
        keys: GeneratedKeyMode,
    ) -> ShardlineResult<u64> {
        self.mark_generated_keys(&keys);
        let (context, result) = self.call(sql, CallKind::Update(keys))?;
        match result {
            CallResult::Update(update) => {
                let count = update.update_count;
                self.last = Some(CallOutcome::with_update(context, update));
                Ok(count)
            }
            CallResult::Cursor(_) => {
                self.last = Some(CallOutcome::new(context));
                Err(ShardlineError::Internal("update call produced a cursor".into()))
            }
        }
    }

    pub fn execute(&mut self, sql: &str) -> ShardlineResult<bool> {
        self.execute_with_keys(sql, GeneratedKeyMode::NoGeneratedKeys)
    }

    /// Returns `true` when the call produced a result set, available through
    /// [`ShardingStatement::result_set`].
    pub fn execute_with_keys(&mut self, sql: &str, keys: GeneratedKeyMode) -> ShardlineResult<bool> {
        self.mark_generated_keys(&keys);
        let (context, result) = self.call(sql, CallKind::Execute(keys))?;
        match result {
            CallResult::Cursor(cursor) => {
                self.last = Some(CallOutcome {
                    result_set: Some(cursor),
                    ..CallOutcome::new(context)
                });
                Ok(true)
            }
            CallResult::Update(update) => {
                self.last = Some(CallOutcome::with_update(context, update));
                Ok(false)
            }
        }
    }

    /// Keys generated by the last call. Empty unless generated keys were
    /// requested on this statement and the last call was an INSERT into a
    /// table with a generated-key column.
    pub fn generated_keys(&self) -> GeneratedKeysCursor {
        if !self.return_generated_keys {
            return GeneratedKeysCursor::empty();
        }
        match &self.last {
            Some(CallOutcome {
                kind: StatementKind::Insert,
                generated_keys: Some(keys),
                ..
            }) => GeneratedKeysCursor::new(
                keys.column.clone(),
                keys.per_unit.iter().flatten().cloned().collect(),
            ),
            _ => GeneratedKeysCursor::empty(),
        }
    }

    /// Result set of the last `execute` call. Taken at most once.
    ///
    /// Always `None` after `execute_query`: that call hands its cursor to
    /// the caller directly.
    pub fn result_set(&mut self) -> Option<Box<dyn ResultCursor>> {
        self.last.as_mut()?.result_set.take()
    }

    pub fn update_count(&self) -> Option<u64> {
        self.last.as_ref()?.update_count
    }

    pub fn options(&self) -> &StatementOptions {
        &self.options
    }

    /// Takes effect on the next call, for new and reused handles alike.
    pub fn set_query_timeout(&mut self, timeout: Option<Duration>) {
        self.options.query_timeout = timeout;
    }

    pub fn set_max_rows(&mut self, max_rows: Option<u64>) {
        self.options.max_rows = max_rows;
    }

    pub fn set_fetch_size(&mut self, fetch_size: Option<u32>) {
        self.options.fetch_size = fetch_size;
    }

    pub fn close(&mut self) {
        self.pool.clear();
        self.last = None;
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn handle_pool(&self) -> &HandlePool {
        &self.pool
    }

    fn mark_generated_keys(&mut self, keys: &GeneratedKeyMode) {
        if keys.requests_keys() {
            self.return_generated_keys = true;
        }
    }

    fn call(&mut self, sql: &str, kind: CallKind) -> ShardlineResult<(CallContext, CallResult)> {
        if self.closed {
            return Err(ExecutionError::Closed.into());
        }
        self.last = None;
        let started = Instant::now();

        let result = self.route_and_execute(sql, &kind);
        self.pool.rotate();

        let label = match &result {
            Ok((context, _)) => context.route.statement.kind.as_str(),
            Err(_) => "unrouted",
        };
        record_call_metrics(started.elapsed().as_micros() as u64, label, result.is_ok());
        if let Err(e) = &result {
            tracing::debug!(error = %e, kind = ?e.kind(), "logical call failed");
        }
        result
    }

    fn route_and_execute(
        &mut self,
        sql: &str,
        kind: &CallKind,
    ) -> ShardlineResult<(CallContext, CallResult)> {
        let connection = Arc::clone(&self.connection);
        let sharding = connection.context();
        let route = sharding.route(sql, &[])?;

        for (unit_index, unit) in route.units.iter().enumerate() {
            self.claim(&connection, unit_index, unit)?;
        }
        if self.pool.active_len() != route.units.len() {
            return Err(ShardlineError::Internal(format!(
                "{} handles claimed for {} execution units",
                self.pool.active_len(),
                route.units.len()
            )));
        }

        let executor = sharding.executor();
        let handles = self.pool.active_mut();
        let result = match kind {
            CallKind::Query => {
                let cursors = executor.execute_query(&route.units, handles)?;
                CallResult::Cursor(sharding.merger().merge(&route.statement, cursors)?)
            }
            CallKind::Update(keys) => {
                CallResult::Update(executor.execute_update(&route.units, handles, keys)?)
            }
            CallKind::Execute(keys) => match executor.execute(&route.units, handles, keys)? {
                ExecuteOutcome::Query(cursors) => {
                    CallResult::Cursor(sharding.merger().merge(&route.statement, cursors)?)
                }
                ExecuteOutcome::Update(update) => CallResult::Update(update),
            },
        };
        Ok((CallContext { route }, result))
    }

    /// Claim a handle for one unit and apply the statement options to it.
    /// Connection, statement creation and option failures are reported as a
    /// failure of that unit.
    fn claim(
        &mut self,
        connection: &ShardingConnection,
        unit_index: usize,
        unit: &ExecutionUnit,
    ) -> ShardlineResult<()> {
        let unit_failed = |source: ExecutionError| ExecutionError::UnitFailed {
            unit_index,
            data_source: unit.data_source.clone(),
            source: Box::new(source),
            suppressed: Vec::new(),
        };
        let physical = match connection.physical_connection(&unit.data_source) {
            Ok(physical) => physical,
            Err(ShardlineError::Execution(e)) => return Err(unit_failed(e).into()),
            Err(e) => return Err(e),
        };
        self.pool
            .claim(&physical, &unit.sql)
            .map_err(|e| ShardlineError::from(unit_failed(e)))?;
        let handle = self.pool.active_mut().last_mut().ok_or_else(|| {
            ShardlineError::Internal(format!("no handle claimed for unit {}", unit_index))
        })?;
        handle
            .statement_mut()
            .apply_options(&self.options)
            .map_err(|e| unit_failed(e).into())
    }
}
