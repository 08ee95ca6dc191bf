//! In-process scripted backend.
//!
//! Each `MemoryDataSource` answers statements from scripts keyed by an SQL
//! fragment (the most recently registered matching script wins) and records
//! every statement it executes. Unscripted queries return an empty cursor;
//! unscripted writes report one affected row. Writes that request generated
//! keys get one key per affected row from a per-data-source sequence.
//! Applied statement options are recorded; `max_rows` truncates query
//! results.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use shardline_common::error::ExecutionError;
use shardline_common::types::GeneratedKeyMode;
use shardline_common::value::{Row, Value};
use shardline_core::backend::{
    BackendStatement, DataSource, PhysicalConnection, ResultCursor, RowsCursor, StatementOptions,
};

#[derive(Debug, Clone)]
enum Script {
    Rows { labels: Vec<String>, rows: Vec<Row> },
    UpdateCount(u64),
    Fail(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub data_source: String,
    pub sql: String,
    pub parameters: Vec<Value>,
}

#[derive(Debug)]
struct MemoryState {
    scripts: Mutex<Vec<(String, Script)>>,
    executed: Mutex<Vec<ExecutedStatement>>,
    options_applied: Mutex<Vec<StatementOptions>>,
    statements_created: AtomicUsize,
    connections_opened: AtomicUsize,
    next_key: AtomicI64,
}

impl MemoryState {
    fn script_for(&self, sql: &str) -> Option<Script> {
        self.scripts
            .lock()
            .iter()
            .rev()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, script)| script.clone())
    }
}

pub struct MemoryDataSource {
    name: String,
    state: Arc<MemoryState>,
}

impl MemoryDataSource {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Arc::new(MemoryState {
                scripts: Mutex::new(Vec::new()),
                executed: Mutex::new(Vec::new()),
                options_applied: Mutex::new(Vec::new()),
                statements_created: AtomicUsize::new(0),
                connections_opened: AtomicUsize::new(0),
                next_key: AtomicI64::new(1),
            }),
        })
    }

    pub fn on_query(&self, fragment: &str, labels: &[&str], rows: Vec<Row>) {
        self.push(
            fragment,
            Script::Rows {
                labels: labels.iter().map(|l| l.to_string()).collect(),
                rows,
            },
        );
    }

    pub fn on_update(&self, fragment: &str, count: u64) {
        self.push(fragment, Script::UpdateCount(count));
    }

    pub fn fail_on(&self, fragment: &str, message: &str) {
        self.push(fragment, Script::Fail(message.to_string()));
    }

    fn push(&self, fragment: &str, script: Script) {
        self.state.scripts.lock().push((fragment.to_string(), script));
    }

    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.state.executed.lock().clone()
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.state.executed.lock().iter().map(|e| e.sql.clone()).collect()
    }

    /// Options applied to this data source's statements, in call order.
    pub fn applied_options(&self) -> Vec<StatementOptions> {
        self.state.options_applied.lock().clone()
    }

    pub fn statements_created(&self) -> usize {
        self.state.statements_created.load(Ordering::SeqCst)
    }

    pub fn connections_opened(&self) -> usize {
        self.state.connections_opened.load(Ordering::SeqCst)
    }
}

impl DataSource for MemoryDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> Result<Arc<dyn PhysicalConnection>, ExecutionError> {
        self.state.connections_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryConnection {
            name: self.name.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemoryConnection {
    name: String,
    state: Arc<MemoryState>,
}

impl PhysicalConnection for MemoryConnection {
    fn data_source(&self) -> &str {
        &self.name
    }

    fn create_statement(&self) -> Result<Box<dyn BackendStatement>, ExecutionError> {
        self.state.statements_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryStatement {
            name: self.name.clone(),
            state: Arc::clone(&self.state),
            options: StatementOptions::default(),
            pending: None,
            last_count: None,
            last_keys: Vec::new(),
        }))
    }
}

struct MemoryStatement {
    name: String,
    state: Arc<MemoryState>,
    options: StatementOptions,
    pending: Option<Box<dyn ResultCursor>>,
    last_count: Option<u64>,
    last_keys: Vec<Value>,
}

impl MemoryStatement {
    fn record(&self, sql: &str, parameters: &[Value]) -> Result<Option<Script>, ExecutionError> {
        let script = self.state.script_for(sql);
        if let Some(Script::Fail(message)) = &script {
            return Err(ExecutionError::backend(&self.name, message.clone()));
        }
        self.state.executed.lock().push(ExecutedStatement {
            data_source: self.name.clone(),
            sql: sql.to_string(),
            parameters: parameters.to_vec(),
        });
        Ok(script)
    }

    fn query(&mut self, sql: &str, parameters: &[Value]) -> Result<Box<dyn ResultCursor>, ExecutionError> {
        let cursor = match self.record(sql, parameters)? {
            Some(Script::Rows { labels, mut rows }) => {
                if let Some(max) = self.options.max_rows {
                    rows.truncate(usize::try_from(max).unwrap_or(usize::MAX));
                }
                RowsCursor::new(labels, rows)
            }
            _ => RowsCursor::empty(),
        };
        Ok(Box::new(cursor))
    }

    fn update(
        &mut self,
        sql: &str,
        parameters: &[Value],
        keys: &GeneratedKeyMode,
    ) -> Result<u64, ExecutionError> {
        let count = match self.record(sql, parameters)? {
            Some(Script::UpdateCount(n)) => n,
            _ => 1,
        };
        self.last_keys.clear();
        if keys.requests_keys() {
            for _ in 0..count {
                let key = self.state.next_key.fetch_add(1, Ordering::SeqCst);
                self.last_keys.push(Value::Int64(key));
            }
        }
        Ok(count)
    }
}

fn is_query(sql: &str) -> bool {
    sql.trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("SELECT"))
}

impl BackendStatement for MemoryStatement {
    fn apply_options(&mut self, options: &StatementOptions) -> Result<(), ExecutionError> {
        self.options = *options;
        self.state.options_applied.lock().push(*options);
        Ok(())
    }

    fn execute_query(
        &mut self,
        sql: &str,
        parameters: &[Value],
    ) -> Result<Box<dyn ResultCursor>, ExecutionError> {
        self.query(sql, parameters)
    }

    fn execute_update(
        &mut self,
        sql: &str,
        parameters: &[Value],
        keys: &GeneratedKeyMode,
    ) -> Result<u64, ExecutionError> {
        self.update(sql, parameters, keys)
    }

    fn execute(
        &mut self,
        sql: &str,
        parameters: &[Value],
        keys: &GeneratedKeyMode,
    ) -> Result<bool, ExecutionError> {
        if is_query(sql) {
            self.pending = Some(self.query(sql, parameters)?);
            self.last_count = None;
            Ok(true)
        } else {
            self.pending = None;
            self.last_count = Some(self.update(sql, parameters, keys)?);
            Ok(false)
        }
    }

    fn result_cursor(&mut self) -> Option<Box<dyn ResultCursor>> {
        self.pending.take()
    }

    fn update_count(&self) -> Option<u64> {
        self.last_count
    }

    fn generated_keys(&mut self) -> Result<Vec<Value>, ExecutionError> {
        Ok(self.last_keys.clone())
    }
}
