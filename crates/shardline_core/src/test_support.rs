//! Scripted backend used by unit tests in this crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shardline_common::error::ExecutionError;
use shardline_common::types::GeneratedKeyMode;
use shardline_common::value::{Row, Value};

use crate::backend::{
    BackendStatement, PhysicalConnection, ResultCursor, RowsCursor, StatementOptions,
};

#[derive(Clone, Default)]
struct Script {
    update_count: u64,
    fail_with: Option<String>,
    fail_create: bool,
    panic: bool,
    delay: Option<Duration>,
    keys: Vec<Value>,
    labels: Vec<String>,
    rows: Vec<Row>,
}

pub struct StubConnection {
    name: String,
    script: Script,
    created: AtomicUsize,
    executed: Arc<Mutex<Vec<String>>>,
}

impl StubConnection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Script::default(),
            created: AtomicUsize::new(0),
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_update_count(mut self, count: u64) -> Self {
        self.script.update_count = count;
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.script.fail_with = Some(message.to_string());
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.script.fail_create = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.script.panic = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.script.delay = Some(delay);
        self
    }

    pub fn with_keys(mut self, keys: Vec<Value>) -> Self {
        self.script.keys = keys;
        self
    }

    pub fn with_rows(mut self, labels: &[&str], rows: Vec<Row>) -> Self {
        self.script.labels = labels.iter().map(|l| l.to_string()).collect();
        self.script.rows = rows;
        self
    }

    pub fn statements_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

impl PhysicalConnection for StubConnection {
    fn data_source(&self) -> &str {
        &self.name
    }

    fn create_statement(&self) -> Result<Box<dyn BackendStatement>, ExecutionError> {
        if self.script.fail_create {
            return Err(ExecutionError::backend(&self.name, "cannot create statement"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubStatement {
            name: self.name.clone(),
            script: self.script.clone(),
            executed: Arc::clone(&self.executed),
            pending: None,
            last_count: None,
        }))
    }
}

struct StubStatement {
    name: String,
    script: Script,
    executed: Arc<Mutex<Vec<String>>>,
    pending: Option<Box<dyn ResultCursor>>,
    last_count: Option<u64>,
}

impl StubStatement {
    fn run(&mut self, sql: &str) -> Result<(), ExecutionError> {
        if let Some(delay) = self.script.delay {
            std::thread::sleep(delay);
        }
        if self.script.panic {
            panic!("scripted panic on {}", self.name);
        }
        if let Some(message) = &self.script.fail_with {
            return Err(ExecutionError::backend(&self.name, message.clone()));
        }
        self.executed.lock().unwrap().push(sql.to_string());
        Ok(())
    }

    fn cursor(&self) -> Box<dyn ResultCursor> {
        Box::new(RowsCursor::new(
            self.script.labels.clone(),
            self.script.rows.clone(),
        ))
    }
}

impl BackendStatement for StubStatement {
    fn apply_options(&mut self, _options: &StatementOptions) -> Result<(), ExecutionError> {
        Ok(())
    }

    fn execute_query(
        &mut self,
        sql: &str,
        _parameters: &[Value],
    ) -> Result<Box<dyn ResultCursor>, ExecutionError> {
        self.run(sql)?;
        Ok(self.cursor())
    }

    fn execute_update(
        &mut self,
        sql: &str,
        _parameters: &[Value],
        _keys: &GeneratedKeyMode,
    ) -> Result<u64, ExecutionError> {
        self.run(sql)?;
        Ok(self.script.update_count)
    }

    fn execute(
        &mut self,
        sql: &str,
        _parameters: &[Value],
        _keys: &GeneratedKeyMode,
    ) -> Result<bool, ExecutionError> {
        self.run(sql)?;
        if sql.trim_start().to_ascii_uppercase().starts_with("SELECT") {
            self.pending = Some(self.cursor());
            self.last_count = None;
            Ok(true)
        } else {
            self.pending = None;
            self.last_count = Some(self.script.update_count);
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
        Ok(self.script.keys.clone())
    }
}
