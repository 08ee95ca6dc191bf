//! Generational reuse pool for physical statement handles.
//!
//! Two slots: `candidates` holds handles carried over from earlier calls,
//! `active` holds the handles claimed by the current call, in unit order.
//! A handle is claimed out of `candidates` when it was created on the same
//! physical connection for the same SQL text; otherwise a new one is
//! created. `rotate` runs once per logical call, after it finishes.

use std::fmt;
use std::sync::Arc;

use shardline_common::error::ExecutionError;
use shardline_observability::{record_handle_pool_lookup, record_handle_pool_size};

use crate::backend::{BackendStatement, PhysicalConnection};

pub struct BackendHandle {
    connection: Arc<dyn PhysicalConnection>,
    sql: String,
    statement: Box<dyn BackendStatement>,
    /// Generation of the last call that claimed this handle.
    last_used: u64,
}

impl BackendHandle {
    pub fn belongs_to(&self, connection: &Arc<dyn PhysicalConnection>, sql: &str) -> bool {
        same_connection(&self.connection, connection) && self.sql == sql
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn data_source(&self) -> &str {
        self.connection.data_source()
    }

    pub fn statement_mut(&mut self) -> &mut dyn BackendStatement {
        self.statement.as_mut()
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendHandle")
            .field("data_source", &self.data_source())
            .field("sql", &self.sql)
            .field("last_used", &self.last_used)
            .finish()
    }
}

/// Identity of the connection object, ignoring vtable metadata.
fn same_connection(a: &Arc<dyn PhysicalConnection>, b: &Arc<dyn PhysicalConnection>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[derive(Debug, Default)]
pub struct HandlePool {
    candidates: Vec<BackendHandle>,
    active: Vec<BackendHandle>,
    generation: u64,
    /// 0 = unbounded.
    max_retained: usize,
}

impl HandlePool {
    pub fn new(max_retained: usize) -> Self {
        Self {
            max_retained,
            ..Self::default()
        }
    }

    /// Move a matching candidate into the active set, or create a new handle
    /// there. Returns whether an existing handle was reused.
    pub fn claim(
        &mut self,
        connection: &Arc<dyn PhysicalConnection>,
        sql: &str,
    ) -> Result<bool, ExecutionError> {
        let generation = self.generation;
        let reused = match self
            .candidates
            .iter()
            .position(|h| h.belongs_to(connection, sql))
        {
            Some(idx) => {
                let mut handle = self.candidates.remove(idx);
                handle.last_used = generation;
                self.active.push(handle);
                true
            }
            None => {
                let statement = connection.create_statement()?;
                self.active.push(BackendHandle {
                    connection: Arc::clone(connection),
                    sql: sql.to_string(),
                    statement,
                    last_used: generation,
                });
                false
            }
        };
        tracing::debug!(
            data_source = connection.data_source(),
            reused,
            "claimed backend handle"
        );
        record_handle_pool_lookup(reused);
        Ok(reused)
    }

    /// Handles claimed by the current call, index-aligned with its units.
    pub fn active_mut(&mut self) -> &mut [BackendHandle] {
        &mut self.active
    }

    /// Close the current generation: leftover candidates join the active
    /// set, which becomes the next candidate pool; the emptied slot becomes
    /// the new active set.
    pub fn rotate(&mut self) {
        self.active.append(&mut self.candidates);
        std::mem::swap(&mut self.candidates, &mut self.active);
        self.generation += 1;
        if self.max_retained > 0 {
            self.evict_oldest();
        }
        record_handle_pool_size(self.candidates.len());
    }

    fn evict_oldest(&mut self) {
        while self.candidates.len() > self.max_retained {
            let Some((idx, _)) = self
                .candidates
                .iter()
                .enumerate()
                .min_by_key(|(_, h)| h.last_used)
            else {
                break;
            };
            let handle = self.candidates.remove(idx);
            tracing::debug!(
                data_source = handle.data_source(),
                sql = %handle.sql,
                last_used = handle.last_used,
                "evicted backend handle"
            );
        }
    }

    /// Drop every handle (statement close).
    pub fn clear(&mut self) {
        self.candidates.clear();
        self.active.clear();
        record_handle_pool_size(0);
    }

    pub fn len(&self) -> usize {
        self.candidates.len() + self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn candidate_len(&self) -> usize {
        self.candidates.len()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Every held handle: candidates first, then the active set.
    pub fn routed_statements(&self) -> impl Iterator<Item = &BackendHandle> {
        self.candidates.iter().chain(self.active.iter())
    }
}
