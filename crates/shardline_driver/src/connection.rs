//! Logical connection: one physical connection per data source, opened on
//! first use and shared by every statement created from it.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use shardline_common::error::{ConfigError, RoutingError, ShardlineError};
use shardline_core::backend::{DataSource, PhysicalConnection, StatementOptions};
use shardline_core::context::ShardingContext;

use crate::statement::ShardingStatement;

pub struct ShardingConnection {
    context: Arc<ShardingContext>,
    data_sources: HashMap<String, Arc<dyn DataSource>>,
    connections: DashMap<String, Arc<dyn PhysicalConnection>>,
}

impl ShardingConnection {
    /// Every data source named by the sharding rule must be supplied.
    pub fn new(
        context: Arc<ShardingContext>,
        data_sources: Vec<Arc<dyn DataSource>>,
    ) -> Result<Arc<Self>, ConfigError> {
        let data_sources: HashMap<String, Arc<dyn DataSource>> = data_sources
            .into_iter()
            .map(|ds| (ds.name().to_string(), ds))
            .collect();
        for name in context.sharding_rule().data_sources() {
            if !data_sources.contains_key(name) {
                return Err(ConfigError::Invalid(format!(
                    "data source '{}' is configured but not provided",
                    name
                )));
            }
        }
        Ok(Arc::new(Self {
            context,
            data_sources,
            connections: DashMap::new(),
        }))
    }

    pub fn context(&self) -> &ShardingContext {
        &self.context
    }

    pub fn create_statement(self: &Arc<Self>) -> ShardingStatement {
        self.create_statement_with(StatementOptions::default())
    }

    pub fn create_statement_with(self: &Arc<Self>, options: StatementOptions) -> ShardingStatement {
        ShardingStatement::new(Arc::clone(self), options)
    }

    /// Cached physical connection for `data_source`, connecting on first use.
    pub fn physical_connection(
        &self,
        data_source: &str,
    ) -> Result<Arc<dyn PhysicalConnection>, ShardlineError> {
        if let Some(existing) = self.connections.get(data_source) {
            return Ok(Arc::clone(existing.value()));
        }
        let source = self
            .data_sources
            .get(data_source)
            .ok_or_else(|| RoutingError::UnknownDataSource(data_source.to_string()))?;
        let entry = self
            .connections
            .entry(data_source.to_string())
            .or_try_insert_with(|| {
                tracing::debug!(data_source, "opening physical connection");
                source.connect()
            })?;
        Ok(Arc::clone(entry.value()))
    }

    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    /// Drop every cached physical connection.
    pub fn close(&self) {
        self.connections.clear();
    }
}
