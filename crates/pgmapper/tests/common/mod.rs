//! Shared test doubles.
#![allow(dead_code)]

use pgmapper::{MapperError, MapperResult, QueryOutput, Row};
use std::collections::VecDeque;
use std::sync::Mutex;

/// An executor that records every statement it is handed and replies with
/// canned row sets in order. Statements past the script get an empty result.
pub struct ScriptedExecutor {
    seen: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<Vec<Row>>>,
}

impl ScriptedExecutor {
    pub fn new<I: IntoIterator<Item = Vec<Row>>>(responses: I) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            responses: Mutex::new(responses.into_iter().collect()),
        }
    }

    /// The statements executed so far, in order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl pgmapper::Executor for ScriptedExecutor {
    async fn query(&self, sql: &str) -> MapperResult<QueryOutput> {
        self.seen.lock().unwrap().push(sql.to_string());
        let rows = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        let row_count = rows.len() as u64;
        Ok(QueryOutput { rows, row_count })
    }
}

/// An executor that fails any statement containing the given marker and
/// otherwise records and succeeds with an empty result.
pub struct FailOn {
    marker: &'static str,
    seen: Mutex<Vec<String>>,
}

impl FailOn {
    pub fn new(marker: &'static str) -> Self {
        Self {
            marker,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl pgmapper::Executor for FailOn {
    async fn query(&self, sql: &str) -> MapperResult<QueryOutput> {
        self.seen.lock().unwrap().push(sql.to_string());
        if sql.contains(self.marker) {
            return Err(MapperError::validation(format!("scripted failure: {sql}")));
        }
        Ok(QueryOutput::default())
    }
}
