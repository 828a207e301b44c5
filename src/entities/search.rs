//! Dual-source drug search: the bundled directory answers synchronously,
//! RxNorm answers later, and only the answer for the latest query is kept.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::entities::drug::{DrugDirectory, DrugRecord, MIN_QUERY_CHARS};
use crate::entities::name_search::{NameSearch, RemoteNameMatch};

pub const LOCAL_RESULT_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    Idle,
    Searching,
    Resolved,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchState {
    pub query: String,
    pub phase: SearchPhase,
    pub generation: u64,
    pub local: Vec<DrugRecord>,
    pub remote: Vec<RemoteNameMatch>,
}

impl SearchState {
    fn idle() -> Self {
        Self {
            query: String::new(),
            phase: SearchPhase::Idle,
            generation: 0,
            local: Vec::new(),
            remote: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.local.len() + self.remote.len()
    }
}

/// A remote answer tagged with the generation of the query that produced it.
#[derive(Debug)]
pub struct RemoteAnswer {
    pub generation: u64,
    pub query: String,
    pub matches: Vec<RemoteNameMatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Published,
    Superseded,
}

pub struct SearchCoordinator {
    directory: Arc<DrugDirectory>,
    remote: Arc<dyn NameSearch>,
    state: SearchState,
    latest_generation: u64,
    tx: mpsc::UnboundedSender<RemoteAnswer>,
    rx: mpsc::UnboundedReceiver<RemoteAnswer>,
}

impl SearchCoordinator {
    pub fn new(directory: Arc<DrugDirectory>, remote: Arc<dyn NameSearch>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            directory,
            remote,
            state: SearchState::idle(),
            latest_generation: 0,
            tx,
            rx,
        }
    }

    pub fn state(&self) -> &SearchState {
        &self.state
    }

    fn bump_generation(&mut self) -> u64 {
        self.latest_generation += 1;
        self.state.generation = self.latest_generation;
        self.latest_generation
    }

    fn reset(&mut self) {
        self.bump_generation();
        self.state.local.clear();
        self.state.remote.clear();
        self.state.phase = SearchPhase::Idle;
    }

    /// Publishes local matches immediately and starts the remote lookup.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_query_changed(&mut self, query: &str) -> &SearchState {
        self.state.query = query.to_string();
        if query.chars().count() < MIN_QUERY_CHARS || query.trim().is_empty() {
            self.reset();
            return &self.state;
        }

        self.state.local = self
            .directory
            .search(query, LOCAL_RESULT_LIMIT)
            .into_iter()
            .cloned()
            .collect();
        self.state.remote.clear();
        let generation = self.bump_generation();
        self.state.phase = SearchPhase::Searching;

        let remote = Arc::clone(&self.remote);
        let tx = self.tx.clone();
        let query = query.to_string();
        tokio::spawn(async move {
            let matches = remote.search(&query).await;
            // The receiver lives as long as the coordinator.
            let _ = tx.send(RemoteAnswer {
                generation,
                query,
                matches,
            });
        });

        &self.state
    }

    pub async fn next_resolution(&mut self) -> Option<RemoteAnswer> {
        self.rx.recv().await
    }

    pub fn apply_resolution(&mut self, answer: RemoteAnswer) -> Resolution {
        if answer.generation != self.latest_generation || self.state.phase != SearchPhase::Searching
        {
            debug!(
                query = %answer.query,
                generation = answer.generation,
                latest = self.latest_generation,
                "Discarding superseded remote answer"
            );
            return Resolution::Superseded;
        }
        self.state.remote = answer.matches;
        self.state.phase = SearchPhase::Resolved;
        Resolution::Published
    }

    /// Waits until the current query is resolved or the coordinator is idle.
    pub async fn settle(&mut self) -> &SearchState {
        while self.state.phase == SearchPhase::Searching {
            let Some(answer) = self.rx.recv().await else {
                break;
            };
            self.apply_resolution(answer);
        }
        &self.state
    }

    /// Name of the `index`-th visible result, local results first.
    pub fn choice(&self, index: usize) -> Option<&str> {
        let local = self.state.local.len();
        if index < local {
            return Some(self.state.local[index].name.as_str());
        }
        self.state
            .remote
            .get(index - local)
            .map(|m| m.name.as_str())
    }

    /// Accepts a drug and returns to idle. Any outstanding remote answer becomes stale.
    pub fn select(&mut self, choice: &str) -> String {
        let choice = choice.trim().to_string();
        self.state.query.clear();
        self.reset();
        choice
    }
}
