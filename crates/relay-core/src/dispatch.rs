//! Keeps slow work off the caller's thread.
//!
//! A [`Dispatcher`] owns a tokio runtime. Its request methods return at once
//! with a [`RequestId`]; results come back as [`Completion`] values on a
//! queue the owning thread drains with [`Dispatcher::poll`] or
//! [`Dispatcher::wait`]. Workers never touch caller state directly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::agent::{AgentError, AgentInvocation, AgentInvoker, AgentResult, CancelSignal};
use crate::chat::{ChatCompletion, ChatRequest, ChatResponse, ServiceError};
use crate::config::RelayConfig;
use crate::content::ContentLoader;
use crate::context::ContextBundle;
use crate::session::SessionStore;
use crate::status::{BuildError, ChangeSet, ChangeSetBuilder, RepoPath};
use crate::supervisor::SupervisorHandle;

pub type RequestId = u64;

/// A finished piece of background work.
#[derive(Debug)]
pub enum Completion {
    Refreshed {
        generation: u64,
        result: Result<Arc<ChangeSet>, BuildError>,
    },
    Loaded {
        id: RequestId,
        bundle: ContextBundle,
    },
    Agent {
        id: RequestId,
        result: Result<AgentResult, AgentError>,
    },
    Chat {
        id: RequestId,
        result: Result<ChatResponse, ServiceError>,
    },
}

enum RunState {
    Queued(CancelSignal),
    Running(SupervisorHandle),
}

type RunTable = Arc<Mutex<HashMap<RequestId, RunState>>>;

fn lock(table: &RunTable) -> MutexGuard<'_, HashMap<RequestId, RunState>> {
    table.lock().unwrap_or_else(|p| p.into_inner())
}

pub struct Dispatcher {
    runtime: tokio::runtime::Runtime,
    builder: ChangeSetBuilder,
    loader: ContentLoader,
    invoker: Arc<AgentInvoker>,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    /// Generation of the newest refresh requested.
    latest_refresh: Arc<AtomicU64>,
    next_id: AtomicU64,
    runs: RunTable,
}

impl Dispatcher {
    pub fn new(
        builder: ChangeSetBuilder,
        loader: ContentLoader,
        invoker: Arc<AgentInvoker>,
    ) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("relay-worker")
            .enable_all()
            .build()?;
        let (tx, rx) = mpsc::channel();
        Ok(Self {
            runtime,
            builder,
            loader,
            invoker,
            tx,
            rx,
            latest_refresh: Arc::new(AtomicU64::new(0)),
            next_id: AtomicU64::new(1),
            runs: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Workers wired from a loaded `relay.toml`.
    pub fn from_config(config: &RelayConfig, store: Arc<SessionStore>) -> crate::Result<Self> {
        let invoker = AgentInvoker::from_config(&config.agent, store);
        let dispatcher = Self::new(
            ChangeSetBuilder::from_config(&config.status),
            ContentLoader::from_config(&config.content),
            Arc::new(invoker),
        )?;
        Ok(dispatcher)
    }

    fn next_request(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Rebuild the change set. Any older refresh still in flight is dropped
    /// when it lands.
    pub fn refresh(&self, repo_root: PathBuf) -> u64 {
        let generation = self.latest_refresh.fetch_add(1, Ordering::SeqCst) + 1;
        let builder = self.builder.clone();
        let latest = Arc::clone(&self.latest_refresh);
        let tx = self.tx.clone();

        self.runtime.spawn(async move {
            let result = builder.build(&repo_root).await.map(Arc::new);
            if latest.load(Ordering::SeqCst) != generation {
                debug!(generation, "dropping superseded refresh");
                return;
            }
            let _ = tx.send(Completion::Refreshed { generation, result });
        });
        generation
    }

    /// Load the selected paths in the given order. A path missing from
    /// `change_set` comes back as a failed file.
    pub fn load(&self, change_set: Arc<ChangeSet>, selection: Vec<RepoPath>) -> RequestId {
        let id = self.next_request();
        let loader = self.loader.clone();
        let tx = self.tx.clone();

        self.runtime.spawn(async move {
            let bundle = ContextBundle::load_paths(&change_set, &selection, &loader).await;
            let _ = tx.send(Completion::Loaded { id, bundle });
        });
        id
    }

    pub fn invoke(&self, invocation: AgentInvocation) -> RequestId {
        let id = self.next_request();
        let signal = CancelSignal::new();
        lock(&self.runs).insert(id, RunState::Queued(signal.clone()));

        let invoker = Arc::clone(&self.invoker);
        let runs = Arc::clone(&self.runs);
        let tx = self.tx.clone();

        self.runtime.spawn(async move {
            let result = run_tracked(id, &invoker, invocation, signal, &runs).await;
            lock(&runs).remove(&id);
            let _ = tx.send(Completion::Agent { id, result });
        });
        id
    }

    /// Stop an agent run, queued or running. Returns false if `id` is not a
    /// live agent request.
    pub fn cancel(&self, id: RequestId) -> bool {
        let runs = lock(&self.runs);
        match runs.get(&id) {
            Some(RunState::Running(handle)) => {
                handle.request_cancel();
                true
            }
            Some(RunState::Queued(signal)) => {
                signal.cancel();
                true
            }
            None => false,
        }
    }

    pub fn chat(&self, client: Arc<dyn ChatCompletion>, request: ChatRequest) -> RequestId {
        let id = self.next_request();
        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            let result = match tokio::task::spawn_blocking(move || client.complete(&request)).await {
                Ok(result) => result,
                Err(e) => Err(ServiceError::classify(e.to_string())),
            };
            let _ = tx.send(Completion::Chat { id, result });
        });
        id
    }

    /// Everything that has finished so far, without blocking.
    pub fn poll(&self) -> Vec<Completion> {
        let mut done = Vec::new();
        while let Ok(completion) = self.rx.try_recv() {
            if self.is_current(&completion) {
                done.push(completion);
            }
        }
        done
    }

    /// Block up to `timeout` for the next completion.
    pub fn wait(&self, timeout: Duration) -> Option<Completion> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(completion) if self.is_current(&completion) => return Some(completion),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// A refresh can be overtaken after it was queued but before it is read.
    fn is_current(&self, completion: &Completion) -> bool {
        match completion {
            Completion::Refreshed { generation, .. } => {
                *generation == self.latest_refresh.load(Ordering::SeqCst)
            }
            _ => true,
        }
    }
}

async fn run_tracked(
    id: RequestId,
    invoker: &AgentInvoker,
    invocation: AgentInvocation,
    signal: CancelSignal,
    runs: &RunTable,
) -> Result<AgentResult, AgentError> {
    let running = invoker.spawn_cancellable(invocation, signal.clone()).await?;
    {
        let mut table = lock(runs);
        let handle = running.cancel_handle();
        // Cancelled between launch and registration.
        if signal.is_cancelled() {
            handle.request_cancel();
        }
        table.insert(id, RunState::Running(handle));
    }
    running.wait().await
}
