//! Worker process supervision.
//!
//! A small control surface used by the management UI to start, stop, and
//! enumerate worker processes by role and id. It does not participate in
//! scheduling: spawned workers connect to the dispatcher like any other
//! process, and the registry is mirrored into the `processes` table so
//! the UI can read it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{ProcessRecord, Store, StoreError};

/// Roles the supervisor can launch; each maps to a CLI subcommand.
pub const SUPERVISED_ROLES: &[&str] = &["fetcher", "parser", "indexer", "purger"];

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unknown role '{0}'")]
    UnknownRole(String),

    #[error("worker {role}/{worker_id} is already running")]
    AlreadyRunning { role: String, worker_id: String },

    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Spawns and tracks worker processes.
pub struct Supervisor {
    store: Arc<Store>,
    binary: PathBuf,
    children: HashMap<(String, String), Child>,
}

impl Supervisor {
    /// Supervisor that launches the current executable.
    pub fn new(store: Store) -> std::io::Result<Self> {
        let binary = std::env::current_exe()?;
        Ok(Self::with_binary(store, binary))
    }

    /// Supervisor over an explicit worker binary.
    pub fn with_binary(store: Store, binary: PathBuf) -> Self {
        Self {
            store: Arc::new(store),
            binary,
            children: HashMap::new(),
        }
    }

    /// Starts one worker process. Returns its pid.
    pub fn start(&mut self, role: &str, worker_id: &str) -> Result<u32, SupervisorError> {
        if !SUPERVISED_ROLES.contains(&role) {
            return Err(SupervisorError::UnknownRole(role.to_string()));
        }
        let key = (role.to_string(), worker_id.to_string());
        if self.children.contains_key(&key) {
            return Err(SupervisorError::AlreadyRunning {
                role: role.to_string(),
                worker_id: worker_id.to_string(),
            });
        }

        let child = Command::new(&self.binary)
            .arg(role)
            .arg("--id")
            .arg(worker_id)
            .stdin(Stdio::null())
            .spawn()?;
        let pid = child.id();

        self.store.process_register(pid, role, worker_id, Utc::now())?;
        self.children.insert(key, child);
        info!(role, worker_id, pid, "Worker process started");
        Ok(pid)
    }

    /// Stops one worker process with SIGTERM and waits for it to exit.
    ///
    /// Workers spawned by another supervisor instance (a previous CLI
    /// invocation) are found through the store registry and signalled by
    /// pid. Returns false if no such worker is known.
    pub fn stop(&mut self, role: &str, worker_id: &str) -> Result<bool, SupervisorError> {
        let key = (role.to_string(), worker_id.to_string());
        if let Some(mut child) = self.children.remove(&key) {
            let pid = child.id();
            terminate(pid);
            if let Err(e) = child.wait() {
                warn!(role, worker_id, pid, error = %e, "Could not reap worker");
            }
            self.store.process_remove(pid)?;
            info!(role, worker_id, pid, "Worker process stopped");
            return Ok(true);
        }

        let registered = self
            .store
            .process_list()?
            .into_iter()
            .find(|p| p.role == role && p.worker_id == worker_id);
        match registered {
            Some(record) => {
                terminate(record.pid);
                self.store.process_remove(record.pid)?;
                info!(role, worker_id, pid = record.pid, "Worker process signalled");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stops every known worker, tracked or registered.
    pub fn stop_all(&mut self) -> Result<usize, SupervisorError> {
        let mut targets: Vec<(String, String)> = self.children.keys().cloned().collect();
        for record in self.store.process_list()? {
            let key = (record.role, record.worker_id);
            if !targets.contains(&key) {
                targets.push(key);
            }
        }

        let mut stopped = 0;
        for (role, worker_id) in targets {
            if self.stop(&role, &worker_id)? {
                stopped += 1;
            }
        }
        Ok(stopped)
    }

    /// Reaps exited workers and returns the current registry.
    pub fn list(&mut self) -> Result<Vec<ProcessRecord>, SupervisorError> {
        let mut exited = Vec::new();
        for (key, child) in self.children.iter_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    warn!(role = %key.0, worker_id = %key.1, %status, "Worker exited");
                    exited.push((key.clone(), child.id()));
                }
                Ok(None) => {}
                Err(e) => warn!(role = %key.0, error = %e, "Could not poll worker"),
            }
        }
        for (key, pid) in exited {
            self.children.remove(&key);
            self.store.process_remove(pid)?;
        }
        Ok(self.store.process_list()?)
    }
}

/// Delivers SIGTERM so the worker can finish its in-flight assignment.
#[cfg(unix)]
fn terminate(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}
