use std::{
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to cache DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join cache DB thread: {join_err:?}");
            }
        }
    }
}

/// Where the SQLite connection lives.
#[derive(Debug, Clone)]
enum Target {
    File(PathBuf),
    Memory,
}

/// Handle to a SQLite connection owned by a dedicated thread.
///
/// Every statement runs on that thread, so writes are serialized by
/// construction. Cloning the handle shares the same connection.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create cache directory {}", parent.display())
                })?;
            }
        }
        Self::spawn(Target::File(db_path))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::spawn(Target::Memory)
    }

    fn spawn(target: Target) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let target_for_thread = target.clone();

        let worker = thread::Builder::new()
            .name("opsdesk-cache-db".into())
            .spawn(move || {
                let opened = match &target_for_thread {
                    Target::File(path) => Connection::open(path),
                    Target::Memory => Connection::open_in_memory(),
                };
                let mut conn = match opened {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite cache database")));
                        return;
                    }
                };

                if let Target::File(_) = target_for_thread {
                    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                        error!("Failed to enable WAL mode: {err}");
                    }
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run cache migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Cache DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Cache database thread shutting down");
            })
            .with_context(|| "failed to spawn cache database thread")?;

        ready_rx
            .recv()
            .context("cache database thread exited before signaling readiness")??;

        match &target {
            Target::File(path) => info!("Cache database initialized at {}", path.display()),
            Target::Memory => info!("Cache database initialized in memory"),
        }

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Cache DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to cache DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("cache database thread terminated unexpectedly"))?
    }
}
