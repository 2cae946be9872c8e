//! Processus d'extraction supervisé
//!
//! Un [`ExtractionProcess`] possède un processus enfant dont la sortie
//! standard est relayée au client. Une tâche superviseur unique attend soit
//! la fin naturelle du processus, soit l'annulation (déconnexion du client,
//! blocage de la sortie), tue et récupère l'enfant, puis rend la place du
//! gouverneur.
//!
//! Sous unix l'enfant dirige son propre groupe de processus : l'annulation
//! tue aussi les processus qu'il a lancés (runtime JS, ffmpeg).

use crate::error::StreamError;
use crate::governor::ProcessSlot;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::watch;
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

const CHUNK_SIZE: usize = 64 * 1024;

/// Fin d'un processus d'extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub success: bool,
    /// Vrai si le processus a été tué par annulation
    pub cancelled: bool,
}

/// Processus d'extraction en cours
pub struct ExtractionProcess {
    id: String,
    stdout: ChildStdout,
    exit: watch::Receiver<Option<ProcessExit>>,
    cancel: CancellationToken,
    guard: DropGuard,
    stall_timeout: Option<Duration>,
}

impl ExtractionProcess {
    /// Lance `cmd` en capturant sa sortie standard
    ///
    /// La place `slot` est rendue par le superviseur à la fin du processus ;
    /// si le lancement échoue elle est rendue immédiatement.
    pub fn spawn(id: &str, mut cmd: Command, slot: ProcessSlot) -> Result<Self, StreamError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(StreamError::ProcessSpawn)?;
        let stdout = child.stdout.take().ok_or_else(|| {
            StreamError::ProcessSpawn(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stdout not captured",
            ))
        })?;

        info!(id = %id, pid = ?child.id(), "Extraction process started");

        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        tokio::spawn(supervise(id.to_string(), child, slot, cancel.clone(), tx));

        Ok(Self {
            id: id.to_string(),
            stdout,
            exit: rx,
            guard: cancel.clone().drop_guard(),
            cancel,
            stall_timeout: None,
        })
    }

    /// Coupe le flux (et tue le processus) si aucun octet n'arrive pendant `timeout`
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = Some(timeout);
        self
    }

    /// Observe la fin du processus
    pub fn exit_watch(&self) -> watch::Receiver<Option<ProcessExit>> {
        self.exit.clone()
    }

    /// Jeton d'annulation partagé avec le superviseur
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Demande l'arrêt du processus
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Flux des octets produits sur stdout
    ///
    /// Abandonner le flux (client déconnecté) annule le processus. Une sortie
    /// en erreur termine le flux par une erreur, ce qui tronque le transfert.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let Self {
            id,
            stdout,
            mut exit,
            guard,
            stall_timeout,
            ..
        } = self;

        async_stream::stream! {
            let _guard = guard;
            let mut reader = ReaderStream::with_capacity(stdout, CHUNK_SIZE);
            let mut sent: u64 = 0;

            loop {
                let next = match stall_timeout {
                    Some(limit) => match tokio::time::timeout(limit, reader.next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            warn!(id = %id, "Extraction stalled for {:?}, killing", limit);
                            yield Err(io::Error::new(io::ErrorKind::TimedOut, "extraction stalled"));
                            return;
                        }
                    },
                    None => reader.next().await,
                };

                match next {
                    Some(Ok(chunk)) => {
                        sent += chunk.len() as u64;
                        yield Ok(chunk);
                    }
                    Some(Err(e)) => {
                        yield Err(e);
                        return;
                    }
                    None => break,
                }
            }

            // stdout fermé : le processus doit encore sortir dans le délai
            let exited = async {
                exit.wait_for(Option::is_some)
                    .await
                    .map(|e| (*e).clone())
                    .ok()
                    .flatten()
            };
            let status = match stall_timeout {
                Some(limit) => tokio::time::timeout(limit, exited).await.unwrap_or_else(|_| {
                    warn!(id = %id, "Extraction closed stdout but kept running, killing");
                    None
                }),
                None => exited.await,
            };

            match status {
                Some(ProcessExit { success: true, .. }) => {
                    debug!(id = %id, bytes = sent, "Extraction finished");
                }
                other => {
                    warn!(id = %id, bytes = sent, exit = ?other, "Extraction failed, truncating stream");
                    yield Err(io::Error::other(format!("extraction failed: {:?}", other)));
                }
            }
        }
    }
}

async fn supervise(
    id: String,
    mut child: Child,
    mut slot: ProcessSlot,
    cancel: CancellationToken,
    tx: watch::Sender<Option<ProcessExit>>,
) {
    let exit = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => ProcessExit {
                code: status.code(),
                success: status.success(),
                cancelled: false,
            },
            Err(e) => {
                warn!(id = %id, "Cannot wait for extraction process: {}", e);
                ProcessExit { code: None, success: false, cancelled: false }
            }
        },
        _ = cancel.cancelled() => {
            if let Err(e) = kill_process_tree(&mut child) {
                warn!(id = %id, "Cannot kill extraction process: {}", e);
            }
            let code = child.wait().await.ok().and_then(|s| s.code());
            info!(id = %id, "Extraction process killed");
            ProcessExit { code, success: false, cancelled: true }
        }
    };

    slot.release();
    debug!(id = %id, exit = ?exit, "Extraction slot released");
    tx.send_replace(Some(exit));
}

/// Tue l'enfant et tout son groupe de processus
#[cfg(unix)]
fn kill_process_tree(child: &mut Child) -> io::Result<()> {
    if let Some(pid) = child.id() {
        // SAFETY: killpg n'accède à aucune mémoire ; le pid n'est pas encore récupéré
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    child.start_kill()
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}
