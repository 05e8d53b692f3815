//! Background polling of an upload folder while a user adds files to it.
//!
//! The monitor is `Stopped` until [`UploadMonitor::start`], and goes back to
//! `Stopped` on [`UploadMonitor::stop`], when dropped, or when the session
//! token it was started with is cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{FileOwner, OwnerRef};
use crate::error::LabFilesError;
use crate::staging::{StagedFile, StagingArea};

/// Extra time granted to a worker, beyond one interval, to exit on stop.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Cancellation signal shared with the session that opened the monitor.
#[derive(Debug, Clone, Default)]
pub struct SessionToken(Arc<AtomicBool>);

impl SessionToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorState {
    Stopped,
    Running,
}

struct Worker {
    folder: Utf8PathBuf,
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct UploadMonitor {
    staging: StagingArea,
    interval: Duration,
    worker: Option<Worker>,
}

impl UploadMonitor {
    pub fn new(staging: StagingArea, interval: Duration) -> Self {
        Self {
            staging,
            interval,
            worker: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts polling the upload folder of `owner`, replacing any running worker.
    ///
    /// `on_update` receives the full listing on the first poll and afterwards
    /// only when it changed.
    pub fn start<F>(
        &mut self,
        owner: &(impl FileOwner + ?Sized),
        session: SessionToken,
        on_update: F,
    ) -> Result<(), LabFilesError>
    where
        F: FnMut(&[StagedFile]) + Send + 'static,
    {
        self.stop();

        let folder = self.staging.folder(owner);
        let (stop, stop_rx) = mpsc::channel::<()>();
        let interval = self.interval;
        let staging = self.staging.clone();
        let owner = owner.owner_ref();
        let handle = thread::Builder::new()
            .name("kira-lf-upload-monitor".to_string())
            .spawn(move || poll(staging, owner, interval, session, stop_rx, on_update))
            .map_err(|err| LabFilesError::Filesystem(format!("spawn upload monitor: {err}")))?;

        debug!("start checking files in upload folder {folder}");
        self.worker = Some(Worker {
            folder,
            stop,
            handle,
        });
        Ok(())
    }

    /// Stops the worker and waits for it to exit. Safe to call when stopped.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        // A send error only means the worker already exited.
        let _ = worker.stop.send(());
        drop(worker.stop);

        let deadline = Instant::now() + self.interval + STOP_GRACE;
        while !worker.handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if worker.handle.is_finished() {
            if worker.handle.join().is_err() {
                warn!("upload monitor for {} panicked", worker.folder);
            }
        } else {
            warn!(
                "upload monitor for {} did not stop in time, detaching",
                worker.folder
            );
        }
    }

    pub fn state(&self) -> MonitorState {
        match &self.worker {
            Some(worker) if !worker.handle.is_finished() => MonitorState::Running,
            _ => MonitorState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == MonitorState::Running
    }
}

impl Drop for UploadMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll<F>(
    staging: StagingArea,
    owner: OwnerRef,
    interval: Duration,
    session: SessionToken,
    stop: mpsc::Receiver<()>,
    mut on_update: F,
) where
    F: FnMut(&[StagedFile]),
{
    let folder = staging.folder(&owner);
    let mut previous: Option<Vec<StagedFile>> = None;
    loop {
        if session.is_cancelled() {
            debug!("session closed, stop checking files in upload folder {folder}");
            return;
        }
        match staging.files(&owner) {
            Ok(files) => {
                if previous.as_ref() != Some(&files) {
                    on_update(&files);
                    previous = Some(files);
                }
            }
            Err(err) => warn!("could not list upload folder {folder}: {err}"),
        }
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                debug!("stop checking files in upload folder {folder}");
                return;
            }
        }
    }
}
