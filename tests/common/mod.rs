//! Scripted process host shared by the integration tests
//!
//! Each spawn hands the test a [`FakeProcess`] that decides what the
//! "process" writes and how it ends.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alchemist::events::{ProcessEvent, Termination};
use alchemist::host::{CommandSpec, ProcessControl, ProcessHost, SpawnedProcess};
use alchemist::RunnerResult;
use tokio::sync::mpsc;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub struct FakeProcess {
    pub spec: CommandSpec,
    tx: mpsc::UnboundedSender<ProcessEvent>,
    running: AtomicBool,
    ignore_interrupt: bool,
    pub interrupts: AtomicUsize,
    pub kills: AtomicUsize,
}

impl FakeProcess {
    pub fn output(&self, bytes: &[u8]) {
        let _ = self.tx.send(ProcessEvent::Output(bytes.to_vec()));
    }

    pub fn terminate(&self, termination: Termination) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.tx.send(ProcessEvent::Terminated(termination));
    }

    pub fn exit(&self, code: i32) {
        self.terminate(Termination::Exited(code));
    }

    pub fn interrupt_count(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

impl ProcessControl for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn interrupt(&self) -> RunnerResult<()> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        if !self.ignore_interrupt && self.is_running() {
            self.terminate(Termination::Signaled(2));
        }
        Ok(())
    }

    fn force_terminate(&self) -> RunnerResult<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if self.is_running() {
            self.terminate(Termination::Signaled(9));
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn requires_exit_confirmation(&self) -> bool {
        self.spec.confirm_on_exit
    }
}

/// Host whose processes only do what the test tells them
#[derive(Default)]
pub struct FakeHost {
    processes: Mutex<Vec<Arc<FakeProcess>>>,
    ignore_interrupt: bool,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Processes that survive SIGINT and need to be killed
    pub fn stubborn() -> Arc<Self> {
        Arc::new(Self {
            ignore_interrupt: true,
            ..Self::default()
        })
    }

    pub fn process(&self, index: usize) -> Arc<FakeProcess> {
        self.processes.lock().unwrap()[index].clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.processes.lock().unwrap().len()
    }
}

impl ProcessHost for FakeHost {
    fn spawn(&self, spec: &CommandSpec) -> SpawnedProcess {
        let (tx, events) = mpsc::unbounded_channel();
        let process = Arc::new(FakeProcess {
            spec: spec.clone(),
            tx,
            running: AtomicBool::new(true),
            ignore_interrupt: self.ignore_interrupt,
            interrupts: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
        });
        self.processes.lock().unwrap().push(process.clone());

        SpawnedProcess {
            control: process,
            events,
        }
    }
}
