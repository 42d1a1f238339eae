//! Common test infrastructure.
//!
//! [`RecordingEngine`] stands in for libmdbx. It hands out numbered native
//! handles, records every call it receives, and can be told to fail the
//! next call of a given kind. [`SingleWriterEngine`] models an engine whose
//! top-level transactions serialize on one writer lock.
#![allow(missing_docs, dead_code)]
use parking_lot::{Condvar, Mutex};
use signet_docenv::{
    Engine, EngineError, EngineResult, EnvConfig, Environment, EnvironmentFlags,
};
use std::{path::Path, sync::Arc, time::Duration};

/// A call received by the engine. Transactions are identified by their
/// native handle number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open { flags: EnvironmentFlags, config: EnvConfig },
    Close,
    Begin { txn: u64, parent: Option<u64> },
    Commit(u64),
    Abort(u64),
}

#[derive(Debug)]
pub struct RecEnv(u64);

#[derive(Debug)]
pub struct RecTxn(pub u64);

#[derive(Debug, Default)]
struct State {
    events: Vec<Event>,
    next_handle: u64,
    fail_open: Option<EngineError>,
    fail_begin: Option<EngineError>,
    fail_commit: Option<EngineError>,
    fail_abort: Option<EngineError>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingEngine {
    state: Arc<Mutex<State>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// An environment on this engine, not yet opened.
    pub fn environment(&self) -> Environment<Self> {
        Environment::with_engine("/recorded", self.clone())
    }

    /// An opened environment on this engine.
    pub fn opened(&self) -> Environment<Self> {
        let env = self.environment();
        env.open().unwrap();
        env
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    /// Transaction events only.
    pub fn txn_events(&self) -> Vec<Event> {
        self.events().into_iter().filter(|e| !matches!(e, Event::Open { .. } | Event::Close)).collect()
    }

    pub fn clear(&self) {
        self.state.lock().events.clear();
    }

    pub fn fail_next_open(&self, err: EngineError) {
        self.state.lock().fail_open = Some(err);
    }

    pub fn fail_next_begin(&self, err: EngineError) {
        self.state.lock().fail_begin = Some(err);
    }

    pub fn fail_next_commit(&self, err: EngineError) {
        self.state.lock().fail_commit = Some(err);
    }

    pub fn fail_next_abort(&self, err: EngineError) {
        self.state.lock().fail_abort = Some(err);
    }

    fn handle(state: &mut State) -> u64 {
        state.next_handle += 1;
        state.next_handle
    }
}

impl Engine for RecordingEngine {
    type Env = RecEnv;
    type Txn = RecTxn;

    fn open(&self, _: &Path, flags: EnvironmentFlags, config: &EnvConfig) -> EngineResult<RecEnv> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_open.take() {
            return Err(err);
        }
        state.events.push(Event::Open { flags, config: *config });
        Ok(RecEnv(Self::handle(&mut state)))
    }

    fn close(&self, _: RecEnv) -> EngineResult<()> {
        self.state.lock().events.push(Event::Close);
        Ok(())
    }

    fn begin(&self, _: &RecEnv, parent: Option<&RecTxn>) -> EngineResult<RecTxn> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_begin.take() {
            return Err(err);
        }
        let txn = Self::handle(&mut state);
        state.events.push(Event::Begin { txn, parent: parent.map(|p| p.0) });
        Ok(RecTxn(txn))
    }

    fn commit(&self, txn: RecTxn) -> EngineResult<()> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_commit.take() {
            // A failed commit leaves the engine to abort the transaction.
            state.events.push(Event::Abort(txn.0));
            return Err(err);
        }
        state.events.push(Event::Commit(txn.0));
        Ok(())
    }

    fn abort(&self, txn: RecTxn) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.events.push(Event::Abort(txn.0));
        state.fail_abort.take().map_or(Ok(()), Err)
    }
}

/// The native handle number of `txn`.
pub fn native_id(txn: &signet_docenv::Transaction<RecordingEngine>) -> u64 {
    txn.with_native(|n| n.0).unwrap()
}

#[derive(Debug, Default)]
struct Writer {
    held: bool,
    waiting: usize,
}

/// An engine with one writer lock: a top-level begin blocks, without a
/// timeout, until the current top-level transaction finishes.
#[derive(Debug, Clone, Default)]
pub struct SingleWriterEngine {
    writer: Arc<(Mutex<Writer>, Condvar)>,
}

#[derive(Debug)]
pub struct WriterTxn {
    top_level: bool,
}

impl SingleWriterEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads blocked on the writer lock.
    pub fn waiting(&self) -> usize {
        self.writer.0.lock().waiting
    }

    /// Spins until `n` threads are blocked on the writer lock.
    pub fn wait_for_waiters(&self, n: usize) {
        while self.waiting() < n {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn release(&self, txn: WriterTxn) {
        if txn.top_level {
            let (lock, cvar) = &*self.writer;
            lock.lock().held = false;
            cvar.notify_one();
        }
    }
}

impl Engine for SingleWriterEngine {
    type Env = ();
    type Txn = WriterTxn;

    fn open(&self, _: &Path, _: EnvironmentFlags, _: &EnvConfig) -> EngineResult<()> {
        Ok(())
    }

    fn close(&self, _: ()) -> EngineResult<()> {
        Ok(())
    }

    fn begin(&self, _: &(), parent: Option<&WriterTxn>) -> EngineResult<WriterTxn> {
        if parent.is_some() {
            return Ok(WriterTxn { top_level: false });
        }
        let (lock, cvar) = &*self.writer;
        let mut writer = lock.lock();
        writer.waiting += 1;
        while writer.held {
            cvar.wait(&mut writer);
        }
        writer.waiting -= 1;
        writer.held = true;
        Ok(WriterTxn { top_level: true })
    }

    fn commit(&self, txn: WriterTxn) -> EngineResult<()> {
        self.release(txn);
        Ok(())
    }

    fn abort(&self, txn: WriterTxn) -> EngineResult<()> {
        self.release(txn);
        Ok(())
    }
}
