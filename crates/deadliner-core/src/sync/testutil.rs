//! In-memory fake remote snapshot host for engine/service/scheduler tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::Result;
use crate::models::Record;

use super::remote::{PutOutcome, RemoteStore};
use super::{decode_snapshot, encode_snapshot};

#[derive(Default)]
struct FakeState {
    snapshot: Option<(Vec<u8>, String)>,
    version: u64,
    race_on_put: bool,
}

#[derive(Default)]
struct Inner {
    state: Mutex<FakeState>,
    mkcol_calls: AtomicUsize,
    head_calls: AtomicUsize,
    get_calls: AtomicUsize,
    put_calls: AtomicUsize,
    put_gate: Mutex<Option<Arc<Notify>>>,
}

/// ETag-versioned fake remote. Clones share state, so two engines pointed at
/// clones behave like two devices syncing against the same server.
#[derive(Clone, Default)]
pub struct FakeRemote {
    inner: Arc<Inner>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle to the same underlying server state
    pub fn share(&self) -> Self {
        self.clone()
    }

    /// Overwrite the remote snapshot, as if another device pushed
    pub fn set_snapshot(&self, records: &[Record]) {
        let bytes = encode_snapshot(records).unwrap();
        let mut state = self.inner.state.lock().unwrap();
        state.version += 1;
        let etag = etag_for(state.version);
        state.snapshot = Some((bytes, etag));
    }

    /// Decode the current snapshot (empty when none exists)
    pub fn records(&self) -> Vec<Record> {
        let state = self.inner.state.lock().unwrap();
        state
            .snapshot
            .as_ref()
            .map(|(bytes, _)| decode_snapshot(bytes).unwrap())
            .unwrap_or_default()
    }

    pub fn etag(&self) -> Option<String> {
        let state = self.inner.state.lock().unwrap();
        state.snapshot.as_ref().map(|(_, etag)| etag.clone())
    }

    /// Simulate another writer winning between our GET and our PUT
    pub fn trigger_race_on_next_put(&self) {
        self.inner.state.lock().unwrap().race_on_put = true;
    }

    /// Make every PUT wait until the returned handle is notified
    pub fn gate_puts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.inner.put_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn mkcol_calls(&self) -> usize {
        self.inner.mkcol_calls.load(Ordering::SeqCst)
    }

    pub fn head_calls(&self) -> usize {
        self.inner.head_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.inner.get_calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.inner.put_calls.load(Ordering::SeqCst)
    }

    /// Total network calls of any kind
    pub fn network_calls(&self) -> usize {
        self.mkcol_calls() + self.head_calls() + self.get_calls() + self.put_calls()
    }
}

fn etag_for(version: u64) -> String {
    format!("\"v{version}\"")
}

impl RemoteStore for FakeRemote {
    async fn ensure_collection(&self, _path: &str) -> Result<()> {
        self.inner.mkcol_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn head(&self, _path: &str) -> Result<Option<String>> {
        self.inner.head_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.etag())
    }

    async fn get(&self, path: &str) -> Result<(Vec<u8>, Option<String>)> {
        self.inner.get_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.inner.state.lock().unwrap();
        state
            .snapshot
            .as_ref()
            .map(|(bytes, etag)| (bytes.clone(), Some(etag.clone())))
            .ok_or_else(|| crate::Error::NotFound(path.to_string()))
    }

    async fn put(&self, _path: &str, bytes: Vec<u8>, if_match: Option<&str>) -> Result<PutOutcome> {
        let gate = self.inner.put_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.inner.put_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.inner.state.lock().unwrap();

        if state.race_on_put {
            // Another device slips a write in ahead of ours
            state.race_on_put = false;
            state.version += 1;
            let etag = etag_for(state.version);
            let body = state
                .snapshot
                .take()
                .map_or_else(|| b"[]".to_vec(), |(body, _)| body);
            state.snapshot = Some((body, etag));
        }

        let current = state.snapshot.as_ref().map(|(_, etag)| etag.clone());
        let matches = match (current.as_deref(), if_match) {
            (Some(current), Some(expected)) => current == expected,
            (None, None) => true,
            _ => false,
        };
        if !matches {
            return Ok(PutOutcome::LostRace);
        }

        state.version += 1;
        let etag = etag_for(state.version);
        state.snapshot = Some((bytes, etag.clone()));
        Ok(PutOutcome::Committed { etag: Some(etag) })
    }
}
