//! Crash log collaborator.
//!
//! Protocol workers run under panic guards. When one trips, the raw
//! payload is written here and only a crash id leaves the process, so a
//! user report can be matched to the stored detail later.

use std::any::Any;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::id::Xid;

/// One captured crash.
#[derive(Clone, Debug)]
pub struct CrashEntry {
    pub id: Xid,
    pub context: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Sink for captured panics. The hosting process may persist entries;
/// the core only needs the returned crash id.
pub trait CrashLog: Send + Sync {
    fn log(&self, context: &str, detail: &str) -> Xid;
}

/// In-memory crash table.
#[derive(Default)]
pub struct MemoryCrashLog {
    entries: Mutex<Vec<CrashEntry>>,
}

impl MemoryCrashLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<CrashEntry> {
        self.entries.lock().clone()
    }
}

impl CrashLog for MemoryCrashLog {
    fn log(&self, context: &str, detail: &str) -> Xid {
        let id = Xid::new("crsh");
        tracing::error!(crash = %id, context, "worker crashed");
        self.entries.lock().push(CrashEntry {
            id: id.clone(),
            context: context.to_string(),
            detail: detail.to_string(),
            at: Utc::now(),
        });
        id
    }
}

/// Render a panic payload into something printable.
pub fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
