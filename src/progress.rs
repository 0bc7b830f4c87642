//! Progress reporting for long-running key operations.
//!
//! Pre-param generation runs once per share and can take a while, so
//! keygen and reshare report `{count, running}` after each step and once
//! more when the final protocol round begins.

use std::sync::Arc;

use serde::Serialize;

/// A progress milestone: `running` out of `count` steps.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Progress {
    pub count: usize,
    pub running: usize,
}

/// Cloneable progress callback. The default sink discards milestones.
#[derive(Clone, Default)]
pub struct ProgressSink(Option<Arc<dyn Fn(Progress) + Send + Sync>>);

impl ProgressSink {
    pub fn new<F: Fn(Progress) + Send + Sync + 'static>(f: F) -> Self {
        Self(Some(Arc::new(f)))
    }

    /// A sink that drops everything.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn emit(&self, count: usize, running: usize) {
        if let Some(f) = &self.0 {
            f(Progress { count, running });
        }
    }
}
