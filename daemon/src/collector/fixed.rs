use super::{ProcessCollector, ProcessSample, SkipReason};
use std::sync::Mutex;

/// Replays a scripted scan. Used where the real `/proc` would make results
/// unpredictable.
#[derive(Default)]
pub struct FixedCollector {
    entries: Mutex<Vec<Result<ProcessSample, SkipReason>>>,
}

impl FixedCollector {
    pub fn new(entries: Vec<Result<ProcessSample, SkipReason>>) -> Self {
        Self { entries: Mutex::new(entries) }
    }

    /// Changes what the next scan returns.
    pub fn set(&self, entries: Vec<Result<ProcessSample, SkipReason>>) {
        *self.entries.lock().unwrap_or_else(|e| e.into_inner()) = entries;
    }
}

impl ProcessCollector for FixedCollector {
    fn scan(&self) -> Box<dyn Iterator<Item = Result<ProcessSample, SkipReason>> + '_> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Box::new(entries.into_iter())
    }
}
