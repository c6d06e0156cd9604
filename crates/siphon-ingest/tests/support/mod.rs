//! Shared fixtures for the orchestrator integration tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use siphon_core::PropertyKey;
use siphon_ingest::facts::{FactKey, FactRow, Measures};
use siphon_ingest::source::{FetchPage, FetchRequest, MetricsSource, SourceError};

/// How a scripted property should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    Throttled,
    Transient,
    Permanent,
}

/// A scripted failure, optionally deferred past some successful calls.
#[derive(Debug, Clone, Copy)]
struct Script {
    mode: FailMode,
    after_ok_calls: u64,
    seen: u64,
}

/// A deterministic in-memory source for driving the orchestrator.
///
/// Emits a fixed number of rows per (property, day), all on a single page,
/// with the current `clicks` value so tests can simulate corrected data
/// arriving between runs.
pub struct ScriptedSource {
    rows_per_day: usize,
    clicks: AtomicU64,
    calls: AtomicU64,
    failures: Mutex<HashMap<PropertyKey, Script>>,
}

impl ScriptedSource {
    pub fn new(rows_per_day: usize) -> Self {
        Self {
            rows_per_day,
            clicks: AtomicU64::new(1),
            calls: AtomicU64::new(0),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Makes every fetch for `property` fail with the given mode.
    pub fn fail_property(&self, property: PropertyKey, mode: FailMode) {
        self.fail_property_after(property, mode, 0);
    }

    /// Lets `property` succeed `ok_calls` times, then fail with `mode`.
    pub fn fail_property_after(&self, property: PropertyKey, mode: FailMode, ok_calls: u64) {
        self.failures.lock().expect("failures lock").insert(
            property,
            Script {
                mode,
                after_ok_calls: ok_calls,
                seen: 0,
            },
        );
    }

    /// Changes the clicks value emitted by subsequent fetches.
    pub fn set_clicks(&self, clicks: u64) {
        self.clicks.store(clicks, Ordering::SeqCst);
    }

    /// Total fetch calls observed, failures included.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSource for ScriptedSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchPage, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mode = {
            let mut failures = self.failures.lock().expect("failures lock");
            failures.get_mut(&request.property).and_then(|script| {
                script.seen += 1;
                (script.seen > script.after_ok_calls).then_some(script.mode)
            })
        };
        match mode {
            Some(FailMode::Throttled) => return Err(SourceError::Throttled),
            Some(FailMode::Transient) => {
                return Err(SourceError::Transient {
                    message: "scripted transient failure".into(),
                });
            }
            Some(FailMode::Permanent) => {
                return Err(SourceError::Permanent {
                    message: "scripted permanent failure".into(),
                });
            }
            None => {}
        }

        let clicks = self.clicks.load(Ordering::SeqCst);
        let rows = (0..self.rows_per_day)
            .map(|i| FactRow {
                key: FactKey::new(
                    request.date,
                    request.property.clone(),
                    vec![("query".into(), format!("q{i}"))],
                ),
                source: request.source,
                measures: Measures {
                    clicks,
                    impressions: clicks * 10,
                    ctr: 0.1,
                    position: 3.5,
                },
            })
            .collect();
        Ok(FetchPage {
            rows,
            next_page: None,
        })
    }
}
