//! Helpers for testing the cache and its tools.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Fixtures live in `tests/fixtures` at the root of the workspace, use [`fixture`] to resolve
//!    their path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `deltaproxy_service` crate and
///    test code.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("deltaproxy_service=trace,integration=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Returns the absolute path to the given fixture.
///
/// Fixtures are located in the `tests/fixtures` directory at the root of the workspace, and this
/// panics if the fixture does not exist.
pub fn fixture(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();

    let mut full_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    full_path.pop(); // to /crates/
    full_path.pop(); // to /
    full_path.push("./tests/fixtures/");
    full_path.push(path);

    assert!(full_path.exists(), "'{}' does not exist", path.display());

    full_path
}

/// Counts accesses by key, e.g. fetches of an origin by requested range.
///
/// Clones share the same counts, so one clone can be moved into an origin while the test keeps
/// another one to inspect the accesses.
#[derive(Clone, Debug, Default)]
pub struct HitCounter {
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl HitCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an access to `key`.
    pub fn hit(&self, key: impl Into<String>) {
        let mut hits = self.hits.lock().unwrap();
        *hits.entry(key.into()).or_default() += 1;
    }

    /// Returns the total number of accesses, and resets the counter.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Returns the accesses by key, and resets the counter.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_iter().collect()
    }
}

/// All timestamps within `[start, end]` that are multiples of `step`.
pub fn aligned_timestamps(start: i64, end: i64, step: i64) -> impl Iterator<Item = i64> {
    let step = step.max(1);
    let first = start.div_euclid(step) * step;
    let first = if first < start { first + step } else { first };
    (first..=end).step_by(step as usize)
}
