//! One-time guarded initialization.
//!
//! A [`GuardedInitializer`] runs its setup exactly once, no matter how many
//! callers race for first access. Every caller, before or after setup
//! finishes, receives a reference to the same value.
//!
//! Rather than a process-wide static, the initializer is an ordinary value:
//! build one, share it by reference or `Arc`, and hand it to whoever needs
//! the setting. Tests can construct as many as they like.

pub mod server;

use log::{debug, warn};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

pub use server::{ServerConfig, ServerDefaults};

/// Runs a setup function at most once and shares its result.
///
/// Callers that arrive while setup is running block until it finishes. After
/// that, access costs a single atomic load.
///
/// If the factory panics, nothing is stored and the next caller runs it
/// again. Factories that can fail should go through
/// [`get_or_init_with_fallback`](Self::get_or_init_with_fallback), which
/// never leaves the initializer empty.
pub struct GuardedInitializer<T> {
    /// The produced value, set once
    cell: OnceCell<T>,

    /// Number of times a factory body has run
    runs: AtomicUsize,

    /// Name of this initializer for diagnostics
    name: Option<String>,
}

impl<T> GuardedInitializer<T> {
    /// Create an empty initializer
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            runs: AtomicUsize::new(0),
            name: None,
        }
    }

    /// Create an empty initializer with a name for diagnostics
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            cell: OnceCell::new(),
            runs: AtomicUsize::new(0),
            name: Some(name.into()),
        }
    }

    /// Return the value, running `factory` first if nobody has yet.
    pub fn get_or_init<F>(&self, factory: F) -> &T
    where
        F: FnOnce() -> T,
    {
        self.cell.get_or_init(|| {
            self.runs.fetch_add(1, Ordering::SeqCst);
            debug!("Running initializer: {}", self.label());
            factory()
        })
    }

    /// Return the value, running `factory` first if nobody has yet, and
    /// storing `fallback`'s value if the factory fails.
    ///
    /// The failure is cached: once a fallback is stored, later calls return
    /// it without retrying the factory. The call itself never fails; the
    /// substitution is logged as a warning.
    pub fn get_or_init_with_fallback<F, E, D>(&self, factory: F, fallback: D) -> &T
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
        D: FnOnce(&E) -> T,
    {
        self.get_or_init(|| match factory() {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "Initializer {} failed, using fallback: {}",
                    self.label(),
                    e
                );
                fallback(&e)
            }
        })
    }

    /// Get the value if setup has completed
    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    /// Whether setup has completed
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Number of times a factory body has started (0 or 1 unless a factory
    /// panicked)
    pub fn init_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Get the name of this initializer
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Consume the initializer and return the value, if any
    pub fn into_inner(self) -> Option<T> {
        self.cell.into_inner()
    }

    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}

impl<T> Default for GuardedInitializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for GuardedInitializer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedInitializer")
            .field("name", &self.name)
            .field("value", &self.cell.get())
            .field("runs", &self.init_count())
            .finish()
    }
}
