//! Process-wide default instances.
//!
//! Applications usually want one engine per value type shared across the
//! whole process, plus one metrics recorder. This module owns those
//! defaults and the teardown hooks for them (logout, test cleanup).
//! Code that needs isolation constructs its own [`Coalescer`] instead.
//!
//! # Example
//!
//! ```ignore
//! use sluice::global;
//!
//! let members = global::coalescer::<Arc<Members>, ApiError>();
//! // ... later, on logout:
//! global::reset();
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::info;

use crate::coalesce::Coalescer;
use crate::metrics::MetricsRecorder;

/// Anything that can drop its cached state by key prefix.
pub trait Invalidate: Send + Sync {
    /// Clear entries and cancel calls whose key starts with `prefix`, or
    /// everything when `prefix` is `None`.
    fn invalidate(&self, prefix: Option<&str>);
}

impl<V, E> Invalidate for Coalescer<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    fn invalidate(&self, prefix: Option<&str>) {
        Coalescer::invalidate(self, prefix);
    }
}

struct Registered {
    engine: Box<dyn Any + Send + Sync>,
    invalidator: Arc<dyn Invalidate>,
}

static REGISTRY: OnceLock<Mutex<HashMap<TypeId, Registered>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<TypeId, Registered>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// The shared engine for values `V` and producer errors `E`.
///
/// Created empty on first use. All engines returned here record into
/// [`metrics`].
pub fn coalescer<V, E>() -> Coalescer<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    let type_id = TypeId::of::<Coalescer<V, E>>();
    let mut engines = registry().lock();

    let existing = engines
        .get(&type_id)
        .and_then(|registered| registered.engine.downcast_ref::<Coalescer<V, E>>())
        .cloned();
    if let Some(engine) = existing {
        return engine;
    }

    let engine = Coalescer::<V, E>::new();
    engines.insert(
        type_id,
        Registered {
            engine: Box::new(engine.clone()),
            invalidator: Arc::new(engine.clone()),
        },
    );
    engine
}

/// The shared metrics recorder.
pub fn metrics() -> Arc<MetricsRecorder> {
    MetricsRecorder::global()
}

/// Invalidate every default engine created so far.
pub fn invalidate_all(prefix: Option<&str>) {
    let invalidators: Vec<Arc<dyn Invalidate>> = registry()
        .lock()
        .values()
        .map(|registered| Arc::clone(&registered.invalidator))
        .collect();

    for invalidator in &invalidators {
        invalidator.invalidate(prefix);
    }
}

/// Return all defaults to their initial empty state.
///
/// Cancels every in-flight call, clears every cache and the shared metrics.
/// Engines already handed out stay valid and are simply empty afterwards.
pub fn reset() {
    invalidate_all(None);
    metrics().clear();
    info!("Default instances reset");
}
