//! Listener registry and dispatch.
//!
//! ## Ownership
//! [`EventBus::register`] keeps only a `Weak` to the caller's `Arc`. Once the
//! caller drops its last strong reference the listener is never invoked
//! again, and its slot is reaped on the next dispatch of that type.
//!
//! [`EventBus::register_once`] is the exception: the bus owns the closure
//! until it fires. An atomic claim guarantees a single invocation even when
//! dispatches race on different actors. The spent slot is removed after the
//! dispatch loop, on the `Async` actor when an executor is attached.
//!
//! ## Failure isolation
//! A panicking listener is caught, logged and counted. Delivery continues
//! with the remaining listeners.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::SystemTime;

use once_cell::sync::Lazy;
use tracing::{debug, error, warn};

use crate::config::EventsConfig;
use crate::events::trace::{EventRecord, EventTrace};
use crate::events::types::{as_any, Event};
use crate::runtime::affinity::{self, Actor};
use crate::runtime::executor::Executor;
use crate::utils::metrics::global_metrics;

/// Receives events of type `E`. Implemented for every `Fn(&E)`.
pub trait Listener<E: Event>: Send + Sync + 'static {
    fn on_event(&self, event: &E);
}

impl<E, F> Listener<E> for F
where
    E: Event,
    F: Fn(&E) + Send + Sync + 'static,
{
    fn on_event(&self, event: &E) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Delivered,
    /// One-shot listener ran and must be removed
    Spent,
    /// Not invoked: already claimed, or the payload type did not match
    Skipped,
    /// Weak listener no longer exists
    Gone,
}

type SlotFn = dyn Fn(&dyn Any, &BusStats) -> Delivery + Send + Sync;

#[derive(Clone)]
struct Slot {
    id: u64,
    once: bool,
    call: Arc<SlotFn>,
}

#[derive(Debug, Default)]
struct BusStats {
    dispatched: AtomicU64,
    delivered: AtomicU64,
    panicked: AtomicU64,
    reaped: AtomicU64,
}

impl BusStats {
    fn dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        global_metrics().event_dispatched();
    }

    fn deliver(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        global_metrics().listener_delivery();
    }

    fn panic(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
        global_metrics().listener_panic();
    }

    fn reap(&self, count: u64) {
        self.reaped.fetch_add(count, Ordering::Relaxed);
        global_metrics().listeners_reaped(count);
    }
}

/// Point-in-time copy of a bus's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStatsSnapshot {
    pub dispatched: u64,
    pub delivered: u64,
    pub panicked: u64,
    pub reaped: u64,
}

struct BusInner {
    slots: RwLock<HashMap<TypeId, Vec<Slot>>>,
    next_id: AtomicU64,
    stats: BusStats,
    trace: Mutex<EventTrace>,
    tick: AtomicU64,
    executor: RwLock<Option<Arc<dyn Executor>>>,
}

impl BusInner {
    fn remove(&self, type_id: TypeId, ids: &HashSet<u64>) -> usize {
        let Ok(mut slots) = self.slots.write() else {
            return 0;
        };
        let Some(list) = slots.get_mut(&type_id) else {
            return 0;
        };
        let before = list.len();
        list.retain(|slot| !ids.contains(&slot.id));
        let removed = before - list.len();
        if list.is_empty() {
            slots.remove(&type_id);
        }
        removed
    }

    fn contains(&self, type_id: TypeId, id: u64) -> bool {
        self.slots
            .read()
            .map(|slots| {
                slots
                    .get(&type_id)
                    .is_some_and(|list| list.iter().any(|slot| slot.id == id))
            })
            .unwrap_or(false)
    }
}

/// Cheap-to-clone handle to a listener registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus keeping up to `trace_capacity` diagnostic records.
    pub fn new(trace_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                slots: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                stats: BusStats::default(),
                trace: Mutex::new(EventTrace::new(trace_capacity)),
                tick: AtomicU64::new(0),
                executor: RwLock::new(None),
            }),
        }
    }

    pub fn from_config(config: &EventsConfig) -> Self {
        Self::new(config.trace_capacity)
    }

    /// Route spent one-shot cleanup through `executor` instead of running it
    /// at the end of the dispatch.
    pub fn set_executor(&self, executor: Arc<dyn Executor>) {
        if let Ok(mut slot) = self.inner.executor.write() {
            *slot = Some(executor);
        }
    }

    /// Current simulation tick, stamped onto trace records.
    pub fn set_tick(&self, tick: u64) {
        self.inner.tick.store(tick, Ordering::Relaxed);
    }

    fn insert(&self, type_id: TypeId, once: bool, call: Arc<SlotFn>) -> Registration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        match self.inner.slots.write() {
            Ok(mut slots) => slots.entry(type_id).or_default().push(Slot { id, once, call }),
            Err(_) => error!(
                error = crate::error::constants::ERR_REGISTRY_LOCK,
                "Listener not registered"
            ),
        }
        Registration {
            bus: Arc::downgrade(&self.inner),
            type_id,
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Subscribe `listener` to events of exactly type `E`, holding it weakly.
    pub fn register<E, L>(&self, listener: &Arc<L>) -> Registration
    where
        E: Event,
        L: Listener<E>,
    {
        let weak: Weak<L> = Arc::downgrade(listener);
        let call = move |event: &dyn Any, stats: &BusStats| -> Delivery {
            let Some(listener) = weak.upgrade() else {
                return Delivery::Gone;
            };
            let Some(event) = event.downcast_ref::<E>() else {
                return Delivery::Skipped;
            };
            stats.deliver();
            listener.on_event(event);
            Delivery::Delivered
        };
        self.insert(TypeId::of::<E>(), false, Arc::new(call))
    }

    /// Subscribe a listener that runs at most once.
    pub fn register_once<E, F>(&self, listener: F) -> Registration
    where
        E: Event,
        F: FnOnce(&E) + Send + 'static,
    {
        let fired = AtomicBool::new(false);
        let pending = Mutex::new(Some(listener));
        let call = move |event: &dyn Any, stats: &BusStats| -> Delivery {
            let Some(event) = event.downcast_ref::<E>() else {
                return Delivery::Skipped;
            };
            if fired.swap(true, Ordering::AcqRel) {
                return Delivery::Skipped;
            }
            let listener = pending.lock().ok().and_then(|mut slot| slot.take());
            match listener {
                Some(listener) => {
                    stats.deliver();
                    listener(event);
                    Delivery::Spent
                }
                None => Delivery::Skipped,
            }
        };
        self.insert(TypeId::of::<E>(), true, Arc::new(call))
    }

    /// Deliver `event` to every listener of its exact type. Returns the number
    /// of listeners invoked, including ones that panicked.
    pub fn dispatch<E: Event>(&self, event: E) -> usize {
        let inner = &self.inner;
        let type_id = TypeId::of::<E>();
        inner.stats.dispatch();

        let event = Arc::new(event);
        self.record(event.clone());

        let slots: Vec<Slot> = match inner.slots.read() {
            Ok(slots) => slots.get(&type_id).cloned().unwrap_or_default(),
            Err(_) => {
                error!(
                    error = crate::error::constants::ERR_REGISTRY_LOCK,
                    "Dispatch skipped"
                );
                return 0;
            }
        };

        let mut invoked = 0;
        let mut dead = HashSet::new();
        let mut spent = HashSet::new();

        for slot in &slots {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                (slot.call)(as_any(&*event), &inner.stats)
            }));
            match outcome {
                Ok(Delivery::Delivered) => invoked += 1,
                Ok(Delivery::Skipped) => {}
                Ok(Delivery::Spent) => {
                    invoked += 1;
                    spent.insert(slot.id);
                }
                Ok(Delivery::Gone) => {
                    dead.insert(slot.id);
                }
                Err(_) => {
                    // Only the listener body can unwind, so it was invoked
                    invoked += 1;
                    inner.stats.panic();
                    error!(event = event.name(), listener = slot.id, "Listener panicked");
                    if slot.once {
                        spent.insert(slot.id);
                    }
                }
            }
        }

        if !dead.is_empty() {
            let removed = inner.remove(type_id, &dead);
            inner.stats.reap(removed as u64);
            debug!(event = event.name(), removed, "Reaped dead listeners");
        }
        if !spent.is_empty() {
            self.release_spent(type_id, spent);
        }

        invoked
    }

    fn release_spent(&self, type_id: TypeId, spent: HashSet<u64>) {
        let executor = self
            .inner
            .executor
            .read()
            .ok()
            .and_then(|slot| slot.clone());

        if let Some(executor) = executor {
            let bus = Arc::downgrade(&self.inner);
            let ids = spent.clone();
            let job = Box::new(move || {
                if let Some(bus) = bus.upgrade() {
                    bus.remove(type_id, &ids);
                }
            });
            match executor.post(Actor::Async, job) {
                Ok(()) => return,
                Err(e) => warn!(error = %e, "Could not post listener release, releasing inline"),
            }
        }
        self.inner.remove(type_id, &spent);
    }

    fn record<E: Event>(&self, event: Arc<E>) {
        let Ok(mut trace) = self.inner.trace.lock() else {
            return;
        };
        if trace.is_enabled() {
            trace.push(EventRecord {
                event,
                origin_actor: affinity::current(),
                simulation_tick: self.inner.tick.load(Ordering::Relaxed),
                timestamp: SystemTime::now(),
            });
        }
    }

    /// Number of live-or-not-yet-reaped listeners for `E`.
    pub fn listener_count<E: Event>(&self) -> usize {
        self.inner
            .slots
            .read()
            .map(|slots| slots.get(&TypeId::of::<E>()).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn stats(&self) -> BusStatsSnapshot {
        let stats = &self.inner.stats;
        BusStatsSnapshot {
            dispatched: stats.dispatched.load(Ordering::Relaxed),
            delivered: stats.delivered.load(Ordering::Relaxed),
            panicked: stats.panicked.load(Ordering::Relaxed),
            reaped: stats.reaped.load(Ordering::Relaxed),
        }
    }

    pub fn trace(&self) -> Vec<EventRecord> {
        self.inner
            .trace
            .lock()
            .map(|trace| trace.snapshot())
            .unwrap_or_default()
    }

    pub fn clear_trace(&self) {
        if let Ok(mut trace) = self.inner.trace.lock() {
            trace.clear();
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Handle returned by registration. Unregistering is idempotent.
#[derive(Debug)]
pub struct Registration {
    bus: Weak<BusInner>,
    type_id: TypeId,
    id: u64,
    active: AtomicBool,
}

impl Registration {
    /// Remove the listener. Returns false if it was already unregistered.
    pub fn unregister(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.type_id, &HashSet::from([self.id]));
        }
        true
    }

    /// Whether the bus still holds this listener's slot.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
            && self
                .bus
                .upgrade()
                .is_some_and(|bus| bus.contains(self.type_id, self.id))
    }
}

static GLOBAL_BUS: Lazy<EventBus> = Lazy::new(|| EventBus::new(256));

/// Process-wide bus.
pub fn global() -> &'static EventBus {
    &GLOBAL_BUS
}
