//! Observable value with a subscriber set.
//!
//! DESIGN
//! ======
//! The value and the registration set live under one lock, so a commit and a
//! registration are totally ordered: an observer registered after a commit
//! sees the committed value in its initial delivery, and one registered
//! before it receives the commit notification. Callbacks always run with
//! the lock released, so they may read the value, subscribe, or drop their
//! own or another observer's guard.
//!
//! Every commit takes a sequence number under the lock. Each registration
//! claims the newest sequence handed to it and skips anything older: once a
//! commit has been claimed for an observer, no earlier commit is delivered
//! to it, whether the passes race on different threads or one is started
//! from inside another's callback. Passes on different threads can still
//! run the same callback concurrently, so an observer with its own state
//! must lock it. Dropping a guard clears the registration's active flag,
//! which a pass already in flight checks before every call.
//!
//! Observers are identified by their `Arc` allocation. Subscribing the same
//! `Arc` twice keeps a single registration.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Callback invoked with each committed value.
pub type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registration<T> {
    observer: Observer<T>,
    active: AtomicBool,
    /// Newest commit sequence claimed for delivery.
    delivered: AtomicU64,
}

impl<T> Registration<T> {
    /// Call the observer unless it was unsubscribed or a newer commit has
    /// already been claimed for it.
    fn deliver(&self, seq: u64, value: &T) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        if self.delivered.fetch_max(seq, Ordering::AcqRel) > seq {
            return;
        }
        (self.observer)(value);
    }
}

struct Shared<T> {
    value: T,
    seq: u64,
    registrations: Vec<Arc<Registration<T>>>,
}

fn same_observer<T>(a: &Observer<T>, b: &Observer<T>) -> bool {
    // Compare data pointers only; vtable pointers are not stable across codegen units.
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

pub struct Observable<T> {
    shared: Arc<Mutex<Shared<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T: Clone> Observable<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self { shared: Arc::new(Mutex::new(Shared { value, seq: 0, registrations: Vec::new() })) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared<T>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.lock().value.clone()
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.lock().registrations.len()
    }

    /// Register `observer` and immediately deliver the current value to it.
    ///
    /// The returned guard removes the registration when dropped.
    pub fn subscribe(&self, observer: Observer<T>) -> Subscription<T> {
        let (registration, seq, snapshot) = {
            let mut shared = self.lock();
            let existing = shared
                .registrations
                .iter()
                .find(|r| same_observer(&r.observer, &observer))
                .cloned();
            let registration = existing.unwrap_or_else(|| {
                let registration = Arc::new(Registration {
                    observer,
                    active: AtomicBool::new(true),
                    delivered: AtomicU64::new(0),
                });
                shared.registrations.push(Arc::clone(&registration));
                registration
            });
            (registration, shared.seq, shared.value.clone())
        };
        registration.deliver(seq, &snapshot);
        Subscription { registration: Some(registration), shared: Arc::downgrade(&self.shared) }
    }

    /// Commit a new value and notify every current observer once.
    pub fn replace(&self, value: T) {
        let pass = {
            let mut shared = self.lock();
            shared.value = value;
            shared.commit()
        };
        pass.run();
    }

    /// Mutate the value in place and notify every current observer once.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let (result, pass) = {
            let mut shared = self.lock();
            let result = f(&mut shared.value);
            (result, shared.commit())
        };
        pass.run();
        result
    }

    /// Like [`Self::update`], but only commits and notifies when `f` returns `Some`.
    pub fn try_update<R>(&self, f: impl FnOnce(&mut T) -> Option<R>) -> Option<R> {
        let (result, pass) = {
            let mut shared = self.lock();
            let result = f(&mut shared.value)?;
            (result, shared.commit())
        };
        pass.run();
        Some(result)
    }
}

impl<T: Clone> Shared<T> {
    /// Stamp the current value with the next sequence number.
    fn commit(&mut self) -> Pass<T> {
        self.seq += 1;
        Pass { seq: self.seq, value: self.value.clone(), registrations: self.registrations.clone() }
    }
}

/// One notification pass, run after the lock is released.
struct Pass<T> {
    seq: u64,
    value: T,
    registrations: Vec<Arc<Registration<T>>>,
}

impl<T> Pass<T> {
    fn run(self) {
        for registration in &self.registrations {
            registration.deliver(self.seq, &self.value);
        }
    }
}

// =============================================================================
// SUBSCRIPTION GUARD
// =============================================================================

/// Registration handle. Dropping it unsubscribes.
///
/// Holds only a weak reference to the observable, so a guard that outlives
/// its observable is inert.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription<T> {
    registration: Option<Arc<Registration<T>>>,
    shared: Weak<Mutex<Shared<T>>>,
}

impl<T> Subscription<T> {
    /// Remove the registration now. Equivalent to dropping the guard.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        let Some(registration) = self.registration.take() else {
            return;
        };
        registration.active.store(false, Ordering::Release);
        if let Some(shared) = self.shared.upgrade() {
            let mut shared = shared.lock().unwrap_or_else(PoisonError::into_inner);
            shared.registrations.retain(|r| !Arc::ptr_eq(r, &registration));
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
#[path = "subscription_test.rs"]
mod tests;
