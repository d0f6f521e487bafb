//! Minimal state container applied on both sides of the link.
//!
//! A [`Store`] owns one piece of state and a [`Reducer`]. Local dispatches go
//! through the store's [`Link`] (if any) before reaching the reducer; inbound
//! messages are applied directly. Listeners run after the state lock is
//! released, so they may dispatch again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::envelope::Envelope;
use crate::link::Link;
use crate::message::Message;

/// Applies an envelope to the state.
///
/// The reducer may take ownership of handles with
/// [`Envelope::take_transfer_set`]. Handles of an envelope that crossed the
/// boundary are already gone when the local reducer sees it.
pub trait Reducer<S>: Send + Sync {
    fn reduce(&self, state: &mut S, envelope: &mut Envelope);
}

impl<S, F> Reducer<S> for F
where
    F: Fn(&mut S, &mut Envelope) + Send + Sync,
{
    fn reduce(&self, state: &mut S, envelope: &mut Envelope) {
        self(state, envelope)
    }
}

/// Called with every message after it has been reduced.
pub type Listener = Arc<dyn Fn(&Message) + Send + Sync>;

struct StoreInner<S> {
    state: Mutex<S>,
    reducer: Box<dyn Reducer<S>>,
    link: Option<Arc<Link>>,
    listeners: Mutex<Vec<Listener>>,
}

/// Cloneable handle to a shared state container.
pub struct Store<S> {
    inner: Arc<StoreInner<S>>,
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Send + 'static> Store<S> {
    /// A store with no link: everything stays local.
    pub fn new<R>(reducer: R, initial: S) -> Self
    where
        R: Reducer<S> + 'static,
    {
        Self::build(reducer, initial, None)
    }

    /// A store whose local dispatches are routed through `link`.
    pub fn with_link<R>(reducer: R, initial: S, link: Arc<Link>) -> Self
    where
        R: Reducer<S> + 'static,
    {
        Self::build(reducer, initial, Some(link))
    }

    fn build<R>(reducer: R, initial: S, link: Option<Arc<Link>>) -> Self
    where
        R: Reducer<S> + 'static,
    {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(initial),
                reducer: Box::new(reducer),
                link,
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Dispatch a locally produced envelope.
    pub fn dispatch(&self, envelope: impl Into<Envelope>) {
        let envelope = envelope.into();
        let envelope = match &self.inner.link {
            Some(link) => link.route(envelope),
            None => envelope,
        };
        self.apply(envelope);
    }

    /// Apply an envelope received from the other context. Never re-routed.
    pub fn apply_inbound(&self, envelope: Envelope) {
        self.apply(envelope);
    }

    fn apply(&self, mut envelope: Envelope) {
        {
            let mut state = self.lock_state();
            self.inner.reducer.reduce(&mut state, &mut envelope);
        }
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(envelope.message());
        }
    }

    /// Register a listener called after every reduced message.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Run `f` with a shared view of the state.
    pub fn with_state<T>(&self, f: impl FnOnce(&S) -> T) -> T {
        f(&self.lock_state())
    }

    pub fn link(&self) -> Option<&Arc<Link>> {
        self.inner.link.as_ref()
    }

    fn lock_state(&self) -> MutexGuard<'_, S> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: Clone + Send + 'static> Store<S> {
    /// A snapshot of the current state.
    pub fn state(&self) -> S {
        self.lock_state().clone()
    }
}
