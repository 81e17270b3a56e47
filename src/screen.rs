//! Screen-controller lifecycle.
//!
//! A [`Screen`] is what a resource view holds while it is mounted: the
//! controls it offers, the latest fetched state,
//! and, for department-scoped screens, a room subscription whose change hints
//! trigger a re-fetch. Dropping the screen unmounts it; fetches still in
//! flight at that point are ignored when they land.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::watch;

use crate::error::ApiError;
use crate::notifier::events::{Inbound, STRUCTURE_CHANGED, TABLE_UPDATED};
use crate::notifier::listeners::ListenerId;
use crate::notifier::Notifier;
use crate::policy::{self, Action, Resource};
use crate::session::SessionStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum View<T> {
    Loading,
    Ready(T),
    /// Shown with a retry control; see [`Screen::refresh`].
    Failed(String),
}

type FetchFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync>;

struct Inner<T> {
    mounted: AtomicBool,
    next_generation: AtomicU64,
    applied_generation: Mutex<u64>,
    fetches: AtomicUsize,
    view: watch::Sender<View<T>>,
    fetch: FetchFn<T>,
}

impl<T: Send + Sync + 'static> Inner<T> {
    fn spawn_fetch(self: &Arc<Self>) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let result = (inner.fetch)().await;
            inner.apply(generation, result);
        });
    }

    fn apply(&self, generation: u64, result: Result<T, ApiError>) {
        if !self.mounted.load(Ordering::SeqCst) {
            tracing::debug!(generation, "fetch landed after unmount, ignored");
            return;
        }

        let mut applied = self
            .applied_generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if generation < *applied {
            return;
        }
        *applied = generation;

        let view = match result {
            Ok(value) => View::Ready(value),
            Err(e) => {
                tracing::warn!("screen fetch failed: {}", e);
                View::Failed(e.to_string())
            }
        };
        self.view.send_replace(view);
    }
}

struct RoomBinding {
    notifier: Notifier,
    department_id: String,
    listeners: Vec<(&'static str, ListenerId)>,
}

pub struct Screen<T> {
    inner: Arc<Inner<T>>,
    resource: Resource,
    offered: Vec<Action>,
    session: watch::Receiver<SessionStatus>,
    binding: Option<RoomBinding>,
}

impl<T: Clone + Send + Sync + 'static> Screen<T> {
    /// Mounts a screen for `resource`.
    ///
    /// Starts the initial fetch, and when the resource is department-scoped
    /// and a notifier is given, joins the department room and re-fetches on
    /// every change hint that did not originate from the signed-in identity.
    pub fn mount<F, Fut>(
        session: watch::Receiver<SessionStatus>,
        notifier: Option<&Notifier>,
        resource: Resource,
        offered: &[Action],
        fetch: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let (view, _) = watch::channel(View::Loading);
        let inner = Arc::new(Inner {
            mounted: AtomicBool::new(true),
            next_generation: AtomicU64::new(0),
            applied_generation: Mutex::new(0),
            fetches: AtomicUsize::new(0),
            view,
            fetch: Arc::new(move || fetch().boxed()),
        });

        inner.spawn_fetch();

        let binding = match (notifier, resource.department_scope.clone()) {
            (Some(notifier), Some(department_id)) => {
                Some(bind_room(notifier, &inner, department_id, session.clone()))
            }
            _ => None,
        };

        Self {
            inner,
            resource,
            offered: offered.to_vec(),
            session,
            binding,
        }
    }

    pub fn view(&self) -> View<T> {
        self.inner.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<View<T>> {
        self.inner.view.subscribe()
    }
}

impl<T: Send + Sync + 'static> Screen<T> {
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Whether the control for `action` is shown, evaluated against the
    /// identity signed in right now. Actions the screen did not offer at
    /// mount are never allowed.
    pub fn allows(&self, action: Action) -> bool {
        if !self.offered.contains(&action) {
            return false;
        }
        let status = self.session.borrow();
        policy::can(status.identity(), &self.resource, action)
    }

    /// User-triggered re-fetch.
    pub fn refresh(&self) {
        if self.is_mounted() {
            self.inner.spawn_fetch();
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::SeqCst)
    }

    pub fn unmount(&mut self) {
        self.release();
    }
}

impl<T> Screen<T> {
    fn release(&mut self) {
        self.inner.mounted.store(false, Ordering::SeqCst);

        if let Some(binding) = self.binding.take() {
            for (event, id) in binding.listeners {
                binding.notifier.off(event, id);
            }
            binding.notifier.unsubscribe_room(&binding.department_id);
            tracing::debug!(department = %binding.department_id, "screen unmounted");
        }
    }
}

impl<T> Drop for Screen<T> {
    fn drop(&mut self) {
        self.release();
    }
}

fn bind_room<T: Send + Sync + 'static>(
    notifier: &Notifier,
    inner: &Arc<Inner<T>>,
    department_id: String,
    session: watch::Receiver<SessionStatus>,
) -> RoomBinding {
    notifier.subscribe_room(&department_id);

    let weak: Weak<Inner<T>> = Arc::downgrade(inner);
    let room = department_id.clone();
    let on_change = move |inbound: &Inbound| {
        let Some(change) = inbound.change() else {
            return;
        };
        if change.department_id != room {
            return;
        }
        let own = session.borrow().identity().is_some_and(|me| change.is_from(me));
        if own {
            tracing::debug!(department = %room, "ignoring own change");
            return;
        }
        if let Some(inner) = weak.upgrade() {
            if inner.mounted.load(Ordering::SeqCst) {
                inner.spawn_fetch();
            }
        }
    };
    let handler: crate::notifier::listeners::Handler = Arc::new(on_change);

    let listeners = [TABLE_UPDATED, STRUCTURE_CHANGED]
        .into_iter()
        .map(|event| (event, notifier.on_handler(event, Arc::clone(&handler))))
        .collect();

    RoomBinding {
        notifier: notifier.clone(),
        department_id,
        listeners,
    }
}
