//! The loader chain: an ordered pipeline of request-processing stages.
//!
//! Loaders are registered in a [`LoaderChain`], an arena owned by the pipeline's
//! root object (usually a [`Client`](crate::Client)). The chain records which
//! loader forwards to which, and hands every loader an explicit [`Next`]
//! capability when it is asked to load a request, so loaders never look up
//! their successor themselves.
//!
//! Successor links must stay acyclic. Linking a loader to a successor that
//! already leads back to it is a programming error and panics.
//!
//! Loaders registered in a chain live as long as the chain (or until they are
//! [unregistered](LoaderChain::unregister)); the chain never outlives the
//! client that owns it and any requests still in flight. Slots freed by
//! unregistering are reused, so the registry stays as large as the most
//! loaders registered at once.

use crate::error::{ErrorCode, HttpError};
use crate::response::HttpResult;
use crate::token::RequestToken;
use crate::HttpRequest;
use futures_util::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// One stage of the pipeline.
///
/// A loader may resolve the request itself, forward it (possibly modified, and
/// possibly more than once) through `next`, or wrap the result it gets back.
///
/// # Examples
///
/// ```
/// use futures_util::future::BoxFuture;
/// use loadchain::chain::{Loader, Next};
/// use loadchain::{HttpRequest, HttpResult, RequestToken};
///
/// /// Adds a `User-Agent` header before forwarding.
/// struct UserAgent(&'static str);
///
/// impl Loader for UserAgent {
///     fn load(&self, request: HttpRequest, token: RequestToken, next: Next) -> BoxFuture<'_, HttpResult> {
///         Box::pin(async move {
///             let request = request.with_header("User-Agent", self.0);
///             next.load(request, token).await
///         })
///     }
/// }
/// ```
pub trait Loader: Send + Sync {
    /// Loads `request`, forwarding through `next` when needed.
    fn load(&self, request: HttpRequest, token: RequestToken, next: Next)
        -> BoxFuture<'_, HttpResult>;

    /// Name used in diagnostics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Opaque handle of a loader registered in a [`LoaderChain`].
///
/// Handles of unregistered loaders stay invalid even after their slot is
/// reused by a newer loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderHandle {
    index: usize,
    generation: u32,
}

struct Slot {
    generation: u32,
    loader: Option<Arc<dyn Loader>>,
}

#[derive(Default)]
struct Registry {
    slots: Vec<Slot>,
    // Indices of empty slots, reused before the arena grows.
    free: Vec<usize>,
    next: HashMap<LoaderHandle, LoaderHandle>,
}

impl Registry {
    fn loader(&self, handle: LoaderHandle) -> Option<&Arc<dyn Loader>> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.loader.as_ref())
    }
}

/// Registry of loaders and their successor links.
///
/// Cloning yields another handle to the same registry.
///
/// # Examples
///
/// ```
/// use loadchain::chain::LoaderChain;
/// use loadchain::loaders::{ManualLoader, RetryLoader};
///
/// let chain = LoaderChain::new();
/// let retry = chain.register(RetryLoader::new());
/// let manual = chain.register(ManualLoader::new());
///
/// chain.set_next_loader(retry, Some(manual));
/// assert_eq!(chain.next_loader(retry), Some(manual));
/// assert_eq!(chain.next_loader(manual), None);
/// ```
#[derive(Clone, Default)]
pub struct LoaderChain {
    registry: Arc<Mutex<Registry>>,
}

impl LoaderChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a loader to the chain, unlinked.
    pub fn register(&self, loader: impl Loader + 'static) -> LoaderHandle {
        self.register_shared(Arc::new(loader))
    }

    /// Adds an already shared loader to the chain, unlinked.
    pub fn register_shared(&self, loader: Arc<dyn Loader>) -> LoaderHandle {
        let mut registry = self.lock();
        tracing::debug!(loader = loader.name(), "Registering loader");

        if let Some(index) = registry.free.pop() {
            let slot = &mut registry.slots[index];
            slot.loader = Some(loader);
            return LoaderHandle {
                index,
                generation: slot.generation,
            };
        }

        registry.slots.push(Slot {
            generation: 0,
            loader: Some(loader),
        });
        LoaderHandle {
            index: registry.slots.len() - 1,
            generation: 0,
        }
    }

    /// Removes a loader and every link to or from it.
    ///
    /// Requests already being processed by the loader finish normally.
    pub fn unregister(&self, handle: LoaderHandle) -> Option<Arc<dyn Loader>> {
        let mut registry = self.lock();
        registry.loader(handle)?;

        let slot = &mut registry.slots[handle.index];
        let loader = slot.loader.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        registry.free.push(handle.index);

        registry.next.remove(&handle);
        registry.next.retain(|_, successor| *successor != handle);
        tracing::debug!(loader = loader.name(), "Unregistered loader");
        Some(loader)
    }

    pub fn loader(&self, handle: LoaderHandle) -> Option<Arc<dyn Loader>> {
        self.lock().loader(handle).cloned()
    }

    pub fn contains(&self, handle: LoaderHandle) -> bool {
        self.lock().loader(handle).is_some()
    }

    /// Returns the loader `handle` forwards to.
    pub fn next_loader(&self, handle: LoaderHandle) -> Option<LoaderHandle> {
        self.lock().next.get(&handle).copied()
    }

    /// Sets (or, with `None`, clears) the loader `handle` forwards to.
    ///
    /// # Panics
    ///
    /// Panics if either handle is not registered, or if following the links
    /// from `next` would reach a loader twice (including `handle` itself):
    /// such a chain would never resolve a request.
    pub fn set_next_loader(&self, handle: LoaderHandle, next: Option<LoaderHandle>) {
        let mut registry = self.lock();
        assert!(
            registry.loader(handle).is_some(),
            "loader handle {:?} is not registered",
            handle
        );

        let Some(next) = next else {
            registry.next.remove(&handle);
            return;
        };
        assert!(
            registry.loader(next).is_some(),
            "loader handle {:?} is not registered",
            next
        );

        let mut seen = HashSet::from([handle]);
        let mut current = Some(next);
        while let Some(node) = current {
            if !seen.insert(node) {
                drop(registry);
                panic!("Cycle detected while setting the next loader of {:?}", handle);
            }
            current = registry.next.get(&node).copied();
        }

        registry.next.insert(handle, next);
    }

    /// Links `handles` in order, each forwarding to the one after it.
    pub fn link(&self, handles: &[LoaderHandle]) {
        for pair in handles.windows(2) {
            self.set_next_loader(pair[0], Some(pair[1]));
        }
    }

    /// Loads `request` starting at `head`.
    pub async fn load(&self, head: LoaderHandle, request: HttpRequest, token: RequestToken) -> HttpResult {
        Next {
            chain: Some(self.clone()),
            target: Some(head),
            from: "LoaderChain",
        }
        .load(request, token)
        .await
    }

    fn resolve(&self, handle: LoaderHandle) -> Option<(Arc<dyn Loader>, Option<LoaderHandle>)> {
        let registry = self.lock();
        let loader = registry.loader(handle)?.clone();
        Some((loader, registry.next.get(&handle).copied()))
    }
}

impl fmt::Debug for LoaderChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.lock();
        f.debug_struct("LoaderChain")
            .field(
                "loaders",
                &registry.slots.iter().filter(|slot| slot.loader.is_some()).count(),
            )
            .field("links", &registry.next.len())
            .finish()
    }
}

/// The capability to forward a request to the next stage of the chain.
#[derive(Clone)]
pub struct Next {
    chain: Option<LoaderChain>,
    target: Option<LoaderHandle>,
    from: &'static str,
}

impl Next {
    /// A `Next` with no successor: forwarding through it always fails.
    ///
    /// Useful to drive a loader directly, outside any chain.
    pub fn end() -> Self {
        Self {
            chain: None,
            target: None,
            from: "loader",
        }
    }

    /// Returns `true` if there is no successor to forward to.
    pub fn is_terminal(&self) -> bool {
        match (&self.chain, self.target) {
            (Some(chain), Some(target)) => !chain.contains(target),
            _ => true,
        }
    }

    /// Forwards `request` to the next loader.
    ///
    /// Without a successor this resolves to a [`ErrorCode::CannotConnect`] failure.
    pub async fn load(&self, request: HttpRequest, token: RequestToken) -> HttpResult {
        let resolved = match (&self.chain, self.target) {
            (Some(chain), Some(target)) => chain
                .resolve(target)
                .map(|(loader, successor)| (chain.clone(), loader, successor)),
            _ => None,
        };

        let Some((chain, loader, successor)) = resolved else {
            return Err(HttpError::new(ErrorCode::CannotConnect, request)
                .with_message(format!("{} does not have a next loader", self.from)));
        };

        let next = Next {
            chain: Some(chain),
            target: successor,
            from: loader.name(),
        };
        loader.load(request, token, next).await
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("target", &self.target)
            .field("from", &self.from)
            .finish()
    }
}
