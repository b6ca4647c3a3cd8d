use std::any::{Any, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use relay_core::{Handler, Intent, IntentType};
use tracing::{debug, warn};

use super::config::RegistrationMode;
use super::error::ConfigurationError;
use super::resolve::{resolve, HandlerBinding};

// ---------------------------------------------------------------------------
// BoundHandler
// ---------------------------------------------------------------------------

/// A handler for intent `I` together with its resolved binding.
pub struct BoundHandler<I: Intent> {
    handler: Arc<dyn Handler<Intent = I>>,
    binding: HandlerBinding,
    timeout: Option<Duration>,
}

impl<I: Intent> BoundHandler<I> {
    #[must_use]
    pub fn handler(&self) -> &Arc<dyn Handler<Intent = I>> {
        &self.handler
    }

    #[must_use]
    pub fn binding(&self) -> &HandlerBinding {
        &self.binding
    }

    /// Handler-declared execution bound, captured at registration.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl<I: Intent> Clone for BoundHandler<I> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            binding: self.binding,
            timeout: self.timeout,
        }
    }
}

/// Type-erased registry entry. `bound` always holds a `BoundHandler<I>` for
/// the intent type the entry is keyed by.
struct Entry {
    binding: HandlerBinding,
    bound: Arc<dyn Any + Send + Sync>,
}

type Table = HashMap<TypeId, Arc<Entry>>;

/// Outcome of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub binding: HandlerBinding,
    /// Handler that previously served the intent type, if it was replaced.
    pub replaced: Option<&'static str>,
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Table of intent type to handler.
///
/// Reads load an immutable snapshot through `ArcSwap` and never take a lock.
/// Writes are serialized by a mutex, copy the current table, apply the change
/// and publish the new snapshot, so a reader waits at most for nothing and sees
/// either the old or the new table.
pub struct HandlerRegistry {
    table: ArcSwap<Table>,
    write_lock: Mutex<()>,
    mode: RegistrationMode,
}

impl HandlerRegistry {
    /// Creates an empty registry with the given duplicate-registration policy.
    #[must_use]
    pub fn new(mode: RegistrationMode) -> Self {
        Self {
            table: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
            mode,
        }
    }

    #[must_use]
    pub fn mode(&self) -> RegistrationMode {
        self.mode
    }

    /// Register a handler for the intent type it declares.
    ///
    /// An existing binding for the same intent type is replaced with a warning
    /// in permissive mode and rejected in strict mode.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` when the binding cannot be resolved, when the
    /// intent's stable name is already claimed by a different type, or (strict
    /// mode) when the intent type is already bound.
    pub fn register<H: Handler>(&self, handler: H) -> Result<Registration, ConfigurationError> {
        let binding = resolve(&handler)?;
        let timeout = handler.timeout();
        let bound = BoundHandler::<H::Intent> {
            handler: Arc::new(handler),
            binding,
            timeout,
        };

        let _guard = self.write_lock.lock();
        let current = self.table.load_full();

        if let Some(clash) = current
            .values()
            .find(|e| e.binding.intent.name() == binding.intent.name() && e.binding.intent != binding.intent)
        {
            return Err(ConfigurationError::AmbiguousIntentName {
                name: binding.intent.name(),
                existing: clash.binding.intent_type_name,
                requested: binding.intent_type_name,
            });
        }

        let replaced = current
            .get(&binding.intent.type_id())
            .map(|existing| existing.binding.handler);

        if let Some(existing) = replaced {
            if self.mode == RegistrationMode::Strict {
                return Err(ConfigurationError::DuplicateBinding {
                    intent: binding.intent.name(),
                    existing,
                });
            }
            warn!(
                intent = binding.intent.name(),
                previous = existing,
                replacement = binding.handler,
                "replacing existing handler binding"
            );
        }

        let mut next: Table = (*current).clone();
        next.insert(
            binding.intent.type_id(),
            Arc::new(Entry {
                binding,
                bound: Arc::new(bound),
            }),
        );
        self.table.store(Arc::new(next));

        debug!(
            intent = binding.intent.name(),
            kind = binding.intent.kind().as_str(),
            handler = binding.handler,
            result = binding.result_type_name,
            "handler registered"
        );

        Ok(Registration { binding, replaced })
    }

    /// Handler bound to intent type `I`, if any.
    #[must_use]
    pub fn find<I: Intent>(&self) -> Option<BoundHandler<I>> {
        self.try_find::<I>().ok().flatten()
    }

    /// Like [`find`](Self::find) but reports a corrupted entry instead of
    /// hiding it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::BindingMismatch` when the stored handler does
    /// not serve `I`.
    pub fn try_find<I: Intent>(&self) -> Result<Option<BoundHandler<I>>, ConfigurationError> {
        let table = self.table.load();
        let Some(entry) = table.get(&TypeId::of::<I>()) else {
            return Ok(None);
        };
        Arc::clone(&entry.bound)
            .downcast::<BoundHandler<I>>()
            .map(|bound| Some((*bound).clone()))
            .map_err(|_| ConfigurationError::BindingMismatch { intent: I::NAME })
    }

    /// Binding details for an intent type.
    #[must_use]
    pub fn binding(&self, intent: &IntentType) -> Option<HandlerBinding> {
        self.table
            .load()
            .get(&intent.type_id())
            .map(|entry| entry.binding)
    }

    /// Remove the binding for an intent type. Returns whether one existed.
    pub fn unregister(&self, intent: &IntentType) -> bool {
        let _guard = self.write_lock.lock();
        let current = self.table.load_full();
        if !current.contains_key(&intent.type_id()) {
            return false;
        }
        let mut next: Table = (*current).clone();
        next.remove(&intent.type_id());
        self.table.store(Arc::new(next));
        debug!(intent = intent.name(), "handler unregistered");
        true
    }

    /// Typed shorthand for [`unregister`](Self::unregister).
    pub fn unregister_intent<I: Intent>(&self) -> bool {
        self.unregister(&IntentType::of::<I>())
    }

    #[must_use]
    pub fn has_handler(&self, intent: &IntentType) -> bool {
        self.table.load().contains_key(&intent.type_id())
    }

    #[must_use]
    pub fn has_handler_for<I: Intent>(&self) -> bool {
        self.has_handler(&IntentType::of::<I>())
    }

    /// All bound intent types, ordered by name.
    #[must_use]
    pub fn registered_types(&self) -> BTreeSet<IntentType> {
        self.table
            .load()
            .values()
            .map(|entry| entry.binding.intent)
            .collect()
    }

    /// Names of all bound intent types, sorted.
    #[must_use]
    pub fn registered_names(&self) -> Vec<&'static str> {
        self.registered_types()
            .into_iter()
            .map(|t| t.name())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.load().is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new(RegistrationMode::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
