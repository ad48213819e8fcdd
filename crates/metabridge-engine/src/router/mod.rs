//! Dispatch router
//!
//! The [`DispatchRouter`] owns all bridge state that outlives a single
//! call:
//!
//! - the proxy registry, deduplicating [`ProxyDispatchTarget`]s by
//!   [`CallableIdentity`]
//! - the connection table for functor connections
//! - the reflection builders of dynamic classes and of instances that
//!   acquired per-instance methods
//!
//! It also implements the built-in dispatch path of dynamic-runtime
//! authored classes (`dispatch` module) and the connect/disconnect flow
//! (`connect` module).
//!
//! ## Lock discipline
//!
//! The interpreter token is always acquired before any router or builder
//! lock. No runtime or framework code runs while the proxy registry or the
//! connection table is locked; removed entries are dropped after release.

mod connect;
mod connections;
mod dispatch;
mod global;

pub use connections::{ConnectionKey, ConnectionRecord, ConnectionTable};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metabridge_sdk::{ObjRef, ObjectId, TypeRole};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::callable::CallableIdentity;
use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::native::{ConnectionHandle, NativeObject};
use crate::proxy::ProxyDispatchTarget;
use crate::reflect::signature::{check_method_signature, slot_decorator_hint};
use crate::reflect::{MetaObjectBuilder, MetaTable, MethodKind};
use crate::weak::WeakNotifier;

/// Hook consulted when a built-in dispatch raises.
///
/// Returning `Some(code)` replaces the meta-call result code.
pub type MetaCallErrorHandler = Arc<dyn Fn(ObjectId) -> Option<i32> + Send + Sync>;

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Log an annotation hint when a slot is registered dynamically
    pub slot_hints: bool,
    /// Subscribe to object destruction at construction instead of on the
    /// first recorded connection
    pub eager_destroyed_listener: bool,
    /// Register the process-wide router's cleanup with `atexit`
    pub register_at_exit: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            slot_hints: true,
            eager_destroyed_listener: false,
            register_at_exit: true,
        }
    }
}

/// Keeps a cached class identity unique while its entry exists
enum ClassLifetime {
    /// The entry is evicted when the type dies
    Watched { _watch: WeakNotifier },
    /// The runtime cannot watch the type; it stays alive with the router
    Pinned { _ty: ObjRef },
}

struct ClassEntry {
    _lifetime: ClassLifetime,
    builder: Arc<Mutex<MetaObjectBuilder>>,
}

pub(crate) struct RouterShared {
    ctx: Arc<BridgeContext>,
    options: RouterOptions,
    proxies: Mutex<FxHashMap<CallableIdentity, Arc<ProxyDispatchTarget>>>,
    connections: ConnectionTable,
    class_builders: DashMap<usize, ClassEntry>,
    instance_builders: DashMap<ObjectId, Arc<Mutex<MetaObjectBuilder>>>,
    listener_installed: AtomicBool,
    error_handler: RwLock<Option<MetaCallErrorHandler>>,
}

/// Registry and call-routing engine of the bridge.
///
/// Cloning yields another handle to the same router.
#[derive(Clone)]
pub struct DispatchRouter {
    shared: Arc<RouterShared>,
}

/// Non-owning handle to a [`DispatchRouter`]
#[derive(Clone)]
pub struct WeakDispatchRouter {
    shared: Weak<RouterShared>,
}

impl WeakDispatchRouter {
    /// Recover the router if it still exists
    pub fn upgrade(&self) -> Option<DispatchRouter> {
        self.shared.upgrade().map(|shared| DispatchRouter { shared })
    }
}

impl DispatchRouter {
    /// Create an isolated router
    pub fn new(ctx: Arc<BridgeContext>, options: RouterOptions) -> Self {
        let eager = options.eager_destroyed_listener;
        let router = Self {
            shared: Arc::new(RouterShared {
                ctx,
                options,
                proxies: Mutex::new(FxHashMap::default()),
                connections: ConnectionTable::new(),
                class_builders: DashMap::new(),
                instance_builders: DashMap::new(),
                listener_installed: AtomicBool::new(false),
                error_handler: RwLock::new(None),
            }),
        };
        if eager {
            router.install_destroyed_listener();
        }
        router
    }

    /// A handle that does not keep the router alive
    pub fn downgrade(&self) -> WeakDispatchRouter {
        WeakDispatchRouter {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Shared collaborators
    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.shared.ctx
    }

    /// Configuration
    pub fn options(&self) -> &RouterOptions {
        &self.shared.options
    }

    /// Install or remove the meta-call error hook
    pub fn set_meta_call_error_handler(&self, handler: Option<MetaCallErrorHandler>) {
        *self.shared.error_handler.write() = handler;
    }

    fn error_handler(&self) -> Option<MetaCallErrorHandler> {
        self.shared.error_handler.read().clone()
    }

    // ========================================================================
    // Object lifetime
    // ========================================================================

    /// Subscribe to native object destruction, once per router
    pub fn install_destroyed_listener(&self) {
        if self
            .shared
            .listener_installed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let weak = self.downgrade();
        self.context()
            .framework()
            .subscribe_destroyed(Arc::new(move |id| {
                if let Some(router) = weak.upgrade() {
                    router.on_object_destroyed(id);
                }
            }));
    }

    /// True once the destroyed listener is installed
    pub fn has_destroyed_listener(&self) -> bool {
        self.shared.listener_installed.load(Ordering::SeqCst)
    }

    /// Forget everything tied to a destroyed native object
    pub fn on_object_destroyed(&self, id: ObjectId) {
        let purged = self.purge_sender(id);
        let builder = self.shared.instance_builders.remove(&id);
        let swept = self.sweep_empty_proxies();
        log::debug!(
            "object {} destroyed: {} connections purged, {} proxies swept",
            id,
            purged,
            swept
        );
        drop(builder);
    }

    // ========================================================================
    // Proxy registry
    // ========================================================================

    /// Find the proxy of `callable`, creating it if needed, and record
    /// `sender` as one of its links.
    ///
    /// A registered proxy is reused as long as it can still dispatch. One
    /// whose links were all lost is purged first, as a sweep would.
    pub fn resolve_or_create_proxy(
        &self,
        sender: Option<ObjectId>,
        callable: &ObjRef,
        receiver: Option<ObjectId>,
    ) -> BridgeResult<Arc<ProxyDispatchTarget>> {
        if sender.is_some() {
            self.install_destroyed_listener();
        }
        let ctx = self.context().clone();
        let runtime = ctx.runtime().clone();
        let _gil = runtime.interpreter_lock().acquire();
        let identity = CallableIdentity::of(runtime.as_ref(), callable);

        let existing = self.shared.proxies.lock().get(&identity).cloned();
        if let Some(proxy) = existing {
            if !proxy.is_empty() {
                if let Some(sender) = sender {
                    proxy.inc_ref(sender);
                }
                return Ok(proxy);
            }
            self.remove_proxy(&proxy);
        }

        let weak = self.downgrade();
        let created = ProxyDispatchTarget::new(
            ctx,
            callable,
            receiver,
            Some(Box::new(move || {
                if let Some(router) = weak.upgrade() {
                    router.on_callable_target_died(identity);
                }
            })),
        )?;

        let (proxy, discarded) = {
            let mut proxies = self.shared.proxies.lock();
            match proxies.get(&identity).cloned() {
                Some(current) => (current, Some(created)),
                None => {
                    proxies.insert(identity, created.clone());
                    (created, None)
                }
            }
        };
        drop(discarded);
        if let Some(sender) = sender {
            proxy.inc_ref(sender);
        }
        log::debug!("proxy for {:?}: {:?}", identity, proxy);
        Ok(proxy)
    }

    /// The registered proxy of `callable`, if any
    pub fn find_proxy(&self, callable: &ObjRef) -> Option<Arc<ProxyDispatchTarget>> {
        let identity = {
            let runtime = self.context().runtime();
            let _gil = runtime.interpreter_lock().acquire();
            CallableIdentity::of(runtime.as_ref(), callable)
        };
        self.proxy_by_identity(identity)
    }

    /// The registered proxy with `identity`, if any
    pub fn proxy_by_identity(&self, identity: CallableIdentity) -> Option<Arc<ProxyDispatchTarget>> {
        self.shared.proxies.lock().get(&identity).cloned()
    }

    /// Remove one link occurrence and drop the proxy once it is empty.
    ///
    /// Releasing without a sender drops a proxy that was never linked.
    /// Touches only the proxy, never the sender, so it is safe to call while
    /// the sender is being destroyed.
    pub fn release_proxy(&self, sender: Option<ObjectId>, proxy: &Arc<ProxyDispatchTarget>) {
        if let Some(sender) = sender {
            proxy.dec_ref(sender);
        }
        if proxy.is_empty() || (sender.is_none() && proxy.is_unlinked()) {
            self.remove_proxy(proxy);
        }
    }

    /// Forget links to dead senders after a connection was made
    pub fn notify_proxy(&self, proxy: &ProxyDispatchTarget) {
        proxy.purge_dead_links();
    }

    fn remove_proxy(&self, proxy: &Arc<ProxyDispatchTarget>) -> bool {
        let removed = {
            let mut proxies = self.shared.proxies.lock();
            let registered = proxies
                .get(&proxy.identity())
                .is_some_and(|current| Arc::ptr_eq(current, proxy));
            if registered {
                proxies.remove(&proxy.identity())
            } else {
                None
            }
        };
        match removed {
            Some(removed) => {
                removed.retire();
                true
            }
            None => false,
        }
    }

    /// Drop every registered proxy that became empty.
    ///
    /// Emptiness is evaluated on a snapshot without the registry lock;
    /// removal then only takes entries that are still registered.
    pub fn sweep_empty_proxies(&self) -> usize {
        let snapshot: Vec<Arc<ProxyDispatchTarget>> =
            self.shared.proxies.lock().values().cloned().collect();
        let empty: Vec<Arc<ProxyDispatchTarget>> =
            snapshot.into_iter().filter(|p| p.is_empty()).collect();
        empty.iter().filter(|p| self.remove_proxy(p)).count()
    }

    /// Tear down everything registered for a callable whose bound receiver
    /// died
    pub fn on_callable_target_died(&self, identity: CallableIdentity) {
        let disconnected = self.unregister_callable(identity);
        let removed = self.shared.proxies.lock().remove(&identity);
        if let Some(proxy) = &removed {
            proxy.retire();
        }
        log::debug!(
            "target of {:?} died: {} connections removed, proxy {}",
            identity,
            disconnected,
            if removed.is_some() { "dropped" } else { "absent" }
        );
    }

    /// Number of registered proxies
    pub fn proxy_count(&self) -> usize {
        self.shared.proxies.lock().len()
    }

    // ========================================================================
    // Connection table
    // ========================================================================

    /// Record a functor connection.
    ///
    /// The first call installs the destroyed listener. If the callable is a
    /// bound method, the record is removed individually when the receiver
    /// dies. A record already present under the same key is replaced and
    /// its connection disconnected.
    pub fn register_connection(
        &self,
        sender: ObjectId,
        signal_index: usize,
        callable: &ObjRef,
        handle: ConnectionHandle,
    ) -> ConnectionKey {
        self.install_destroyed_listener();
        let ctx = self.context();
        let runtime = ctx.runtime().clone();
        let _gil = runtime.interpreter_lock().acquire();

        let key = ConnectionKey::new(
            sender,
            signal_index,
            CallableIdentity::of(runtime.as_ref(), callable),
        );
        let watcher = runtime.bound_method_parts(callable).and_then(|(_, receiver)| {
            let weak = self.downgrade();
            WeakNotifier::watch(runtime.as_ref(), &receiver, move || {
                if let Some(router) = weak.upgrade() {
                    router.unregister_connection(&key);
                }
            })
            .ok()
        });

        let replaced = self
            .shared
            .connections
            .insert(key, ConnectionRecord { handle, watcher });
        if let Some(old) = replaced {
            if old.handle != handle {
                ctx.framework().disconnect(old.handle);
            }
        }
        key
    }

    /// Remove and disconnect one record
    pub fn unregister_connection(&self, key: &ConnectionKey) -> bool {
        let Some(record) = self.shared.connections.remove(key) else {
            return false;
        };
        self.context().framework().disconnect(record.handle);
        drop(record);
        true
    }

    /// Remove and disconnect every record of one callable.
    ///
    /// Disconnecting may destroy other targets and shrink the table behind
    /// the scan; the scan restarts from a fresh snapshot whenever the table
    /// lost more than the record just removed.
    pub fn unregister_callable(&self, identity: CallableIdentity) -> usize {
        let mut removed = 0;
        loop {
            let snapshot = self.shared.connections.keys_for_callable(identity);
            if snapshot.is_empty() {
                break;
            }
            let mut restart = false;
            for key in snapshot {
                let before = self.shared.connections.len();
                if !self.unregister_connection(&key) {
                    continue;
                }
                removed += 1;
                let after = self.shared.connections.len();
                if before.saturating_sub(after) > 1 {
                    restart = true;
                    break;
                }
            }
            if !restart {
                break;
            }
        }
        removed
    }

    /// Drop every record of a sender without disconnecting
    pub fn purge_sender(&self, sender: ObjectId) -> usize {
        let records = self.shared.connections.take_sender(sender);
        let count = records.len();
        drop(records);
        count
    }

    /// The connection table
    pub fn connections(&self) -> &ConnectionTable {
        &self.shared.connections
    }

    /// Number of recorded connections
    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    // ========================================================================
    // Reflection
    // ========================================================================

    /// The table currently describing `object`: its per-instance table if it
    /// has one, else its dynamic class's table, else its static table
    pub fn meta_table_for(&self, object: &dyn NativeObject) -> Arc<MetaTable> {
        let id = object.object_id();
        let instance_builder = self
            .shared
            .instance_builders
            .get(&id)
            .map(|entry| entry.value().clone());
        let runtime = self.context().runtime().clone();
        let _gil = runtime.interpreter_lock().acquire();
        if let Some(builder) = instance_builder {
            return builder.lock().update();
        }
        let static_table = object.static_meta_table();
        match self.context().framework().companion(id) {
            Some(companion) => {
                let ty = runtime.type_of(&companion);
                self.class_table(&ty, &static_table)
            }
            None => static_table,
        }
    }

    /// The materialized table of a dynamic class
    pub fn class_table(&self, ty: &ObjRef, static_table: &Arc<MetaTable>) -> Arc<MetaTable> {
        let builder = self.class_builder(ty, static_table);
        let runtime = self.context().runtime().clone();
        let _gil = runtime.interpreter_lock().acquire();
        let table = builder.lock().update();
        table
    }

    fn class_builder(&self, ty: &ObjRef, static_table: &Arc<MetaTable>) -> Arc<Mutex<MetaObjectBuilder>> {
        if let Some(entry) = self.shared.class_builders.get(&ty.identity()) {
            return entry.builder.clone();
        }
        let runtime = self.context().runtime().clone();
        let _gil = runtime.interpreter_lock().acquire();
        let base = runtime
            .type_mro(ty)
            .into_iter()
            .skip(1)
            .find(|t| runtime.type_role(t) == TypeRole::NativeDerived)
            .map(|parent| self.class_table(&parent, static_table))
            .unwrap_or_else(|| static_table.clone());
        let builder = Arc::new(Mutex::new(MetaObjectBuilder::for_type(
            self.context().clone(),
            ty,
            base,
        )));

        let key = ty.identity();
        let weak = self.downgrade();
        let lifetime = match WeakNotifier::watch(runtime.as_ref(), ty, move || {
            if let Some(router) = weak.upgrade() {
                router.evict_class(key);
            }
        }) {
            Ok(watch) => ClassLifetime::Watched { _watch: watch },
            Err(err) => {
                log::debug!("caching {} without a death watch: {}", runtime.type_name(ty), err);
                ClassLifetime::Pinned { _ty: ty.clone() }
            }
        };
        let entry = ClassEntry {
            _lifetime: lifetime,
            builder,
        };

        let (cached, discarded) = match self.shared.class_builders.entry(key) {
            Entry::Occupied(current) => (current.get().builder.clone(), Some(entry)),
            Entry::Vacant(vacant) => (vacant.insert(entry).builder.clone(), None),
        };
        drop(discarded);
        cached
    }

    fn evict_class(&self, key: usize) {
        let removed = self.shared.class_builders.remove(&key);
        log::debug!(
            "class {:#x} died: cached table {}",
            key,
            if removed.is_some() { "evicted" } else { "absent" }
        );
        drop(removed);
    }

    /// Number of dynamic classes with a cached table
    pub fn cached_class_count(&self) -> usize {
        self.shared.class_builders.len()
    }

    fn instance_builder(
        &self,
        id: ObjectId,
        companion: &ObjRef,
        table: &Arc<MetaTable>,
    ) -> Arc<Mutex<MetaObjectBuilder>> {
        if let Some(builder) = self.shared.instance_builders.get(&id) {
            return builder.value().clone();
        }
        self.install_destroyed_listener();
        let ty = self.context().runtime().type_of(companion);
        let builder = Arc::new(Mutex::new(MetaObjectBuilder::for_type(
            self.context().clone(),
            &ty,
            table.clone(),
        )));
        self.shared
            .instance_builders
            .entry(id)
            .or_insert(builder)
            .value()
            .clone()
    }

    /// Index of `signature` on `source`, appending it to the object's
    /// per-instance table if absent.
    ///
    /// Failures are logged and yield `None`.
    pub fn register_meta_method(
        &self,
        source: &dyn NativeObject,
        signature: &str,
        kind: MethodKind,
    ) -> Option<usize> {
        match self.try_register_meta_method(source, signature, kind) {
            Ok(index) => Some(index),
            Err(err) => {
                log::warn!("{}", err);
                None
            }
        }
    }

    pub(crate) fn try_register_meta_method(
        &self,
        source: &dyn NativeObject,
        signature: &str,
        kind: MethodKind,
    ) -> BridgeResult<usize> {
        let table = self.meta_table_for(source);
        if let Some(index) = table.index_of_method(MethodKind::Method, signature) {
            return Ok(index);
        }

        let id = source.object_id();
        let runtime = self.context().runtime().clone();
        let _gil = runtime.interpreter_lock().acquire();
        let Some(companion) = self.context().framework().companion(id) else {
            return Err(BridgeError::NoWrapper {
                signature: signature.to_string(),
                object: id.to_string(),
            });
        };
        let builder = self.instance_builder(id, &companion, &table);

        if kind == MethodKind::Slot && self.options().slot_hints && check_method_signature(signature) {
            log::warn!(
                "Warning: Registering dynamic slot \"{}\" on \"{}\". Consider annotating with {}",
                signature,
                table.class_name(),
                slot_decorator_hint(signature)
            );
        }

        let mut builder = builder.lock();
        let index = match kind {
            MethodKind::Signal => builder.add_signal(signature),
            _ => builder.add_slot(signature),
        };
        builder.update();
        index.ok_or_else(|| BridgeError::InvalidSignature(signature.to_string()))
    }

    /// True if `object` has a per-instance table
    pub fn has_instance_table(&self, id: ObjectId) -> bool {
        self.shared.instance_builders.contains_key(&id)
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Clear the connection table, the proxy registry and all builders.
    ///
    /// Connections are not disconnected. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let records = self.shared.connections.take_all();
        let proxies: Vec<Arc<ProxyDispatchTarget>> = self
            .shared
            .proxies
            .lock()
            .drain()
            .map(|(_, proxy)| proxy)
            .collect();
        for proxy in &proxies {
            proxy.retire();
        }
        let instance_builders = self.shared.instance_builders.len();
        self.shared.instance_builders.clear();
        let class_keys: Vec<usize> = self
            .shared
            .class_builders
            .iter()
            .map(|entry| *entry.key())
            .collect();
        let classes: Vec<ClassEntry> = class_keys
            .iter()
            .filter_map(|key| self.shared.class_builders.remove(key))
            .map(|(_, entry)| entry)
            .collect();
        log::debug!(
            "router shutdown: {} connections, {} proxies, {} instance tables released",
            records.len(),
            proxies.len(),
            instance_builders
        );
        drop(records);
        drop(proxies);
        drop(classes);
    }
}

impl fmt::Debug for DispatchRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRouter")
            .field("proxies", &self.proxy_count())
            .field("connections", &self.connection_count())
            .field("classes", &self.shared.class_builders.len())
            .field("instances", &self.shared.instance_builders.len())
            .finish()
    }
}
