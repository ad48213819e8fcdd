//! In-memory native framework
//!
//! Keeps a registry of live native objects, their companions in the dynamic
//! runtime and the connection list. Destroying an object removes it from
//! the registry, drops its connections and notifies destruction listeners.
//! Receivers are held weakly; activation prunes connections whose receiver
//! is gone.

use std::fmt;
use std::sync::{Arc, Weak};

use metabridge_sdk::{NativeValue, ObjRef, ObjectId};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::native::{
    ConnectionHandle, DestroyedListener, MetaCall, NativeFramework, NativeObject, SlotFunctor,
};
use crate::reflect::{MetaTable, MethodKind};
use crate::router::{DispatchRouter, WeakDispatchRouter};

#[derive(Clone)]
enum Target {
    Object {
        receiver: Weak<dyn NativeObject>,
        receiver_id: ObjectId,
        slot_index: usize,
    },
    Functor(Arc<dyn SlotFunctor>),
}

struct Connection {
    handle: ConnectionHandle,
    sender: ObjectId,
    signal_index: usize,
    target: Target,
}

impl Connection {
    fn involves(&self, id: ObjectId) -> bool {
        self.sender == id
            || matches!(self.target, Target::Object { receiver_id, .. } if receiver_id == id)
    }
}

// ============================================================================
// HostFramework
// ============================================================================

/// In-memory implementation of [`NativeFramework`]
#[derive(Default)]
pub struct HostFramework {
    objects: RwLock<FxHashMap<ObjectId, Arc<dyn NativeObject>>>,
    companions: RwLock<FxHashMap<ObjectId, ObjRef>>,
    wrapped: RwLock<FxHashMap<usize, ObjectId>>,
    connections: Mutex<Vec<Connection>>,
    properties: Mutex<FxHashMap<(ObjectId, String), NativeValue>>,
    history: Mutex<Vec<(ObjectId, String, Option<NativeValue>)>>,
    listeners: RwLock<Vec<DestroyedListener>>,
}

impl HostFramework {
    /// Create a new, empty framework
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take ownership of a native object
    pub fn register<T: NativeObject + 'static>(&self, object: Arc<T>) -> ObjectId {
        let id = object.object_id();
        self.objects.write().insert(id, object);
        id
    }

    /// Pair a native object with its dynamic-runtime wrapper
    pub fn bind_companion(&self, id: ObjectId, companion: &ObjRef) {
        self.wrapped.write().insert(companion.identity(), id);
        self.companions.write().insert(id, companion.clone());
    }

    /// Destroy a native object.
    ///
    /// Returns false if the object was not alive.
    pub fn destroy(&self, id: ObjectId) -> bool {
        let Some(object) = self.objects.write().remove(&id) else {
            return false;
        };
        let companion = self.companions.write().remove(&id);
        if let Some(companion) = &companion {
            self.wrapped.write().remove(&companion.identity());
        }
        let removed: Vec<Connection> = {
            let mut connections = self.connections.lock();
            let (removed, kept) = std::mem::take(&mut *connections)
                .into_iter()
                .partition(|c| c.involves(id));
            *connections = kept;
            removed
        };
        self.properties.lock().retain(|(owner, _), _| *owner != id);

        log::trace!("destroying {} ({} connections)", id, removed.len());
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener(id);
        }
        drop(removed);
        drop(companion);
        drop(object);
        true
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Number of live objects
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Number of connections
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Number of connections whose sender is `sender`
    pub fn connections_from(&self, sender: ObjectId) -> usize {
        self.connections
            .lock()
            .iter()
            .filter(|c| c.sender == sender)
            .count()
    }

    /// True if the connection is still registered
    pub fn is_connected(&self, handle: ConnectionHandle) -> bool {
        self.connections.lock().iter().any(|c| c.handle == handle)
    }

    /// Current value of a dynamic property
    pub fn dynamic_property(&self, object: ObjectId, name: &str) -> Option<NativeValue> {
        self.properties
            .lock()
            .get(&(object, name.to_string()))
            .cloned()
    }

    /// Every value a dynamic property was set to, in order
    pub fn property_history(&self, object: ObjectId, name: &str) -> Vec<Option<NativeValue>> {
        self.history
            .lock()
            .iter()
            .filter(|(owner, key, _)| *owner == object && key == name)
            .map(|(_, _, value)| value.clone())
            .collect()
    }

    fn remove_where<F>(&self, mut predicate: F, first_only: bool) -> bool
    where
        F: FnMut(&Connection) -> bool,
    {
        let removed: Vec<Connection> = {
            let mut connections = self.connections.lock();
            let mut removed = Vec::new();
            let mut index = 0;
            while index < connections.len() {
                if predicate(&connections[index]) {
                    removed.push(connections.remove(index));
                    if first_only {
                        break;
                    }
                } else {
                    index += 1;
                }
            }
            removed
        };
        !removed.is_empty()
    }
}

impl NativeFramework for HostFramework {
    fn object(&self, id: ObjectId) -> Option<Arc<dyn NativeObject>> {
        self.objects.read().get(&id).cloned()
    }

    fn companion(&self, id: ObjectId) -> Option<ObjRef> {
        self.companions.read().get(&id).cloned()
    }

    fn native_of(&self, obj: &ObjRef) -> Option<ObjectId> {
        self.wrapped.read().get(&obj.identity()).copied()
    }

    fn activate(&self, sender: ObjectId, signal_index: usize, args: &mut [NativeValue]) {
        let Some(signal) = self
            .object(sender)
            .and_then(|o| o.meta_table().method(signal_index).cloned())
        else {
            return;
        };
        let targets: Vec<(ConnectionHandle, Target)> = self
            .connections
            .lock()
            .iter()
            .filter(|c| c.sender == sender && c.signal_index == signal_index)
            .map(|c| (c.handle, c.target.clone()))
            .collect();

        let mut dead = Vec::new();
        for (handle, target) in targets {
            if !self.is_connected(handle) {
                continue;
            }
            match target {
                Target::Object {
                    receiver,
                    slot_index,
                    ..
                } => match receiver.upgrade() {
                    Some(receiver) => {
                        receiver.meta_call(
                            MetaCall::InvokeMetaMethod,
                            slot_index as i32,
                            args,
                            Some(sender),
                        );
                    }
                    None => dead.push(handle),
                },
                Target::Functor(functor) => functor.invoke(sender, &signal, args),
            }
        }
        if !dead.is_empty() {
            self.remove_where(|c| dead.contains(&c.handle), false);
        }
    }

    fn connect(
        &self,
        sender: ObjectId,
        signal_index: usize,
        receiver: &Arc<dyn NativeObject>,
        slot_index: usize,
    ) -> Option<ConnectionHandle> {
        let sender_table = self.object(sender)?.meta_table();
        if sender_table.method(signal_index)?.kind != MethodKind::Signal {
            log::warn!("connect: method #{} of {} is not a signal", signal_index, sender);
            return None;
        }
        if receiver.meta_table().method(slot_index).is_none() {
            log::warn!(
                "connect: no such method #{} on {}",
                slot_index,
                receiver.object_id()
            );
            return None;
        }
        let handle = ConnectionHandle::new();
        self.connections.lock().push(Connection {
            handle,
            sender,
            signal_index,
            target: Target::Object {
                receiver: Arc::downgrade(receiver),
                receiver_id: receiver.object_id(),
                slot_index,
            },
        });
        Some(handle)
    }

    fn connect_functor(
        &self,
        sender: ObjectId,
        signal_index: usize,
        functor: Arc<dyn SlotFunctor>,
    ) -> Option<ConnectionHandle> {
        let sender_table = self.object(sender)?.meta_table();
        if sender_table.method(signal_index)?.kind != MethodKind::Signal {
            return None;
        }
        let handle = ConnectionHandle::new();
        self.connections.lock().push(Connection {
            handle,
            sender,
            signal_index,
            target: Target::Functor(functor),
        });
        Some(handle)
    }

    fn disconnect(&self, handle: ConnectionHandle) -> bool {
        self.remove_where(|c| c.handle == handle, true)
    }

    fn disconnect_one(
        &self,
        sender: ObjectId,
        signal_index: usize,
        receiver: ObjectId,
        slot_index: usize,
    ) -> bool {
        self.remove_where(
            |c| {
                c.sender == sender
                    && c.signal_index == signal_index
                    && matches!(
                        c.target,
                        Target::Object { receiver_id, slot_index: s, .. }
                            if receiver_id == receiver && s == slot_index
                    )
            },
            true,
        )
    }

    fn subscribe_destroyed(&self, listener: DestroyedListener) {
        self.listeners.write().push(listener);
    }

    fn set_dynamic_property(&self, object: ObjectId, name: &str, value: Option<NativeValue>) {
        self.history
            .lock()
            .push((object, name.to_string(), value.clone()));
        let key = (object, name.to_string());
        let mut properties = self.properties.lock();
        match value {
            Some(value) => {
                properties.insert(key, value);
            }
            None => {
                properties.remove(&key);
            }
        }
    }
}

impl fmt::Debug for HostFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFramework")
            .field("objects", &self.object_count())
            .field("connections", &self.connection_count())
            .finish()
    }
}

// ============================================================================
// Native objects
// ============================================================================

/// A plain native object with a fixed reflection table.
///
/// Records every method invocation it receives.
pub struct HostObject {
    id: ObjectId,
    table: Arc<MetaTable>,
    invocations: Mutex<Vec<(usize, Vec<NativeValue>)>>,
}

impl HostObject {
    /// Create a new object described by `table`
    pub fn new(table: Arc<MetaTable>) -> Arc<Self> {
        Arc::new(Self {
            id: ObjectId::new(),
            table,
            invocations: Mutex::new(Vec::new()),
        })
    }

    /// Method invocations received so far, as `(index, arguments)`
    pub fn invocations(&self) -> Vec<(usize, Vec<NativeValue>)> {
        self.invocations.lock().clone()
    }
}

impl NativeObject for HostObject {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn static_meta_table(&self) -> Arc<MetaTable> {
        self.table.clone()
    }

    fn meta_call(
        &self,
        call: MetaCall,
        id: i32,
        args: &mut [NativeValue],
        _sender: Option<ObjectId>,
    ) -> i32 {
        let count = self.table.method_count() as i32;
        if call != MetaCall::InvokeMetaMethod || id < 0 || id >= count {
            return id - count;
        }
        self.invocations
            .lock()
            .push((id as usize, args.iter().skip(1).cloned().collect()));
        -1
    }
}

/// A native object whose class was extended from the dynamic runtime.
///
/// Reflection and dispatch go through the router, so methods, signals and
/// properties declared on the companion's class are live.
pub struct BridgedObject {
    id: ObjectId,
    table: Arc<MetaTable>,
    router: WeakDispatchRouter,
}

impl BridgedObject {
    /// Create a new object whose native class is described by `table`
    pub fn new(table: Arc<MetaTable>, router: &DispatchRouter) -> Arc<Self> {
        Arc::new(Self {
            id: ObjectId::new(),
            table,
            router: router.downgrade(),
        })
    }
}

impl NativeObject for BridgedObject {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn static_meta_table(&self) -> Arc<MetaTable> {
        self.table.clone()
    }

    fn meta_table(&self) -> Arc<MetaTable> {
        match self.router.upgrade() {
            Some(router) => router.meta_table_for(self),
            None => self.table.clone(),
        }
    }

    fn meta_call(
        &self,
        call: MetaCall,
        id: i32,
        args: &mut [NativeValue],
        _sender: Option<ObjectId>,
    ) -> i32 {
        match self.router.upgrade() {
            Some(router) => router.dispatch(self, call, id, args),
            None => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender_table() -> Arc<MetaTable> {
        Arc::new(MetaTable::new("Sender", Some(MetaTable::root())).with_signal("fired(int)"))
    }

    #[test]
    fn test_activation_reaches_receivers() {
        let framework = HostFramework::new();
        let table = sender_table();
        let signal = table.index_of_signal("fired(int)").unwrap();
        let sender = framework.register(HostObject::new(table.clone()));

        let receiver = HostObject::new(table.clone());
        framework.register(receiver.clone());
        let as_native: Arc<dyn NativeObject> = receiver.clone();
        framework.connect(sender, signal, &as_native, signal).unwrap();

        let mut args = [NativeValue::Invalid, NativeValue::i32(3)];
        framework.activate(sender, signal, &mut args);
        assert_eq!(receiver.invocations(), vec![(signal, vec![NativeValue::i32(3)])]);
    }

    #[test]
    fn test_connect_rejects_non_signal() {
        let framework = HostFramework::new();
        let table = Arc::new(MetaTable::new("Sender", Some(MetaTable::root())).with_slot("run()"));
        let slot = table.index_of_slot("run()").unwrap();
        let sender = framework.register(HostObject::new(table.clone()));
        let receiver: Arc<dyn NativeObject> = HostObject::new(table);
        assert!(framework.connect(sender, slot, &receiver, slot).is_none());
    }

    #[test]
    fn test_destroy_drops_connections_and_notifies() {
        let framework = HostFramework::new();
        let table = sender_table();
        let signal = table.index_of_signal("fired(int)").unwrap();
        let sender = framework.register(HostObject::new(table.clone()));
        let receiver = HostObject::new(table);
        let receiver_id = framework.register(receiver.clone());
        let as_native: Arc<dyn NativeObject> = receiver;
        framework.connect(sender, signal, &as_native, signal).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        framework.subscribe_destroyed(Arc::new(move |id| sink.lock().push(id)));

        assert!(framework.destroy(receiver_id));
        assert!(!framework.destroy(receiver_id));
        assert_eq!(framework.connection_count(), 0);
        assert_eq!(*seen.lock(), vec![receiver_id]);
    }

    #[test]
    fn test_dead_receivers_are_pruned() {
        let framework = HostFramework::new();
        let table = sender_table();
        let signal = table.index_of_signal("fired(int)").unwrap();
        let sender = framework.register(HostObject::new(table.clone()));
        let receiver: Arc<dyn NativeObject> = HostObject::new(table);
        framework.connect(sender, signal, &receiver, signal).unwrap();
        drop(receiver);

        framework.activate(sender, signal, &mut [NativeValue::Invalid, NativeValue::i32(1)]);
        assert_eq!(framework.connection_count(), 0);
    }

    #[test]
    fn test_dynamic_property_history() {
        let framework = HostFramework::new();
        let id = ObjectId::new();
        framework.set_dynamic_property(id, "p", Some(NativeValue::i32(1)));
        framework.set_dynamic_property(id, "p", None);
        assert_eq!(framework.dynamic_property(id, "p"), None);
        assert_eq!(
            framework.property_history(id, "p"),
            vec![Some(NativeValue::i32(1)), None]
        );
    }
}
