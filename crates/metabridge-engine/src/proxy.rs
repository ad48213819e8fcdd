//! Proxy dispatch targets
//!
//! A [`ProxyDispatchTarget`] is a native object that exists only to receive
//! dispatch calls on behalf of one dynamic-runtime callable. The native
//! connection machinery addresses it by slot index like any other receiver;
//! each slot signature the callable is connected under is appended to the
//! proxy's private reflection table on demand.
//!
//! ## Links
//!
//! A proxy is tied to the native objects (usually signal senders) that
//! route through it. The link list records occurrences, but emptiness is a
//! liveness OR: the proxy is empty once every linked object is dead or
//! every occurrence was removed, and stays empty from then on. A proxy that
//! was never linked is not empty; it lives until it is released or its
//! callable's receiver dies.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use metabridge_sdk::{DeathCallback, NativeValue, ObjRef, ObjectId, RuntimeResult};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::callable::{report_dispatch_error, CallableAdapter, CallableIdentity, InvokeOutcome};
use crate::context::BridgeContext;
use crate::defaults::{PROXY_CLASS_NAME, SENDER_PROPERTY};
use crate::native::{MetaCall, NativeObject};
use crate::reflect::{MetaObjectBuilder, MetaTable, MethodKind};

// ============================================================================
// Sender scope
// ============================================================================

/// Exposes the current sender on a receiver for the duration of a dispatch
struct SenderScope<'a> {
    ctx: &'a BridgeContext,
    receiver: Option<ObjectId>,
}

impl<'a> SenderScope<'a> {
    fn enter(ctx: &'a BridgeContext, receiver: Option<ObjectId>, sender: Option<ObjectId>) -> Self {
        let receiver = receiver.filter(|id| ctx.framework().object(*id).is_some());
        if let Some(receiver) = receiver {
            let value = sender.map_or(NativeValue::Invalid, NativeValue::Object);
            ctx.framework()
                .set_dynamic_property(receiver, SENDER_PROPERTY, Some(value));
        }
        Self { ctx, receiver }
    }
}

impl Drop for SenderScope<'_> {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver {
            self.ctx
                .framework()
                .set_dynamic_property(receiver, SENDER_PROPERTY, None);
        }
    }
}

// ============================================================================
// ProxyDispatchTarget
// ============================================================================

/// Native stand-in for one dynamic-runtime callable
pub struct ProxyDispatchTarget {
    id: ObjectId,
    ctx: Arc<BridgeContext>,
    identity: CallableIdentity,
    adapter: RwLock<Option<Arc<CallableAdapter>>>,
    builder: Mutex<MetaObjectBuilder>,
    slots: Mutex<FxHashMap<String, usize>>,
    links: Mutex<Vec<ObjectId>>,
    linked: AtomicBool,
    emptied: AtomicBool,
    receiver: Option<ObjectId>,
}

impl ProxyDispatchTarget {
    /// Create a proxy for `callable`.
    ///
    /// `receiver` is the native object of the callable's bound receiver, if
    /// it has one; it gets the sender property during dispatch.
    /// `on_target_death` is run when a bound receiver dies. Acquires the
    /// interpreter token.
    pub fn new(
        ctx: Arc<BridgeContext>,
        callable: &ObjRef,
        receiver: Option<ObjectId>,
        on_target_death: Option<DeathCallback>,
    ) -> RuntimeResult<Arc<Self>> {
        let adapter = {
            let runtime = ctx.runtime();
            let _gil = runtime.interpreter_lock().acquire();
            CallableAdapter::create(runtime.as_ref(), callable, on_target_death)?
        };
        let builder = MetaObjectBuilder::new(ctx.clone(), PROXY_CLASS_NAME, MetaTable::root());
        Ok(Arc::new(Self {
            id: ObjectId::new(),
            identity: adapter.identity(),
            adapter: RwLock::new(Some(Arc::new(adapter))),
            builder: Mutex::new(builder),
            slots: Mutex::new(FxHashMap::default()),
            links: Mutex::new(Vec::new()),
            linked: AtomicBool::new(false),
            emptied: AtomicBool::new(false),
            receiver,
            ctx,
        }))
    }

    /// Identity of the wrapped callable
    pub fn identity(&self) -> CallableIdentity {
        self.identity
    }

    /// Native object receiving the sender property, if any
    pub fn receiver(&self) -> Option<ObjectId> {
        self.receiver
    }

    /// The adapter, until the proxy is retired
    pub fn adapter(&self) -> Option<Arc<CallableAdapter>> {
        self.adapter.read().clone()
    }

    // ------------------------------------------------------------------------
    // Slots
    // ------------------------------------------------------------------------

    /// Slot index for `signature`, appending it on first use.
    ///
    /// Returns `None` for a malformed signature.
    pub fn add_slot(&self, signature: &str) -> Option<usize> {
        if let Some(index) = self.slots.lock().get(signature) {
            return Some(*index);
        }
        let runtime = self.ctx.runtime().clone();
        let _gil = runtime.interpreter_lock().acquire();
        let mut builder = self.builder.lock();
        if let Some(index) = builder.index_of_method(MethodKind::Slot, signature) {
            return Some(index);
        }
        let index = builder.add_slot(signature)?;
        builder.update();
        self.slots.lock().insert(signature.to_string(), index);
        Some(index)
    }

    /// Signatures registered so far, in index order
    pub fn signatures(&self) -> Vec<String> {
        let mut entries: Vec<(usize, String)> = self
            .slots
            .lock()
            .iter()
            .map(|(signature, index)| (*index, signature.clone()))
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, signature)| signature).collect()
    }

    // ------------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------------

    /// Record one occurrence of `link`
    pub fn inc_ref(&self, link: ObjectId) {
        self.links.lock().push(link);
        self.linked.store(true, Ordering::SeqCst);
    }

    /// True until the first link is recorded
    pub fn is_unlinked(&self) -> bool {
        !self.linked.load(Ordering::SeqCst)
    }

    /// Remove one occurrence of `link`
    pub fn dec_ref(&self, link: ObjectId) {
        let mut links = self.links.lock();
        if let Some(pos) = links.iter().position(|l| *l == link) {
            links.remove(pos);
        }
    }

    /// Number of recorded occurrences of `link`
    pub fn ref_count(&self, link: ObjectId) -> usize {
        self.links.lock().iter().filter(|l| **l == link).count()
    }

    /// Distinct linked objects that are still alive
    pub fn live_links(&self) -> Vec<ObjectId> {
        let mut snapshot = self.links.lock().clone();
        snapshot.sort();
        snapshot.dedup();
        let framework = self.ctx.framework();
        snapshot
            .into_iter()
            .filter(|id| framework.object(*id).is_some())
            .collect()
    }

    /// True once no linked object is alive. Never reverts to false.
    ///
    /// A proxy that never had a link is not empty.
    pub fn is_empty(&self) -> bool {
        if self.emptied.load(Ordering::SeqCst) {
            return true;
        }
        if self.is_unlinked() {
            return false;
        }
        if self.live_links().is_empty() {
            self.emptied.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    /// Forget links to dead objects
    pub fn purge_dead_links(&self) {
        let live = self.live_links();
        self.links.lock().retain(|id| live.contains(id));
    }

    /// Detach the adapter and mark the proxy empty.
    ///
    /// Dispatches arriving afterwards are skipped.
    pub fn retire(&self) -> Option<Arc<CallableAdapter>> {
        self.emptied.store(true, Ordering::SeqCst);
        self.adapter.write().take()
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    fn skip(&self, signature: &str) {
        self.ctx.warn(&format!(
            "Skipping callback call {} because the callback object is being destructed.",
            signature
        ));
    }

    fn invoke_slot(&self, id: i32, args: &mut [NativeValue], sender: Option<ObjectId>) -> i32 {
        let root_methods = MetaTable::root().method_count();
        debug_assert!(id >= root_methods as i32, "proxy dispatch below root range: {}", id);

        let table = self.meta_table();
        let method = usize::try_from(id)
            .ok()
            .and_then(|index| table.method(index))
            .filter(|m| m.kind == MethodKind::Slot);
        let Some(method) = method else {
            debug_assert!(false, "proxy dispatch to unknown index {}", id);
            log::error!("{}: dispatch to unknown index {}", PROXY_CLASS_NAME, id);
            return -1;
        };

        let Some(adapter) = self.adapter() else {
            self.skip(&method.signature);
            return -1;
        };

        let runtime = self.ctx.runtime().clone();
        let _gil = runtime.interpreter_lock().acquire();
        let outcome = {
            let _scope = SenderScope::enter(&self.ctx, self.receiver, sender);
            adapter.invoke(
                &self.ctx,
                method.name(),
                &method.parameter_types(),
                method.type_name(),
                args,
            )
        };
        match outcome {
            InvokeOutcome::Ok => {}
            InvokeOutcome::TargetDead => self.skip(&method.signature),
            InvokeOutcome::Raised(err) => report_dispatch_error(runtime.as_ref(), &err),
        }
        -1
    }
}

impl NativeObject for ProxyDispatchTarget {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn static_meta_table(&self) -> Arc<MetaTable> {
        MetaTable::root()
    }

    fn meta_table(&self) -> Arc<MetaTable> {
        let runtime = self.ctx.runtime().clone();
        let _gil = runtime.interpreter_lock().acquire();
        self.builder.lock().update()
    }

    fn meta_call(&self, call: MetaCall, id: i32, args: &mut [NativeValue], sender: Option<ObjectId>) -> i32 {
        debug_assert_eq!(call, MetaCall::InvokeMetaMethod);
        if call != MetaCall::InvokeMetaMethod {
            return id;
        }
        log::debug!("{}: {} #{}", PROXY_CLASS_NAME, call, id);
        self.invoke_slot(id, args, sender)
    }
}

impl fmt::Debug for ProxyDispatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProxyDispatchTarget(receiver=")?;
        match self.receiver {
            Some(receiver) => write!(f, "{}", receiver)?,
            None => write!(f, "null")?,
        }
        write!(f, ", signatures=[{}]", self.signatures().join(", "))?;
        match self.adapter() {
            Some(adapter) => write!(f, ", slot={:?}", adapter)?,
            None => write!(f, ", slot=null")?,
        }
        let links = self.links.lock().clone();
        if links.is_empty() {
            write!(f, ", empty)")
        } else {
            let rendered: Vec<String> = links.iter().map(|l| l.to_string()).collect();
            write!(f, ", refs=[{}])", rendered.join(", "))
        }
    }
}
