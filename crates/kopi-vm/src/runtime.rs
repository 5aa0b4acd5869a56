//! SandboxVm — the process-wide runtime
//!
//! Owns the class table, heap, and global reference table, and hands out one
//! [`SandboxEnv`] per attached thread.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use kopi_sdk::{RawHandle, VmEnv, VmError, VmResult, VmRuntime};
use parking_lot::{Mutex, RwLock};

use crate::builtins;
use crate::class::{ClassBuilder, ClassTable, DefineError};
use crate::env::SandboxEnv;
use crate::heap::{Heap, ObjId};

const GLOBAL_TAG: usize = 2;

static NEXT_VM_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Environments of the current thread, keyed by VM id
    static ENVS: RefCell<HashMap<u64, Rc<SandboxEnv>>> = RefCell::new(HashMap::new());
}

// ============================================================================
// Shared state
// ============================================================================

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) env_calls: AtomicU64,
    pub(crate) invocations: AtomicU64,
    pub(crate) lookups: AtomicU64,
    pub(crate) globals_created: AtomicU64,
    pub(crate) globals_released: AtomicU64,
    pub(crate) exceptions_thrown: AtomicU64,
}

#[derive(Default)]
struct Globals {
    live: HashMap<usize, ObjId>,
    next: usize,
}

/// State shared by every environment of one VM.
///
/// Lock order: `classes` before `heap`. Neither lock is held while a method
/// body runs.
pub(crate) struct Shared {
    id: u64,
    pub(crate) classes: RwLock<ClassTable>,
    pub(crate) heap: Mutex<Heap>,
    globals: Mutex<Globals>,
    pub(crate) stats: Counters,
    next_serial: AtomicU32,
    attached: AtomicUsize,
}

impl Shared {
    pub(crate) fn new_global(&self, obj: ObjId) -> RawHandle {
        let mut globals = self.globals.lock();
        globals.next += 1;
        let gid = globals.next;
        globals.live.insert(gid, obj);
        self.stats.globals_created.fetch_add(1, Ordering::Relaxed);
        match RawHandle::new((gid << 2) | GLOBAL_TAG) {
            Some(handle) => handle,
            None => unreachable!("tagged handles are never null"),
        }
    }

    pub(crate) fn resolve_global(&self, handle: RawHandle) -> ObjId {
        let gid = handle.addr() >> 2;
        let globals = self.globals.lock();
        match globals.live.get(&gid) {
            Some(obj) => *obj,
            None if gid <= globals.next => panic!("global handle {:?} used after release", handle),
            None => panic!("global handle {:?} was never issued", handle),
        }
    }

    pub(crate) fn is_live_global(&self, handle: RawHandle) -> bool {
        self.globals.lock().live.contains_key(&(handle.addr() >> 2))
    }

    pub(crate) fn release_global(&self, handle: RawHandle) {
        if handle.addr() & 3 != GLOBAL_TAG {
            panic!("delete_global_ref on non-global handle {:?}", handle);
        }
        let gid = handle.addr() >> 2;
        let mut globals = self.globals.lock();
        if globals.live.remove(&gid).is_none() {
            let issued = gid <= globals.next;
            drop(globals);
            if issued {
                panic!("global handle {:?} released twice", handle);
            }
            panic!("global handle {:?} was never issued", handle);
        }
        self.stats.globals_released.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// SandboxVm
// ============================================================================

/// Counters describing how the VM has been used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SandboxStats {
    /// Calls into any environment operation
    pub env_calls: u64,
    /// Method bodies executed
    pub invocations: u64,
    /// Method and field identifier lookups
    pub lookups: u64,
    /// Global handles currently live
    pub live_globals: usize,
    /// Global handles ever created
    pub globals_created: u64,
    /// Global handles released
    pub globals_released: u64,
    /// Exceptions raised (thrown or constructed by the VM)
    pub exceptions_thrown: u64,
    /// Threads currently attached
    pub attached_threads: usize,
}

/// In-process managed runtime.
///
/// Cloning yields another handle to the same VM.
#[derive(Clone)]
pub struct SandboxVm {
    shared: Arc<Shared>,
}

impl SandboxVm {
    /// Create a VM with the built-in classes defined
    pub fn new() -> Self {
        let vm = Self {
            shared: Arc::new(Shared {
                id: NEXT_VM_ID.fetch_add(1, Ordering::Relaxed),
                classes: RwLock::new(ClassTable::new()),
                heap: Mutex::new(Heap::new()),
                globals: Mutex::new(Globals::default()),
                stats: Counters::default(),
                next_serial: AtomicU32::new(1),
                attached: AtomicUsize::new(0),
            }),
        };
        for builder in builtins::classes() {
            let name = builder.name().to_string();
            if let Err(e) = vm.define_class(builder) {
                panic!("built-in class {} failed to define: {}", name, e);
            }
        }
        log::debug!("sandbox vm #{} ready", vm.shared.id);
        vm
    }

    /// Define a class. Superclasses and interfaces must already exist.
    pub fn define_class(&self, builder: ClassBuilder) -> Result<(), DefineError> {
        let mut classes = self.shared.classes.write();
        let mut heap = self.shared.heap.lock();
        classes.define(&mut heap, builder).map(|_| ())
    }

    /// Snapshot of the usage counters
    pub fn stats(&self) -> SandboxStats {
        let c = &self.shared.stats;
        SandboxStats {
            env_calls: c.env_calls.load(Ordering::Relaxed),
            invocations: c.invocations.load(Ordering::Relaxed),
            lookups: c.lookups.load(Ordering::Relaxed),
            live_globals: self.shared.globals.lock().live.len(),
            globals_created: c.globals_created.load(Ordering::Relaxed),
            globals_released: c.globals_released.load(Ordering::Relaxed),
            exceptions_thrown: c.exceptions_thrown.load(Ordering::Relaxed),
            attached_threads: self.shared.attached.load(Ordering::Relaxed),
        }
    }

    /// Number of objects ever allocated
    pub fn heap_size(&self) -> usize {
        self.shared.heap.lock().len()
    }

    fn env(&self) -> Option<Rc<SandboxEnv>> {
        ENVS.with(|envs| envs.borrow().get(&self.shared.id).cloned())
    }
}

impl Default for SandboxVm {
    fn default() -> Self {
        Self::new()
    }
}

impl VmRuntime for SandboxVm {
    fn current_env(&self) -> Option<Rc<dyn VmEnv>> {
        self.env().map(|env| env as Rc<dyn VmEnv>)
    }

    fn attach_current_thread(&self) -> VmResult<Rc<dyn VmEnv>> {
        if let Some(env) = self.env() {
            return Ok(env);
        }
        let serial = self.shared.next_serial.fetch_add(1, Ordering::Relaxed);
        let env = Rc::new(SandboxEnv::new(Arc::clone(&self.shared), serial));
        ENVS.with(|envs| envs.borrow_mut().insert(self.shared.id, Rc::clone(&env)));
        self.shared.attached.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "thread {:?} attached to vm #{} as env {}",
            std::thread::current().name(),
            self.shared.id,
            serial
        );
        Ok(env)
    }

    fn detach_current_thread(&self) -> VmResult<()> {
        let removed = ENVS.with(|envs| envs.borrow_mut().remove(&self.shared.id));
        match removed {
            Some(_) => {
                self.shared.attached.fetch_sub(1, Ordering::Relaxed);
                log::debug!("thread {:?} detached from vm #{}", std::thread::current().name(), self.shared.id);
                Ok(())
            }
            None => Err(VmError::DetachFailed("thread is not attached".to_string())),
        }
    }

    fn delete_global_ref(&self, obj: RawHandle) {
        self.shared.stats.env_calls.fetch_add(1, Ordering::Relaxed);
        self.shared.release_global(obj);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kopi_sdk::HandleKind;

    #[test]
    fn test_attach_is_idempotent_and_detach_requires_attach() {
        let vm = SandboxVm::new();
        assert!(vm.current_env().is_none());
        let a = vm.attach_current_thread().unwrap();
        let b = vm.attach_current_thread().unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(vm.stats().attached_threads, 1);

        vm.detach_current_thread().unwrap();
        assert!(vm.current_env().is_none());
        assert!(matches!(vm.detach_current_thread(), Err(VmError::DetachFailed(_))));
    }

    #[test]
    fn test_two_vms_keep_separate_envs() {
        let vm1 = SandboxVm::new();
        let vm2 = SandboxVm::new();
        vm1.attach_current_thread().unwrap();
        assert!(vm2.current_env().is_none());
        vm1.detach_current_thread().unwrap();
    }

    #[test]
    fn test_globals_released_from_another_thread() {
        let vm = SandboxVm::new();
        let env = vm.attach_current_thread().unwrap();
        let s = env.new_string("shared").unwrap();
        let global = env.new_global_ref(s).unwrap();
        assert_eq!(env.ref_kind(global), HandleKind::Durable);

        let remote = vm.clone();
        std::thread::spawn(move || remote.delete_global_ref(global))
            .join()
            .unwrap();

        assert_eq!(env.ref_kind(global), HandleKind::Invalid);
        let stats = vm.stats();
        assert_eq!(stats.globals_created, 1);
        assert_eq!(stats.globals_released, 1);
        assert_eq!(stats.live_globals, 0);
        drop(env);
        vm.detach_current_thread().unwrap();
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn test_double_global_release_panics() {
        let vm = SandboxVm::new();
        let env = vm.attach_current_thread().unwrap();
        let s = env.new_string("x").unwrap();
        let global = env.new_global_ref(s).unwrap();
        env.delete_global_ref(global);
        env.delete_global_ref(global);
    }
}
