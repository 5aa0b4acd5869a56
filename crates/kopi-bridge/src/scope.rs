//! Thread attachment and local scopes
//!
//! A [`Scope`] is the only way to talk to the VM. Opening one attaches the
//! current thread if it is not attached yet and pushes a local frame;
//! dropping it pops the frame. The thread is detached when the last scope
//! that relied on a bridge-made attachment ends. Every transient handle produced inside a scope borrows
//! it, so handles cannot be stored past the frame that owns them. `Scope`
//! is neither `Send` nor `Sync`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use kopi_sdk::{RawHandle, VmEnv, VmRuntime};

use crate::codec::ErrorCodec;
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::exception;
use crate::pin::PinTable;
use crate::registry::Registry;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Live attachments this crate made, per runtime, on the current thread
    static ATTACHED: RefCell<HashMap<usize, usize>> = RefCell::new(HashMap::new());
    /// Ids of the open scopes on the current thread, innermost last
    static OPEN_SCOPES: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

fn runtime_key(runtime: &Arc<dyn VmRuntime>) -> usize {
    Arc::as_ptr(runtime) as *const () as usize
}

/// State shared by every scope, worker, and callback of one bridge
pub(crate) struct Shared {
    pub(crate) runtime: Arc<dyn VmRuntime>,
    pub(crate) registry: Registry,
    pub(crate) codec: Arc<dyn ErrorCodec>,
    pub(crate) config: BridgeConfig,
    pub(crate) pins: PinTable,
    pub(crate) worker_seq: AtomicUsize,
}

// ============================================================================
// Attachment
// ============================================================================

/// Keeps the current thread attached for its lifetime.
///
/// Attachments made by this crate are counted per thread; the thread is
/// detached when the last of them goes, whichever order they drop in. A
/// thread attached by someone else is never detached here.
pub(crate) struct Attachment {
    runtime: Arc<dyn VmRuntime>,
    env: Rc<dyn VmEnv>,
    counted: bool,
}

impl Attachment {
    pub(crate) fn acquire(runtime: &Arc<dyn VmRuntime>) -> Result<Self> {
        let key = runtime_key(runtime);
        if let Some(env) = runtime.current_env() {
            let counted = ATTACHED.with(|attached| match attached.borrow_mut().get_mut(&key) {
                Some(count) => {
                    *count += 1;
                    true
                }
                None => false,
            });
            return Ok(Self {
                runtime: Arc::clone(runtime),
                env,
                counted,
            });
        }
        let env = runtime.attach_current_thread()?;
        ATTACHED.with(|attached| attached.borrow_mut().insert(key, 1));
        log::debug!("attached thread {:?}", std::thread::current().name());
        Ok(Self {
            runtime: Arc::clone(runtime),
            env,
            counted: true,
        })
    }

    pub(crate) fn env(&self) -> &dyn VmEnv {
        &*self.env
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        if !self.counted {
            return;
        }
        let key = runtime_key(&self.runtime);
        let last = ATTACHED.with(|attached| {
            let mut attached = attached.borrow_mut();
            match attached.get_mut(&key) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    attached.remove(&key);
                    true
                }
                None => false,
            }
        });
        if last {
            match self.runtime.detach_current_thread() {
                Ok(()) => log::debug!("detached thread {:?}", std::thread::current().name()),
                Err(e) => log::warn!("failed to detach thread: {}", e),
            }
        }
    }
}

// ============================================================================
// Scope
// ============================================================================

/// Thread-affine VM interaction context.
///
/// Scopes on one thread share the VM's frame stack and must end in reverse
/// order of opening. Ending a scope while a scope opened after it is still
/// alive is fatal.
pub struct Scope {
    shared: Arc<Shared>,
    attachment: Attachment,
    id: u64,
    frame_open: Cell<bool>,
    _not_send: PhantomData<*const ()>,
}

impl Scope {
    pub(crate) fn open(shared: Arc<Shared>) -> Result<Self> {
        let attachment = Attachment::acquire(&shared.runtime)?;
        attachment
            .env()
            .push_local_frame(shared.config.local_frame_capacity)?;
        let id = NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed);
        OPEN_SCOPES.with(|open| open.borrow_mut().push(id));
        Ok(Self {
            shared,
            attachment,
            id,
            frame_open: Cell::new(true),
            _not_send: PhantomData,
        })
    }

    /// Raw environment of the current thread
    pub fn env(&self) -> &dyn VmEnv {
        self.attachment.env()
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    /// Configuration of the owning bridge
    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    /// Report a contract violation according to the configured policy
    pub fn fatal(&self, message: impl std::fmt::Display) -> ! {
        self.shared.config.fatal_policy.fail(message)
    }

    /// Drain a pending exception into an error
    pub(crate) fn check(&self) -> Result<()> {
        match exception::drain(self) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Clear and convert the pending exception, if any
    pub fn take_pending(&self) -> Option<Error> {
        exception::drain(self)
    }

    /// The pending exception if there is one, otherwise `fallback`
    pub(crate) fn pending_or(&self, fallback: impl FnOnce() -> Error) -> Error {
        exception::drain(self).unwrap_or_else(fallback)
    }

    /// Pop the frame, carrying `result` into the enclosing frame
    pub(crate) fn finish(self, result: Option<RawHandle>) -> Option<RawHandle> {
        self.close(result)
    }

    /// Pop this scope's frame. It must be the innermost open scope.
    fn close(&self, result: Option<RawHandle>) -> Option<RawHandle> {
        if !self.frame_open.replace(false) {
            return None;
        }
        let innermost = OPEN_SCOPES.with(|open| {
            let mut open = open.borrow_mut();
            if open.last() == Some(&self.id) {
                open.pop();
                return true;
            }
            // Forget the id; the frame stays until the thread detaches
            open.retain(|id| *id != self.id);
            false
        });
        if !innermost {
            let message = "scope ended while a scope opened after it is still alive";
            if std::thread::panicking() {
                log::error!("{}", message);
                return None;
            }
            self.fatal(message);
        }
        self.env().pop_local_frame(result)
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.close(None);
    }
}
