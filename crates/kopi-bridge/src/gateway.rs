//! Async callback gateway
//!
//! Runs native work on a dedicated thread and reports the outcome to a VM
//! callback object:
//!
//! ```text
//! caller thread                 worker thread
//! -------------                 -------------
//! promote(callback) ----------> work()
//! return Completion             open Scope (attach)
//!                               onSuccess(Object) / onFailure(BridgeException)
//!                               release callback (exactly once)
//!                               send Delivery
//! ```
//!
//! The work closure must be `Send + 'static`, so it cannot capture a
//! transient handle. There is no cancellation.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};

use crate::error::{Error, Result};
use crate::refs::{Durable, Handle};
use crate::scope::{Scope, Shared};
use crate::signature::Signature;
use crate::value::{OwnedValue, Value};

/// Which callback method received the outcome
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// `onSuccess` was called
    Success,
    /// `onFailure` was called with this error
    Failure(Error),
}

/// Handle to a running gateway task
pub struct Completion {
    receiver: Receiver<Delivery>,
    worker: Option<JoinHandle<()>>,
}

impl Completion {
    /// Block until the callback has been invoked.
    ///
    /// Returns `None` if the worker died before delivering (a fatal delivery
    /// failure under the panic policy).
    pub fn wait(mut self) -> Option<Delivery> {
        let delivery = self.receiver.recv().ok();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("gateway worker panicked");
            }
        }
        delivery
    }

    /// Whether the worker thread has exited
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

/// Spawns native work that completes into VM callbacks
#[derive(Clone)]
pub struct Gateway {
    shared: Arc<Shared>,
}

impl Gateway {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Run `work` on a new thread and deliver its outcome to `callback`.
    ///
    /// The callback is promoted to a durable reference before this returns
    /// and released exactly once after delivery.
    pub fn spawn<F>(&self, scope: &Scope, callback: Handle<'_>, work: F) -> Result<Completion>
    where
        F: FnOnce() -> Result<OwnedValue> + Send + 'static,
    {
        let callback = scope.promote(callback)?;
        let shared = Arc::clone(&self.shared);
        let config = &shared.config.gateway;
        let seq = shared.worker_seq.fetch_add(1, Ordering::Relaxed);
        let mut builder = thread::Builder::new().name(format!("{}-{}", config.thread_name_prefix, seq));
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let (sender, receiver) = channel::bounded(1);
        let task_shared = Arc::clone(&shared);
        let worker = builder
            .spawn(move || {
                let outcome = work();
                let delivery = deliver(task_shared, callback, outcome);
                // The receiver may already be gone; nothing to report then
                let _ = sender.send(delivery);
            })
            .map_err(|e| Error::Spawn(e.to_string()))?;

        log::debug!("spawned gateway worker {}", seq);
        Ok(Completion {
            receiver,
            worker: Some(worker),
        })
    }
}

/// Invoke the callback matching `outcome`, then release it
fn deliver(shared: Arc<Shared>, callback: Durable, outcome: Result<OwnedValue>) -> Delivery {
    let policy = shared.config.fatal_policy;
    let scope = match Scope::open(Arc::clone(&shared)) {
        Ok(scope) => scope,
        Err(e) => {
            callback.release();
            policy.fail(format!("gateway worker cannot attach: {}", e));
        }
    };

    let target = callback.bind(&scope);
    let (result, delivery) = match outcome {
        Ok(value) => match scope.box_value(&Value::from(value)) {
            Ok(boxed) => {
                let arg = boxed.map_or(Value::Null, Value::Object);
                let result = scope.call_void_method(
                    target,
                    &shared.config.callback.success_method,
                    &[Signature::object()],
                    &[arg],
                );
                (result, Delivery::Success)
            }
            Err(e) => {
                log::warn!("gateway result could not be boxed: {}", e);
                deliver_failure(&scope, &shared, target, e)
            }
        },
        Err(e) => deliver_failure(&scope, &shared, target, e),
    };

    callback.release();
    if let Err(e) = result {
        drop(scope);
        policy.fail(format!("callback delivery failed: {}", e));
    }
    log::debug!("gateway delivered {:?}", delivery);
    delivery
}

fn deliver_failure(scope: &Scope, shared: &Shared, target: Handle<'_>, error: Error) -> (Result<()>, Delivery) {
    let result = scope.call_void_method(
        target,
        &shared.config.callback.failure_method,
        &[Signature::Error],
        &[Value::Error(error.to_structured())],
    );
    (result, Delivery::Failure(error))
}
