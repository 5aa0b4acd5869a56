//! Native callbacks exported to the VM
//!
//! A callback is pinned in the bridge's [`PinTable`](crate::PinTable); the
//! VM keeps only its [`PinKey`] (as a `long`) and hands it back to
//! [`CallbackTable::invoke`] from its native trampoline.

use std::sync::Arc;

use kopi_sdk::{ValueKind, VmValue};

use crate::convert::{borrow_native_value, to_vm_value};
use crate::error::{Error, Result};
use crate::pin::PinKey;
use crate::scope::{Scope, Shared};
use crate::signature::Signature;
use crate::value::{OwnedValue, Value};

/// Body of an exported callback
pub type NativeCallback = dyn Fn(&Scope, &[Value<'_>]) -> Result<OwnedValue> + Send + Sync;

struct Exported {
    name: String,
    args: Vec<Signature>,
    ret: Signature,
    body: Box<NativeCallback>,
}

/// Exports native functions to the VM
#[derive(Clone)]
pub struct CallbackTable {
    shared: Arc<Shared>,
}

impl CallbackTable {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Pin `body` under a function signature and return the key the VM uses
    /// to call it
    pub fn export<F>(&self, name: &str, signature: &Signature, body: F) -> Result<PinKey>
    where
        F: Fn(&Scope, &[Value<'_>]) -> Result<OwnedValue> + Send + Sync + 'static,
    {
        let Signature::Function { args, ret } = signature else {
            return Err(Error::UnexpectedType {
                expected: "function signature".to_string(),
                found: signature.to_string(),
            });
        };
        let exported = Arc::new(Exported {
            name: name.to_string(),
            args: args.clone(),
            ret: (**ret).clone(),
            body: Box::new(body),
        });
        let key = self.shared.pins.pin(&exported);
        log::debug!("exported {}{} as {:?}", name, signature, key);
        Ok(key)
    }

    /// Entry point for the VM's native trampoline.
    ///
    /// Converts `args` by the stored signature, runs the callback, and
    /// converts its result back. A failure is raised as a VM exception and
    /// the zero value of the return type is returned. An unknown key is
    /// fatal.
    pub fn invoke(&self, key: PinKey, args: &[VmValue]) -> VmValue {
        let exported = self.shared.pins.get_as::<Exported>(key);
        let zero = VmValue::zero(exported.ret.kind().unwrap_or(ValueKind::Void));
        let scope = match Scope::open(Arc::clone(&self.shared)) {
            Ok(scope) => scope,
            Err(e) => {
                log::error!("callback {} cannot open a scope: {}", exported.name, e);
                return zero;
            }
        };

        log::trace!("callback {} with {} args", exported.name, args.len());
        match run(&scope, &exported, args) {
            Ok(VmValue::Object(obj)) => VmValue::Object(scope.finish(obj)),
            Ok(value) => value,
            Err(e) => {
                log::debug!("callback {} failed: {}", exported.name, e);
                scope.raise(&e);
                zero
            }
        }
    }

    /// Unpin an exported callback. The VM must not call the key afterwards.
    pub fn retire(&self, key: PinKey) {
        self.shared.pins.unpin(key);
    }
}

fn run(scope: &Scope, exported: &Exported, args: &[VmValue]) -> Result<VmValue> {
    if args.len() != exported.args.len() {
        return Err(Error::ArgumentCount {
            expected: exported.args.len(),
            got: args.len(),
        });
    }
    let natives = args
        .iter()
        .zip(&exported.args)
        .map(|(raw, signature)| borrow_native_value(scope, *raw, signature))
        .collect::<Result<Vec<_>>>()?;

    let result = Value::from((exported.body)(scope, &natives)?);
    if exported.ret == Signature::Void {
        return Ok(VmValue::Void);
    }
    match to_vm_value(scope, &result, &exported.ret)? {
        Some(arg) => Ok(arg.value),
        None => Err(Error::UnexpectedType {
            expected: exported.ret.to_string(),
            found: result.type_name().to_string(),
        }),
    }
}
