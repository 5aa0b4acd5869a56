//! Exception bridge
//!
//! VM exceptions become [`Error`] values, and native errors become VM
//! exceptions. Everything here talks to the environment directly through
//! [`raw_call`] rather than the dispatcher: the dispatcher itself drains
//! exceptions through this module, and a failure while bridging must not
//! recurse.

use kopi_sdk::{MethodId, RawHandle, ValueKind, VmEnv, VmValue};

use crate::error::Error;
use crate::scope::Scope;

const UNKNOWN_CLASS: &str = "<unknown>";

/// One env call plus a direct exception check. A raised exception is cleared
/// and reported as `None`.
pub(crate) fn raw_call(
    env: &dyn VmEnv,
    obj: RawHandle,
    method: MethodId,
    ret: ValueKind,
    args: &[VmValue],
) -> Option<VmValue> {
    let value = env.call_method(obj, method, ret, args);
    if env.exception_check() {
        env.exception_clear();
        return None;
    }
    Some(value)
}

/// Decode a string-returning call, deleting the intermediate local
fn raw_string(env: &dyn VmEnv, obj: RawHandle, method: MethodId) -> Option<Option<String>> {
    let value = raw_call(env, obj, method, ValueKind::Object, &[])?;
    let Some(local) = value.as_object()? else {
        return Some(None);
    };
    let text = env.string_utf(local);
    env.delete_local_ref(local);
    text.map(Some)
}

/// Take the pending exception, if any, and convert it. The exception is
/// cleared before anything else touches the environment.
pub(crate) fn drain(scope: &Scope) -> Option<Error> {
    let env = scope.env();
    if !env.exception_check() {
        return None;
    }
    let thrown = env.exception_occurred();
    env.exception_clear();

    let Some(thrown) = thrown else {
        log::warn!("exception pending but not retrievable");
        return Some(Error::Vm {
            class: UNKNOWN_CLASS.to_string(),
            message: String::new(),
        });
    };
    let error = describe(scope, thrown);
    env.delete_local_ref(thrown);
    log::trace!("drained exception: {}", error);
    Some(error)
}

fn describe(scope: &Scope, thrown: RawHandle) -> Error {
    let env = scope.env();
    let well_known = &scope.registry().well_known;

    if env.is_instance_of(thrown, well_known.error.raw()) {
        return decode_structured(scope, thrown);
    }

    let message = if env.is_instance_of(thrown, well_known.throwable.raw()) {
        raw_string(env, thrown, well_known.get_message)
    } else {
        None
    };
    let message = match message {
        Some(message) => message.unwrap_or_default(),
        None => {
            log::warn!("could not read exception message");
            "<message unavailable>".to_string()
        }
    };

    let class = env.get_object_class(thrown);
    let class_name = raw_string(env, class, well_known.get_name).flatten();
    env.delete_local_ref(class);
    let class = class_name.unwrap_or_else(|| {
        log::warn!("could not read exception class name");
        UNKNOWN_CLASS.to_string()
    });

    Error::Vm { class, message }
}

fn decode_structured(scope: &Scope, thrown: RawHandle) -> Error {
    let env = scope.env();
    let well_known = &scope.registry().well_known;
    let payload = raw_call(env, thrown, well_known.to_bytes, ValueKind::Object, &[])
        .and_then(|value| value.as_object())
        .flatten();
    let Some(payload) = payload else {
        log::warn!("structured exception without payload");
        return Error::Vm {
            class: crate::signature::ERROR_CLASS.replace('/', "."),
            message: "<payload unavailable>".to_string(),
        };
    };
    let bytes = env.byte_array_elements(payload);
    env.delete_local_ref(payload);

    match bytes.map(|bytes| scope.shared().codec.decode(&bytes)) {
        Some(Ok(structured)) => Error::Structured(structured),
        Some(Err(reason)) => {
            log::warn!("structured exception payload did not decode: {}", reason);
            Error::Codec(reason)
        }
        None => Error::Vm {
            class: crate::signature::ERROR_CLASS.replace('/', "."),
            message: "<payload unavailable>".to_string(),
        },
    }
}

/// Throw `error` into the VM as a structured exception. Falls back to a
/// plain `RuntimeException` carrying the display text when the structured
/// form cannot be built.
pub(crate) fn raise(scope: &Scope, error: &Error) {
    let env = scope.env();
    let well_known = &scope.registry().well_known;
    let structured = error.to_structured();

    match scope.shared().codec.encode(&structured) {
        Ok(bytes) => {
            if let Some(thrown) = build_structured(env, well_known.error.raw(), well_known.from_bytes, &bytes) {
                env.throw(thrown);
                env.delete_local_ref(thrown);
                log::debug!("raised structured exception [{}]", structured.code);
                return;
            }
            log::warn!("could not build structured exception for [{}]", structured.code);
        }
        Err(reason) => log::warn!("could not encode [{}]: {}", structured.code, reason),
    }
    env.throw_new(well_known.runtime_exception.raw(), &error.to_string());
}

fn build_structured(env: &dyn VmEnv, class: RawHandle, factory: MethodId, bytes: &[u8]) -> Option<RawHandle> {
    let Some(payload) = env.new_byte_array(bytes) else {
        env.exception_clear();
        return None;
    };
    let value = env.call_static_method(class, factory, ValueKind::Object, &[VmValue::Object(Some(payload))]);
    env.delete_local_ref(payload);
    if env.exception_check() {
        env.exception_clear();
        return None;
    }
    value.as_object().flatten()
}

impl Scope {
    /// Throw a native error into the VM. The exception stays pending until
    /// control returns to VM code.
    pub fn raise(&self, error: &Error) {
        raise(self, error);
    }
}
