//! Bridge — the entry point that owns the registry and pin table

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use kopi_sdk::VmRuntime;

use crate::callback::CallbackTable;
use crate::codec::{ErrorCodec, JsonCodec};
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::pin::PinTable;
use crate::registry::Registry;
use crate::scope::{Attachment, Scope, Shared};

/// A bridge to one VM instance.
///
/// Cheap to clone; every clone shares the same registry, pin table, and
/// codec.
#[derive(Clone)]
pub struct Bridge {
    shared: Arc<Shared>,
}

impl Bridge {
    /// Bridge with the default configuration and JSON error codec
    pub fn new(runtime: Arc<dyn VmRuntime>) -> Result<Self> {
        Self::with_config(runtime, BridgeConfig::default())
    }

    /// Bridge with a custom configuration
    pub fn with_config(runtime: Arc<dyn VmRuntime>, config: BridgeConfig) -> Result<Self> {
        Self::with_codec(runtime, config, Arc::new(JsonCodec))
    }

    /// Bridge with a custom configuration and error codec.
    ///
    /// Validates the configuration and bootstraps the registry on the
    /// calling thread, attaching it for the duration if needed.
    pub fn with_codec(runtime: Arc<dyn VmRuntime>, config: BridgeConfig, codec: Arc<dyn ErrorCodec>) -> Result<Self> {
        config.validate().map_err(|e| Error::Config(e.to_string()))?;

        let attachment = Attachment::acquire(&runtime)?;
        let env = attachment.env();
        env.push_local_frame(config.local_frame_capacity)?;
        let registry = Registry::bootstrap(env, &runtime);
        env.pop_local_frame(None);
        let registry = registry?;
        drop(attachment);

        log::debug!("bridge ready");
        Ok(Self {
            shared: Arc::new(Shared {
                runtime,
                registry,
                codec,
                pins: PinTable::new(config.fatal_policy),
                config,
                worker_seq: AtomicUsize::new(0),
            }),
        })
    }

    /// Open a scope on the current thread
    pub fn scope(&self) -> Result<Scope> {
        Scope::open(Arc::clone(&self.shared))
    }

    /// Run `f` inside a fresh scope
    pub fn with_scope<R>(&self, f: impl FnOnce(&Scope) -> Result<R>) -> Result<R> {
        let scope = self.scope()?;
        f(&scope)
    }

    /// Table of values pinned for the VM
    pub fn pins(&self) -> &PinTable {
        &self.shared.pins
    }

    /// Async callback gateway
    pub fn gateway(&self) -> Gateway {
        Gateway::new(Arc::clone(&self.shared))
    }

    /// Native callbacks exported to the VM
    pub fn callbacks(&self) -> CallbackTable {
        CallbackTable::new(Arc::clone(&self.shared))
    }

    /// Resolved classes and members
    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    /// Active configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }
}
