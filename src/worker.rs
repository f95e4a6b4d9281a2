//! Cache worker lifecycle
//!
//! [`CacheWorker::activate`] is the single entry point: it rolls over stale
//! store generations, opens the live store and only then hands out the
//! interceptor and control channel, so no request is ever served against a
//! half-migrated storage root.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::{StorageRoot, Store};
use crate::config::CacheConfig;
use crate::control::{ControlHandle, ControlHandler};
use crate::error::CacheResult;
use crate::fetch::Fetcher;
use crate::governor::SizeGovernor;
use crate::policy::Interceptor;

/// A running cache: interceptor, size governor and control loop over one store
pub struct CacheWorker {
    interceptor: Interceptor,
    governor: SizeGovernor,
    control: ControlHandle,
    control_task: JoinHandle<()>,
}

impl CacheWorker {
    /// Performs generation rollover and starts the worker
    pub async fn activate(config: CacheConfig, fetcher: Arc<dyn Fetcher>) -> CacheResult<Self> {
        let root = StorageRoot::new(&config.root, config.write_mode);
        let removed = root.rollover(&config.store_name).await?;
        let store = root.open(&config.store_name).await?;
        info!(
            store = %config.store_name,
            root = %root.path().display(),
            removed = removed.len(),
            "cache worker activated"
        );

        let governor = SizeGovernor::new(store.clone(), &config);
        let interceptor = Interceptor::new(store.clone(), fetcher, governor.clone(), config.expiry)
            .with_background_eviction(config.background_eviction);
        let (control, control_task) =
            ControlHandle::spawn(ControlHandler::new(store), config.reply_timeout);

        Ok(Self {
            interceptor,
            governor,
            control,
            control_task,
        })
    }

    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }

    pub fn governor(&self) -> &SizeGovernor {
        &self.governor
    }

    /// A handle for posting control messages; cheap to clone
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn store(&self) -> &Store {
        self.interceptor.store()
    }

    /// Stops the control loop
    pub fn shutdown(self) {
        self.control_task.abort();
    }
}
