//! Service supervisor.
//!
//! Services start in configuration order and stop in the exact reverse. Both
//! directions are best effort: a failing service is logged and the batch
//! moves on, handing the last error back to the caller.

use crate::config::ServiceSpec;
use crate::error::Result;
use crate::reaper::ChildRegistry;
use crate::service::{ServiceInstance, ServiceStatus, SupervisorOptions};
use crate::util::{in_reverse, LastError};
use std::sync::Arc;
use tracing::{error, info};

/// Owns every service instance.
pub struct ServiceSupervisor {
    specs: Vec<ServiceSpec>,
    options: SupervisorOptions,
    registry: Arc<ChildRegistry>,
    instances: Vec<ServiceInstance>,
}

impl ServiceSupervisor {
    /// Create a supervisor for `specs`; nothing is started yet.
    pub fn new(
        specs: Vec<ServiceSpec>,
        options: SupervisorOptions,
        registry: Arc<ChildRegistry>,
    ) -> Self {
        Self {
            specs,
            options,
            registry,
            instances: Vec::new(),
        }
    }

    /// Started instances, in start order.
    pub fn instances(&self) -> &[ServiceInstance] {
        &self.instances
    }

    /// Start every configured service in order.
    ///
    /// Oneshot services complete before the next service starts. Failures do
    /// not stop the remaining services from starting.
    pub async fn start_all(&mut self) -> Result<()> {
        info!(count = self.specs.len(), "Starting services");

        let mut last = LastError::new();
        for spec in std::mem::take(&mut self.specs) {
            let instance = ServiceInstance::new(spec, self.options, Arc::clone(&self.registry));

            let result = instance.start().await;
            if let Err(ref e) = result {
                error!(service = %instance.name(), error = %e, "Failed to start service");
            }
            last.record(result);

            self.instances.push(instance);
        }

        if last.failures() > 0 {
            error!(failed = last.failures(), "Some services failed to start");
        }
        last.into_result()
    }

    /// Stop every started service, last started first.
    pub async fn stop_all(&self) -> Result<()> {
        info!(count = self.instances.len(), "Stopping services");

        let mut last = LastError::new();
        for instance in in_reverse(&self.instances) {
            let result = instance.stop().await;
            if let Err(ref e) = result {
                error!(service = %instance.name(), error = %e, "Failed to stop service");
            }
            last.record(result);
        }

        last.into_result()
    }

    /// Status of every started service, in start order.
    pub fn statuses(&self) -> Vec<ServiceStatus> {
        self.instances.iter().map(ServiceInstance::status).collect()
    }
}
