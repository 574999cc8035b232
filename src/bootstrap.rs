//! # Delivery Bootstrap
//!
//! Wires the delivery core from a validated [`DeliveryConfig`]: one bulkhead and one
//! circuit breaker per broker, a shared pipeline, the dead letter router with its file
//! fallback, the publisher, and the reprocessor.
//!
//! ```rust,no_run
//! use event_delivery::bootstrap::DeliveryCore;
//! use event_delivery::config::ConfigManager;
//! use event_delivery::messaging::InMemoryBroker;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let core = DeliveryCore::from_config(manager.config(), Arc::new(InMemoryBroker::new()))?;
//!
//! let receipt = core
//!     .publisher()
//!     .publish("order.created", serde_json::json!({"order_id": 42}), None)
//!     .await?;
//! println!("delivered: {}", receipt.is_delivered());
//! # Ok(())
//! # }
//! ```

use crate::config::DeliveryConfig;
use crate::constants::system::EVENT_DELIVERY_VERSION;
use crate::dead_letter::{DeadLetterReprocessor, DeadLetterRouter, FileFallbackStore};
use crate::error::{DeliveryError, DeliveryResult};
use crate::messaging::{DeliveryPipeline, EventPublisher, MessageBroker};
use crate::resilience::{
    Bulkhead, CircuitBreaker, MonitoringSink, RetryPolicy, TracingMonitoringSink,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Fully wired delivery components sharing one pipeline
#[derive(Debug, Clone)]
pub struct DeliveryCore {
    pipeline: Arc<DeliveryPipeline>,
    router: Arc<DeadLetterRouter>,
    publisher: EventPublisher,
    reprocessor: Arc<DeadLetterReprocessor>,
}

impl DeliveryCore {
    /// Build the core, reporting through tracing
    pub fn from_config(
        config: &DeliveryConfig,
        broker: Arc<dyn MessageBroker>,
    ) -> DeliveryResult<Self> {
        Self::from_config_with_sink(config, broker, Arc::new(TracingMonitoringSink))
    }

    /// Build the core, reporting transitions, publishes and dead letters to `sink`
    pub fn from_config_with_sink(
        config: &DeliveryConfig,
        broker: Arc<dyn MessageBroker>,
        sink: Arc<dyn MonitoringSink>,
    ) -> DeliveryResult<Self> {
        config
            .validate()
            .map_err(|e| DeliveryError::configuration("bootstrap", e.to_string()))?;

        let component = config.broker.component_name.as_str();
        let bulkhead = Arc::new(Bulkhead::with_sink(
            component,
            config.bulkhead.to_resilience_config(),
            Arc::clone(&sink),
        ));
        let breaker = Arc::new(CircuitBreaker::with_sink(
            component,
            config.circuit_breaker.to_resilience_config(),
            Arc::clone(&sink),
        ));
        let retry = RetryPolicy::new(config.retry.to_resilience_config());

        let pipeline = Arc::new(DeliveryPipeline::new(
            broker,
            bulkhead,
            breaker,
            retry,
            config.broker.send_timeout(),
            sink,
        ));

        let router = Arc::new(DeadLetterRouter::new(
            Arc::clone(&pipeline),
            Arc::new(FileFallbackStore::new(&config.dead_letter.fallback_dir)),
            config.dead_letter.topics(),
        ));

        let publisher = EventPublisher::new(Arc::clone(&pipeline), Arc::clone(&router));
        let reprocessor = Arc::new(DeadLetterReprocessor::new(
            Arc::clone(&pipeline),
            Arc::clone(&router),
            config.reprocessor_config(),
        ));

        info!(
            version = EVENT_DELIVERY_VERSION,
            component = %component,
            broker_type = pipeline.broker().broker_type(),
            fallback_dir = %config.dead_letter.fallback_dir.display(),
            "🚀 Delivery core initialized"
        );

        Ok(Self {
            pipeline,
            router,
            publisher,
            reprocessor,
        })
    }

    pub fn pipeline(&self) -> &Arc<DeliveryPipeline> {
        &self.pipeline
    }

    pub fn router(&self) -> &Arc<DeadLetterRouter> {
        &self.router
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn reprocessor(&self) -> &Arc<DeadLetterReprocessor> {
        &self.reprocessor
    }

    /// Run the reprocessor loop on the current runtime until the handle is stopped
    pub fn spawn_reprocessor(&self) -> ReprocessorHandle {
        let cancel = CancellationToken::new();
        let reprocessor = Arc::clone(&self.reprocessor);
        let token = cancel.clone();
        let join = tokio::spawn(async move { reprocessor.run(token).await });
        ReprocessorHandle {
            cancel,
            join: Some(join),
        }
    }
}

/// Lifecycle handle for a spawned reprocessor loop
#[derive(Debug)]
pub struct ReprocessorHandle {
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl ReprocessorHandle {
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Token observed by the loop; cancelling it stops the loop
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Signal the loop to stop and wait for it to exit
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        match self.join.take() {
            Some(join) => {
                if let Err(e) = join.await {
                    warn!(error = %e, "Reprocessor task ended abnormally");
                }
                info!("🛑 Reprocessor stopped");
            }
            None => warn!("Reprocessor already stopped"),
        }
    }
}

impl Drop for ReprocessorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
