//! Core library for the smart-autoscaler controller
//!
//! This crate provides the core functionality for:
//! - Pulling metrics from a metrics store and the Kubernetes API
//! - Pattern classification and multi-model forecasting
//! - HPA target tuning, pre-scale minReplicas management, and autopilot resource tuning
//! - Priority arbitration between concurrent recommendations
//! - Health checks and observability

pub mod arbiter;
pub mod autopilot;
pub mod classifier;
pub mod config;
pub mod control_loop;
pub mod discovery;
pub mod error;
pub mod forecast;
pub mod health;
pub mod metrics_client;
pub mod notifier;
pub mod observability;
pub mod prescale;
pub mod stats;
pub mod tss;
pub mod types;
pub mod validator;

pub use arbiter::PriorityArbiter;
pub use autopilot::AutopilotManager;
pub use config::{AutopilotLevelConfig, Config, ConfigWatcher, MetricsAuthConfig, WorkloadConfig};
pub use control_loop::{ControlLoop, ControlLoopConfig, TickReport, WorkloadOutcome};
pub use discovery::{Discovery, DiscoveryConfig, DiscoveryResult, StaticWorkloadSpec};
pub use error::{ControllerError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use notifier::{EventKind, NotificationEvent, NotificationSink, Notifier, NullSink};
pub use observability::{AgentMetrics, StructuredLogger};
pub use prescale::PreScaleManager;
pub use tss::TimeSeriesStore;
pub use validator::Validator;
