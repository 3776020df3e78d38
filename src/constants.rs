//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! environment variables where applicable.

/// Default namespace holding the controller's well-known ConfigMaps
pub const DEFAULT_SYSTEM_NAMESPACE: &str = "riff-system";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default period between full resyncs of every resource (10 hours)
///
/// Also the lease of a tracker entry.
pub const DEFAULT_RESYNC_PERIOD_SECS: u64 = 36_000;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;

/// Default delay before restarting a controller stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default number of reconciles running at once per controller
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 8;

/// Default interval between tracker sweeps (seconds)
pub const DEFAULT_TRACKER_SWEEP_INTERVAL_SECS: u64 = 300;

/// Number of tracker shards
pub const TRACKER_SHARDS: usize = 16;

/// ConfigMap in a parent's namespace holding the default image prefix
pub const BUILD_CONFIGMAP: &str = "riff-build";
pub const DEFAULT_IMAGE_PREFIX_KEY: &str = "default-image-prefix";

/// ConfigMap in the system namespace naming the processor sidecar image
pub const PROCESSOR_IMAGES_CONFIGMAP: &str = "riff-streaming-processor";
pub const PROCESSOR_IMAGE_KEY: &str = "processorImage";

/// ConfigMap in the system namespace naming the pulsar gateway images
pub const PULSAR_GATEWAY_IMAGES_CONFIGMAP: &str = "riff-streaming-pulsar-gateway";
pub const GATEWAY_IMAGE_KEY: &str = "gatewayImage";
pub const PROVISIONER_IMAGE_KEY: &str = "provisionerImage";

/// ConfigMap in the system namespace written with the ready builder images
pub const BUILDERS_CONFIGMAP: &str = "builders";
