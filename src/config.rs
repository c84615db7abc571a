use std::time::Duration;

/// Engine-wide settings, built once at process start and passed explicitly
/// to every component that needs them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of threads in the blocking worker pool.
    pub worker_threads: usize,
    /// Executions slower than this are logged with SQL and parameters.
    pub slow_query_threshold: Duration,
    /// Fallback page limit when a query method declares none.
    pub default_limit: Option<u64>,
    /// Fallback page-limit ceiling when a query method declares none.
    pub max_limit: Option<u64>,
    /// Rows a consumer requests from the producer per refill.
    pub prefetch: usize,
    /// Deliveries a sink absorbs without demand before raising a
    /// backpressure violation.
    pub stream_buffer: usize,
    /// Value substituted for the `{schema}` template token.
    pub schema: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            slow_query_threshold: Duration::from_secs(1),
            default_limit: None,
            max_limit: None,
            prefetch: 32,
            stream_buffer: 256,
            schema: None,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads.max(1);
        self
    }

    #[must_use]
    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_default_limit(mut self, limit: u64) -> Self {
        self.default_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_max_limit(mut self, limit: u64) -> Self {
        self.max_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    #[must_use]
    pub fn with_stream_buffer(mut self, stream_buffer: usize) -> Self {
        self.stream_buffer = stream_buffer.max(1);
        self
    }

    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}
