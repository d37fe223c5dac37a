use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    #[envconfig(from = "HTTP_PORT", default = "8088")]
    pub http_port: u16,

    /// Restrict the controller to one namespace; watches all namespaces when unset.
    /// Env: MYOLLAMA_WATCH_NAMESPACE
    #[envconfig(from = "MYOLLAMA_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Field manager used for server-side apply of Services
    #[envconfig(from = "MYOLLAMA_FIELD_MANAGER", default = "myollama-operator")]
    pub field_manager: String,

    /// Requeue delay while a generation is still rolling out
    #[envconfig(from = "MYOLLAMA_REQUEUE_SECS", default = "15")]
    pub requeue_secs: u64,

    #[envconfig(from = "MYOLLAMA_ERROR_REQUEUE_SECS", default = "30")]
    pub error_requeue_secs: u64,

    /// Delete ReplicaSets of older generations once the current one is ready
    #[envconfig(from = "MYOLLAMA_PRUNE_STALE", default = "true")]
    pub prune_stale: bool,

    #[envconfig(nested)]
    pub health: HealthCheckConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct HealthCheckConfig {
    #[envconfig(from = "MYOLLAMA_HEALTH_ENABLED", default = "true")]
    pub enabled: bool,

    /// Upper bound for one generate call; the first answer after a pull can be slow.
    #[envconfig(from = "MYOLLAMA_HEALTH_TIMEOUT_SECS", default = "60")]
    pub timeout_secs: u64,

    /// Deadline the reconciler puts on one health call, below the request timeout.
    #[envconfig(from = "MYOLLAMA_HEALTH_RECONCILE_BUDGET_SECS", default = "20")]
    pub reconcile_budget_secs: u64,

    /// Re-check interval once the model answered affirmatively
    #[envconfig(from = "MYOLLAMA_HEALTH_INTERVAL_SECS", default = "300")]
    pub interval_secs: u64,

    #[envconfig(
        from = "MYOLLAMA_HEALTH_PROMPT",
        default = "Are you ready to answer questions?"
    )]
    pub prompt: String,

    /// host:port used instead of the in-cluster Service DNS name, e.g. when the
    /// operator runs outside the cluster behind a port-forward.
    /// Env: MYOLLAMA_HEALTH_ADDRESS_OVERRIDE
    #[envconfig(from = "MYOLLAMA_HEALTH_ADDRESS_OVERRIDE")]
    pub address_override: Option<String>,
}

impl OperatorConfig {
    pub fn requeue(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }

    /// Drop blank optional values so `MYOLLAMA_WATCH_NAMESPACE=` behaves like unset.
    pub fn normalized(mut self) -> Self {
        self.watch_namespace = self
            .watch_namespace
            .filter(|s| !s.trim().is_empty());
        self.health.address_override = self
            .health
            .address_override
            .filter(|s| !s.trim().is_empty());
        self
    }
}

impl HealthCheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn reconcile_budget(&self) -> Duration {
        Duration::from_secs(self.reconcile_budget_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
