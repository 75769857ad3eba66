use std::sync::Arc;

use crate::config::{ManagerConfig, ShardCount};
use crate::core::ShardManager;
use crate::error::ShardError;
use crate::events::Bus;
use crate::host::WorkerHost;
use crate::sizing::{AutoConfig, AutoStrategy, HttpSizingOracle, ManualStrategy, SizingOracle, SizingStrategy};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Builder for a [`ShardManager`] with optional collaborators.
pub struct ShardManagerBuilder {
    cfg: ManagerConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    strategy: Option<Arc<dyn SizingStrategy>>,
    host: Option<Arc<dyn WorkerHost>>,
    oracle: Option<Arc<dyn SizingOracle>>,
}

impl ShardManagerBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: ManagerConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            strategy: None,
            host: None,
            oracle: None,
        }
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive fleet events through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Overrides the sizing strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn SizingStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Overrides the worker host derived from `cfg.entry`.
    pub fn with_host(mut self, host: Arc<dyn WorkerHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Oracle for the default auto strategy (instead of the HTTP oracle).
    pub fn with_oracle(mut self, oracle: Arc<dyn SizingOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Validates the configuration and builds the manager.
    ///
    /// Without an explicit strategy, `Fixed(n)` gets a [`ManualStrategy`] and
    /// `Auto` gets an [`AutoStrategy`] backed by the configured oracle, or by an
    /// [`HttpSizingOracle`] using `cfg.token`. `Auto` with neither fails with
    /// [`ShardError::Config`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<ShardManager, ShardError> {
        self.cfg.validate()?;

        let strategy = match self.strategy {
            Some(s) => s,
            None => default_strategy(&self.cfg, self.oracle)?,
        };
        let host = self.host.unwrap_or_else(|| self.cfg.entry.host());
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = SubscriberSet::new(self.subscribers, bus.clone());

        Ok(ShardManager::from_parts(self.cfg, host, strategy, bus, subs))
    }
}

fn default_strategy(
    cfg: &ManagerConfig,
    oracle: Option<Arc<dyn SizingOracle>>,
) -> Result<Arc<dyn SizingStrategy>, ShardError> {
    match cfg.total_shards {
        ShardCount::Fixed(n) => {
            let manual = ManualStrategy::new(n);
            Ok(Arc::new(match &cfg.shard_list {
                Some(list) => manual.with_list(list.clone()),
                None => manual,
            }))
        }
        ShardCount::Auto => {
            let oracle: Arc<dyn SizingOracle> = match (oracle, &cfg.token) {
                (Some(o), _) => o,
                (None, Some(token)) => Arc::new(HttpSizingOracle::new(token.clone())),
                (None, None) => {
                    return Err(ShardError::Config {
                        reason: "auto shard count needs a sizing oracle or a token".into(),
                    });
                }
            };
            Ok(Arc::new(AutoStrategy::new(AutoConfig::default(), oracle)))
        }
    }
}

impl ShardManager {
    /// Starts building a manager for `cfg`.
    pub fn builder(cfg: ManagerConfig) -> ShardManagerBuilder {
        ShardManagerBuilder::new(cfg)
    }
}
