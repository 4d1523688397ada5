//! Centralized configuration for Contend.
//!
//! Every delay, timeout and backoff the engine uses is defined here so tests
//! can run the same logic at compressed or virtual timescales.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ContendError, Result};

/// Central configuration for a simulation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContendConfig {
    pub timing: ActorTiming,
    pub strategy: StrategyConfig,
    pub controller: ControllerConfig,
}

/// Pacing of the actor cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorTiming {
    /// Delay spent thinking before each request
    pub think: Duration,
    /// Time spent working while holding resources
    pub eat: Duration,
    /// Extra work time added per actor index
    pub eat_skew: Duration,
    /// Pause after releasing before thinking again
    pub rest: Duration,
    /// Pause between taking the first and the second resource
    pub pickup_gap: Duration,
}

impl Default for ActorTiming {
    fn default() -> Self {
        Self {
            think: Duration::from_millis(100),
            eat: Duration::from_millis(200),
            eat_skew: Duration::ZERO,
            rest: Duration::from_millis(100),
            pickup_gap: Duration::ZERO,
        }
    }
}

impl ActorTiming {
    /// Returns how long the actor with `index` works per cycle.
    ///
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn eat_for(&self, index: usize) -> Duration {
        let skew = u32::try_from(index)
            .ok()
            .and_then(|index| self.eat_skew.checked_mul(index))
            .unwrap_or(Duration::MAX);
        self.eat.saturating_add(skew)
    }
}

/// Uniform random delay range, inclusive of `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffRange {
    pub min: Duration,
    pub max: Duration,
}

impl BackoffRange {
    /// Creates a range from millisecond bounds.
    pub const fn from_millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }
}

/// Parameters consumed by the acquisition strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Bounded wait per resource for try-acquire strategies (zero = probe)
    pub acquire_timeout: Duration,
    /// Timeout-Retry pause after giving up a partial set
    pub retry_pause: Duration,
    /// Random-Backoff delay after failing to get the first resource
    pub backoff_first: BackoffRange,
    /// Random-Backoff delay after failing to get the second resource
    pub backoff_second: BackoffRange,
    /// Priority-Biased actor that always goes first
    pub designated_actor: usize,
    /// Backoff of the designated actor
    pub priority_backoff: Duration,
    /// Backoff of every other actor, strictly longer than `priority_backoff`
    pub yield_backoff: Duration,
    /// Re-ask interval for arbiter-mediated strategies
    pub arbiter_poll: Duration,
    /// Aging ticker period
    pub aging_period: Duration,
    /// Priority added to each waiting actor per aging tick
    pub aging_increment: u64,
    /// Polite baseline: how long the first resource is held before probing
    pub polite_hold: Duration,
    /// Polite baseline: pause after stepping aside
    pub polite_pause: Duration,
    /// Starvation baseline: actors `0..greedy_actors` queue without bound
    pub greedy_actors: usize,
    /// Starvation baseline: work time of a greedy actor
    pub greedy_hold: Duration,
    /// Starvation baseline: rest of a greedy actor before queueing again
    pub greedy_rest: Duration,
    /// Starvation baseline: bounded wait of a patient actor
    pub patient_timeout: Duration,
    /// Starvation baseline: work time of a patient actor
    pub patient_hold: Duration,
    /// Starvation baseline: pause of a patient actor after giving up or working
    pub patient_pause: Duration,
    /// Seed for reproducible random backoff
    pub seed: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_millis(100),
            retry_pause: Duration::from_millis(50),
            backoff_first: BackoffRange::from_millis(50, 300),
            backoff_second: BackoffRange::from_millis(100, 500),
            designated_actor: 0,
            priority_backoff: Duration::from_millis(100),
            yield_backoff: Duration::from_millis(300),
            arbiter_poll: Duration::from_millis(100),
            aging_period: Duration::from_millis(500),
            aging_increment: 1,
            polite_hold: Duration::from_millis(100),
            polite_pause: Duration::from_millis(100),
            greedy_actors: 3,
            greedy_hold: Duration::from_millis(100),
            greedy_rest: Duration::from_millis(50),
            patient_timeout: Duration::from_millis(100),
            patient_hold: Duration::from_millis(50),
            patient_pause: Duration::from_millis(200),
            seed: 0x5eed,
        }
    }
}

impl StrategyConfig {
    /// Validates cross-field constraints.
    ///
    /// # Errors
    /// - `ContendError::Configuration` - Inverted backoff ranges, a yield
    ///   backoff that does not exceed the priority backoff, a zero aging
    ///   increment or period, or zero pacing that would make retries spin
    pub fn validate(&self) -> Result<()> {
        for (name, range) in [
            ("backoff_first", self.backoff_first),
            ("backoff_second", self.backoff_second),
        ] {
            if range.min > range.max {
                return Err(configuration(format!(
                    "{name} minimum {:?} exceeds maximum {:?}",
                    range.min, range.max
                )));
            }
        }

        if self.yield_backoff <= self.priority_backoff {
            return Err(configuration(format!(
                "yield_backoff {:?} must be longer than priority_backoff {:?}",
                self.yield_backoff, self.priority_backoff
            )));
        }

        if self.aging_increment == 0 || self.aging_period.is_zero() {
            return Err(configuration("aging needs a non-zero increment and period"));
        }

        // Strategies that only ever probe rely on these pauses to let time pass.
        for (name, pause) in [
            ("arbiter_poll", self.arbiter_poll),
            ("priority_backoff", self.priority_backoff),
            ("backoff_first.max", self.backoff_first.max),
            ("backoff_second.max", self.backoff_second.max),
            ("greedy_hold", self.greedy_hold),
            ("patient_pause", self.patient_pause),
        ] {
            if pause.is_zero() {
                return Err(configuration(format!("{name} must be non-zero")));
            }
        }

        if self.polite_hold.is_zero() && self.polite_pause.is_zero() {
            return Err(configuration("polite_hold and polite_pause cannot both be zero"));
        }

        if self.acquire_timeout.is_zero() {
            for (name, pause) in [
                ("retry_pause", self.retry_pause),
                ("polite_pause", self.polite_pause),
            ] {
                if pause.is_zero() {
                    return Err(configuration(format!(
                        "{name} must be non-zero when acquire_timeout is zero"
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Controller-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// How long `stop_and_join` waits for each actor
    pub join_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(1),
        }
    }
}

impl ContendConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(think) = env_millis("CONTEND_THINK_MS") {
            config.timing.think = think;
        }

        if let Some(eat) = env_millis("CONTEND_EAT_MS") {
            config.timing.eat = eat;
        }

        if let Some(rest) = env_millis("CONTEND_REST_MS") {
            config.timing.rest = rest;
        }

        if let Some(timeout) = env_millis("CONTEND_ACQUIRE_TIMEOUT_MS") {
            config.strategy.acquire_timeout = timeout;
        }

        if let Some(timeout) = env_millis("CONTEND_JOIN_TIMEOUT_MS") {
            config.controller.join_timeout = timeout;
        }

        if let Ok(seed) = std::env::var("CONTEND_SEED") {
            if let Ok(seed_value) = seed.parse::<u64>() {
                config.strategy.seed = seed_value;
            }
        }

        config
    }

    /// Creates a configuration for tests: fixed seed, generous join timeout.
    pub fn for_testing() -> Self {
        Self {
            strategy: StrategyConfig {
                seed: 42,
                ..Default::default()
            },
            controller: ControllerConfig {
                join_timeout: Duration::from_secs(2),
            },
            ..Default::default()
        }
    }

    /// Validates the whole configuration.
    ///
    /// # Errors
    /// - `ContendError::Configuration` - See [`StrategyConfig::validate`], or a
    ///   zero join timeout
    pub fn validate(&self) -> Result<()> {
        self.strategy.validate()?;
        if self.controller.join_timeout.is_zero() {
            return Err(configuration("join_timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
}

fn configuration(reason: impl Into<String>) -> ContendError {
    ContendError::Configuration {
        reason: reason.into(),
    }
}
