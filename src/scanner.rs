//! Scan-pass driver
//!
//! Connects a [`PatternTracker`] to the outside world through four narrow,
//! synchronous collaborator traits. One pass samples the market score once,
//! fans the symbol list out over a bounded rayon pool, and routes every
//! emitted observation to persistence and alerting.
//!
//! Collaborator failures are values, not panics: a failing symbol is
//! recorded in the [`PassReport`] and the pass continues. Only a failed
//! market-score sample aborts the pass, since every detector in the pass
//! depends on it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    ContextProvider, DefaultContextProvider, PatternError, PatternObservation, PatternState,
    PatternTracker, PriceBar, Tier,
};

// ============================================================
// ERRORS
// ============================================================

/// Failure reported by an external collaborator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("rejected: {0}")]
    Rejected(String),
}

/// Why one symbol could not be (fully) processed
#[derive(Debug, Clone, thiserror::Error)]
pub enum SymbolError {
    #[error("market data: {0}")]
    Data(#[source] CollaboratorError),

    #[error(transparent)]
    InvalidBars(#[from] PatternError),

    #[error("persistence: {0}")]
    Sink(#[source] CollaboratorError),

    #[error("alert: {0}")]
    Alert(#[source] CollaboratorError),
}

/// Error from scanning a single symbol
#[derive(Debug, Clone, thiserror::Error)]
#[error("{symbol}: {error}")]
pub struct ScanError {
    pub symbol: String,
    pub error: SymbolError,
}

/// Errors that abort a pass, or prevent building the scanner
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    #[error("market score unavailable: {0}")]
    MarketScore(#[source] CollaboratorError),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

// ============================================================
// COLLABORATORS
// ============================================================

/// Source of daily bars
pub trait MarketDataSource: Send + Sync {
    /// Bars for `symbol` over `period` (e.g. "1y"), oldest first.
    /// `Ok(None)` means no data; the symbol is skipped, not failed.
    fn fetch_series(
        &self,
        symbol: &str,
        period: &str,
    ) -> std::result::Result<Option<Vec<PriceBar>>, CollaboratorError>;
}

/// Overall market-condition score (0..=100), sampled once per pass
pub trait MarketCondition: Send + Sync {
    fn market_score(&self) -> std::result::Result<u8, CollaboratorError>;
}

/// Durable storage keyed by (symbol, pattern_type)
pub trait PatternSink: Send + Sync {
    fn upsert(&self, observation: &PatternObservation) -> std::result::Result<(), CollaboratorError>;
}

/// Notification delivery; the message for each state is the implementor's concern
pub trait AlertSink: Send + Sync {
    fn notify(
        &self,
        state: PatternState,
        observation: &PatternObservation,
    ) -> std::result::Result<(), CollaboratorError>;
}

// ============================================================
// CONFIG / CANCELLATION / REPORT
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Symbols processed concurrently
    pub max_workers: usize,
    /// History requested from the data source
    pub history_period: String,
    /// Series shorter than this are skipped before detection
    pub min_history: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            history_period: "1y".to_string(),
            min_history: 60,
        }
    }
}

/// Cooperative stop flag, checked before each symbol
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Clear the flag so the next pass runs
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Summary of one pass
#[derive(Debug, Clone)]
pub struct PassReport {
    pub tier: Tier,
    pub market_score: u8,
    /// Symbols that reached detection
    pub scanned: usize,
    /// Symbols with no data or too little history
    pub skipped: usize,
    /// Observations emitted (and handed to the sink)
    pub patterns_found: usize,
    /// The pass stopped early on the cancel token
    pub cancelled: bool,
    pub errors: Vec<ScanError>,
}

enum SymbolOutcome {
    Cancelled,
    Skipped,
    Failed(ScanError),
    Scanned { found: usize, errors: Vec<ScanError> },
}

// ============================================================
// SCANNER
// ============================================================

/// Runs tier passes over a symbol list.
///
/// The worker pool is built once and reused by every pass.
pub struct Scanner<'a, C: ContextProvider = DefaultContextProvider> {
    tracker: &'a PatternTracker<C>,
    data: &'a dyn MarketDataSource,
    market: &'a dyn MarketCondition,
    sink: &'a dyn PatternSink,
    alerts: Option<&'a dyn AlertSink>,
    config: ScannerConfig,
    cancel: CancelToken,
    pool: rayon::ThreadPool,
}

fn build_pool(max_workers: usize) -> std::result::Result<rayon::ThreadPool, PassError> {
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(max_workers.max(1))
        .thread_name(|i| format!("scan-worker-{i}"))
        .build()?)
}

impl<'a, C: ContextProvider> Scanner<'a, C> {
    pub fn new(
        tracker: &'a PatternTracker<C>,
        data: &'a dyn MarketDataSource,
        market: &'a dyn MarketCondition,
        sink: &'a dyn PatternSink,
    ) -> std::result::Result<Self, PassError> {
        let config = ScannerConfig::default();
        Ok(Self {
            tracker,
            data,
            market,
            sink,
            alerts: None,
            pool: build_pool(config.max_workers)?,
            config,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_alerts(mut self, alerts: &'a dyn AlertSink) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Replace the config; the pool is rebuilt only if `max_workers` changed.
    pub fn with_config(mut self, config: ScannerConfig) -> std::result::Result<Self, PassError> {
        if config.max_workers.max(1) != self.pool.current_num_threads() {
            self.pool = build_pool(config.max_workers)?;
        }
        self.config = config;
        Ok(self)
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle for stopping a running pass from another thread
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Threads in the worker pool
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run one tier over `symbols`.
    ///
    /// Each symbol's cache entries are consistent on return whether or not
    /// the pass was cancelled part way.
    pub fn run_pass<S: AsRef<str> + Sync>(
        &self,
        tier: Tier,
        symbols: &[S],
    ) -> std::result::Result<PassReport, PassError> {
        let market_score = self.market.market_score().map_err(|e| {
            warn!(tier = %tier, error = %e, "market score unavailable, aborting pass");
            PassError::MarketScore(e)
        })?;

        info!(
            tier = %tier,
            symbols = symbols.len(),
            market_score,
            "starting scan pass"
        );

        let outcomes: Vec<SymbolOutcome> = self.pool.install(|| {
            symbols
                .par_iter()
                .map(|s| self.scan_symbol(tier, s.as_ref(), market_score))
                .collect()
        });

        let mut report = PassReport {
            tier,
            market_score,
            scanned: 0,
            skipped: 0,
            patterns_found: 0,
            cancelled: false,
            errors: Vec::new(),
        };

        for outcome in outcomes {
            match outcome {
                SymbolOutcome::Cancelled => report.cancelled = true,
                SymbolOutcome::Skipped => report.skipped += 1,
                SymbolOutcome::Failed(e) => report.errors.push(e),
                SymbolOutcome::Scanned { found, errors } => {
                    report.scanned += 1;
                    report.patterns_found += found;
                    report.errors.extend(errors);
                }
            }
        }

        info!(
            tier = %tier,
            scanned = report.scanned,
            skipped = report.skipped,
            patterns_found = report.patterns_found,
            errors = report.errors.len(),
            cancelled = report.cancelled,
            "scan pass finished"
        );

        Ok(report)
    }

    fn scan_symbol(&self, tier: Tier, symbol: &str, market_score: u8) -> SymbolOutcome {
        if self.cancel.is_cancelled() {
            return SymbolOutcome::Cancelled;
        }

        let fail = |error: SymbolError| ScanError {
            symbol: symbol.to_string(),
            error,
        };

        let bars = match self.data.fetch_series(symbol, &self.config.history_period) {
            Ok(Some(bars)) => bars,
            Ok(None) => {
                debug!(symbol = %symbol, "no data, skipping");
                return SymbolOutcome::Skipped;
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "market data fetch failed");
                return SymbolOutcome::Failed(fail(SymbolError::Data(e)));
            }
        };

        if bars.len() < self.config.min_history {
            debug!(symbol = %symbol, bars = bars.len(), "history too short, skipping");
            return SymbolOutcome::Skipped;
        }

        let engine = self.tracker.engine();
        if engine.config().validate_data {
            if let Err(e) = engine.validate_bars(&bars) {
                warn!(symbol = %symbol, error = %e, "invalid bars");
                return SymbolOutcome::Failed(fail(SymbolError::InvalidBars(e)));
            }
        }

        let emitted = self.tracker.run_tier(tier, &bars, symbol, market_score);
        let mut errors = Vec::new();

        for obs in &emitted {
            debug!(
                symbol = %symbol,
                pattern = %obs.pattern_type,
                state = %obs.state,
                strength = obs.strength_score,
                "pattern emitted"
            );
            if let Err(e) = self.sink.upsert(obs) {
                warn!(symbol = %symbol, pattern = %obs.pattern_type, error = %e, "failed to persist pattern");
                errors.push(fail(SymbolError::Sink(e)));
            }
            if let Some(alerts) = self.alerts {
                if let Err(e) = alerts.notify(obs.state, obs) {
                    warn!(symbol = %symbol, pattern = %obs.pattern_type, error = %e, "failed to send alert");
                    errors.push(fail(SymbolError::Alert(e)));
                }
            }
        }

        SymbolOutcome::Scanned {
            found: emitted.len(),
            errors,
        }
    }
}
