//! The measurement loop.
//!
//! ```rust,ignore
//! let exp = Experiment::new(measure_fn(|m| {
//!     m.insert("current", 0.0);
//!     Ok(())
//! }))
//! .with_logger(CsvLogger::new(format!("{}.csv", timestamp())))
//! .with_plotter(LogPlotter::new());
//!
//! let handle = exp.start(Duration::from_secs(1));
//! // ...
//! handle.stop();
//! let data = handle.wait_finished().await?;
//! ```
//!
//! # Loop
//!
//! Every sample:
//! 1. when the current condition has been measured
//!    `measurements_per_condition` times, move to the next one; stop when
//!    there is none left
//! 2. start the row with `time` (seconds since start) and the condition
//!    values
//! 3. on a new condition, run the apply-condition steps
//! 4. run the measure step
//! 5. append the row (the first row fixes the columns), log it and update
//!    the plotters

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::conditions::Conditions;
use crate::data::{DataTable, Measurement};
use crate::logger::Logger;
use crate::plotter::Plotter;

/// Takes one measurement by adding values to the row.
#[async_trait]
pub trait Measure: Send + Sync {
    async fn measure(&self, measurement: &mut Measurement) -> Result<()>;
}

/// Puts the setup into a new condition.
#[async_trait]
pub trait ApplyCondition: Send + Sync {
    async fn apply(&self, condition: &Measurement) -> Result<()>;
}

/// [`Measure`] from a synchronous closure.
pub struct MeasureFn<F>(F);

pub fn measure_fn<F>(f: F) -> MeasureFn<F>
where
    F: Fn(&mut Measurement) -> Result<()> + Send + Sync,
{
    MeasureFn(f)
}

#[async_trait]
impl<F> Measure for MeasureFn<F>
where
    F: Fn(&mut Measurement) -> Result<()> + Send + Sync,
{
    async fn measure(&self, measurement: &mut Measurement) -> Result<()> {
        (self.0)(measurement)
    }
}

/// [`ApplyCondition`] from a synchronous closure.
pub struct ApplyFn<F>(F);

pub fn apply_fn<F>(f: F) -> ApplyFn<F>
where
    F: Fn(&Measurement) -> Result<()> + Send + Sync,
{
    ApplyFn(f)
}

#[async_trait]
impl<F> ApplyCondition for ApplyFn<F>
where
    F: Fn(&Measurement) -> Result<()> + Send + Sync,
{
    async fn apply(&self, condition: &Measurement) -> Result<()> {
        (self.0)(condition)
    }
}

/// A configured experiment, ready to start.
pub struct Experiment {
    measure: Arc<dyn Measure>,
    apply: Vec<Arc<dyn ApplyCondition>>,
    plotters: Vec<Box<dyn Plotter>>,
    loggers: Vec<Box<dyn Logger>>,
    conditions: Option<Conditions>,
    measurements_per_condition: Option<usize>,
}

impl Experiment {
    pub fn new(measure: impl Measure + 'static) -> Self {
        Self {
            measure: Arc::new(measure),
            apply: Vec::new(),
            plotters: Vec::new(),
            loggers: Vec::new(),
            conditions: None,
            measurements_per_condition: None,
        }
    }

    pub fn with_plotter(mut self, plotter: impl Plotter + 'static) -> Self {
        self.plotters.push(Box::new(plotter));
        self
    }

    pub fn with_logger(mut self, logger: impl Logger + 'static) -> Self {
        self.loggers.push(Box::new(logger));
        self
    }

    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Called whenever the experiment moves to a new condition, before
    /// measuring.
    pub fn with_apply_condition(mut self, apply: impl ApplyCondition + 'static) -> Self {
        self.apply.push(Arc::new(apply));
        self
    }

    /// Samples per condition. Defaults to 1 with conditions; without
    /// conditions the experiment stops after this many samples, or runs
    /// until stopped when unset.
    pub fn measurements_per_condition(mut self, n: usize) -> Self {
        self.measurements_per_condition = Some(n.max(1));
        self
    }

    /// Spawn the loop, sampling every `interval`. A zero interval samples as
    /// fast as possible.
    pub fn start(self, interval: Duration) -> ExperimentHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let data = Arc::new(RwLock::new(DataTable::new()));
        let runner = Runner::new(self, data.clone());
        let task = tokio::spawn(runner.run(interval, stop_rx));
        ExperimentHandle {
            stop: stop_tx,
            data,
            task,
        }
    }

    /// Run to completion in the current task.
    pub async fn run(self, interval: Duration) -> Result<DataTable> {
        self.start(interval).wait_finished().await
    }
}

/// Control over a running experiment.
///
/// Dropping the handle stops the experiment.
pub struct ExperimentHandle {
    stop: watch::Sender<bool>,
    data: Arc<RwLock<DataTable>>,
    task: JoinHandle<Result<DataTable>>,
}

impl ExperimentHandle {
    /// Ask the loop to stop after the current sample.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Snapshot of the data gathered so far.
    pub async fn data(&self) -> DataTable {
        self.data.read().await.clone()
    }

    /// Wait for the loop to end; returns the data or the first error.
    pub async fn wait_finished(self) -> Result<DataTable> {
        let Self { stop, task, .. } = self;
        let result = task.await.context("Experiment task failed")?;
        drop(stop);
        result
    }
}

// =============================================================================
// Loop
// =============================================================================

struct Runner {
    measure: Arc<dyn Measure>,
    apply: Vec<Arc<dyn ApplyCondition>>,
    plotters: Vec<Box<dyn Plotter>>,
    loggers: Vec<Box<dyn Logger>>,
    conditions: Option<Conditions>,
    per_condition: Option<usize>,
    data: Arc<RwLock<DataTable>>,

    next_condition: usize,
    condition: Option<Measurement>,
    count: usize,
}

impl Runner {
    fn new(experiment: Experiment, data: Arc<RwLock<DataTable>>) -> Self {
        // A table without rows sets nothing, same as no table
        let conditions = experiment.conditions.filter(|c| !c.is_empty());
        let per_condition = match (&conditions, experiment.measurements_per_condition) {
            (Some(_), None) => Some(1),
            (_, n) => n,
        };
        Self {
            measure: experiment.measure,
            apply: experiment.apply,
            plotters: experiment.plotters,
            loggers: experiment.loggers,
            conditions,
            per_condition,
            data,
            next_condition: 0,
            condition: None,
            count: 0,
        }
    }

    async fn run(mut self, interval: Duration, mut stop: watch::Receiver<bool>) -> Result<DataTable> {
        info!(
            interval_ms = interval.as_millis() as u64,
            conditions = self.conditions.as_ref().map_or(0, Conditions::len),
            "experiment started"
        );

        let mut ticker = (!interval.is_zero()).then(|| {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let started = Instant::now();

        let outcome = loop {
            if stop_requested(&stop) {
                break Ok(());
            }
            match ticker.as_mut() {
                Some(ticker) => {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = stop.changed() => continue,
                    }
                }
                None => tokio::task::yield_now().await,
            }

            match self.sample(started).await {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        let finished = self.finish_loggers().await;
        let data = self.data.read().await.clone();
        match &outcome {
            Ok(()) => info!(samples = data.len(), "experiment finished"),
            Err(e) => warn!(samples = data.len(), error = %e, "experiment failed"),
        }
        outcome?;
        finished?;
        Ok(data)
    }

    /// Take one sample. `false` when the conditions are exhausted.
    async fn sample(&mut self, started: Instant) -> Result<bool> {
        let mut changed = false;
        match &self.conditions {
            Some(conditions) => {
                if self.condition.is_none() || self.per_condition.is_some_and(|n| self.count >= n) {
                    let Some(next) = conditions.get(self.next_condition) else {
                        return Ok(false);
                    };
                    debug!(index = self.next_condition, condition = %next, "next condition");
                    self.next_condition += 1;
                    self.condition = Some(next);
                    self.count = 0;
                    changed = true;
                }
            }
            None => {
                if self.per_condition.is_some_and(|n| self.count >= n) {
                    return Ok(false);
                }
            }
        }
        self.count += 1;

        let mut measurement = Measurement::new();
        measurement.insert("time", started.elapsed().as_secs_f64());
        if let Some(condition) = &self.condition {
            measurement.extend_from(condition);
            if changed {
                for apply in &self.apply {
                    apply.apply(condition).await.context("Failed to apply condition")?;
                }
            }
        }

        self.measure
            .measure(&mut measurement)
            .await
            .context("Measurement failed")?;

        let first = self.data.write().await.push(&measurement)?;
        if first {
            let columns: Vec<String> = measurement.columns().map(str::to_string).collect();
            for logger in &mut self.loggers {
                logger.start(&columns).await?;
            }
        }
        for logger in &mut self.loggers {
            logger.log(&measurement).await?;
        }

        let data = self.data.read().await;
        for plotter in &mut self.plotters {
            plotter.update(&data)?;
        }
        Ok(true)
    }

    /// Finish every logger; the first failure is returned.
    async fn finish_loggers(&mut self) -> Result<()> {
        let mut first_error = None;
        for logger in &mut self.loggers {
            if let Err(e) = logger.finish().await {
                warn!(error = %e, "failed to finish logger");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}
