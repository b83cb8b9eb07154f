//! Main-thread availability metrics.
//!
//! All three are derived from long tasks: simulated CPU tasks of at least
//! [`LONG_TASK_THRESHOLD_MS`].

use crate::error::{Result, SimulationError};
use crate::metrics::paint::first_contentful_paint;
use crate::metrics::{last_ending, Estimate, Metric, MetricContext};
use crate::metrics::{INTERACTIVE, MAX_POTENTIAL_FID, TOTAL_BLOCKING_TIME};
use crate::record::ResourceType;
use crate::types::SimTime;

/// Minimum simulated duration of a task that blocks input.
pub const LONG_TASK_THRESHOLD_MS: SimTime = 50.0;

/// Time at which the main thread is quiet and the critical resources have
/// arrived.
///
/// The end of the last long task, or the end of the last document/script
/// request when there are no long tasks, never earlier than FCP.
#[derive(Clone, Copy, Debug, Default)]
pub struct Interactive;

impl Metric for Interactive {
    fn name(&self) -> &'static str {
        INTERACTIVE
    }

    fn compute(&self, context: &MetricContext<'_>) -> Result<Estimate> {
        interactive(context).map(Estimate::at)
    }
}

pub(crate) fn interactive(context: &MetricContext<'_>) -> Result<SimTime> {
    let last_long_task = last_ending(
        context
            .cpu_tasks()
            .filter(|(_, timing)| timing.duration() >= LONG_TASK_THRESHOLD_MS),
    );
    let quiet = match last_long_task {
        Some((_, timing)) => Some(timing.end),
        None => last_ending(context.requests().filter(|(request, _)| {
            matches!(request.resource_type, ResourceType::Document | ResourceType::Script)
        }))
        .map(|(_, timing)| timing.end),
    };

    let fcp = first_contentful_paint(context).ok();
    match (quiet, fcp) {
        (Some(quiet), Some(fcp)) => Ok(quiet.max(fcp)),
        (Some(time), None) | (None, Some(time)) => Ok(time),
        (None, None) => Err(SimulationError::not_computable(INTERACTIVE)),
    }
}

/// Sum of the blocking portion (beyond 50 ms) of every task between FCP and
/// interactive. Anchored at interactive.
#[derive(Clone, Copy, Debug, Default)]
pub struct TotalBlockingTime;

impl Metric for TotalBlockingTime {
    fn name(&self) -> &'static str {
        TOTAL_BLOCKING_TIME
    }

    fn compute(&self, context: &MetricContext<'_>) -> Result<Estimate> {
        let fcp = first_contentful_paint(context)
            .map_err(|_| SimulationError::not_computable(TOTAL_BLOCKING_TIME))?;
        let tti = interactive(context)?;

        let blocking: SimTime = context
            .cpu_tasks()
            .filter(|(_, timing)| timing.start >= fcp && timing.start < tti)
            .map(|(_, timing)| (timing.duration() - LONG_TASK_THRESHOLD_MS).max(0.0))
            .sum();
        Ok(Estimate::anchored(blocking, tti))
    }
}

/// Longest task that started at or after FCP.
#[derive(Clone, Copy, Debug, Default)]
pub struct MaxPotentialFid;

impl Metric for MaxPotentialFid {
    fn name(&self) -> &'static str {
        MAX_POTENTIAL_FID
    }

    fn compute(&self, context: &MetricContext<'_>) -> Result<Estimate> {
        let not_computable = || SimulationError::not_computable(MAX_POTENTIAL_FID);
        let fcp = first_contentful_paint(context).map_err(|_| not_computable())?;

        context
            .cpu_tasks()
            .filter(|(_, timing)| timing.start >= fcp)
            .map(|(_, timing)| timing.duration())
            .max_by(|a, b| a.total_cmp(b))
            .map(Estimate::at)
            .ok_or_else(not_computable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::test_support::fixture;
    use crate::trace::{PaintMarker, TaskCategory};

    const FCP: Option<PaintMarker> = Some(PaintMarker::FirstContentfulPaint);

    #[test]
    fn test_interactive_after_last_long_task() {
        let (graph, result) = fixture(
            100.0,
            &[
                (TaskCategory::Paint, FCP, 100.0, 110.0),
                (TaskCategory::ScriptEvaluation, None, 110.0, 200.0),
                (TaskCategory::ScriptEvaluation, None, 200.0, 220.0),
            ],
        );
        let context = MetricContext::new(&result, &graph);
        assert_eq!(Interactive.compute(&context).unwrap().timing, 200.0);
    }

    #[test]
    fn test_interactive_without_long_tasks() {
        let (graph, result) = fixture(100.0, &[(TaskCategory::Paint, FCP, 300.0, 310.0)]);
        let context = MetricContext::new(&result, &graph);
        // no long task: last document request ends at 100, FCP is later
        assert_eq!(Interactive.compute(&context).unwrap().timing, 310.0);
    }

    #[test]
    fn test_total_blocking_time() {
        let (graph, result) = fixture(
            100.0,
            &[
                (TaskCategory::ScriptEvaluation, None, 100.0, 200.0),
                (TaskCategory::Paint, FCP, 200.0, 210.0),
                (TaskCategory::ScriptEvaluation, None, 210.0, 290.0),
                (TaskCategory::ScriptEvaluation, None, 290.0, 320.0),
                (TaskCategory::ScriptEvaluation, None, 320.0, 440.0),
            ],
        );
        let context = MetricContext::new(&result, &graph);
        let tbt = TotalBlockingTime.compute(&context).unwrap();

        // the 100 ms task before FCP does not count; 30 + 0 + 70 does
        assert_eq!(tbt.timing, 100.0);
        assert_eq!(tbt.anchor, Some(440.0));
    }

    #[test]
    fn test_max_potential_fid() {
        let (graph, result) = fixture(
            100.0,
            &[
                (TaskCategory::ScriptEvaluation, None, 100.0, 400.0),
                (TaskCategory::Paint, FCP, 400.0, 410.0),
                (TaskCategory::ScriptEvaluation, None, 410.0, 470.0),
            ],
        );
        let context = MetricContext::new(&result, &graph);
        assert_eq!(MaxPotentialFid.compute(&context).unwrap().timing, 60.0);
    }

    #[test]
    fn test_blocking_metrics_need_fcp() {
        let (graph, result) = fixture(100.0, &[(TaskCategory::ScriptEvaluation, None, 100.0, 300.0)]);
        let context = MetricContext::new(&result, &graph);
        assert!(TotalBlockingTime.compute(&context).unwrap_err().is_recoverable());
        assert!(MaxPotentialFid.compute(&context).unwrap_err().is_recoverable());
    }
}
