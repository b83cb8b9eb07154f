//! Paint milestones.

use crate::error::{Result, SimulationError};
use crate::metrics::{first_ending, last_ending, Estimate, Metric, MetricContext};
use crate::metrics::{FIRST_CONTENTFUL_PAINT, LARGEST_CONTENTFUL_PAINT};
use crate::trace::{PaintMarker, TaskCategory};
use crate::types::SimTime;

/// End of the first task that painted content.
///
/// Falls back to the first Paint task when no task carries the FCP marker.
#[derive(Clone, Copy, Debug, Default)]
pub struct FirstContentfulPaint;

impl Metric for FirstContentfulPaint {
    fn name(&self) -> &'static str {
        FIRST_CONTENTFUL_PAINT
    }

    fn compute(&self, context: &MetricContext<'_>) -> Result<Estimate> {
        first_contentful_paint(context).map(Estimate::at)
    }
}

pub(crate) fn first_contentful_paint(context: &MetricContext<'_>) -> Result<SimTime> {
    let marked = first_ending(
        context
            .cpu_tasks()
            .filter(|(task, _)| task.paint_marker == Some(PaintMarker::FirstContentfulPaint)),
    );
    let paint = marked.or_else(|| {
        first_ending(
            context
                .cpu_tasks()
                .filter(|(task, _)| task.category == TaskCategory::Paint),
        )
    });

    paint
        .map(|(_, timing)| timing.end)
        .ok_or_else(|| SimulationError::not_computable(FIRST_CONTENTFUL_PAINT))
}

/// End of the last task that carried the LCP marker.
#[derive(Clone, Copy, Debug, Default)]
pub struct LargestContentfulPaint;

impl Metric for LargestContentfulPaint {
    fn name(&self) -> &'static str {
        LARGEST_CONTENTFUL_PAINT
    }

    fn compute(&self, context: &MetricContext<'_>) -> Result<Estimate> {
        last_ending(
            context
                .cpu_tasks()
                .filter(|(task, _)| task.paint_marker == Some(PaintMarker::LargestContentfulPaint)),
        )
        .map(|(_, timing)| Estimate::at(timing.end))
        .ok_or_else(|| SimulationError::not_computable(LARGEST_CONTENTFUL_PAINT))
    }
}
