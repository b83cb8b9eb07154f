//! Whole-page load time.

use crate::error::Result;
use crate::metrics::{Estimate, Metric, MetricContext, PAGE_LOAD};

/// End of the last node of the simulation.
#[derive(Clone, Copy, Debug, Default)]
pub struct PageLoad;

impl Metric for PageLoad {
    fn name(&self) -> &'static str {
        PAGE_LOAD
    }

    fn compute(&self, context: &MetricContext<'_>) -> Result<Estimate> {
        Ok(Estimate::at(context.result.total_end_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::test_support::fixture;
    use crate::trace::TaskCategory;

    #[test]
    fn test_page_load_is_total_end() {
        let (graph, result) = fixture(100.0, &[(TaskCategory::Other, None, 100.0, 175.0)]);
        let context = MetricContext::new(&result, &graph);
        assert_eq!(PageLoad.compute(&context).unwrap().timing, 175.0);
    }
}
