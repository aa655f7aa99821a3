//! Workflow module tests.

mod scenario_test;

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use visitor_flow::metrics::{MetricsClient, MetricsError, VisitorMetrics};

/// Metrics source with a canned answer.
pub struct FixedMetrics {
    count: Option<u64>,
    calls: AtomicUsize,
}

impl FixedMetrics {
    pub fn count(count: u64) -> Self {
        Self {
            count: Some(count),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            count: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsClient for FixedMetrics {
    async fn fetch_metrics(&self, date: NaiveDate) -> Result<VisitorMetrics, MetricsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.count {
            Some(unique_visitors) => Ok(VisitorMetrics {
                unique_visitors,
                date: date.to_string(),
            }),
            None => Err(MetricsError::InvalidResponse("status was \"error\"".to_string())),
        }
    }
}
