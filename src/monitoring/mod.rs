use once_cell::sync::Lazy;
use prometheus::{linear_buckets, register_gauge, register_histogram, Gauge, Histogram};

use crate::processor::Processor;

static RESERVED_AMOUNT: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "reserved_amount",
        "Total value of payments not yet confirmed on-chain, in the token's smallest unit"
    )
    .unwrap()
});

static RECIPIENTS_COUNT: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "recipients_count",
        "Number of distinct payments still in the awaiting set"
    )
    .unwrap()
});

static BATCH_SIZES: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "submitted_batch_sizes",
        "Submitted batch size",
        linear_buckets(f64::from(1), f64::from(1), 100).unwrap()
    )
    .unwrap()
});

pub struct Monitoring;

impl Monitoring {
    pub async fn log_queues(processor: &Processor) {
        Self::log_reserved_amount(processor).await;
        Self::log_recipients_count(processor).await;
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn log_batch_size(size: usize) {
        BATCH_SIZES.observe(size as f64);
    }

    async fn log_reserved_amount(processor: &Processor) {
        // U256 doesn't fit a f64 exactly; this gauge is an observability
        // approximation, not a ledger value.
        let amount = processor.reserved_amount().await.to_string();
        if let Ok(amount) = amount.parse::<f64>() {
            RESERVED_AMOUNT.set(amount);
        }
    }

    #[allow(clippy::cast_precision_loss)]
    async fn log_recipients_count(processor: &Processor) {
        let count = processor.recipients_count().await;
        RECIPIENTS_COUNT.set(count as f64);
    }
}
