use std::sync::Arc;
use std::time::Duration;

use ethers::types::U256;
use payment_processor::config::{DatabaseConfig, ProcessorConfig};
use payment_processor::converter::IdleConverter;
use payment_processor::database::Database;
use payment_processor::processor::{Processor, ProcessorError};
use payment_processor::sci::mock::MockSci;
use payment_processor::sci::SmartContractInterface;
use sqlx::Row;
use test_utils::{amount, test_address, test_tx_hash};

async fn payment_status(database: &Database, subtask_id: &str) -> (String, Option<String>, Option<i64>) {
    let row = sqlx::query("SELECT status, fee::text, block_number FROM payments WHERE subtask_id = $1")
        .bind(subtask_id)
        .fetch_one(&database.pool)
        .await
        .unwrap();

    (row.get(0), row.get(1), row.get(2))
}

async fn test_database(container_port: u16) -> Database {
    let config = DatabaseConfig {
        database:        format!("postgres://postgres@localhost:{container_port}/test")
            .parse()
            .unwrap(),
        migrate:         true,
        max_connections: 5,
    };

    Database::new(&config).await.unwrap()
}

fn test_processor_config() -> ProcessorConfig {
    ProcessorConfig {
        token_address:          test_address(1),
        owner_address:          test_address(2),
        payment_max_delay:      Duration::from_secs(3600),
        payment_deadline:       Duration::from_secs(2 * 24 * 3600),
        block_gas_limit_ratio:  0.5,
        gas_per_payment:        30_000,
        gas_batch_payment_base: 21_000,
        sendout_interval:       Duration::from_secs(30),
        overdue_interval:       Duration::from_secs(60),
    }
}

fn test_sci() -> Arc<MockSci> {
    Arc::new(MockSci::new(
        amount(1_000_000),
        amount(1_000_000),
        amount(20),
        U256::from(30_000_000),
    ))
}

#[tokio::test]
async fn add_then_opportunistic_sendout_batches_eligible_payments() {
    let docker = postgres_docker_utils::setup().await.unwrap();
    let database = Arc::new(test_database(docker.port()).await);
    let sci = test_sci();
    let converter = Arc::new(IdleConverter);

    let (processor, _confirmation_receiver) = Processor::new(
        test_processor_config(),
        database.clone(),
        sci.clone() as Arc<dyn SmartContractInterface>,
        converter,
    );
    processor.load_from_db().await.unwrap();

    let payee_a = test_address(10);
    let payee_b = test_address(11);

    processor.add("task-a", payee_a, amount(100)).await.unwrap();
    processor.add("task-b", payee_b, amount(200)).await.unwrap();

    assert_eq!(processor.recipients_count().await, 2);
    assert_eq!(processor.reserved_amount().await, amount(300));

    // Neither payment has aged past the opportunistic delay yet.
    let sent = processor.sendout(Duration::from_secs(3600)).await.unwrap();
    assert!(!sent);

    // Forcing closure (delay zero) sends whatever is eligible right now.
    let sent = processor.sendout(Duration::ZERO).await.unwrap();
    assert!(sent);

    let batches = sci.submitted_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].0.len(), 2);

    // The batch is in flight: no longer awaiting, but still reserved until
    // confirmed.
    assert_eq!(processor.recipients_count().await, 0);
    assert_eq!(processor.reserved_amount().await, amount(300));

    // Nothing left eligible for a second sendout.
    let sent_again = processor.sendout(Duration::ZERO).await.unwrap();
    assert!(!sent_again);
}

#[tokio::test]
async fn duplicate_subtask_is_rejected() {
    let docker = postgres_docker_utils::setup().await.unwrap();
    let database = Arc::new(test_database(docker.port()).await);
    let sci = test_sci();
    let converter = Arc::new(IdleConverter);

    let (processor, _confirmation_receiver) = Processor::new(
        test_processor_config(),
        database.clone(),
        sci as Arc<dyn SmartContractInterface>,
        converter,
    );
    processor.load_from_db().await.unwrap();

    let payee = test_address(20);
    processor.add("dup", payee, amount(50)).await.unwrap();

    let result = processor.add("dup", payee, amount(50)).await;
    assert!(matches!(result, Err(ProcessorError::DuplicateSubtask)));
}

#[tokio::test]
async fn insufficient_gas_asset_balance_clips_the_batch() {
    let docker = postgres_docker_utils::setup().await.unwrap();
    let database = Arc::new(test_database(docker.port()).await);

    // Enough token balance, but only enough gas for a single payment on top
    // of the batch base cost.
    let config = test_processor_config();
    let gas_for_one = U256::from(config.gas_batch_payment_base + config.gas_per_payment) * amount(20);
    let sci = Arc::new(MockSci::new(
        amount(1_000_000),
        gas_for_one,
        amount(20),
        U256::from(30_000_000),
    ));
    let converter = Arc::new(IdleConverter);

    let (processor, _confirmation_receiver) = Processor::new(
        config,
        database.clone(),
        sci.clone() as Arc<dyn SmartContractInterface>,
        converter,
    );
    processor.load_from_db().await.unwrap();

    processor.add("a", test_address(31), amount(1)).await.unwrap();
    processor.add("b", test_address(32), amount(1)).await.unwrap();
    processor.add("c", test_address(33), amount(1)).await.unwrap();

    let sent = processor.sendout(Duration::ZERO).await.unwrap();
    assert!(sent);

    let batches = sci.submitted_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].0.len(), 1);

    // The other two payments are still awaiting, clipped out of this batch.
    assert_eq!(processor.recipients_count().await, 2);
}

#[tokio::test]
async fn overdue_sweep_promotes_aged_payments() {
    let docker = postgres_docker_utils::setup().await.unwrap();
    let database = Arc::new(test_database(docker.port()).await);
    let sci = test_sci();
    let converter = Arc::new(IdleConverter);

    let mut config = test_processor_config();
    config.payment_deadline = Duration::ZERO;

    let (processor, _confirmation_receiver) = Processor::new(
        config,
        database.clone(),
        sci as Arc<dyn SmartContractInterface>,
        converter,
    );
    processor.load_from_db().await.unwrap();

    processor
        .add("overdue-task", test_address(40), amount(10))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;

    let affected = processor.update_overdue().await.unwrap();
    assert_eq!(affected, 1);
}

#[tokio::test]
async fn confirmed_receipt_marks_payment_confirmed_with_fee_and_block() {
    let docker = postgres_docker_utils::setup().await.unwrap();
    let database = Arc::new(test_database(docker.port()).await);
    let sci = test_sci();
    let converter = Arc::new(IdleConverter);

    let (processor, confirmation_receiver) = Processor::new(
        test_processor_config(),
        database.clone(),
        sci.clone() as Arc<dyn SmartContractInterface>,
        converter,
    );
    processor.load_from_db().await.unwrap();
    tokio::spawn(processor.clone().run_confirmation_worker(confirmation_receiver));

    processor
        .add("confirm-me", test_address(50), amount(10))
        .await
        .unwrap();
    assert!(processor.sendout(Duration::ZERO).await.unwrap());
    assert_eq!(sci.submitted_batches().len(), 1);

    // MockSci hands out deterministic, sequential tx hashes starting at 1.
    let tx_hash = test_tx_hash(1);
    let block_hash = test_tx_hash(0xbeef);
    sci.confirm(tx_hash, 42, block_hash, amount(1)).await;

    // Give the confirmation worker a chance to drain the channel.
    for _ in 0..100 {
        if processor.reserved_amount().await == U256::zero() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(processor.reserved_amount().await, U256::zero());
    assert_eq!(processor.recipients_count().await, 0);

    let (status, fee, block_number) = payment_status(&database, "confirm-me").await;
    assert_eq!(status, "confirmed");
    assert_eq!(fee.unwrap(), amount(1).to_string());
    assert_eq!(block_number, Some(42));
}

#[tokio::test]
async fn failed_receipt_rolls_the_payment_back_to_awaiting() {
    let docker = postgres_docker_utils::setup().await.unwrap();
    let database = Arc::new(test_database(docker.port()).await);
    let sci = test_sci();
    let converter = Arc::new(IdleConverter);

    let (processor, confirmation_receiver) = Processor::new(
        test_processor_config(),
        database.clone(),
        sci.clone() as Arc<dyn SmartContractInterface>,
        converter,
    );
    processor.load_from_db().await.unwrap();
    tokio::spawn(processor.clone().run_confirmation_worker(confirmation_receiver));

    processor
        .add("retry-me", test_address(51), amount(10))
        .await
        .unwrap();
    assert!(processor.sendout(Duration::ZERO).await.unwrap());

    assert_eq!(processor.recipients_count().await, 0);
    assert_eq!(processor.reserved_amount().await, amount(10));
    assert_eq!(sci.submitted_batches().len(), 1);

    let tx_hash = test_tx_hash(1);
    sci.fail(tx_hash).await;

    for _ in 0..100 {
        if processor.recipients_count().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(processor.recipients_count().await, 1);
    assert_eq!(processor.reserved_amount().await, amount(10));

    let (status, fee, block_number) = payment_status(&database, "retry-me").await;
    assert_eq!(status, "awaiting");
    assert!(fee.is_none());
    assert!(block_number.is_none());
}
