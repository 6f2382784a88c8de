use std::sync::Arc;

use ethers::types::U256;
use tokio::sync::{mpsc, Mutex};
use tracing::instrument;

use crate::config::Config;
use crate::converter::{Converter, IdleConverter};
use crate::database::Database;
use crate::processor::{Processor, ProcessorError};
use crate::sci::http::HttpSci;
use crate::sci::{SmartContractInterface, TransactionReceipt};

/// Shared application state: the durable store, the payment processor core,
/// and whatever collaborators it was wired up with.
///
/// The confirmation receiver is handed off exactly once, to whichever
/// supervised task drives [`Processor::run_confirmation_worker`]; everything
/// else goes through `processor` directly.
pub struct App {
    pub config:    Config,
    pub database:  Arc<Database>,
    pub processor: Arc<Processor>,
    confirmation_receiver: Mutex<Option<mpsc::Receiver<TransactionReceipt>>>,
}

impl App {
    /// # Errors
    ///
    /// Will return `Err` if the database cannot be reached/migrated, or if
    /// rebuilding processor state from the store fails.
    #[instrument(name = "App::new", level = "debug", skip_all)]
    pub async fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let database = Arc::new(Database::new(&config.database).await?);

        let sci: Arc<dyn SmartContractInterface> = Arc::new(HttpSci::new(
            config.sci.url.expose().to_string(),
            config.processor.token_address,
            config.processor.owner_address,
            config.sci.confirmation_poll_interval,
        ));

        // The token converter is an out-of-scope collaborator (§1); no
        // configuration short of swapping in a real `Converter` impl could
        // change this, so there is no knob for it here.
        let converter: Arc<dyn Converter> = Arc::new(IdleConverter);

        let (processor, confirmation_receiver) =
            Processor::new(config.processor.clone(), database.clone(), sci, converter);

        processor.load_from_db().await?;

        Ok(Arc::new(Self {
            config,
            database,
            processor,
            confirmation_receiver: Mutex::new(Some(confirmation_receiver)),
        }))
    }

    /// Takes ownership of the confirmation channel's receiving half. Panics if
    /// called more than once; there is only ever one confirmation worker.
    pub async fn take_confirmation_receiver(&self) -> mpsc::Receiver<TransactionReceipt> {
        self.confirmation_receiver
            .lock()
            .await
            .take()
            .expect("confirmation receiver already taken")
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn add_payment(
        &self,
        subtask_id: &str,
        payee: ethers::types::Address,
        value: U256,
    ) -> Result<chrono::DateTime<chrono::Utc>, ProcessorError> {
        self.processor.add(subtask_id, payee, value).await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn sendout(&self) -> Result<bool, ProcessorError> {
        self.processor
            .sendout(self.config.processor.payment_max_delay)
            .await
    }

    /// Returns `(reserved_amount, recipients_count)`, the two derived
    /// observables exposed to introspection callers.
    pub async fn status(&self) -> (U256, usize) {
        (
            self.processor.reserved_amount().await,
            self.processor.recipients_count().await,
        )
    }
}
