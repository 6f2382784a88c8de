use ethers::types::U256;

/// The token-conversion collaborator, consumed only for its status flags.
///
/// While conversion is in flight the gate balance is unreliable, so the
/// processor treats it as unavailable and clips strictly to the SCI's own
/// token balance rather than trying to reason about funds mid-conversion.
#[async_trait::async_trait]
pub trait Converter: Send + Sync {
    async fn is_converting(&self) -> anyhow::Result<bool>;

    async fn get_gate_balance(&self) -> anyhow::Result<U256>;
}

/// Default collaborator for configurations that never route the payment
/// token through a converter: always idle, balance irrelevant.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleConverter;

#[async_trait::async_trait]
impl Converter for IdleConverter {
    async fn is_converting(&self) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn get_gate_balance(&self) -> anyhow::Result<U256> {
        Ok(U256::zero())
    }
}
