use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("a payment with this subtask id has already been recorded")]
    DuplicateSubtask,

    #[error("batch submission failed")]
    SubmissionFailure(#[source] anyhow::Error),

    #[error(transparent)]
    StoreFailure(#[from] crate::database::Error),
}
