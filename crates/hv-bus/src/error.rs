use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Handler may not republish its own in-flight event: {0}")]
    RecursivePublish(String),

    #[error("Webhook already registered: {0}")]
    WebhookConflict(String),

    #[error("Shutdown in progress")]
    ShutdownInProgress,

    #[error("Personal log error: {0}")]
    PersonalLog(#[from] hv_personal_log::PersonalLogError),
}
