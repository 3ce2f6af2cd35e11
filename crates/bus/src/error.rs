use thiserror::Error;

/// Transport-level bus failure.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus (or the delivery's channel) is gone.
    #[error("bus closed")]
    Closed,

    /// Internal lock poisoning.
    #[error("bus state poisoned")]
    Poisoned,

    /// A queue already has an active consumer.
    #[error("queue {0} already has a consumer")]
    QueueInUse(String),

    /// Broker connection failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Broker command failure.
    #[error("command error: {0}")]
    Command(String),

    /// Payload (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}
