use thiserror::Error;

/// Errors surfaced by the titration engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TitrationError {
    #[error("hardware error: {0}")]
    Hardware(String),

    #[error("hardware fault: {0}")]
    HardwareFault(String),

    #[error("timeout waiting on hardware")]
    Timeout,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid measurement state: {0}")]
    State(String),

    #[error("no doser registered for role '{0}'")]
    UnknownDoserRole(String),

    #[error("no measurement progress for {0} ms; run aborted")]
    Stalled(u64),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Errors raised while assembling a titrator from its parts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    #[error("missing doser for role '{0}'")]
    MissingDoser(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = eyre::Result<T>;

/// Map a boxed hardware-facing error onto a typed [`TitrationError`].
///
/// With the `hardware-errors` feature enabled, known `HwError` variants are
/// recovered by downcast; everything else falls back to string matching so
/// timeouts from foreign drivers still classify correctly.
pub(crate) fn map_hw_error_dyn(e: &(dyn std::error::Error + 'static)) -> TitrationError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<titrator_hardware::error::HwError>() {
            return match hw {
                titrator_hardware::error::HwError::Timeout => TitrationError::Timeout,
                other => TitrationError::HardwareFault(other.to_string()),
            };
        }
    }
    let msg = e.to_string();
    if msg.to_ascii_lowercase().contains("timeout") {
        TitrationError::Timeout
    } else {
        TitrationError::Hardware(msg)
    }
}

/// Convenience for call sites holding the boxed error by value.
pub(crate) fn map_hw_error(e: Box<dyn std::error::Error + Send + Sync>) -> TitrationError {
    map_hw_error_dyn(e.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("timeout reading ADC channel 3")]
    struct FakeTimeout;

    #[derive(Debug, Error)]
    #[error("i2c bus contention")]
    struct FakeBus;

    #[test]
    fn string_timeout_classifies_as_timeout() {
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(FakeTimeout);
        assert_eq!(map_hw_error(boxed), TitrationError::Timeout);
    }

    #[test]
    fn other_errors_keep_their_message() {
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(FakeBus);
        assert_eq!(
            map_hw_error(boxed),
            TitrationError::Hardware("i2c bus contention".into())
        );
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn hw_error_downcasts_to_typed_variant() {
        use titrator_hardware::error::HwError;
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(HwError::Timeout);
        assert_eq!(map_hw_error(boxed), TitrationError::Timeout);
    }
}
