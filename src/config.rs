//! Producer configuration surface and its validation rules.

use crate::error::ProducerConfigError;
use crate::producer::OnErrorCallback;
use std::time::Duration;

/// Resolved, validated producer configuration.
pub(crate) struct ProducerConfig {
    pub auto_claim: bool,
    pub max_batch_bytes: usize,
    pub linger: Duration,
    pub max_in_flight: usize,
    pub content_type_override: Option<String>,
    pub on_error: Option<OnErrorCallback>,
}

/// Raw, unvalidated builder fields. Validated once, in
/// `ProducerBuilder::build`.
pub(crate) struct RawProducerConfig {
    pub producer_id: String,
    pub epoch: u64,
    pub auto_claim: bool,
    pub max_batch_bytes: usize,
    pub linger: Duration,
    pub max_in_flight: usize,
    pub content_type_override: Option<String>,
    pub on_error: Option<OnErrorCallback>,
}

impl RawProducerConfig {
    pub fn validate(self) -> Result<(String, u64, ProducerConfig), ProducerConfigError> {
        if self.producer_id.is_empty() {
            return Err(ProducerConfigError::EmptyProducerId);
        }
        if self.max_batch_bytes == 0 {
            return Err(ProducerConfigError::ZeroMaxBatchBytes);
        }
        if self.max_in_flight == 0 {
            return Err(ProducerConfigError::ZeroMaxInFlight);
        }

        Ok((
            self.producer_id,
            self.epoch,
            ProducerConfig {
                auto_claim: self.auto_claim,
                max_batch_bytes: self.max_batch_bytes,
                linger: self.linger,
                max_in_flight: self.max_in_flight,
                content_type_override: self.content_type_override,
                on_error: self.on_error,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RawProducerConfig {
        RawProducerConfig {
            producer_id: "p1".to_string(),
            epoch: 0,
            auto_claim: false,
            max_batch_bytes: 1024,
            linger: Duration::from_millis(5),
            max_in_flight: 5,
            content_type_override: None,
            on_error: None,
        }
    }

    #[test]
    fn rejects_empty_producer_id() {
        let mut cfg = base();
        cfg.producer_id = String::new();
        assert_eq!(
            cfg.validate().unwrap_err(),
            ProducerConfigError::EmptyProducerId
        );
    }

    #[test]
    fn rejects_zero_max_batch_bytes() {
        let mut cfg = base();
        cfg.max_batch_bytes = 0;
        assert_eq!(
            cfg.validate().unwrap_err(),
            ProducerConfigError::ZeroMaxBatchBytes
        );
    }

    #[test]
    fn rejects_zero_max_in_flight() {
        let mut cfg = base();
        cfg.max_in_flight = 0;
        assert_eq!(
            cfg.validate().unwrap_err(),
            ProducerConfigError::ZeroMaxInFlight
        );
    }

    #[test]
    fn accepts_valid_config() {
        assert!(base().validate().is_ok());
    }
}
