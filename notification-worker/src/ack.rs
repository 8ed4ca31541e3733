//! Acknowledgment controller.
//!
//! Per message:
//!
//! ```text
//! Received → Decoding → Dispatching → Acknowledged
//!                           │      ↺ Retrying
//!                           └────→ Requeued | DeadLettered | Dropped
//! ```
//!
//! [`AckController::decide`] is pure policy; [`AckController::finalize`]
//! applies a terminal decision through a [`MessageAcker`].

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lapin::{
    options::{BasicAckOptions, BasicNackOptions},
    Channel,
};
use tracing::{error, info, warn};

use crate::error::ConfigError;
use crate::queue::{DeadLetterRecord, MessageClass, Publisher, RawMessage};

/// Upper bound for any single backoff delay.
pub const BACKOFF_CEILING: Duration = Duration::from_secs(60 * 60);

/// Exponential backoff with a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
}

impl Backoff {
    /// Both bounds are clamped to [`BACKOFF_CEILING`], and `initial` to `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.min(BACKOFF_CEILING);
        Self {
            initial: initial.min(max),
            max,
            multiplier: 2,
        }
    }

    /// Delay after the given failed attempt (1-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = self.multiplier.saturating_pow(exponent);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// [`delay_for`](Self::delay_for) with ±10% jitter.
    pub fn jittered(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::random::<f64>() * 0.2 - 0.1;
        self.delay_for(attempt).mul_f64(1.0 + jitter)
    }
}

/// What to do with a message whose dispatch failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckPolicy {
    /// Log and acknowledge every failure; nothing is ever redelivered.
    AckAlways,
    /// Retry delivery in-process, then publish to the dead-letter queue.
    RetryThenDeadLetter { max_attempts: u32, backoff: Backoff },
    /// Requeue a failed first delivery once; drop it if it fails again.
    RedeliverOnce,
}

impl AckPolicy {
    pub fn parse(
        raw: &str,
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, ConfigError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ack_always" | "" => Ok(AckPolicy::AckAlways),
            "retry_then_dead_letter" => Ok(AckPolicy::RetryThenDeadLetter {
                max_attempts: max_attempts.max(1),
                backoff: Backoff::new(initial_delay, max_delay),
            }),
            "redeliver_once" => Ok(AckPolicy::RedeliverOnce),
            _ => Err(ConfigError::UnknownAckPolicy(raw.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AckPolicy::AckAlways => "ack_always",
            AckPolicy::RetryThenDeadLetter { .. } => "retry_then_dead_letter",
            AckPolicy::RedeliverOnce => "redeliver_once",
        }
    }

    pub fn uses_dead_letter(&self) -> bool {
        matches!(self, AckPolicy::RetryThenDeadLetter { .. })
    }
}

/// Result of decoding and dispatching one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Delivered,
    DecodeFailed,
    DeliveryFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Ack,
    Retry(Duration),
    Requeue,
    DeadLetter,
    /// Acknowledge without delivering.
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Received,
    Decoding,
    Dispatching,
    Retrying,
    Acknowledged,
    Requeued,
    DeadLettered,
    Dropped,
}

impl MessageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Received => "received",
            MessageState::Decoding => "decoding",
            MessageState::Dispatching => "dispatching",
            MessageState::Retrying => "retrying",
            MessageState::Acknowledged => "acknowledged",
            MessageState::Requeued => "requeued",
            MessageState::DeadLettered => "dead_lettered",
            MessageState::Dropped => "dropped",
        }
    }
}

/// Broker operations needed to finish a message.
#[async_trait]
pub trait MessageAcker: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()>;

    async fn dead_letter(&self, class: MessageClass, record: &DeadLetterRecord) -> Result<()>;
}

/// [`MessageAcker`] over the shared lapin channel.
pub struct ChannelAcker {
    channel: Channel,
    publisher: Publisher,
}

impl ChannelAcker {
    pub fn new(channel: Channel) -> Self {
        Self {
            publisher: Publisher::new(channel.clone()),
            channel,
        }
    }
}

#[async_trait]
impl MessageAcker for ChannelAcker {
    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .context("Failed to acknowledge message")
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .context("Failed to reject message")
    }

    async fn dead_letter(&self, class: MessageClass, record: &DeadLetterRecord) -> Result<()> {
        self.publisher.publish_dead_letter(class, record).await
    }
}

#[derive(Debug, Clone)]
pub struct AckController {
    policy: AckPolicy,
}

impl AckController {
    pub fn new(policy: AckPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AckPolicy {
        &self.policy
    }

    /// Decide the next step for a message after `attempt` dispatch attempts.
    pub fn decide(&self, outcome: Outcome, attempt: u32, redelivered: bool) -> Decision {
        match outcome {
            Outcome::Delivered => return Decision::Ack,
            Outcome::DecodeFailed => {
                return match self.policy {
                    AckPolicy::RetryThenDeadLetter { .. } => Decision::DeadLetter,
                    _ => Decision::Drop,
                };
            }
            Outcome::DeliveryFailed => {}
        }

        match &self.policy {
            AckPolicy::AckAlways => Decision::Drop,
            AckPolicy::RetryThenDeadLetter {
                max_attempts,
                backoff,
            } => {
                if attempt < *max_attempts {
                    Decision::Retry(backoff.jittered(attempt))
                } else {
                    Decision::DeadLetter
                }
            }
            AckPolicy::RedeliverOnce => {
                if redelivered {
                    Decision::Drop
                } else {
                    Decision::Requeue
                }
            }
        }
    }

    /// Apply a terminal decision. `Retry` is not terminal and is treated as `Requeue`.
    pub async fn finalize(
        &self,
        acker: &dyn MessageAcker,
        class: MessageClass,
        raw: &RawMessage,
        decision: Decision,
        failure_reason: Option<&str>,
        attempts: u32,
    ) -> MessageState {
        let tag = raw.delivery_tag;

        let state = match decision {
            Decision::Ack => match acker.ack(tag).await {
                Ok(()) => MessageState::Acknowledged,
                Err(e) => return ack_failed(class, tag, e, MessageState::Acknowledged),
            },
            Decision::Drop => {
                warn!(
                    queue = %class.binding().queue,
                    delivery_tag = tag,
                    policy = self.policy.name(),
                    reason = failure_reason.unwrap_or_default(),
                    "message_dropped"
                );
                match acker.ack(tag).await {
                    Ok(()) => MessageState::Dropped,
                    Err(e) => return ack_failed(class, tag, e, MessageState::Dropped),
                }
            }
            Decision::Requeue | Decision::Retry(_) => match acker.nack(tag, true).await {
                Ok(()) => MessageState::Requeued,
                Err(e) => return ack_failed(class, tag, e, MessageState::Requeued),
            },
            Decision::DeadLetter => {
                let record = DeadLetterRecord::new(
                    class,
                    raw,
                    failure_reason.unwrap_or("unknown").to_string(),
                    attempts,
                );

                match acker.dead_letter(class, &record).await {
                    Ok(()) => match acker.ack(tag).await {
                        Ok(()) => MessageState::DeadLettered,
                        Err(e) => return ack_failed(class, tag, e, MessageState::DeadLettered),
                    },
                    Err(e) => {
                        error!(
                            queue = %class.binding().queue,
                            delivery_tag = tag,
                            error = %e,
                            "rabbitmq_dead_letter_failed"
                        );
                        match acker.nack(tag, true).await {
                            Ok(()) => MessageState::Requeued,
                            Err(e) => return ack_failed(class, tag, e, MessageState::Requeued),
                        }
                    }
                }
            }
        };

        info!(
            queue = %class.binding().queue,
            delivery_tag = tag,
            attempts,
            state = state.as_str(),
            "message_finalized"
        );

        state
    }
}

fn ack_failed(
    class: MessageClass,
    delivery_tag: u64,
    error: anyhow::Error,
    intended: MessageState,
) -> MessageState {
    error!(
        queue = %class.binding().queue,
        delivery_tag,
        intended = intended.as_str(),
        error = %error,
        "rabbitmq_ack_failed"
    );
    intended
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingAcker {
        calls: Mutex<Vec<String>>,
        fail_dead_letter: bool,
    }

    impl RecordingAcker {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageAcker for RecordingAcker {
        async fn ack(&self, delivery_tag: u64) -> Result<()> {
            self.calls.lock().unwrap().push(format!("ack:{}", delivery_tag));
            Ok(())
        }

        async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("nack:{}:{}", delivery_tag, requeue));
            Ok(())
        }

        async fn dead_letter(&self, class: MessageClass, record: &DeadLetterRecord) -> Result<()> {
            if self.fail_dead_letter {
                anyhow::bail!("broker gone");
            }
            self.calls
                .lock()
                .unwrap()
                .push(format!("dead_letter:{}:{}", class.as_str(), record.attempts));
            Ok(())
        }
    }

    fn retry_policy(max_attempts: u32) -> AckPolicy {
        AckPolicy::RetryThenDeadLetter {
            max_attempts,
            backoff: Backoff::new(Duration::from_millis(100), Duration::from_millis(1_000)),
        }
    }

    #[test]
    fn test_parse_policy() {
        let d = Duration::from_millis(1);
        assert_eq!(AckPolicy::parse("ack_always", 3, d, d).unwrap(), AckPolicy::AckAlways);
        assert_eq!(
            AckPolicy::parse("REDELIVER_ONCE", 3, d, d).unwrap(),
            AckPolicy::RedeliverOnce
        );
        assert!(AckPolicy::parse("retry_then_dead_letter", 0, d, d)
            .unwrap()
            .uses_dead_letter());
        assert!(matches!(
            AckPolicy::parse("sometimes", 3, d, d),
            Err(ConfigError::UnknownAckPolicy(_))
        ));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let backoff = Backoff::new(Duration::from_millis(1_000), Duration::from_secs(10));
        for _ in 0..100 {
            let delay = backoff.jittered(1);
            assert!(delay >= Duration::from_millis(899) && delay <= Duration::from_millis(1_101));
        }
    }

    #[test]
    fn test_backoff_huge_bounds_are_clamped() {
        let backoff = Backoff::new(
            Duration::from_millis(u64::MAX),
            Duration::from_millis(u64::MAX),
        );
        assert_eq!(backoff.max, BACKOFF_CEILING);
        assert_eq!(backoff.initial, BACKOFF_CEILING);

        for attempt in [1, 2, 30, u32::MAX] {
            assert!(backoff.jittered(attempt) <= BACKOFF_CEILING.mul_f64(1.1));
        }
    }

    #[test]
    fn test_success_always_acks() {
        for policy in [AckPolicy::AckAlways, retry_policy(3), AckPolicy::RedeliverOnce] {
            let controller = AckController::new(policy);
            assert_eq!(controller.decide(Outcome::Delivered, 1, false), Decision::Ack);
            assert_eq!(controller.decide(Outcome::Delivered, 3, true), Decision::Ack);
        }
    }

    #[test]
    fn test_ack_always_drops_failures() {
        let controller = AckController::new(AckPolicy::AckAlways);
        assert_eq!(controller.decide(Outcome::DeliveryFailed, 1, false), Decision::Drop);
        assert_eq!(controller.decide(Outcome::DecodeFailed, 1, false), Decision::Drop);
    }

    #[test]
    fn test_retry_then_dead_letter() {
        let controller = AckController::new(retry_policy(3));

        assert!(matches!(
            controller.decide(Outcome::DeliveryFailed, 1, false),
            Decision::Retry(_)
        ));
        assert!(matches!(
            controller.decide(Outcome::DeliveryFailed, 2, false),
            Decision::Retry(_)
        ));
        assert_eq!(
            controller.decide(Outcome::DeliveryFailed, 3, false),
            Decision::DeadLetter
        );
        assert_eq!(
            controller.decide(Outcome::DecodeFailed, 1, false),
            Decision::DeadLetter
        );
    }

    #[test]
    fn test_redeliver_once() {
        let controller = AckController::new(AckPolicy::RedeliverOnce);
        assert_eq!(
            controller.decide(Outcome::DeliveryFailed, 1, false),
            Decision::Requeue
        );
        assert_eq!(controller.decide(Outcome::DeliveryFailed, 1, true), Decision::Drop);
        assert_eq!(controller.decide(Outcome::DecodeFailed, 1, false), Decision::Drop);
    }

    #[tokio::test]
    async fn test_finalize_drop_acks_once() {
        let controller = AckController::new(AckPolicy::AckAlways);
        let acker = RecordingAcker::default();
        let raw = RawMessage::new(9, false, b"{}".to_vec());

        let state = controller
            .finalize(&acker, MessageClass::Auth, &raw, Decision::Drop, Some("boom"), 1)
            .await;

        assert_eq!(state, MessageState::Dropped);
        assert_eq!(acker.calls(), vec!["ack:9"]);
    }

    #[tokio::test]
    async fn test_finalize_dead_letter_then_ack() {
        let controller = AckController::new(retry_policy(3));
        let acker = RecordingAcker::default();
        let raw = RawMessage::new(4, false, b"{}".to_vec());

        let state = controller
            .finalize(&acker, MessageClass::Order, &raw, Decision::DeadLetter, Some("smtp down"), 3)
            .await;

        assert_eq!(state, MessageState::DeadLettered);
        assert_eq!(acker.calls(), vec!["dead_letter:order:3", "ack:4"]);
    }

    #[tokio::test]
    async fn test_finalize_dead_letter_failure_requeues() {
        let controller = AckController::new(retry_policy(3));
        let acker = RecordingAcker {
            fail_dead_letter: true,
            ..Default::default()
        };
        let raw = RawMessage::new(5, false, b"{}".to_vec());

        let state = controller
            .finalize(&acker, MessageClass::Order, &raw, Decision::DeadLetter, None, 3)
            .await;

        assert_eq!(state, MessageState::Requeued);
        assert_eq!(acker.calls(), vec!["nack:5:true"]);
    }
}
