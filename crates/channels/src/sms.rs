//! Outbound SMS submission. Segment accounting lives here, not in the
//! engine: the engine hands over the full rendered text.

use async_trait::async_trait;
use automation_core::types::Correlation;
use automation_core::{AutomationError, AutomationResult};
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundSms {
    pub to_phone: String,
    pub message: String,
    pub correlation: Correlation,
}

#[async_trait]
pub trait SmsChannel: Send + Sync {
    async fn submit(&self, sms: OutboundSms) -> AutomationResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedSms {
    pub id: Uuid,
    pub sms: OutboundSms,
    pub segments: u32,
    pub queued_at: DateTime<Utc>,
}

/// In-memory SMS channel that records every accepted message.
#[derive(Default)]
pub struct SmsOutbox {
    queued: Mutex<Vec<QueuedSms>>,
    rejected_numbers: DashSet<String>,
}

impl SmsOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_number(&self, phone: &str) {
        self.rejected_numbers.insert(phone.to_string());
    }

    pub fn queued(&self) -> Vec<QueuedSms> {
        self.queued.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.queued.lock().len()
    }

    /// Number of billable segments for a message body.
    /// GSM 7-bit: 160 chars in one segment, 153 per segment when split.
    /// Anything else is UCS-2: 70 chars in one segment, 67 when split.
    pub fn calculate_segments(body: &str) -> u32 {
        let chars = body.chars().count() as u32;
        let (single, multi) = if body.chars().all(is_gsm_basic) {
            (160, 153)
        } else {
            (70, 67)
        };
        if chars <= single {
            1
        } else {
            chars.div_ceil(multi)
        }
    }
}

/// Conservative GSM 03.38 check: printable ASCII plus line breaks. Extended
/// Latin characters fall back to UCS-2 accounting.
fn is_gsm_basic(c: char) -> bool {
    c == '\n' || c == '\r' || ((' '..='~').contains(&c) && c != '`')
}

#[async_trait]
impl SmsChannel for SmsOutbox {
    async fn submit(&self, sms: OutboundSms) -> AutomationResult<()> {
        if self.rejected_numbers.contains(&sms.to_phone) {
            metrics::counter!("automation.sms_rejected").increment(1);
            return Err(AutomationError::ChannelRejected {
                channel: "sms",
                reason: format!("number {} is not reachable", sms.to_phone),
            });
        }

        let segments = Self::calculate_segments(&sms.message);
        debug!(
            to = %sms.to_phone,
            segments,
            workflow_id = %sms.correlation.workflow_id,
            "SMS queued"
        );
        metrics::counter!("automation.sms_queued").increment(1);

        self.queued.lock().push(QueuedSms {
            id: Uuid::new_v4(),
            sms,
            segments,
            queued_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sms_to(phone: &str, message: &str) -> OutboundSms {
        OutboundSms {
            to_phone: phone.to_string(),
            message: message.to_string(),
            correlation: Correlation {
                workflow_id: Uuid::new_v4(),
                customer_id: "c-1".to_string(),
                member_id: Uuid::new_v4(),
                step_id: Uuid::new_v4(),
            },
        }
    }

    #[test]
    fn test_segments_gsm() {
        assert_eq!(SmsOutbox::calculate_segments(""), 1);
        assert_eq!(SmsOutbox::calculate_segments(&"A".repeat(160)), 1);
        assert_eq!(SmsOutbox::calculate_segments(&"A".repeat(161)), 2);
        assert_eq!(SmsOutbox::calculate_segments(&"A".repeat(306)), 2);
        assert_eq!(SmsOutbox::calculate_segments(&"A".repeat(307)), 3);
    }

    #[test]
    fn test_segments_unicode() {
        assert_eq!(SmsOutbox::calculate_segments(&"\u{1F600}".repeat(10)), 1);
        let body = format!("{}\u{1F600}", "A".repeat(69));
        assert_eq!(SmsOutbox::calculate_segments(&body), 1);
        let body = format!("{}\u{1F600}", "A".repeat(70));
        assert_eq!(SmsOutbox::calculate_segments(&body), 2);
    }

    #[tokio::test]
    async fn test_submit_and_reject() {
        let outbox = SmsOutbox::new();
        outbox.submit(sms_to("+15550001", "Hi Ada")).await.unwrap();
        assert_eq!(outbox.count(), 1);
        assert_eq!(outbox.queued()[0].segments, 1);

        outbox.reject_number("+15550002");
        let err = outbox.submit(sms_to("+15550002", "Hi")).await.unwrap_err();
        assert!(matches!(err, AutomationError::ChannelRejected { channel: "sms", .. }));
        assert_eq!(outbox.count(), 1);
    }
}
