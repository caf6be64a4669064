use crate::domain::models::{CalendarSource, Event};
use crate::infrastructure::config::SyncWindow;
use crate::infrastructure::device_calendar::{
    DeviceCalendarSource, RawEvent, normalize_raw_event,
};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Months, Utc};
use std::sync::Arc;
use tokio::time::{Duration as TokioDuration, sleep};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

/// Normalized device data ready for an external merge. `calendars` is `None`
/// when the calendar list could not be read, so the stored list is kept.
#[derive(Debug, Clone, Default)]
pub struct DeviceSyncBatch {
    pub events: Vec<Event>,
    pub calendars: Option<Vec<CalendarSource>>,
}

pub struct DeviceCalendarSync<C>
where
    C: DeviceCalendarSource,
{
    source: Arc<C>,
    retry_policy: RetryPolicy,
}

impl<C> DeviceCalendarSync<C>
where
    C: DeviceCalendarSource,
{
    pub fn new(source: Arc<C>) -> Self {
        Self {
            source,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Never fails: a denied permission or a fetch that keeps failing is
    /// logged and reported as an empty batch.
    pub async fn fetch(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> DeviceSyncBatch {
        match self.source.request_permission().await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(error = %InfraError::PermissionDenied, "skipping device sync");
                return DeviceSyncBatch::default();
            }
            Err(error) => {
                tracing::error!(%error, "device calendar permission request failed");
                return DeviceSyncBatch::default();
            }
        }

        let calendars = match self.source.list_calendars().await {
            Ok(calendars) => Some(calendars),
            Err(error) => {
                tracing::warn!(%error, "device calendar list failed; keeping known calendars");
                None
            }
        };

        let raw_events = match self.list_events_with_retry(window_start, window_end).await {
            Ok(raw_events) => raw_events,
            Err(error) => {
                tracing::error!(%error, "device event fetch failed; treating as empty");
                return DeviceSyncBatch {
                    events: Vec::new(),
                    calendars,
                };
            }
        };

        let events = raw_events
            .iter()
            .filter_map(|raw| match normalize_raw_event(raw) {
                Ok(event) => event,
                Err(error) => {
                    tracing::warn!(raw_id = %raw.id, %error, "skipping device event");
                    None
                }
            })
            .collect::<Vec<_>>();

        tracing::info!(
            fetched = raw_events.len(),
            normalized = events.len(),
            "device calendar fetched"
        );
        DeviceSyncBatch { events, calendars }
    }

    async fn list_events_with_retry(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<RawEvent>, InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self.source.list_events(window_start, window_end).await {
                Ok(events) => return Ok(events),
                Err(error) if should_retry(&error) && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    tracing::debug!(
                        attempt,
                        delay_ms = delay,
                        %error,
                        "retrying device event fetch"
                    );
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Range fetched from the device around `now`.
pub fn sync_range(now: DateTime<Utc>, window: &SyncWindow) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = now
        .checked_sub_months(Months::new(window.months_back))
        .unwrap_or(now);
    let end = now
        .checked_add_months(Months::new(window.months_forward))
        .unwrap_or(now);
    (start, end)
}

fn should_retry(error: &InfraError) -> bool {
    match error {
        InfraError::Calendar(message) => {
            let message = message.to_ascii_lowercase();
            message.contains("timeout")
                || message.contains("timed out")
                || message.contains("temporarily unavailable")
                || message.contains("busy")
        }
        InfraError::Io(_) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    enum FakeListResponse {
        Success(Vec<RawEvent>),
        Timeout,
        Broken,
    }

    #[derive(Debug)]
    struct FakeDeviceCalendar {
        permission: Result<bool, String>,
        list_responses: Mutex<VecDeque<FakeListResponse>>,
        list_calls: AtomicUsize,
    }

    impl FakeDeviceCalendar {
        fn with_list_responses(responses: Vec<FakeListResponse>) -> Self {
            Self {
                permission: Ok(true),
                list_responses: Mutex::new(responses.into()),
                list_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DeviceCalendarSource for FakeDeviceCalendar {
        async fn request_permission(&self) -> Result<bool, InfraError> {
            self.permission.clone().map_err(InfraError::Calendar)
        }

        async fn list_calendars(&self) -> Result<Vec<CalendarSource>, InfraError> {
            Ok(vec![CalendarSource {
                id: "phone".to_string(),
                title: "Phone".to_string(),
                color: None,
                is_device: true,
            }])
        }

        async fn list_events(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<RawEvent>, InfraError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let response = self
                .list_responses
                .lock()
                .expect("list response lock poisoned")
                .pop_front()
                .unwrap_or(FakeListResponse::Success(Vec::new()));
            match response {
                FakeListResponse::Success(events) => Ok(events),
                FakeListResponse::Timeout => {
                    Err(InfraError::Calendar("request timed out".to_string()))
                }
                FakeListResponse::Broken => {
                    Err(InfraError::Calendar("store corrupted".to_string()))
                }
            }
        }
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn raw(id: &str, start: &str) -> RawEvent {
        RawEvent {
            id: id.to_string(),
            calendar_id: "phone".to_string(),
            title: Some("Synced".to_string()),
            notes: None,
            start_date: start.to_string(),
            end_date: "2026-02-16T23:00:00Z".to_string(),
            all_day: false,
            location: None,
            recurrence_rule: None,
        }
    }

    fn fast_retry(max_attempts: u8) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn fetch_retries_transient_failures() {
        let source = Arc::new(FakeDeviceCalendar::with_list_responses(vec![
            FakeListResponse::Timeout,
            FakeListResponse::Success(vec![raw("dev-1", "2026-02-16T09:00:00Z")]),
        ]));
        let sync = DeviceCalendarSync::new(Arc::clone(&source)).with_retry_policy(fast_retry(2));
        let (start, end) = sync_range(fixed_time("2026-02-16T00:00:00Z"), &SyncWindow::default());

        let batch = sync.fetch(start, end).await;

        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.calendars.map(|calendars| calendars.len()), Some(1));
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_gives_up_on_permanent_failures() {
        let source = Arc::new(FakeDeviceCalendar::with_list_responses(vec![
            FakeListResponse::Broken,
            FakeListResponse::Success(vec![raw("dev-1", "2026-02-16T09:00:00Z")]),
        ]));
        let sync = DeviceCalendarSync::new(Arc::clone(&source)).with_retry_policy(fast_retry(3));
        let now = fixed_time("2026-02-16T00:00:00Z");

        let batch = sync.fetch(now, now).await;

        assert!(batch.events.is_empty());
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn denied_permission_yields_empty_batch() {
        let mut fake = FakeDeviceCalendar::with_list_responses(vec![FakeListResponse::Success(
            vec![raw("dev-1", "2026-02-16T09:00:00Z")],
        )]);
        fake.permission = Ok(false);
        let source = Arc::new(fake);
        let sync = DeviceCalendarSync::new(Arc::clone(&source));
        let now = fixed_time("2026-02-16T00:00:00Z");

        let batch = sync.fetch(now, now).await;

        assert!(batch.events.is_empty());
        assert!(batch.calendars.is_none());
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_device_records_are_skipped() {
        let source = Arc::new(FakeDeviceCalendar::with_list_responses(vec![
            FakeListResponse::Success(vec![
                raw("dev-1", "2026-02-16T09:00:00Z"),
                raw("dev-2", "not a date"),
                raw("", "2026-02-16T09:00:00Z"),
            ]),
        ]));
        let sync = DeviceCalendarSync::new(source).with_retry_policy(fast_retry(1));
        let now = fixed_time("2026-02-16T00:00:00Z");

        let batch = sync.fetch(now, now).await;

        let ids: Vec<&str> = batch.events.iter().map(|event| event.id.as_str()).collect();
        assert_eq!(ids, vec!["dev-1"]);
    }

    #[test]
    fn sync_range_spans_one_month_back_three_forward() {
        let (start, end) = sync_range(fixed_time("2026-02-16T12:00:00Z"), &SyncWindow::default());
        assert_eq!(start, fixed_time("2026-01-16T12:00:00Z"));
        assert_eq!(end, fixed_time("2026-05-16T12:00:00Z"));
    }
}
