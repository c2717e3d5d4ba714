use chrono::{DateTime, FixedOffset, NaiveDate, Offset, TimeZone, Utc};
use thiserror::Error;

use super::MessageRecord;

pub const DEFAULT_REQUESTED_COUNT: u32 = 1000;
pub const DATE_POOL_FLOOR: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub default_count: u32,
    pub date_pool_floor: u32,
    /// 日期边界中的自然日按此时区偏移解释。
    pub utc_offset: FixedOffset,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            default_count: DEFAULT_REQUESTED_COUNT,
            date_pool_floor: DATE_POOL_FLOOR,
            utc_offset: Utc.fix(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRequest {
    pub conversation_id: String,
    pub requested_count: Option<u32>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub unread_only: bool,
}

impl WindowRequest {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            requested_count: None,
            start_date: None,
            end_date: None,
            unread_only: false,
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.requested_count = Some(count);
        self
    }

    pub fn with_dates(mut self, start_date: Option<&str>, end_date: Option<&str>) -> Self {
        self.start_date = start_date.map(str::to_string);
        self.end_date = end_date.map(str::to_string);
        self
    }

    pub fn unread_only(mut self, unread_only: bool) -> Self {
        self.unread_only = unread_only;
        self
    }

    fn has_both_bounds(&self) -> bool {
        self.start_date.is_some() && self.end_date.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowWarning {
    #[error("invalid DD/MM/YYYY date range (start: {start}, end: {end}); returning all fetched messages")]
    UnparseableDate { start: String, end: String },
    #[error("date filter needs both a start and an end date; returning all fetched messages")]
    IncompleteRange,
    #[error("start date {start} is after end date {end}; returning all fetched messages")]
    InvertedRange { start: String, end: String },
    #[error("unread-only requested but unread count is {unread}; using pool size {pool_size}")]
    UnreadFallback { unread: String, pool_size: u32 },
}

/// 闭区间的自然日边界。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateRange {
    pub fn from_days(start: NaiveDate, end: NaiveDate, offset: FixedOffset) -> Option<Self> {
        let start = start.and_hms_milli_opt(0, 0, 0, 0)?;
        let end = end.and_hms_milli_opt(23, 59, 59, 999)?;

        Some(Self {
            start: offset.from_local_datetime(&start).single()?.with_timezone(&Utc),
            end: offset.from_local_datetime(&end).single()?.with_timezone(&Utc),
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}

/// 严格解析 `DD/MM/YYYY`，日和月允许一位数。
pub fn parse_day_month_year(value: &str) -> Option<NaiveDate> {
    let mut parts = value.trim().split('/');
    let day = parts.next()?;
    let month = parts.next()?;
    let year = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let numeric = |part: &str, max_len: usize| {
        (!part.is_empty() && part.len() <= max_len && part.bytes().all(|b| b.is_ascii_digit()))
            .then(|| part.parse::<u32>().ok())
            .flatten()
    };

    let day = numeric(day, 2)?;
    let month = numeric(month, 2)?;
    if year.len() != 4 {
        return None;
    }
    let year = numeric(year, 4)?;

    NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, day)
}

/// 需要拉取的消息数量以及过滤方式。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageWindow {
    conversation_id: String,
    pool_size: u32,
    range: Option<DateRange>,
    warnings: Vec<WindowWarning>,
}

impl MessageWindow {
    pub fn plan(request: &WindowRequest, unread_count: Option<u32>, policy: &WindowPolicy) -> Self {
        let mut warnings = Vec::new();
        let requested = match request.requested_count {
            Some(count) if count > 0 => count,
            _ => policy.default_count,
        };

        let mut pool_size = requested;
        if request.unread_only {
            match unread_count {
                Some(unread) if unread > 0 => pool_size = unread,
                other => warnings.push(WindowWarning::UnreadFallback {
                    unread: other.map_or_else(|| "unknown".to_string(), |n| n.to_string()),
                    pool_size: requested,
                }),
            }
        }

        if request.has_both_bounds() {
            pool_size = pool_size.max(policy.date_pool_floor);
        }

        let range = match (request.start_date.as_deref(), request.end_date.as_deref()) {
            (None, None) => None,
            (Some(start), Some(end)) => {
                match (parse_day_month_year(start), parse_day_month_year(end)) {
                    (Some(start_day), Some(end_day)) if start_day <= end_day => {
                        let range = DateRange::from_days(start_day, end_day, policy.utc_offset);
                        if range.is_none() {
                            warnings.push(WindowWarning::UnparseableDate {
                                start: start.to_string(),
                                end: end.to_string(),
                            });
                        }
                        range
                    }
                    (Some(_), Some(_)) => {
                        warnings.push(WindowWarning::InvertedRange {
                            start: start.to_string(),
                            end: end.to_string(),
                        });
                        None
                    }
                    _ => {
                        warnings.push(WindowWarning::UnparseableDate {
                            start: start.to_string(),
                            end: end.to_string(),
                        });
                        None
                    }
                }
            }
            _ => {
                warnings.push(WindowWarning::IncompleteRange);
                None
            }
        };

        Self {
            conversation_id: request.conversation_id.clone(),
            pool_size,
            range,
            warnings,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn pool_size(&self) -> u32 {
        self.pool_size
    }

    pub fn range(&self) -> Option<&DateRange> {
        self.range.as_ref()
    }

    pub fn warnings(&self) -> &[WindowWarning] {
        &self.warnings
    }

    /// 保持拉取顺序，需要时间顺序时由调用方排序。
    pub fn apply(&self, messages: Vec<MessageRecord>) -> Vec<MessageRecord> {
        match self.range {
            Some(range) => messages
                .into_iter()
                .filter(|message| range.contains(message.timestamp))
                .collect(),
            None => messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn message(id: &str, timestamp: DateTime<Utc>) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            body: format!("body {id}"),
            timestamp,
            sender_id: "111@c.us".to_string(),
            is_self: false,
        }
    }

    fn utc(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid rfc3339")
            .with_timezone(&Utc)
    }

    #[test]
    fn default_pool_is_requested_count() {
        let request = WindowRequest::new("chat@g.us");
        let window = MessageWindow::plan(&request, Some(12), &WindowPolicy::default());

        assert_eq!(window.pool_size(), 1000);
        assert!(window.range().is_none());
        assert!(window.warnings().is_empty());
    }

    #[test]
    fn unread_only_uses_unread_counter() {
        let request = WindowRequest::new("chat@g.us").unread_only(true);
        let window = MessageWindow::plan(&request, Some(7), &WindowPolicy::default());

        assert_eq!(window.pool_size(), 7);
        assert!(window.warnings().is_empty());
    }

    #[test]
    fn unread_only_with_zero_unread_falls_back_to_requested() {
        let request = WindowRequest::new("chat@g.us").unread_only(true);

        let zero = MessageWindow::plan(&request, Some(0), &WindowPolicy::default());
        let unknown = MessageWindow::plan(&request, None, &WindowPolicy::default());

        assert_eq!(zero.pool_size(), 1000);
        assert_eq!(unknown.pool_size(), 1000);
        assert!(matches!(
            zero.warnings(),
            [WindowWarning::UnreadFallback { pool_size: 1000, .. }]
        ));
    }

    #[test]
    fn date_bounds_raise_pool_to_floor() {
        let request = WindowRequest::new("chat@g.us")
            .with_count(50)
            .unread_only(true)
            .with_dates(Some("01/01/2024"), Some("31/01/2024"));

        let window = MessageWindow::plan(&request, Some(7), &WindowPolicy::default());

        assert_eq!(window.pool_size(), 1000);
        assert!(window.range().is_some());
    }

    #[test]
    fn unparseable_end_date_skips_filter_with_warning() {
        let request =
            WindowRequest::new("chat@g.us").with_dates(Some("01/01/2024"), Some("2024-01-31"));
        let window = MessageWindow::plan(&request, None, &WindowPolicy::default());

        assert!(window.range().is_none());
        assert_eq!(window.pool_size(), 1000);
        assert_eq!(
            window.warnings(),
            &[WindowWarning::UnparseableDate {
                start: "01/01/2024".to_string(),
                end: "2024-01-31".to_string(),
            }]
        );

        let fetched = vec![
            message("a", utc("2023-12-31T10:00:00Z")),
            message("b", utc("2024-03-01T10:00:00Z")),
        ];
        assert_eq!(window.apply(fetched.clone()), fetched);
    }

    #[test]
    fn filter_is_inclusive_at_both_day_boundaries() {
        let request =
            WindowRequest::new("chat@g.us").with_dates(Some("01/01/2024"), Some("31/01/2024"));
        let window = MessageWindow::plan(&request, None, &WindowPolicy::default());

        let end_of_range = utc("2024-01-31T23:59:59.999Z");
        let fetched = vec![
            message("before", utc("2024-01-01T00:00:00Z") - Duration::milliseconds(1)),
            message("start", utc("2024-01-01T00:00:00Z")),
            message("end", end_of_range),
            message("after", end_of_range + Duration::milliseconds(1)),
        ];

        let kept: Vec<String> = window.apply(fetched).into_iter().map(|m| m.id).collect();
        assert_eq!(kept, vec!["start", "end"]);
    }

    #[test]
    fn offset_shifts_calendar_day() {
        let policy = WindowPolicy {
            utc_offset: FixedOffset::east_opt(2 * 3600).expect("valid offset"),
            ..WindowPolicy::default()
        };
        let request =
            WindowRequest::new("chat@g.us").with_dates(Some("15/06/2024"), Some("15/06/2024"));
        let window = MessageWindow::plan(&request, None, &policy);

        let range = window.range().expect("range");
        assert_eq!(range.start(), utc("2024-06-14T22:00:00Z"));
        assert_eq!(range.end(), utc("2024-06-15T21:59:59.999Z"));
    }

    #[test]
    fn single_bound_is_ignored_with_warning() {
        let request = WindowRequest::new("chat@g.us").with_dates(Some("01/01/2024"), None);
        let window = MessageWindow::plan(&request, None, &WindowPolicy::default());

        assert!(window.range().is_none());
        assert_eq!(window.pool_size(), 1000);
        assert_eq!(window.warnings(), &[WindowWarning::IncompleteRange]);
    }

    #[test]
    fn inverted_range_is_ignored_with_warning() {
        let request =
            WindowRequest::new("chat@g.us").with_dates(Some("31/01/2024"), Some("01/01/2024"));
        let window = MessageWindow::plan(&request, None, &WindowPolicy::default());

        assert!(window.range().is_none());
        assert!(matches!(
            window.warnings(),
            [WindowWarning::InvertedRange { .. }]
        ));
    }

    #[test]
    fn strict_date_parsing() {
        assert_eq!(
            parse_day_month_year("5/3/2024"),
            NaiveDate::from_ymd_opt(2024, 3, 5)
        );
        assert!(parse_day_month_year("2024-01-31").is_none());
        assert!(parse_day_month_year("31/02/2024").is_none());
        assert!(parse_day_month_year("01/01/24").is_none());
        assert!(parse_day_month_year("01/01/2024/1").is_none());
        assert!(parse_day_month_year("+1/01/2024").is_none());
    }

    #[test]
    fn planning_is_idempotent() {
        let request = WindowRequest::new("chat@g.us")
            .unread_only(true)
            .with_dates(Some("01/01/2024"), Some("31/01/2024"));

        let first = MessageWindow::plan(&request, Some(3), &WindowPolicy::default());
        let second = MessageWindow::plan(&request, Some(3), &WindowPolicy::default());

        assert_eq!(first, second);
    }
}
