use chrono::prelude::DateTime;
use chrono::Utc;
use std::time::SystemTime;

/// A point in time as stored by the container.
///
/// Property lists carry real dates (`Manifest.plist`, `Info.plist`) while the
/// per-file records store integer seconds (`LastModified`, `Birth`). Both are
/// normalized to milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date {
    pub milliseconds_since_epoch: i64,
}

impl Date {
    pub fn from_seconds(seconds: i64) -> Date {
        Date {
            milliseconds_since_epoch: seconds.saturating_mul(1000),
        }
    }

    pub fn from_plist(date: plist::Date) -> Date {
        let datetime: DateTime<Utc> = SystemTime::from(date).into();
        Date {
            milliseconds_since_epoch: datetime.timestamp_millis(),
        }
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.milliseconds_since_epoch)
    }
}

impl std::fmt::Display for Date {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.to_datetime() {
            Some(datetime) => write!(f, "{}", datetime.format("%Y-%m-%d %H:%M:%S")),
            None => write!(f, "@{}ms", self.milliseconds_since_epoch),
        }
    }
}
