use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Malformed textual input (date, time or category).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Date(String),
    Time(String),
    Category(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Date(s) => write!(f, "invalid date {s:?}: expected YYYY-MM-DD"),
            ParseError::Time(s) => write!(f, "invalid time {s:?}: expected HH:MM"),
            ParseError::Category(s) => write!(f, "unknown category {s:?}"),
        }
    }
}

impl std::error::Error for ParseError {}

// ── Category ─────────────────────────────────────────────────────

/// Closed set of event classifications. Serialized by code (`CAT1`..`CAT8`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "CAT1", alias = "Music Festivals")]
    MusicFestivals,
    #[serde(rename = "CAT2", alias = "Comedy Shows")]
    ComedyShows,
    #[serde(rename = "CAT3", alias = "Movies")]
    Movies,
    #[serde(rename = "CAT4", alias = "Food Festivals")]
    FoodFestivals,
    #[serde(rename = "CAT5", alias = "Art Exhibitions")]
    ArtExhibitions,
    #[serde(rename = "CAT6", alias = "Sports Events")]
    SportsEvents,
    #[serde(rename = "CAT7", alias = "Tech Conferences")]
    TechConferences,
    #[serde(rename = "CAT8", alias = "Other")]
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::MusicFestivals,
        Category::ComedyShows,
        Category::Movies,
        Category::FoodFestivals,
        Category::ArtExhibitions,
        Category::SportsEvents,
        Category::TechConferences,
        Category::Other,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Category::MusicFestivals => "CAT1",
            Category::ComedyShows => "CAT2",
            Category::Movies => "CAT3",
            Category::FoodFestivals => "CAT4",
            Category::ArtExhibitions => "CAT5",
            Category::SportsEvents => "CAT6",
            Category::TechConferences => "CAT7",
            Category::Other => "CAT8",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::MusicFestivals => "Music Festivals",
            Category::ComedyShows => "Comedy Shows",
            Category::Movies => "Movies",
            Category::FoodFestivals => "Food Festivals",
            Category::ArtExhibitions => "Art Exhibitions",
            Category::SportsEvents => "Sports Events",
            Category::TechConferences => "Tech Conferences",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Accepts either the code or the display label, case-insensitively.
impl FromStr for Category {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.code().eq_ignore_ascii_case(needle) || c.label().eq_ignore_ascii_case(needle))
            .ok_or_else(|| ParseError::Category(s.to_string()))
    }
}

// ── Calendar values ──────────────────────────────────────────────

/// Local calendar date, `YYYY-MM-DD`. No timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotDate(NaiveDate);

impl SlotDate {
    pub fn as_naive(&self) -> NaiveDate {
        self.0
    }
}

impl From<NaiveDate> for SlotDate {
    fn from(d: NaiveDate) -> Self {
        Self(d)
    }
}

impl FromStr for SlotDate {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // chrono accepts unpadded fields; the wire format does not.
        if s.len() != 10 {
            return Err(ParseError::Date(s.to_string()));
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(SlotDate)
            .map_err(|_| ParseError::Date(s.to_string()))
    }
}

impl TryFrom<String> for SlotDate {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SlotDate> for String {
    fn from(d: SlotDate) -> String {
        d.to_string()
    }
}

impl fmt::Display for SlotDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// Local time of day with minute resolution, `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotTime(NaiveTime);

impl SlotTime {
    pub fn as_naive(&self) -> NaiveTime {
        self.0
    }
}

impl FromStr for SlotTime {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 5 {
            return Err(ParseError::Time(s.to_string()));
        }
        NaiveTime::parse_from_str(s, "%H:%M")
            .map(SlotTime)
            .map_err(|_| ParseError::Time(s.to_string()))
    }
}

impl TryFrom<String> for SlotTime {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SlotTime> for String {
    fn from(t: SlotTime) -> String {
        t.to_string()
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

// ── Status ───────────────────────────────────────────────────────

/// Lifecycle of a timeslot. `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Scheduled,
    Cancelled,
    Rescheduled,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Scheduled => "scheduled",
            Status::Cancelled => "cancelled",
            Status::Rescheduled => "rescheduled",
        }
    }

    /// The full transition table. Anything not listed is rejected.
    pub fn can_transition_to(self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Scheduled, Status::Cancelled)
                | (Status::Scheduled, Status::Rescheduled)
                | (Status::Rescheduled, Status::Cancelled)
                | (Status::Rescheduled, Status::Rescheduled)
        )
    }

    /// A rescheduled slot still takes bookings; a cancelled one does not.
    pub fn is_bookable(self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Cancelled)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Timeslot ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeslot {
    pub id: Ulid,
    pub category: Category,
    pub date: SlotDate,
    pub start_time: SlotTime,
    pub end_time: SlotTime,
    /// Max concurrent bookings. Fixed at creation.
    pub capacity: u32,
    /// Seat holders in booking order. Never longer than `capacity`, no duplicates.
    pub booked_by: Vec<String>,
    pub status: Status,
    /// Bumped by the repository on every write.
    pub version: u64,
}

impl Timeslot {
    pub fn new(
        id: Ulid,
        category: Category,
        date: SlotDate,
        start_time: SlotTime,
        end_time: SlotTime,
        capacity: u32,
    ) -> Self {
        Self {
            id,
            category,
            date,
            start_time,
            end_time,
            capacity,
            booked_by: Vec::new(),
            status: Status::Scheduled,
            version: 0,
        }
    }

    pub fn holds_seat(&self, user_id: &str) -> bool {
        self.booked_by.iter().any(|u| u == user_id)
    }

    pub fn seats_left(&self) -> u32 {
        self.capacity.saturating_sub(self.booked_by.len() as u32)
    }

    pub fn is_full(&self) -> bool {
        self.seats_left() == 0
    }

    /// Local date-time at which the slot is over.
    pub fn ends_at(&self) -> NaiveDateTime {
        self.date.as_naive().and_time(self.end_time.as_naive())
    }

    /// Listing order: `(date, start_time)`, ties broken by id.
    pub fn sort_key(&self) -> (SlotDate, SlotTime, Ulid) {
        (self.date, self.start_time, self.id)
    }
}

/// Category subscriptions for one user. Saved wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub user_id: String,
    pub categories: BTreeSet<Category>,
}

// ── Persistence & notifications ──────────────────────────────────

/// WAL record format. Each record is a full replacement of one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    TimeslotPut(Timeslot),
    TimeslotRemoved { id: Ulid },
    PreferencesPut(UserPreferences),
}

/// Notification-worthy outcomes, handed to a `NotificationSink`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    BookingCreated {
        slot_id: Ulid,
        user_id: String,
    },
    SlotCancelled {
        slot_id: Ulid,
        participants: Vec<String>,
    },
    SlotRescheduled {
        slot_id: Ulid,
        participants: Vec<String>,
        new_date: SlotDate,
        new_start: SlotTime,
        new_end: SlotTime,
    },
}

impl DomainEvent {
    pub fn slot_id(&self) -> Ulid {
        match self {
            DomainEvent::BookingCreated { slot_id, .. }
            | DomainEvent::SlotCancelled { slot_id, .. }
            | DomainEvent::SlotRescheduled { slot_id, .. } => *slot_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::BookingCreated { .. } => "booking_created",
            DomainEvent::SlotCancelled { .. } => "slot_cancelled",
            DomainEvent::SlotRescheduled { .. } => "slot_rescheduled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(date: &str, start: &str, end: &str) -> Timeslot {
        Timeslot::new(
            Ulid::new(),
            Category::Movies,
            date.parse().unwrap(),
            start.parse().unwrap(),
            end.parse().unwrap(),
            2,
        )
    }

    #[test]
    fn date_parsing() {
        let d: SlotDate = "2025-03-10".parse().unwrap();
        assert_eq!(d.to_string(), "2025-03-10");
        assert!("2025-02-30".parse::<SlotDate>().is_err()); // not a real day
        assert!("2025-3-10".parse::<SlotDate>().is_err()); // unpadded
        assert!("10/03/2025".parse::<SlotDate>().is_err());
        assert!("".parse::<SlotDate>().is_err());
    }

    #[test]
    fn time_parsing() {
        let t: SlotTime = "09:05".parse().unwrap();
        assert_eq!(t.to_string(), "09:05");
        assert!("24:00".parse::<SlotTime>().is_err());
        assert!("9:05".parse::<SlotTime>().is_err());
        assert!("09:05:00".parse::<SlotTime>().is_err());
    }

    #[test]
    fn calendar_ordering_matches_text_ordering() {
        let a: SlotDate = "2025-01-31".parse().unwrap();
        let b: SlotDate = "2025-02-01".parse().unwrap();
        assert!(a < b);
        let x: SlotTime = "09:59".parse().unwrap();
        let y: SlotTime = "10:00".parse().unwrap();
        assert!(x < y);
    }

    #[test]
    fn category_from_code_or_label() {
        assert_eq!("CAT1".parse::<Category>().unwrap(), Category::MusicFestivals);
        assert_eq!("cat7".parse::<Category>().unwrap(), Category::TechConferences);
        assert_eq!("Comedy Shows".parse::<Category>().unwrap(), Category::ComedyShows);
        assert_eq!("  movies ".parse::<Category>().unwrap(), Category::Movies);
        assert!("CAT9".parse::<Category>().is_err());
    }

    #[test]
    fn category_serializes_as_code() {
        let json = serde_json::to_string(&Category::FoodFestivals).unwrap();
        assert_eq!(json, "\"CAT4\"");
        let back: Category = serde_json::from_str("\"Food Festivals\"").unwrap();
        assert_eq!(back, Category::FoodFestivals);
    }

    #[test]
    fn status_transitions() {
        use Status::*;
        assert!(Scheduled.can_transition_to(Cancelled));
        assert!(Scheduled.can_transition_to(Rescheduled));
        assert!(Rescheduled.can_transition_to(Cancelled));
        assert!(Rescheduled.can_transition_to(Rescheduled));
        assert!(!Cancelled.can_transition_to(Scheduled));
        assert!(!Cancelled.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Rescheduled));
        assert!(!Rescheduled.can_transition_to(Scheduled));
        assert!(!Scheduled.can_transition_to(Scheduled));
    }

    #[test]
    fn status_bookability() {
        assert!(Status::Scheduled.is_bookable());
        assert!(Status::Rescheduled.is_bookable());
        assert!(!Status::Cancelled.is_bookable());
        assert_eq!(serde_json::to_string(&Status::Rescheduled).unwrap(), "\"rescheduled\"");
    }

    #[test]
    fn seat_accounting() {
        let mut s = slot("2025-03-10", "09:00", "10:00");
        assert_eq!(s.seats_left(), 2);
        s.booked_by.push("u1".into());
        assert!(s.holds_seat("u1"));
        assert!(!s.holds_seat("u2"));
        assert!(!s.is_full());
        s.booked_by.push("u2".into());
        assert!(s.is_full());
    }

    #[test]
    fn ends_at_combines_date_and_end() {
        let s = slot("2025-03-10", "09:00", "10:30");
        assert_eq!(s.ends_at().to_string(), "2025-03-10 10:30:00");
    }

    #[test]
    fn sort_key_orders_by_date_then_start() {
        let mut v = vec![
            slot("2025-03-11", "08:00", "09:00"),
            slot("2025-03-10", "14:00", "15:00"),
            slot("2025-03-10", "09:00", "10:00"),
        ];
        v.sort_by_key(Timeslot::sort_key);
        let order: Vec<String> = v.iter().map(|s| format!("{} {}", s.date, s.start_time)).collect();
        assert_eq!(order, ["2025-03-10 09:00", "2025-03-10 14:00", "2025-03-11 08:00"]);
    }

    #[test]
    fn record_serialization_roundtrip() {
        let mut s = slot("2025-03-10", "09:00", "10:00");
        s.booked_by.push("alice".into());
        s.status = Status::Rescheduled;
        let record = Record::TimeslotPut(s);
        let bytes = bincode::serialize(&record).unwrap();
        let decoded: Record = bincode::deserialize(&bytes).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn domain_event_json_is_tagged() {
        let ev = DomainEvent::SlotCancelled {
            slot_id: Ulid::nil(),
            participants: vec!["a".into()],
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "SlotCancelled");
        assert_eq!(ev.kind(), "slot_cancelled");
    }
}
