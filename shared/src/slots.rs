use chrono::{NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A time of day offered for appointments, rendered like `10:00 AM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSlot(NaiveTime);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid time of day: {0:?}")]
pub struct InvalidTimeSlot(pub String);

impl TimeSlot {
    pub fn new(time: NaiveTime) -> Self {
        Self(time)
    }

    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn time(&self) -> NaiveTime {
        self.0
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%-I:%M %p"))
    }
}

impl FromStr for TimeSlot {
    type Err = InvalidTimeSlot;

    /// Accepts the 12-hour display form as well as `HH:MM` from HTML time inputs.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ["%I:%M %p", "%H:%M"]
            .iter()
            .find_map(|format| NaiveTime::parse_from_str(s, format).ok())
            .map(Self)
            .ok_or_else(|| InvalidTimeSlot(s.to_string()))
    }
}

impl TryFrom<String> for TimeSlot {
    type Error = InvalidTimeSlot;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeSlot> for String {
    fn from(slot: TimeSlot) -> Self {
        slot.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotScheduleError {
    #[error("closing time {closes} must be after opening time {opens}")]
    EmptyWindow { opens: TimeSlot, closes: TimeSlot },

    #[error("slot length must be at least one minute")]
    ZeroLength,
}

/// The fixed set of start times a shop offers within a day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSchedule {
    opens: TimeSlot,
    closes: TimeSlot,
    length: TimeDelta,
}

impl SlotSchedule {
    pub fn new(opens: TimeSlot, closes: TimeSlot, minutes: u32) -> Result<Self, SlotScheduleError> {
        if closes <= opens {
            return Err(SlotScheduleError::EmptyWindow { opens, closes });
        }
        if minutes == 0 {
            return Err(SlotScheduleError::ZeroLength);
        }
        Ok(Self {
            opens,
            closes,
            length: TimeDelta::minutes(i64::from(minutes)),
        })
    }

    /// Start times from opening up to, but excluding, closing time.
    pub fn offered(&self) -> Vec<TimeSlot> {
        let mut slots = Vec::new();
        let mut next = self.opens.time();
        while next < self.closes.time() {
            slots.push(TimeSlot(next));
            let (advanced, wrapped) = next.overflowing_add_signed(self.length);
            if wrapped != 0 {
                break;
            }
            next = advanced;
        }
        slots
    }

    pub fn offers(&self, slot: TimeSlot) -> bool {
        self.offered().contains(&slot)
    }

    /// Parses `input` and accepts it only if it names an offered slot.
    pub fn resolve(&self, input: &str) -> Option<TimeSlot> {
        input.parse().ok().filter(|slot| self.offers(*slot))
    }
}
