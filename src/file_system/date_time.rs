/*
    fluxvault
    https://github.com/dbalsom/fluxvault

    Copyright 2024 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/file_system/date_time.rs

    Calendar dates for filesystem timestamps.
*/

//! CP/M 3 date stamps count days from 1978-01-01 (day 1) and store hours and minutes in packed
//! BCD. [FsDateTime] converts between that representation and a calendar date.

use crate::util::{from_bcd, to_bcd};
use std::{
    fmt::{self, Display, Formatter},
    time::SystemTime,
};

/// The first year representable by a CP/M date stamp.
pub const CPM_EPOCH_YEAR: u16 = 1978;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DateTimeError {
    #[error("Year is before the epoch")]
    BeforeEpoch,
    #[error("Year is too large")]
    YearTooLarge,
    #[error("Month or Day out of range")]
    InternalOutOfRange,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FsDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Default for FsDateTime {
    fn default() -> Self {
        Self {
            year: CPM_EPOCH_YEAR,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        }
    }
}

impl Display for FsDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}/{:02}/{:02} {:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute
        )
    }
}

impl FsDateTime {
    /// Decode a CP/M date stamp. Day 1 is 1978-01-01; day 0 means no date was recorded.
    pub fn from_cpm(days: u16, hour_bcd: u8, minute_bcd: u8) -> Option<Self> {
        if days == 0 {
            return None;
        }
        let (year, day_of_year) = days_to_ymd(CPM_EPOCH_YEAR, (days - 1) as u64).ok()?;
        let (month, day) = day_of_year_to_month_day(year, day_of_year).ok()?;
        Some(FsDateTime {
            year,
            month,
            day,
            hour: from_bcd(hour_bcd),
            minute: from_bcd(minute_bcd),
            second: 0,
        })
    }

    /// Encode as a CP/M date stamp: (days since 1977-12-31, BCD hour, BCD minute).
    pub fn to_cpm(&self) -> Result<(u16, u8, u8), DateTimeError> {
        if self.year < CPM_EPOCH_YEAR {
            return Err(DateTimeError::BeforeEpoch);
        }
        if self.month == 0 || self.month > 12 || self.day == 0 {
            return Err(DateTimeError::InternalOutOfRange);
        }
        let mut days: u64 = (CPM_EPOCH_YEAR..self.year).map(|y| days_in_year(y) as u64).sum();
        days += month_lengths(self.year)[..(self.month - 1) as usize]
            .iter()
            .map(|&d| d as u64)
            .sum::<u64>();
        days += self.day as u64;
        if days > u16::MAX as u64 {
            return Err(DateTimeError::YearTooLarge);
        }
        Ok((days as u16, to_bcd(self.hour), to_bcd(self.minute)))
    }
}

impl TryFrom<SystemTime> for FsDateTime {
    type Error = DateTimeError;

    fn try_from(st: SystemTime) -> Result<Self, Self::Error> {
        // If st is before the Unix epoch, duration_since will Err
        let duration = st
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|_| DateTimeError::BeforeEpoch)?;

        let total_secs = duration.as_secs();

        // Break out H/M/S within the day
        let days = total_secs / 86400;
        let mut leftover = total_secs % 86400;

        let hour = (leftover / 3600) as u8;
        leftover %= 3600;

        let minute = (leftover / 60) as u8;
        let second = (leftover % 60) as u8;

        let (year, day_of_year) = days_to_ymd(1970, days)?;
        let (month, day) = day_of_year_to_month_day(year, day_of_year)?;

        Ok(FsDateTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
        })
    }
}

/// Convert a count of days since January 1 of `epoch` into (year, day_in_year_0_based).
///
/// Returns an error if the computed year would exceed u16::MAX.
fn days_to_ymd(epoch: u16, mut days: u64) -> Result<(u16, u16), DateTimeError> {
    let mut year: u16 = epoch;
    loop {
        let year_days = days_in_year(year) as u64;
        if days < year_days {
            return Ok((year, days as u16));
        }
        days -= year_days;

        if year == u16::MAX {
            return Err(DateTimeError::YearTooLarge);
        }
        year += 1;
    }
}

fn month_lengths(year: u16) -> [u16; 12] {
    if is_leap_year(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    }
    else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    }
}

/// Convert a (year, day_in_year_0_based) to (month, day).
fn day_of_year_to_month_day(year: u16, day_of_year_0_based: u16) -> Result<(u8, u8), DateTimeError> {
    let mut leftover = day_of_year_0_based;
    for (i, &mlen) in month_lengths(year).iter().enumerate() {
        if leftover < mlen {
            return Ok(((i + 1) as u8, (leftover + 1) as u8));
        }
        else {
            leftover -= mlen;
        }
    }
    Err(DateTimeError::InternalOutOfRange)
}

/// Number of days in a given year (365 or 366).
fn days_in_year(y: u16) -> u16 {
    if is_leap_year(y) {
        366
    }
    else {
        365
    }
}

/// Standard proleptic-Gregorian leap-year rule
fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpm_epoch() {
        let dt = FsDateTime::from_cpm(1, 0x12, 0x34).unwrap();
        assert_eq!((dt.year, dt.month, dt.day, dt.hour, dt.minute), (1978, 1, 1, 12, 34));
        assert_eq!(dt.to_cpm().unwrap(), (1, 0x12, 0x34));
        assert!(FsDateTime::from_cpm(0, 0, 0).is_none());
    }

    #[test]
    fn test_cpm_leap_year() {
        // 1980-03-01: 365 + 365 + 31 + 29 + 1
        let dt = FsDateTime::from_cpm(791, 0, 0).unwrap();
        assert_eq!((dt.year, dt.month, dt.day), (1980, 3, 1));
        assert_eq!(dt.to_cpm().unwrap().0, 791);
    }
}
