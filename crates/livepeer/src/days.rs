//! UTC day buckets and the rolling volume windows computed from them.

use bondgraph_core::{StateError, StateStore};
use chrono::{DateTime, Datelike as _};

use crate::{
    context::Ctx,
    decimal::Decimal,
    ids::{self, SECONDS_PER_DAY},
    model::{Broadcaster, BroadcasterDay, CalendarDate, Transcoder, TranscoderDay},
    reader::ContractReader,
};

/// Broadcasters without tickets for this many days stop being tracked as
/// active.
pub const ACTIVITY_WINDOW_DAYS: u64 = 90;

pub fn calendar_date(timestamp: u64) -> Option<CalendarDate> {
    let date = DateTime::from_timestamp(i64::try_from(timestamp).ok()?, 0)?.date_naive();

    Some(CalendarDate {
        date: format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day()),
        day: date.day(),
        month: date.month(),
        year: date.year(),
    })
}

#[derive(Debug, Default, PartialEq)]
pub struct VolumeWindows {
    pub thirty: Decimal,
    pub sixty: Decimal,
    pub ninety: Decimal,
}

impl VolumeWindows {
    /// Sums `(day start, volume)` buckets into trailing 30/60/90 day windows
    /// ending at `now`.
    pub fn compute<'a>(buckets: impl IntoIterator<Item = (u64, &'a Decimal)>, now: u64) -> Self {
        let since = |days: u64| now.saturating_sub(days * SECONDS_PER_DAY);

        let mut out = Self::default();

        for (date, volume) in buckets {
            if date >= since(30) {
                out.thirty += volume;
            }

            if date >= since(60) {
                out.sixty += volume;
            }

            if date >= since(90) {
                out.ninety += volume;
            }
        }

        out
    }
}

impl<S: StateStore, R: ContractReader> Ctx<'_, S, R> {
    /// Loads or creates today's bucket for the transcoder, linking new
    /// buckets from the transcoder record.
    pub fn transcoder_day(
        &mut self,
        transcoder: &mut Transcoder,
    ) -> Result<TranscoderDay, StateError> {
        let timestamp = self.timestamp();
        let id = ids::day_bucket_id(&transcoder.id, ids::day_number(timestamp));

        if let Some(existing) = self.load::<TranscoderDay>(&id)? {
            return Ok(existing);
        }

        let created = TranscoderDay {
            id: id.clone(),
            date: ids::day_start(timestamp),
            transcoder: transcoder.id.clone(),
            ..Default::default()
        };

        self.save(&created)?;
        transcoder.transcoder_days.push(id);

        Ok(created)
    }

    /// Loads or creates today's bucket for the broadcaster and marks the day
    /// as active.
    pub fn broadcaster_day(
        &mut self,
        broadcaster: &mut Broadcaster,
    ) -> Result<BroadcasterDay, StateError> {
        let timestamp = self.timestamp();
        let day = ids::day_number(timestamp);
        let id = ids::day_bucket_id(&broadcaster.id, day);

        if broadcaster.first_active_day == 0 {
            broadcaster.first_active_day = day;
        }

        broadcaster.last_active_day = day;

        if let Some(existing) = self.load::<BroadcasterDay>(&id)? {
            return Ok(existing);
        }

        let created = BroadcasterDay {
            id: id.clone(),
            date: ids::day_start(timestamp),
            broadcaster: broadcaster.id.clone(),
            ..Default::default()
        };

        self.save(&created)?;
        broadcaster.broadcaster_days.push(id);

        Ok(created)
    }

    /// Recomputes the transcoder's rolling volumes and drops buckets that
    /// fell out of the widest window from its list.
    pub fn refresh_transcoder_windows(
        &mut self,
        transcoder: &mut Transcoder,
    ) -> Result<(), StateError> {
        let now = self.timestamp();
        let horizon = now.saturating_sub(ACTIVITY_WINDOW_DAYS * SECONDS_PER_DAY);

        let mut buckets = Vec::with_capacity(transcoder.transcoder_days.len());

        for id in &transcoder.transcoder_days {
            if let Some(day) = self.load::<TranscoderDay>(id)? {
                buckets.push(day);
            }
        }

        let windows = VolumeWindows::compute(buckets.iter().map(|x| (x.date, &x.volume_eth)), now);

        transcoder.thirty_day_volume_eth = windows.thirty;
        transcoder.sixty_day_volume_eth = windows.sixty;
        transcoder.ninety_day_volume_eth = windows.ninety;

        transcoder.transcoder_days = buckets
            .into_iter()
            .filter(|x| x.date >= horizon)
            .map(|x| x.id)
            .collect();

        Ok(())
    }

    pub fn refresh_broadcaster_windows(
        &mut self,
        broadcaster: &mut Broadcaster,
    ) -> Result<(), StateError> {
        let now = self.timestamp();
        let horizon = now.saturating_sub(ACTIVITY_WINDOW_DAYS * SECONDS_PER_DAY);

        let mut buckets = Vec::with_capacity(broadcaster.broadcaster_days.len());

        for id in &broadcaster.broadcaster_days {
            if let Some(day) = self.load::<BroadcasterDay>(id)? {
                buckets.push(day);
            }
        }

        let windows = VolumeWindows::compute(buckets.iter().map(|x| (x.date, &x.volume_eth)), now);

        broadcaster.thirty_day_volume_eth = windows.thirty;
        broadcaster.sixty_day_volume_eth = windows.sixty;
        broadcaster.ninety_day_volume_eth = windows.ninety;

        broadcaster.broadcaster_days = buckets
            .into_iter()
            .filter(|x| x.date >= horizon)
            .map(|x| x.id)
            .collect();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calendar_date_is_utc() {
        let date = calendar_date(1_700_000_000).unwrap();

        assert_eq!(date.date, "2023-11-14");
        assert_eq!((date.day, date.month, date.year), (14, 11, 2023));
    }

    #[test]
    fn windows_include_their_edges() {
        let now = 200 * SECONDS_PER_DAY;
        let one = Decimal::from(1u64);

        let buckets = [
            (now, &one),
            (now - 30 * SECONDS_PER_DAY, &one),
            (now - 60 * SECONDS_PER_DAY, &one),
            (now - 90 * SECONDS_PER_DAY, &one),
            (now - 91 * SECONDS_PER_DAY, &one),
        ];

        let windows = VolumeWindows::compute(buckets, now);

        assert_eq!(windows.thirty, Decimal::from(2u64));
        assert_eq!(windows.sixty, Decimal::from(3u64));
        assert_eq!(windows.ninety, Decimal::from(4u64));
    }
}
