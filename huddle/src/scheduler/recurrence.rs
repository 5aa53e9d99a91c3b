//! Campaign recurrence: when does the next occurrence fire.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::database::models::CampaignDbModel;
use crate::database::time::{ms_to_datetime, opt_ms_to_datetime};
use crate::domain::{RecurrenceFrequency, ScheduleType};
use crate::{Error, Result};

/// Upper bound on occurrences skipped while catching up to `now`.
const MAX_SKIPPED_OCCURRENCES: usize = 100_000;

/// Parsed recurrence settings of a campaign.
#[derive(Debug, Clone)]
pub struct RecurrenceRule {
    pub frequency: RecurrenceFrequency,
    pub interval: u32,
    pub time_of_day: Option<NaiveTime>,
    pub timezone: Tz,
    /// Day of month of the first occurrence; monthly steps return to it
    /// after a shorter month.
    pub anchor_day: u32,
    pub cron: Option<cron::Schedule>,
    pub end_date: Option<DateTime<Utc>>,
    pub end_after_occurrences: Option<i64>,
}

pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| Error::validation(format!("Invalid time_of_day '{raw}', expected HH:MM")))
}

pub fn parse_timezone(raw: &str) -> Result<Tz> {
    Tz::from_str(raw.trim()).map_err(|_| Error::validation(format!("Unknown timezone '{raw}'")))
}

pub fn parse_cron(raw: &str) -> Result<cron::Schedule> {
    cron::Schedule::from_str(raw.trim())
        .map_err(|e| Error::validation(format!("Invalid cron expression '{raw}': {e}")))
}

impl RecurrenceRule {
    /// `None` for one-shot campaigns.
    pub fn from_campaign(campaign: &CampaignDbModel) -> Result<Option<Self>> {
        if campaign.schedule_type()? == ScheduleType::Once {
            return Ok(None);
        }
        let frequency = campaign
            .frequency()?
            .ok_or_else(|| Error::validation("recurring campaigns need a recurrence_frequency"))?;
        if campaign.recurrence_interval < 1 || campaign.recurrence_interval > i64::from(u32::MAX) {
            return Err(Error::validation("recurrence_interval must be at least 1"));
        }
        if let Some(n) = campaign.recurrence_end_after_occurrences
            && n < 1
        {
            return Err(Error::validation(
                "recurrence_end_after_occurrences must be at least 1",
            ));
        }

        let cron = match (frequency, campaign.cron_expression.as_deref()) {
            (RecurrenceFrequency::Cron, Some(expr)) => Some(parse_cron(expr)?),
            (RecurrenceFrequency::Cron, None) => {
                return Err(Error::validation("cron campaigns need a cron_expression"));
            }
            _ => None,
        };

        let timezone = parse_timezone(&campaign.timezone)?;
        let anchor_day = ms_to_datetime(campaign.scheduled_at)
            .with_timezone(&timezone)
            .day();

        Ok(Some(Self {
            frequency,
            interval: campaign.recurrence_interval as u32,
            time_of_day: campaign
                .time_of_day
                .as_deref()
                .map(parse_time_of_day)
                .transpose()?,
            timezone,
            anchor_day,
            cron,
            end_date: opt_ms_to_datetime(campaign.recurrence_end_date),
            end_after_occurrences: campaign.recurrence_end_after_occurrences,
        }))
    }

    /// The occurrence directly after `previous`.
    pub fn step(&self, previous: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if let Some(schedule) = &self.cron {
            let local = previous.with_timezone(&self.timezone);
            return schedule
                .after(&local)
                .nth(self.interval.saturating_sub(1) as usize)
                .map(|next| next.with_timezone(&Utc));
        }

        let local = previous.with_timezone(&self.timezone);
        let date = local.date_naive();
        let next_date = match self.frequency {
            RecurrenceFrequency::Daily => date.checked_add_signed(Duration::days(self.interval.into())),
            RecurrenceFrequency::Weekly => {
                date.checked_add_signed(Duration::weeks(self.interval.into()))
            }
            RecurrenceFrequency::Monthly => self.monthly_step(date),
            RecurrenceFrequency::Cron => None,
        }?;
        let time = self.time_of_day.unwrap_or_else(|| local.time());
        resolve_local(self.timezone, next_date.and_time(time))
    }

    /// Same anchor day `interval` months later, clamped to the month's length.
    fn monthly_step(&self, date: NaiveDate) -> Option<NaiveDate> {
        let month_start = date
            .with_day(1)?
            .checked_add_months(Months::new(self.interval))?;
        let next_month = month_start.checked_add_months(Months::new(1))?;
        let month_len = (next_month - month_start).num_days() as u32;
        month_start.with_day(self.anchor_day.min(month_len))
    }

    /// First occurrence after `previous` that is later than `now`.
    pub fn next_after(&self, previous: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = self.step(previous)?;
        let mut skipped = 0;
        while candidate <= now {
            if skipped >= MAX_SKIPPED_OCCURRENCES {
                return None;
            }
            candidate = self.step(candidate)?;
            skipped += 1;
        }
        match self.end_date {
            Some(end) if candidate > end => None,
            _ => Some(candidate),
        }
    }
}

/// Map a local wall-clock time to UTC. Times skipped by a DST jump move
/// forward an hour; ambiguous times take the earlier instant.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

/// First `next_run_at` of a new campaign.
pub fn first_run(campaign: &CampaignDbModel) -> Result<Option<DateTime<Utc>>> {
    let scheduled = ms_to_datetime(campaign.scheduled_at);
    match RecurrenceRule::from_campaign(campaign)? {
        Some(rule) if rule.cron.is_some() => {
            // The first cron fire at or after the scheduled start.
            Ok(rule.step(scheduled - Duration::seconds(1)))
        }
        _ => Ok(Some(scheduled)),
    }
}

/// `next_run_at` after the occurrence scheduled at `scheduled`, given the run
/// count including that occurrence. `None` ends the campaign.
pub fn next_run(
    campaign: &CampaignDbModel,
    scheduled: DateTime<Utc>,
    runs_completed: i64,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let Some(rule) = RecurrenceRule::from_campaign(campaign)? else {
        return Ok(None);
    };
    if let Some(limit) = rule.end_after_occurrences
        && runs_completed >= limit
    {
        return Ok(None);
    }
    Ok(rule.next_after(scheduled, now))
}

/// Next run for a campaign being resumed at `now`: a still-future occurrence
/// is kept, missed ones are skipped. One-shot campaigns fire on the next tick.
pub fn resume_run(campaign: &CampaignDbModel, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let anchor = campaign
        .next_run_at
        .or(campaign.last_run_at)
        .map(ms_to_datetime)
        .unwrap_or_else(|| ms_to_datetime(campaign.scheduled_at));
    if anchor > now {
        return Ok(Some(anchor));
    }
    match RecurrenceRule::from_campaign(campaign)? {
        None => Ok(Some(now)),
        Some(rule) => {
            if let Some(limit) = rule.end_after_occurrences
                && campaign.total_runs >= limit
            {
                return Ok(None);
            }
            Ok(rule.next_after(anchor, now))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::time::datetime_to_ms;
    use rstest::rstest;

    fn campaign(frequency: &str, interval: i64) -> CampaignDbModel {
        CampaignDbModel {
            id: "c1".into(),
            organization_id: "org".into(),
            name: "n".into(),
            title: "t".into(),
            message: "m".into(),
            categories: r#"["campaign"]"#.into(),
            target_kind: "everyone".into(),
            target_ids: "[]".into(),
            channels: r#"["in_app"]"#.into(),
            created_by: "admin".into(),
            schedule_type: "recurring".into(),
            scheduled_at: datetime_to_ms(day(0, 9)),
            recurrence_frequency: Some(frequency.into()),
            recurrence_interval: interval,
            cron_expression: None,
            time_of_day: Some("09:00".into()),
            timezone: "UTC".into(),
            recurrence_end_date: None,
            recurrence_end_after_occurrences: None,
            status: "active".into(),
            last_run_at: None,
            next_run_at: None,
            total_runs: 0,
            locked_until: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn day(offset: i64, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, hour, 0, 0).unwrap() + Duration::days(offset)
    }

    #[rstest]
    #[case("daily", 1, 1)]
    #[case("daily", 3, 3)]
    #[case("weekly", 1, 7)]
    #[case("weekly", 2, 14)]
    #[case("monthly", 1, 31)]
    fn test_step(#[case] frequency: &str, #[case] interval: i64, #[case] days: i64) {
        let rule = RecurrenceRule::from_campaign(&campaign(frequency, interval))
            .unwrap()
            .unwrap();
        assert_eq!(rule.step(day(0, 9)), Some(day(days, 9)));
    }

    #[test]
    fn test_monthly_returns_to_anchor_day_after_short_month() {
        let at = |month: u32, dom: u32| Utc.with_ymd_and_hms(2025, month, dom, 9, 0, 0).unwrap();
        let mut c = campaign("monthly", 1);
        c.scheduled_at = datetime_to_ms(at(1, 31));
        let rule = RecurrenceRule::from_campaign(&c).unwrap().unwrap();

        assert_eq!(rule.step(at(1, 31)), Some(at(2, 28)));
        assert_eq!(rule.step(at(2, 28)), Some(at(3, 31)));
        assert_eq!(rule.step(at(3, 31)), Some(at(4, 30)));
        assert_eq!(rule.step(at(4, 30)), Some(at(5, 31)));
    }

    #[test]
    fn test_weekly_stops_after_occurrence_cap() {
        let mut c = campaign("weekly", 1);
        c.recurrence_end_after_occurrences = Some(3);

        assert_eq!(next_run(&c, day(0, 9), 1, day(0, 9)).unwrap(), Some(day(7, 9)));
        assert_eq!(next_run(&c, day(7, 9), 2, day(7, 9)).unwrap(), Some(day(14, 9)));
        assert_eq!(next_run(&c, day(14, 9), 3, day(14, 9)).unwrap(), None);
    }

    #[test]
    fn test_missed_occurrences_are_skipped() {
        let c = campaign("daily", 1);
        // Executor was down for three and a half days.
        let next = next_run(&c, day(0, 9), 1, day(3, 21)).unwrap();
        assert_eq!(next, Some(day(4, 9)));
    }

    #[test]
    fn test_end_date_terminates() {
        let mut c = campaign("daily", 1);
        c.recurrence_end_date = Some(datetime_to_ms(day(1, 12)));
        assert_eq!(next_run(&c, day(0, 9), 1, day(0, 9)).unwrap(), Some(day(1, 9)));
        assert_eq!(next_run(&c, day(1, 9), 2, day(1, 9)).unwrap(), None);
    }

    #[test]
    fn test_time_of_day_follows_timezone() {
        let mut c = campaign("daily", 1);
        c.timezone = "America/New_York".into();
        c.time_of_day = Some("08:00".into());
        let rule = RecurrenceRule::from_campaign(&c).unwrap().unwrap();
        // 2025-01-06 13:00 UTC is 08:00 EST; the next day is still EST.
        let next = rule.step(day(0, 13)).unwrap();
        assert_eq!(next, day(1, 13));
    }

    #[test]
    fn test_cron_schedule() {
        let mut c = campaign("cron", 1);
        c.cron_expression = Some("0 30 18 * * Mon *".into());
        c.time_of_day = None;
        let rule = RecurrenceRule::from_campaign(&c).unwrap().unwrap();
        // 2025-01-06 is a Monday.
        let next = rule.step(day(0, 19)).unwrap();
        assert_eq!(next, day(7, 18) + Duration::minutes(30));
        assert_eq!(first_run(&c).unwrap(), Some(day(0, 18) + Duration::minutes(30)));
    }

    #[test]
    fn test_invalid_rules_are_rejected() {
        let mut c = campaign("weekly", 0);
        assert!(RecurrenceRule::from_campaign(&c).is_err());

        c = campaign("cron", 1);
        assert!(RecurrenceRule::from_campaign(&c).is_err());

        c = campaign("daily", 1);
        c.timezone = "Nowhere/Special".into();
        assert!(RecurrenceRule::from_campaign(&c).is_err());
    }

    #[test]
    fn test_once_has_no_next_run() {
        let mut c = campaign("daily", 1);
        c.schedule_type = "once".into();
        c.recurrence_frequency = None;
        assert_eq!(next_run(&c, day(0, 9), 1, day(0, 9)).unwrap(), None);
        assert_eq!(first_run(&c).unwrap(), Some(day(0, 9)));
    }
}
