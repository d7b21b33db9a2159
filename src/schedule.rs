//! Automatic backups at fixed local times.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};

use chrono::{Datelike, Days, Local, NaiveDateTime, NaiveTime, Weekday};
use derive_more::{Display, Error};

/// Format of the configured times.
pub const TIME_FORMAT: &str = "%H:%M";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Daily,
    #[serde(alias = "custom")]
    Weekly,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
/// Configuration of the [Scheduler].
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub frequency: Frequency,
    /// `HH:MM` local times. Weekly schedules only use the first one.
    #[serde(default = "default_times")]
    pub times: Vec<String>,
    /// Day of weekly backups.
    #[serde(default = "default_day")]
    pub day: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: Frequency::default(),
            times: default_times(),
            day: default_day(),
        }
    }
}

fn default_times() -> Vec<String> {
    vec!["02:00".to_string()]
}

fn default_day() -> String {
    "Monday".to_string()
}

#[derive(Debug, Display, Error, PartialEq, Eq)]
/// Errors on turning a [ScheduleConfig] into a [Schedule].
pub enum ScheduleError {
    #[display("Invalid backup time {_0:?}, expected HH:MM")]
    InvalidTime(#[error(ignore)] String),
    #[display("Invalid backup day {_0:?}")]
    InvalidDay(#[error(ignore)] String),
    #[display("No backup time configured")]
    NoTimes,
}

/// When automatic backups fire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Schedule {
    /// Every day at each of the times.
    Daily { times: Vec<NaiveTime> },
    /// Once a week.
    Weekly { day: Weekday, time: NaiveTime },
}

impl TryFrom<&ScheduleConfig> for Schedule {
    type Error = ScheduleError;

    fn try_from(config: &ScheduleConfig) -> Result<Self, Self::Error> {
        let mut times = config
            .times
            .iter()
            .map(|time| {
                NaiveTime::parse_from_str(time.trim(), TIME_FORMAT)
                    .map_err(|_| ScheduleError::InvalidTime(time.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if times.is_empty() {
            return Err(ScheduleError::NoTimes);
        }

        match config.frequency {
            Frequency::Daily => {
                times.sort();
                times.dedup();
                Ok(Self::Daily { times })
            }
            Frequency::Weekly => {
                let day = config
                    .day
                    .trim()
                    .parse()
                    .map_err(|_| ScheduleError::InvalidDay(config.day.clone()))?;
                Ok(Self::Weekly {
                    day,
                    time: times[0],
                })
            }
        }
    }
}

impl Schedule {
    /// First fire time strictly after `now`.
    pub fn next_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        let today = now.date();
        match self {
            Self::Daily { times } => {
                let earliest = times.iter().min().copied().unwrap_or_default();
                times
                    .iter()
                    .map(|time| today.and_time(*time))
                    .filter(|candidate| *candidate > now)
                    .min()
                    .unwrap_or_else(|| (today + Days::new(1)).and_time(earliest))
            }
            Self::Weekly { day, time } => {
                let ahead = (7 + day.num_days_from_monday() - today.weekday().num_days_from_monday()) % 7;
                let candidate = (today + Days::new(ahead.into())).and_time(*time);
                if candidate > now {
                    candidate
                } else {
                    candidate + Days::new(7)
                }
            }
        }
    }
}

/// Background thread running a job according to a [Schedule].
#[derive(Debug)]
pub struct Scheduler {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Starts the thread. `job` is called at every fire time.
    pub fn spawn<F>(schedule: Schedule, mut job: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (shutdown, shutdown_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("scheduler".to_string())
            .spawn(move || loop {
                let now = Local::now().naive_local();
                let next = schedule.next_after(now);
                log::info!(target: "schedule", "Next automatic backup at {next}");

                let wait = (next - now).to_std().unwrap_or_default();
                match shutdown_rx.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => job(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Self { shutdown, handle })
    }

    /// Stops the thread, waiting for a running job to finish.
    pub fn shutdown(self) {
        let _ = self.shutdown.send(());
        if self.handle.join().is_err() {
            log::error!(target: "schedule", "Scheduler thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::*;

    fn at(date: (i32, u32, u32), time: (u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(time.0, time.1, 0)
            .unwrap()
    }

    fn config(frequency: Frequency, times: &[&str], day: &str) -> ScheduleConfig {
        ScheduleConfig {
            enabled: true,
            frequency,
            times: times.iter().map(|t| t.to_string()).collect(),
            day: day.to_string(),
        }
    }

    #[test]
    fn daily_picks_next_time_of_today() {
        let schedule = Schedule::try_from(&config(Frequency::Daily, &["14:00", "02:00"], "")).unwrap();

        // 2024-03-01 is a friday
        assert_eq!(schedule.next_after(at((2024, 3, 1), (1, 0))), at((2024, 3, 1), (2, 0)));
        assert_eq!(schedule.next_after(at((2024, 3, 1), (2, 0))), at((2024, 3, 1), (14, 0)));
        assert_eq!(schedule.next_after(at((2024, 3, 1), (15, 0))), at((2024, 3, 2), (2, 0)));
    }

    #[test]
    fn weekly_waits_for_the_day() {
        let schedule = Schedule::try_from(&config(Frequency::Weekly, &["02:00"], "Monday")).unwrap();

        assert_eq!(schedule.next_after(at((2024, 3, 1), (12, 0))), at((2024, 3, 4), (2, 0)));
        assert_eq!(schedule.next_after(at((2024, 3, 4), (1, 59))), at((2024, 3, 4), (2, 0)));
        assert_eq!(schedule.next_after(at((2024, 3, 4), (2, 0))), at((2024, 3, 11), (2, 0)));
    }

    #[test]
    fn custom_is_weekly() {
        let config: ScheduleConfig =
            toml::from_str("enabled = true\nfrequency = \"custom\"\ntimes = [\"03:30\"]\nday = \"friday\"").unwrap();
        let schedule = Schedule::try_from(&config).unwrap();

        assert_eq!(
            schedule,
            Schedule::Weekly {
                day: Weekday::Fri,
                time: NaiveTime::from_hms_opt(3, 30, 0).unwrap(),
            }
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert_eq!(
            Schedule::try_from(&config(Frequency::Daily, &["25:00"], "")),
            Err(ScheduleError::InvalidTime("25:00".to_string()))
        );
        assert_eq!(
            Schedule::try_from(&config(Frequency::Weekly, &["02:00"], "Someday")),
            Err(ScheduleError::InvalidDay("Someday".to_string()))
        );
        assert_eq!(
            Schedule::try_from(&config(Frequency::Daily, &[], "")),
            Err(ScheduleError::NoTimes)
        );
    }

    #[test]
    fn shutdown_stops_before_first_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let schedule = Schedule::try_from(&ScheduleConfig::default()).unwrap();

        let counter = runs.clone();
        let scheduler = Scheduler::spawn(schedule, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        scheduler.shutdown();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
