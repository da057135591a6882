// Daily streak state machine.
//
// All calendar math lives here so reducers never compare raw timestamps.
// Day boundaries are UTC midnight: a claim "yesterday" means one day
// boundary was crossed, not that 24 hours have elapsed.

use spacetimedb::Timestamp;

/// XP for claiming the daily reward
pub const XP_PER_STREAK_DAY: u32 = 10;

/// Extra XP on the 7th consecutive day
pub const XP_WEEKLY_BONUS: u32 = 50;

/// Length of the weekly reward cycle
pub const STREAK_CYCLE_DAYS: u8 = 7;

const DAY_MICROS: u64 = 24 * 60 * 60 * 1_000_000;

/// Day number since the Unix epoch, UTC midnight boundaries
fn day_number(ts: Timestamp) -> u64 {
    (ts.to_micros_since_unix_epoch().max(0) as u64) / DAY_MICROS
}

/// Whole day boundaries crossed between two timestamps.
/// 0 = same calendar day, 1 = adjacent days, >1 = a gap.
pub fn days_between(last: Timestamp, now: Timestamp) -> u64 {
    day_number(now).saturating_sub(day_number(last))
}

/// A streak is still alive while at most one day boundary has passed
/// since the reference activity
pub fn is_streak_active(last: Timestamp, now: Timestamp) -> bool {
    days_between(last, now) <= 1
}

/// Outcome of evaluating a claim attempt against the last claim timestamp.
/// A player who has never claimed starts a fresh streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakOutcome {
    /// Already claimed today - the claim must be a no-op
    AlreadyClaimed,
    /// Claimed yesterday - the streak continues
    Continuing { new_streak: u32 },
    /// Gap of more than one day (or first claim ever) - streak restarts
    Broken { new_streak: u32 },
}

pub fn evaluate_claim(
    now: Timestamp,
    last_claim: Option<Timestamp>,
    current_streak: u32,
) -> StreakOutcome {
    match last_claim {
        None => StreakOutcome::Broken { new_streak: 1 },
        Some(last) => match days_between(last, now) {
            0 => StreakOutcome::AlreadyClaimed,
            1 => StreakOutcome::Continuing {
                new_streak: current_streak.saturating_add(1),
            },
            _ => StreakOutcome::Broken { new_streak: 1 },
        },
    }
}

/// Eligibility snapshot consumed by the client before showing the claim UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyStreakStatus {
    /// No claim has been made today
    pub can_claim: bool,
    /// A previous streak existed and the gap exceeded one day
    pub streak_broken: bool,
    /// Position in the 1-7 weekly reward cycle a claim would land on
    /// (or landed on, when already claimed today)
    pub current_day: u8,
}

pub fn check_daily_streak(
    now: Timestamp,
    last_claim: Option<Timestamp>,
    current_streak: u32,
) -> DailyStreakStatus {
    match evaluate_claim(now, last_claim, current_streak) {
        StreakOutcome::AlreadyClaimed => DailyStreakStatus {
            can_claim: false,
            streak_broken: false,
            current_day: day_in_cycle(current_streak),
        },
        StreakOutcome::Continuing { new_streak } => DailyStreakStatus {
            can_claim: true,
            streak_broken: false,
            current_day: day_in_cycle(new_streak),
        },
        StreakOutcome::Broken { new_streak } => DailyStreakStatus {
            can_claim: true,
            streak_broken: last_claim.is_some(),
            current_day: day_in_cycle(new_streak),
        },
    }
}

/// Map a streak length to its 1-7 position in the weekly cycle.
/// Multiples of 7 are the bonus day.
pub fn day_in_cycle(streak: u32) -> u8 {
    (((streak.max(1) - 1) % u32::from(STREAK_CYCLE_DAYS)) + 1) as u8
}

/// Reward for claiming on a given cycle day
pub fn reward_for_day(day: u8) -> u32 {
    if day == STREAK_CYCLE_DAYS {
        XP_PER_STREAK_DAY + XP_WEEKLY_BONUS
    } else {
        XP_PER_STREAK_DAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Timestamp at `day` days after the epoch plus `hour` hours
    fn ts(day: u64, hour: u64) -> Timestamp {
        Timestamp::from_micros_since_unix_epoch(
            ((day * 24 + hour) * 60 * 60 * 1_000_000) as i64,
        )
    }

    #[test]
    fn test_days_between_uses_calendar_boundaries() {
        // 23:30 one day to 00:30 the next is one boundary, not 24 hours
        assert_eq!(days_between(ts(100, 23), ts(101, 0)), 1);
        assert_eq!(days_between(ts(100, 0), ts(100, 23)), 0);
        assert_eq!(days_between(ts(100, 12), ts(103, 12)), 3);
    }

    #[test]
    fn test_streak_active_window() {
        assert!(is_streak_active(ts(100, 9), ts(100, 20)));
        assert!(is_streak_active(ts(100, 9), ts(101, 9)));
        assert!(!is_streak_active(ts(100, 9), ts(102, 0)));
    }

    #[test]
    fn test_first_claim_starts_streak() {
        assert_eq!(
            evaluate_claim(ts(10, 9), None, 0),
            StreakOutcome::Broken { new_streak: 1 }
        );
        let status = check_daily_streak(ts(10, 9), None, 0);
        assert!(status.can_claim);
        assert!(!status.streak_broken);
        assert_eq!(status.current_day, 1);
    }

    #[test]
    fn test_same_day_claim_is_blocked() {
        let outcome = evaluate_claim(ts(10, 20), Some(ts(10, 8)), 3);
        assert_eq!(outcome, StreakOutcome::AlreadyClaimed);

        // Asking twice in the same day gives the same answer both times
        let first = check_daily_streak(ts(10, 18), Some(ts(10, 8)), 3);
        let second = check_daily_streak(ts(10, 22), Some(ts(10, 8)), 3);
        assert_eq!(first, second);
        assert!(!first.can_claim);
        assert_eq!(first.current_day, 3);
    }

    #[test]
    fn test_consecutive_days_increment() {
        let mut streak = 0;
        let mut last = None;
        for day in 50..55 {
            match evaluate_claim(ts(day, 7), last, streak) {
                StreakOutcome::Continuing { new_streak }
                | StreakOutcome::Broken { new_streak } => {
                    streak = new_streak;
                    last = Some(ts(day, 7));
                }
                StreakOutcome::AlreadyClaimed => panic!("claim blocked on day {}", day),
            }
        }
        assert_eq!(streak, 5);
    }

    #[test]
    fn test_gap_resets_streak() {
        let outcome = evaluate_claim(ts(12, 9), Some(ts(10, 9)), 6);
        assert_eq!(outcome, StreakOutcome::Broken { new_streak: 1 });

        let status = check_daily_streak(ts(12, 9), Some(ts(10, 9)), 6);
        assert!(status.can_claim);
        assert!(status.streak_broken);
        assert_eq!(status.current_day, 1);
    }

    #[test]
    fn test_day_in_cycle_wraps_weekly() {
        assert_eq!(day_in_cycle(1), 1);
        assert_eq!(day_in_cycle(6), 6);
        assert_eq!(day_in_cycle(7), 7);
        assert_eq!(day_in_cycle(8), 1);
        assert_eq!(day_in_cycle(14), 7);
        assert_eq!(day_in_cycle(15), 1);
    }

    #[test]
    fn test_weekly_bonus_on_day_seven_only() {
        for day in 1..=6 {
            assert_eq!(reward_for_day(day), XP_PER_STREAK_DAY);
        }
        assert_eq!(reward_for_day(7), XP_PER_STREAK_DAY + XP_WEEKLY_BONUS);
    }

    #[test]
    fn test_seventh_consecutive_claim_hits_bonus_day() {
        // Six days in, claiming tomorrow lands on the bonus day
        let status = check_daily_streak(ts(30, 9), Some(ts(29, 9)), 6);
        assert!(status.can_claim);
        assert_eq!(status.current_day, 7);
        assert_eq!(reward_for_day(status.current_day), XP_PER_STREAK_DAY + XP_WEEKLY_BONUS);
    }
}
