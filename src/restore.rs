// Bulk restore reducers for disaster recovery
// Accept JSON arrays exported from admin panel (TypeScript SDK format)

use spacetimedb::{reducer, ReducerContext, Timestamp, log, Table};
use crate::{Player, ScanEvent, authorized_worker, player, scan_event};
use crate::league::League;
use crate::level;
use serde_json::Value;

/// Parse Timestamp from SDK JSON format: {"__timestamp_micros_since_unix_epoch__": "123456"}
fn parse_timestamp_json(val: &Value) -> Result<Timestamp, String> {
    let micros_str = val.get("__timestamp_micros_since_unix_epoch__")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid timestamp field")?;

    let micros: i64 = micros_str.parse()
        .map_err(|e| format!("Invalid timestamp micros: {}", e))?;

    Ok(Timestamp::from_micros_since_unix_epoch(micros))
}

/// Optional timestamps come through as null or an absent key
fn parse_opt_timestamp(val: Option<&Value>) -> Result<Option<Timestamp>, String> {
    match val {
        None | Some(Value::Null) => Ok(None),
        Some(v) => parse_timestamp_json(v).map(Some),
    }
}

fn parse_string_array(val: Option<&Value>) -> Vec<String> {
    val.and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|s| s.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Unknown or missing league keys restore to Bronze rather than failing
/// the whole batch
fn parse_league(val: Option<&Value>) -> League {
    match val.and_then(|v| v.as_str()) {
        Some("silver") => League::Silver,
        Some("gold") => League::Gold,
        Some("diamond") => League::Diamond,
        _ => League::Bronze,
    }
}

/// Bulk restore player table from JSON array
/// Protected by authorization check - only authorized workers can call this
#[reducer]
pub fn bulk_restore_player(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    // Authorization check: only authorized workers can restore data
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized bulk_restore_player attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let data: Value = serde_json::from_str(&json_data)
        .map_err(|e| format!("Invalid JSON: {}", e))?;

    let players = data.as_array()
        .ok_or("Expected JSON array of players")?;

    let mut count = 0;
    for (i, p) in players.iter().enumerate() {
        // Guests are session-local state, never part of a backup
        if p.get("isGuest").and_then(|v| v.as_bool()).unwrap_or(false) {
            continue;
        }

        let total_points = p.get("totalPoints").and_then(|v| v.as_u64()).ok_or(format!("Player {}: missing totalPoints", i))? as u32;
        let current_streak = p.get("currentStreak").and_then(|v| v.as_u64()).ok_or(format!("Player {}: missing currentStreak", i))? as u32;
        let longest_streak = p.get("longestStreak").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

        let restored = Player {
            id: p.get("id").and_then(|v| v.as_str()).ok_or(format!("Player {}: missing id", i))?.to_string(),
            name: p.get("name").and_then(|v| v.as_str()).ok_or(format!("Player {}: missing name", i))?.to_string(),
            is_guest: false,
            total_points,
            total_scans: p.get("totalScans").and_then(|v| v.as_u64()).ok_or(format!("Player {}: missing totalScans", i))? as u32,
            co2_saved_g: p.get("co2SavedG").and_then(|v| v.as_u64()).ok_or(format!("Player {}: missing co2SavedG", i))?,
            // Derived cache - recompute rather than trust the export
            level: level::calculate_level(total_points),
            current_streak,
            // Old backups may predate longestStreak; the invariant holds either way
            longest_streak: longest_streak.max(current_streak),
            last_claim_at: parse_opt_timestamp(p.get("lastClaimAt"))?,
            last_active_at: parse_opt_timestamp(p.get("lastActiveAt"))?,
            league: parse_league(p.get("league")),
            // Stale by definition after a restore - reassigned on next fetch
            leaderboard_id: None,
            last_league_check: parse_opt_timestamp(p.get("lastLeagueCheck"))?,
            claimed_badges: parse_string_array(p.get("claimedBadges")),
            lesson_todos: parse_string_array(p.get("lessonTodos")),
            completed_lessons: parse_string_array(p.get("completedLessons")),
            created_at: parse_timestamp_json(p.get("createdAt").ok_or(format!("Player {}: missing createdAt", i))?)?,
        };

        ctx.db.player().insert(restored);
        count += 1;
    }

    log::info!("✅ Restored {} player records", count);
    Ok(())
}

/// Bulk restore scan_event table from JSON array
/// Protected by authorization check - only authorized workers can call this
#[reducer]
pub fn bulk_restore_scan_event(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    // Authorization check: only authorized workers can restore data
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized bulk_restore_scan_event attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let data: Value = serde_json::from_str(&json_data)
        .map_err(|e| format!("Invalid JSON: {}", e))?;

    let events = data.as_array()
        .ok_or("Expected JSON array of scan events")?;

    let mut count = 0;
    for (i, e) in events.iter().enumerate() {
        let event = ScanEvent {
            id: 0, // auto_inc
            player_id: e.get("playerId").and_then(|v| v.as_str()).ok_or(format!("Scan {}: missing playerId", i))?.to_string(),
            recorded_at: parse_timestamp_json(e.get("recordedAt").ok_or(format!("Scan {}: missing recordedAt", i))?)?,
            co2_saved_g: e.get("co2SavedG").and_then(|v| v.as_u64()).ok_or(format!("Scan {}: missing co2SavedG", i))?,
            points: e.get("points").and_then(|v| v.as_u64()).ok_or(format!("Scan {}: missing points", i))? as u32,
            plastic_type: e.get("plasticType").and_then(|v| v.as_str()).map(|s| s.to_string()),
        };

        ctx.db.scan_event().insert(event);
        count += 1;
    }

    log::info!("✅ Restored {} scan_event records", count);
    Ok(())
}
