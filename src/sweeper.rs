//! Periodic housekeeping: applies scheduled permission and ban changes and prunes expired
//! files, old message history and stale room activity.
//!
//! Every step runs in its own transaction and is safe to repeat; a step that fails is logged
//! and simply tried again on the next tick.

use std::fmt;
use std::time::Duration;

use rusqlite::params;
use serde::Serialize;
use tokio::time::MissedTickBehavior;

use crate::db;
use crate::error::ModelResult;
use crate::model::file::unlink_upload;
use crate::state::AppState;

const DAY: f64 = 86400.0;

/// Counts of what one sweep changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub permission_futures: usize,
    pub ban_futures: usize,
    pub files: usize,
    pub message_history: usize,
    pub room_activity: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} permission updates, {} ban updates, {} files, {} history rows, {} activity rows",
            self.permission_futures,
            self.ban_futures,
            self.files,
            self.message_history,
            self.room_activity
        )
    }
}

/// Applies due permission futures, oldest first, and deletes them.
///
/// Only the permissions a future actually sets are changed; the rest of the override row is
/// left alone.
pub fn apply_permission_futures(state: &AppState) -> ModelResult<usize> {
    let now = state.now();
    let applied = db::transaction(&state.db, |tx| -> ModelResult<usize> {
        tx.execute(
            "INSERT INTO user_permission_overrides (room, \"user\", read, accessible, write, upload)
             SELECT room, \"user\", read, accessible, write, upload
             FROM user_permission_futures
             WHERE at <= ?1
             ORDER BY at
             ON CONFLICT (room, \"user\") DO UPDATE SET
                read = COALESCE(excluded.read, read),
                accessible = COALESCE(excluded.accessible, accessible),
                write = COALESCE(excluded.write, write),
                upload = COALESCE(excluded.upload, upload)",
            params![now],
        )?;
        Ok(tx.execute(
            "DELETE FROM user_permission_futures WHERE at <= ?1",
            params![now],
        )?)
    })?;

    if applied > 0 {
        tracing::info!("Applied {} scheduled permission update(s)", applied);
    }
    Ok(applied)
}

/// Applies due ban and unban futures, oldest first, and deletes them.
pub fn apply_ban_futures(state: &AppState) -> ModelResult<usize> {
    let now = state.now();
    let applied = db::transaction(&state.db, |tx| -> ModelResult<usize> {
        tx.execute(
            "INSERT INTO user_permission_overrides (room, \"user\", banned)
             SELECT room, \"user\", banned
             FROM user_ban_futures
             WHERE at <= ?1
             ORDER BY at
             ON CONFLICT (room, \"user\") DO UPDATE SET banned = excluded.banned",
            params![now],
        )?;
        Ok(tx.execute(
            "DELETE FROM user_ban_futures WHERE at <= ?1",
            params![now],
        )?)
    })?;

    if applied > 0 {
        tracing::info!("Applied {} scheduled ban update(s)", applied);
    }
    Ok(applied)
}

/// Applies both kinds of futures; returns (permission, ban) counts.
pub fn apply_permission_updates(state: &AppState) -> ModelResult<(usize, usize)> {
    Ok((apply_permission_futures(state)?, apply_ban_futures(state)?))
}

/// Deletes expired file rows (`expiry <= now`, as in `File::is_expired`), then removes their
/// content from disk.
///
/// Returns the number of rows deleted. A file already missing from disk is fine; other unlink
/// failures are logged and do not stop the sweep.
pub fn prune_files(state: &AppState) -> ModelResult<usize> {
    let now = state.now();
    let paths = db::transaction(&state.db, |tx| -> ModelResult<Vec<String>> {
        let mut stmt = tx.prepare(
            "SELECT path FROM files WHERE expiry IS NOT NULL AND expiry <= ?1",
        )?;
        let paths = stmt
            .query_map(params![now], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        drop(stmt);

        tx.execute(
            "DELETE FROM files WHERE expiry IS NOT NULL AND expiry <= ?1",
            params![now],
        )?;
        Ok(paths)
    })?;

    if !paths.is_empty() {
        let unlinked = paths.iter().filter(|p| unlink_upload(p)).count();
        tracing::info!(
            "Pruned {} expired file(s) ({} removed from disk)",
            paths.len(),
            unlinked
        );
    }
    Ok(paths.len())
}

pub fn prune_message_history(state: &AppState) -> ModelResult<usize> {
    let cutoff = state.now() - state.config.sweeper.message_history_days * DAY;
    let conn = state.db.get()?;
    let count = conn.execute(
        "DELETE FROM message_history WHERE replaced < ?1",
        params![cutoff],
    )?;
    if count > 0 {
        tracing::info!("Pruned {} message history row(s)", count);
    }
    Ok(count)
}

pub fn prune_room_activity(state: &AppState) -> ModelResult<usize> {
    let cutoff = state.now() - state.config.sweeper.room_activity_days * DAY;
    let conn = state.db.get()?;
    let count = conn.execute(
        "DELETE FROM room_users WHERE last_active < ?1",
        params![cutoff],
    )?;
    if count > 0 {
        tracing::info!("Pruned {} room activity row(s)", count);
    }
    Ok(count)
}

fn step(name: &str, result: ModelResult<usize>) -> usize {
    result.unwrap_or_else(|e| {
        tracing::error!("Sweeper step '{}' failed: {}", name, e);
        0
    })
}

/// Runs every sweep step once. Failed steps count as zero and are retried next cycle.
pub fn run_cycle(state: &AppState) -> SweepReport {
    SweepReport {
        permission_futures: step("permission futures", apply_permission_futures(state)),
        ban_futures: step("ban futures", apply_ban_futures(state)),
        files: step("files", prune_files(state)),
        message_history: step("message history", prune_message_history(state)),
        room_activity: step("room activity", prune_room_activity(state)),
    }
}

/// Sweeps every `sweeper.interval` seconds, forever. Cycles run on the blocking pool.
pub async fn run_sweeper_loop(state: AppState) {
    let period = Duration::from_secs(state.config.sweeper.interval.max(1));
    tracing::info!("Sweeper running every {}s", period.as_secs());

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let cycle_state = state.clone();
        match tokio::task::spawn_blocking(move || run_cycle(&cycle_state)).await {
            Ok(report) if !report.is_empty() => tracing::debug!("Sweep: {}", report),
            Ok(_) => {}
            Err(e) => tracing::error!("Sweeper cycle aborted: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report() {
        assert!(SweepReport::default().is_empty());
        let report = SweepReport {
            files: 2,
            ..Default::default()
        };
        assert!(!report.is_empty());
        assert!(report.to_string().contains("2 files"));
    }
}
