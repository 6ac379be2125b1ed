//! Command line operations. Everything here acts as the system user.

use std::io::{BufRead, Write};

use anyhow::{bail, Context, Result};

use crate::model::{get_all_global_moderators, get_rooms, ModeratorLists, Room, User};
use crate::state::AppState;

/// `--rooms` value meaning "global moderator" rather than a room.
pub const GLOBAL: &str = "+";
/// `--rooms` value meaning every room.
pub const ALL_ROOMS: &str = "*";

/// Session ids are `05` followed by a 32 byte key in hex.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.len() != 66 || !session_id.starts_with("05") {
        bail!("Invalid session id '{}': expected 05 followed by 64 hex digits", session_id);
    }
    hex::decode(&session_id[2..])
        .with_context(|| format!("Invalid session id '{}'", session_id))?;
    Ok(())
}

enum RoomSelection {
    Global,
    Rooms(Vec<Room>),
}

fn select_rooms(state: &AppState, tokens: &[String]) -> Result<RoomSelection> {
    if tokens.iter().any(|t| t == GLOBAL) {
        if tokens.len() > 1 {
            bail!("'{}' cannot be combined with room tokens", GLOBAL);
        }
        return Ok(RoomSelection::Global);
    }
    if tokens.iter().any(|t| t == ALL_ROOMS) {
        if tokens.len() > 1 {
            bail!("'{}' cannot be combined with room tokens", ALL_ROOMS);
        }
        return Ok(RoomSelection::Rooms(get_rooms(state)?));
    }
    let rooms = tokens
        .iter()
        .map(|t| Room::by_token(state, t).with_context(|| format!("Room '{}' not found", t)))
        .collect::<Result<Vec<_>>>()?;
    Ok(RoomSelection::Rooms(rooms))
}

pub fn add_room(
    state: &AppState,
    token: &str,
    name: Option<&str>,
    description: Option<&str>,
) -> Result<()> {
    let room = Room::create(state, token, name.unwrap_or(token), description)?;
    println!("Created room {} ({})", room.token(), room.name());
    println!("URL: {}", room.url());
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

pub fn delete_room(state: &AppState, token: &str, yes: bool) -> Result<()> {
    let room = Room::by_token(state, token)?;
    let (messages, _) = room.messages_size()?;
    let (files, _) = room.attachments_size()?;
    if !yes
        && !confirm(&format!(
            "Delete room {} with {} messages and {} files?",
            room.token(),
            messages,
            files
        ))?
    {
        println!("Aborted.");
        return Ok(());
    }
    let token = room.token().to_string();
    room.delete()?;
    println!("Deleted room {}", token);
    Ok(())
}

pub fn add_moderators(
    state: &AppState,
    session_ids: &[String],
    rooms: &[String],
    admin: bool,
    visible: bool,
    hidden: bool,
) -> Result<()> {
    for sid in session_ids {
        validate_session_id(sid)?;
    }
    let system = User::system(state)?;
    let rank = if admin { "admin" } else { "moderator" };

    match select_rooms(state, rooms)? {
        RoomSelection::Global => {
            if hidden {
                bail!("--hidden applies to room moderators; global moderators are hidden unless --visible");
            }
            for sid in session_ids {
                let mut user = User::by_session_id(state, sid, true)?;
                user.set_moderator(state, &system, admin, visible)?;
                println!(
                    "Added {} as {} global {}",
                    sid,
                    if visible { "visible" } else { "hidden" },
                    rank
                );
            }
        }
        RoomSelection::Rooms(mut rooms) => {
            if visible {
                bail!("--visible applies to global moderators; room moderators are visible unless --hidden");
            }
            for sid in session_ids {
                let user = User::by_session_id(state, sid, true)?;
                for room in rooms.iter_mut() {
                    room.set_moderator(&user, &system, Some(admin), !hidden)?;
                    println!("Added {} as {} of {}", sid, rank, room.token());
                }
            }
        }
    }
    Ok(())
}

pub fn delete_moderators(state: &AppState, session_ids: &[String], rooms: &[String]) -> Result<()> {
    for sid in session_ids {
        validate_session_id(sid)?;
    }
    let system = User::system(state)?;

    match select_rooms(state, rooms)? {
        RoomSelection::Global => {
            for sid in session_ids {
                let mut user = User::by_session_id(state, sid, true)?;
                user.remove_moderator(state, &system)?;
                println!("Removed {} as global mod/admin", sid);
            }
        }
        RoomSelection::Rooms(mut rooms) => {
            for sid in session_ids {
                let user = User::by_session_id(state, sid, true)?;
                for room in rooms.iter_mut() {
                    room.remove_moderator(&user, &system, false)?;
                    println!("Removed {} as mod/admin of {}", sid, room.token());
                }
            }
        }
    }
    Ok(())
}

fn print_moderators(lists: &ModeratorLists<String>) {
    for (label, list) in [
        ("Admins", &lists.admins),
        ("Moderators", &lists.moderators),
        ("Hidden admins", &lists.hidden_admins),
        ("Hidden moderators", &lists.hidden_moderators),
    ] {
        if !list.is_empty() {
            println!("    {}: {}", label, list.join(", "));
        }
    }
}

pub fn list_rooms(state: &AppState) -> Result<()> {
    let rooms = get_rooms(state)?;
    if rooms.is_empty() {
        println!("No rooms.");
        return Ok(());
    }
    for room in rooms {
        let (messages, message_bytes) = room.messages_size()?;
        let (files, file_bytes) = room.attachments_size()?;
        let active = [1.0, 7.0, 14.0, 30.0]
            .iter()
            .map(|days| room.active_users(Some(days * 86400.0)))
            .collect::<Result<Vec<_>, _>>()?;

        println!("{}", room.token());
        println!("  Name: {}", room.name());
        if let Some(description) = room.description() {
            println!("  Description: {}", description);
        }
        println!("  URL: {}", room.url());
        println!("  Messages: {} ({:.1} kB)", messages, message_bytes as f64 / 1000.0);
        println!("  Attachments: {} ({:.1} MB)", files, file_bytes as f64 / 1e6);
        println!(
            "  Active users: {} (1d), {} (7d), {} (14d), {} (30d)",
            active[0], active[1], active[2], active[3]
        );
        println!(
            "  Default permissions: read={} accessible={} write={} upload={}",
            room.default_read(),
            room.default_accessible(),
            room.default_write(),
            room.default_upload()
        );
        let mods = room.get_all_moderators()?;
        if !mods.is_empty() {
            println!("  Moderators:");
            print_moderators(&mods);
        }
    }
    Ok(())
}

pub fn list_global_mods(state: &AppState) -> Result<()> {
    let lists = get_all_global_moderators(state)?;
    if lists.is_empty() {
        println!("No global moderators.");
        return Ok(());
    }
    let ids = ModeratorLists {
        moderators: lists.moderators.into_iter().map(|u| u.session_id).collect(),
        admins: lists.admins.into_iter().map(|u| u.session_id).collect(),
        hidden_moderators: lists.hidden_moderators.into_iter().map(|u| u.session_id).collect(),
        hidden_admins: lists.hidden_admins.into_iter().map(|u| u.session_id).collect(),
    };
    println!("Global moderators:");
    print_moderators(&ids);
    Ok(())
}
