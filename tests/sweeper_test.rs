mod common;

use std::time::Duration;

use agora::model::{FileLifetime, PermissionUpdate, PostOptions};
use agora::sweeper::{self, SweepReport};
use common::{setup, setup_with, sig};

#[test]
fn applying_futures_twice_applies_nothing_new() {
    let env = setup();
    let mut room = env.room("twice");
    let alice = env.user(1);
    let bob = env.user(2);
    room.schedule_permissions(&alice, &env.system, &PermissionUpdate::new().upload(false), 1.0)
        .unwrap();
    room.ban_user(&bob, &env.system, Some(1.0)).unwrap();

    env.advance(2.0);
    assert_eq!(sweeper::apply_permission_updates(&env.state).unwrap(), (1, 1));
    assert_eq!(sweeper::apply_permission_updates(&env.state).unwrap(), (0, 0));

    let mut fresh = env.reload(&room);
    assert!(!fresh.check_upload(Some(&alice)).unwrap());
    assert!(fresh.check_read(Some(&bob)).unwrap());
}

#[test]
fn later_futures_win_for_the_same_user() {
    let env = setup();
    let mut room = env.room("order");
    let alice = env.user(1);
    room.schedule_permissions(&alice, &env.system, &PermissionUpdate::new().write(false), 5.0)
        .unwrap();
    room.schedule_permissions(&alice, &env.system, &PermissionUpdate::new().write(true).read(false), 10.0)
        .unwrap();

    env.advance(20.0);
    assert_eq!(sweeper::apply_permission_futures(&env.state).unwrap(), 2);
    let perms = env.reload(&room).permissions().unwrap();
    let alice_perms = &perms[&alice.session_id];
    assert_eq!(alice_perms.get("write"), Some(&true));
    assert_eq!(alice_perms.get("read"), Some(&false));
}

#[test]
fn futures_only_touch_the_fields_they_set() {
    let env = setup();
    let mut room = env.room("partial");
    let alice = env.user(1);
    room.set_permissions(&alice, &env.system, &PermissionUpdate::new().upload(false))
        .unwrap();
    room.schedule_permissions(&alice, &env.system, &PermissionUpdate::new().write(false), 0.0)
        .unwrap();

    assert_eq!(sweeper::apply_permission_futures(&env.state).unwrap(), 1);
    let perms = room.permissions().unwrap();
    assert_eq!(perms[&alice.session_id].get("upload"), Some(&false));
    assert_eq!(perms[&alice.session_id].get("write"), Some(&false));
}

#[test]
fn history_and_activity_are_pruned_after_retention() {
    let env = setup();
    let mut room = env.room("old");
    let mut alice = env.user(1);
    let msg = room.add_post(&alice, b"v1", &sig(), PostOptions::default()).unwrap();
    room.edit_post(&alice, msg.id, b"v2", &sig(), &[]).unwrap();
    alice.update_room_activity(&env.state, &room).unwrap();

    env.advance(29.0 * 86400.0);
    assert_eq!(sweeper::prune_message_history(&env.state).unwrap(), 0);

    env.advance(2.0 * 86400.0);
    assert_eq!(sweeper::prune_message_history(&env.state).unwrap(), 1);
    assert_eq!(sweeper::prune_room_activity(&env.state).unwrap(), 0);

    env.advance(30.0 * 86400.0);
    assert_eq!(sweeper::prune_room_activity(&env.state).unwrap(), 1);
}

#[test]
fn prune_survives_files_missing_from_disk() {
    let env = setup();
    let mut room = env.room("missing");
    let alice = env.user(1);
    let id = room
        .upload_file(b"x", &alice, None, FileLifetime::Seconds(1.0))
        .unwrap();
    let path = room.get_file(id).unwrap().unwrap().path;
    std::fs::remove_file(&path).unwrap();

    env.advance(5.0);
    assert_eq!(sweeper::prune_files(&env.state).unwrap(), 1);
    assert_eq!(env.count("SELECT COUNT(*) FROM files"), 0);
}

#[test]
fn a_full_cycle_reports_its_work() {
    let env = setup();
    let mut room = env.room("cycle");
    let alice = env.user(1);
    room.upload_file(b"x", &alice, None, FileLifetime::Seconds(1.0))
        .unwrap();
    room.ban_user(&alice, &env.system, Some(1.0)).unwrap();

    env.advance(2.0);
    let report = sweeper::run_cycle(&env.state);
    assert_eq!(
        report,
        SweepReport {
            ban_futures: 1,
            files: 1,
            ..Default::default()
        }
    );
    assert!(sweeper::run_cycle(&env.state).is_empty());
}

#[tokio::test]
async fn sweeper_loop_applies_due_futures() {
    let env = setup_with(|c| c.sweeper.interval = 1);
    let mut room = env.room("loop");
    let alice = env.user(1);
    room.ban_user(&alice, &env.system, Some(0.0)).unwrap();

    let handle = tokio::spawn(sweeper::run_sweeper_loop(env.state.clone()));

    let lifted = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if env.reload(&room).check_read(Some(&alice)).unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    handle.abort();

    assert!(lifted.is_ok(), "sweeper did not lift the ban in time");
}
