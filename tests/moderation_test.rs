mod common;

use agora::error::ModelError;
use agora::model::{PermissionUpdate, PostOptions};
use agora::sweeper;
use common::{setup, sig};

#[test]
fn timed_ban_is_lifted_by_the_sweeper() {
    let env = setup();
    let mut room = env.room("bans");
    let moderator = env.user(1);
    let alice = env.user(2);
    room.set_moderator(&moderator, &env.system, Some(false), true).unwrap();

    room.ban_user(&alice, &moderator, Some(5.0)).unwrap();
    assert!(!room.check_read(Some(&alice)).unwrap());
    assert!(matches!(
        room.add_post(&alice, b"let me in", &sig(), PostOptions::default()),
        Err(ModelError::BadPermission)
    ));
    assert_eq!(room.get_bans().unwrap(), vec![alice.session_id.clone()]);

    let futures = room.future_permissions().unwrap();
    assert_eq!(futures.len(), 1);
    assert_eq!(futures[0].banned, Some(false));
    assert_eq!(futures[0].at, env.state.now() + 5.0);

    env.advance(4.0);
    assert_eq!(sweeper::apply_ban_futures(&env.state).unwrap(), 0);
    assert!(!env.reload(&room).check_read(Some(&alice)).unwrap());

    env.advance(2.0);
    assert_eq!(sweeper::apply_ban_futures(&env.state).unwrap(), 1);
    let mut fresh = env.reload(&room);
    assert!(fresh.check_read(Some(&alice)).unwrap());
    assert!(fresh.get_bans().unwrap().is_empty());
    assert!(fresh.future_permissions().unwrap().is_empty());
}

#[test]
fn zero_timeout_bans_until_the_next_sweep() {
    let env = setup();
    let mut room = env.room("blink");
    let alice = env.user(1);
    room.ban_user(&alice, &env.system, Some(0.0)).unwrap();
    assert!(!room.check_unbanned(Some(&alice)).unwrap());

    assert_eq!(sweeper::apply_ban_futures(&env.state).unwrap(), 1);
    assert!(env.reload(&room).check_unbanned(Some(&alice)).unwrap());
}

#[test]
fn refused_bans() {
    let env = setup();
    let mut room = env.room("rules");
    let moderator = env.user(1);
    let other_mod = env.user(2);
    let alice = env.user(3);
    let bob = env.user(4);
    let mut global = env.user(5);
    room.set_moderator(&moderator, &env.system, Some(false), true).unwrap();
    room.set_moderator(&other_mod, &env.system, Some(false), true).unwrap();
    global.set_moderator(&env.state, &env.system, false, false).unwrap();

    // Not a moderator
    assert!(matches!(
        room.ban_user(&bob, &alice, None),
        Err(ModelError::BadPermission)
    ));
    // Self-ban
    assert!(matches!(
        room.ban_user(&moderator, &moderator, None),
        Err(ModelError::BadPermission)
    ));
    // Global moderators can't be banned from a room
    assert!(matches!(
        room.ban_user(&global, &moderator, None),
        Err(ModelError::BadPermission)
    ));
    // Banning a room moderator needs an admin
    assert!(matches!(
        room.ban_user(&other_mod, &moderator, None),
        Err(ModelError::BadPermission)
    ));
    assert!(room.get_bans().unwrap().is_empty());

    // An admin can, and the ban strips moderator status
    let info_updates = room.info_updates;
    room.ban_user(&other_mod, &env.system, None).unwrap();
    assert!(!room.check_moderator(Some(&other_mod)).unwrap());
    assert!(!room.check_read(Some(&other_mod)).unwrap());
    assert!(room.info_updates > info_updates);
}

#[test]
fn unban_reports_whether_anything_changed() {
    let env = setup();
    let mut room = env.room("unban");
    let moderator = env.user(1);
    let alice = env.user(2);
    room.set_moderator(&moderator, &env.system, Some(false), true).unwrap();

    assert!(!room.unban_user(&alice, &moderator).unwrap());

    room.ban_user(&alice, &moderator, Some(3600.0)).unwrap();
    assert!(room.unban_user(&alice, &moderator).unwrap());
    assert!(room.check_read(Some(&alice)).unwrap());
    // The pending unban is cancelled too
    assert!(room.future_permissions().unwrap().is_empty());

    assert!(matches!(
        room.unban_user(&moderator, &alice),
        Err(ModelError::BadPermission)
    ));
}

#[test]
fn promoting_a_user_cancels_scheduled_bans() {
    let env = setup();
    let mut room = env.room("promote");
    let alice = env.user(1);
    room.ban_user(&alice, &env.system, Some(60.0)).unwrap();
    assert_eq!(room.future_permissions().unwrap().len(), 1);

    room.set_moderator(&alice, &env.system, Some(false), true).unwrap();
    assert!(room.future_permissions().unwrap().is_empty());
    assert!(room.check_moderator(Some(&alice)).unwrap());
}

#[test]
fn moderator_changes_need_an_admin() {
    let env = setup();
    let mut room = env.room("ranks");
    let moderator = env.user(1);
    let alice = env.user(2);
    room.set_moderator(&moderator, &env.system, Some(false), true).unwrap();

    assert!(matches!(
        room.set_moderator(&alice, &moderator, Some(false), true),
        Err(ModelError::BadPermission)
    ));

    let admin = env.user(3);
    room.set_moderator(&admin, &env.system, Some(true), true).unwrap();
    room.set_moderator(&alice, &admin, None, true).unwrap();
    assert!(room.check_moderator(Some(&alice)).unwrap());
    assert!(!room.check_admin(Some(&alice)).unwrap());

    // Dropping only the admin flag keeps moderator status
    room.remove_moderator(&admin, &env.system, true).unwrap();
    assert!(room.check_moderator(Some(&admin)).unwrap());
    assert!(!room.check_admin(Some(&admin)).unwrap());

    room.remove_moderator(&alice, &env.system, false).unwrap();
    assert!(!room.check_moderator(Some(&alice)).unwrap());
}

#[test]
fn hidden_moderators_are_only_listed_to_moderators() {
    let env = setup();
    let mut room = env.room("mods");
    let visible_mod = env.user(1);
    let hidden_mod = env.user(2);
    let hidden_admin = env.user(3);
    let alice = env.user(4);
    room.set_moderator(&visible_mod, &env.system, Some(false), true).unwrap();
    room.set_moderator(&hidden_mod, &env.system, Some(false), false).unwrap();
    room.set_moderator(&hidden_admin, &env.system, Some(true), false).unwrap();

    let public = room.get_mods(Some(&alice)).unwrap();
    assert_eq!(public.moderators, vec![visible_mod.session_id.clone()]);
    assert!(public.admins.is_empty());
    assert!(public.hidden_moderators.is_empty());
    assert!(public.hidden_admins.is_empty());
    assert_eq!(room.get_mods(None).unwrap(), public);

    let insider = room.get_mods(Some(&hidden_mod)).unwrap();
    assert_eq!(insider.hidden_moderators, vec![hidden_mod.session_id.clone()]);
    assert_eq!(insider.hidden_admins, vec![hidden_admin.session_id.clone()]);

    // The system user is a global admin but never listed
    let all = room.get_all_moderators().unwrap();
    assert_eq!(all.moderators.len() + all.hidden_moderators.len() + all.hidden_admins.len(), 3);
    assert!(!insider
        .hidden_admins
        .iter()
        .any(|sid| sid == &env.system.session_id));
}

#[test]
fn scheduled_permissions_apply_after_the_delay() {
    let env = setup();
    let mut room = env.room("later");
    let moderator = env.user(1);
    let alice = env.user(2);
    room.set_moderator(&moderator, &env.system, Some(false), true).unwrap();

    room.schedule_permissions(&alice, &moderator, &PermissionUpdate::new().write(false), 10.0)
        .unwrap();
    let futures = room.future_permissions().unwrap();
    assert_eq!(futures.len(), 1);
    assert_eq!(futures[0].write, Some(false));
    assert_eq!(futures[0].read, None);

    assert!(room.check_write(Some(&alice)).unwrap());
    env.advance(11.0);
    assert_eq!(sweeper::apply_permission_futures(&env.state).unwrap(), 1);
    let mut fresh = env.reload(&room);
    assert!(!fresh.check_write(Some(&alice)).unwrap());
    assert!(fresh.check_read(Some(&alice)).unwrap());

    // Resets can't be scheduled
    assert!(matches!(
        room.schedule_permissions(
            &alice,
            &moderator,
            &PermissionUpdate::new().reset(agora::model::Permission::Write),
            5.0
        ),
        Err(ModelError::InvalidData(_))
    ));
}

#[test]
fn explicit_permissions_replace_scheduled_ones() {
    let env = setup();
    let mut room = env.room("override");
    let alice = env.user(1);

    room.schedule_permissions(
        &alice,
        &env.system,
        &PermissionUpdate::new().write(false).upload(false),
        60.0,
    )
    .unwrap();
    room.set_permissions(&alice, &env.system, &PermissionUpdate::new().write(true))
        .unwrap();

    let futures = room.future_permissions().unwrap();
    assert_eq!(futures.len(), 1);
    assert_eq!(futures[0].write, None);
    assert_eq!(futures[0].upload, Some(false));

    room.set_permissions(&alice, &env.system, &PermissionUpdate::new().upload(true))
        .unwrap();
    assert!(room.future_permissions().unwrap().is_empty());
}
