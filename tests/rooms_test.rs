mod common;

use agora::error::ModelError;
use agora::model::{get_rooms, PostOptions, Room};
use common::{setup, sig};

#[test]
fn create_and_look_up_rooms() {
    let env = setup();
    let room = Room::create(&env.state, "lokinet", "Lokinet", Some("Talk about lokinet")).unwrap();
    assert_eq!(room.token(), "lokinet");
    assert_eq!(room.description(), Some("Talk about lokinet"));
    assert_eq!(room.message_sequence, 0);
    assert_eq!(room.info_updates, 0);
    assert!(room.default_read() && room.default_write());

    let by_token = Room::by_token(&env.state, "lokinet").unwrap();
    assert_eq!(by_token.id, room.id);
    let by_id = Room::by_id(&env.state, room.id).unwrap();
    assert_eq!(by_id.token(), "lokinet");

    assert!(matches!(
        Room::by_token(&env.state, "nope"),
        Err(ModelError::NoSuchRoom(_))
    ));
}

#[test]
fn duplicate_tokens_are_rejected_case_insensitively() {
    let env = setup();
    env.room("abc");
    assert!(matches!(
        Room::create(&env.state, "ABC", "Again", None),
        Err(ModelError::AlreadyExists(_))
    ));
    let mut other = env.room("def");
    assert!(matches!(
        other.set_token("Abc"),
        Err(ModelError::AlreadyExists(_))
    ));
}

#[test]
fn invalid_tokens_are_rejected() {
    let env = setup();
    let long = "x".repeat(65);
    for token in ["", "has space", "semi;colon", long.as_str()] {
        assert!(
            matches!(
                Room::create(&env.state, token, "Bad", None),
                Err(ModelError::InvalidData(_))
            ),
            "token {:?} should be rejected",
            token
        );
    }
}

#[test]
fn metadata_changes_bump_info_updates() {
    let env = setup();
    let mut room = env.room("meta");

    room.set_name("New name").unwrap();
    assert_eq!(room.name(), "New name");
    assert_eq!(room.info_updates, 1);

    // Unchanged values are no-ops
    room.set_name("New name").unwrap();
    assert_eq!(room.info_updates, 1);

    room.set_description(Some("desc")).unwrap();
    room.set_default_upload(false).unwrap();
    assert_eq!(room.info_updates, 3);
    assert!(!room.default_upload());

    let fresh = env.reload(&room);
    assert_eq!(fresh.info_updates, 3);
    assert_eq!(fresh.description(), Some("desc"));
}

#[test]
fn info_and_url() {
    let env = setup();
    let room = env.room("info");
    let info = room.info();
    assert_eq!(info.token, "info");
    assert_eq!(info.image_id, None);
    let json = serde_json::to_value(&info).unwrap();
    assert!(json.get("image_id").is_none());

    assert_eq!(
        room.url(),
        format!("http://localhost/info?public_key={}", "00".repeat(32))
    );
}

#[test]
fn room_image_stops_expiring_and_old_image_gets_default_expiry() {
    let env = setup();
    let mut room = env.room("pics");
    let uploader = env.user(1);

    let first = room
        .upload_file(b"one", &uploader, Some("a.png"), agora::model::FileLifetime::Unclaimed)
        .unwrap();
    let second = room
        .upload_file(b"two", &uploader, Some("b.png"), agora::model::FileLifetime::Unclaimed)
        .unwrap();

    room.set_image(first).unwrap();
    assert_eq!(room.image_id(), Some(first));
    assert_eq!(room.info_updates, 1);
    let image = room.image().unwrap().unwrap();
    assert_eq!(image.expiry, None);

    room.set_image(second).unwrap();
    assert_eq!(room.image().unwrap().unwrap().id, second);
    let old = agora::model::File::by_id(&env.state, first).unwrap();
    assert_eq!(
        old.expiry,
        env.state.config.files.claimed_expiry(env.state.now())
    );

    // Files from another room can't be used
    let mut other = env.room("other");
    let foreign = other
        .upload_file(b"x", &uploader, None, agora::model::FileLifetime::Unclaimed)
        .unwrap();
    assert!(matches!(room.set_image(foreign), Err(ModelError::NoSuchFile(_))));

    room.clear_image().unwrap();
    assert_eq!(room.image().unwrap(), None);
}

#[test]
fn deleting_a_room_removes_everything() {
    let env = setup();
    let mut room = env.room("doomed");
    let user = env.user(1);
    let file_id = room
        .upload_file(b"data", &user, Some("f.txt"), agora::model::FileLifetime::Unclaimed)
        .unwrap();
    room.add_post(&user, b"hi", &sig(), PostOptions::default()).unwrap();
    let path = room.get_file(file_id).unwrap().unwrap().path;
    assert!(std::path::Path::new(&path).exists());

    room.delete().unwrap();

    assert!(!std::path::Path::new(&path).exists());
    assert!(Room::by_token(&env.state, "doomed").is_err());
    assert_eq!(env.count("SELECT COUNT(*) FROM messages"), 0);
    assert_eq!(env.count("SELECT COUNT(*) FROM files"), 0);
    assert!(get_rooms(&env.state).unwrap().is_empty());
}

#[test]
fn room_statistics() {
    let env = setup();
    let mut room = env.room("stats");
    let mut alice = env.user(1);
    let mut bob = env.user(2);

    room.add_post(&alice, b"hello", &sig(), PostOptions::default()).unwrap();
    room.add_post(&bob, b"hi there", &sig(), PostOptions::default()).unwrap();
    assert_eq!(room.messages_size().unwrap(), (2, 13));

    alice.update_room_activity(&env.state, &room).unwrap();
    env.advance(2.0 * 86400.0);
    bob.update_room_activity(&env.state, &room).unwrap();
    assert_eq!(room.active_users(Some(86400.0)).unwrap(), 1);
    assert_eq!(room.active_users(None).unwrap(), 2);
}
