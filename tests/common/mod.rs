#![allow(dead_code)]

use std::sync::Arc;

use agora::clock::ManualClock;
use agora::config::Config;
use agora::db;
use agora::model::{Room, User};
use agora::state::AppState;
use tempfile::TempDir;

pub const START: f64 = 1_700_000_000.0;

pub struct TestEnv {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub system: User,
    // Keeps the database and uploads alive for the duration of the test
    pub tmp: TempDir,
}

impl TestEnv {
    pub fn advance(&self, secs: f64) {
        self.clock.advance(secs);
    }

    /// A user with a deterministic session id, created on first use.
    pub fn user(&self, n: u8) -> User {
        User::by_session_id(&self.state, &session_id(n), true).expect("create user")
    }

    pub fn room(&self, token: &str) -> Room {
        Room::create(&self.state, token, &format!("Room {}", token), None).expect("create room")
    }

    /// A fresh view of a room, with nothing cached.
    pub fn reload(&self, room: &Room) -> Room {
        Room::by_id(&self.state, room.id).expect("load room")
    }

    pub fn count(&self, sql: &str) -> i64 {
        let conn = self.state.db.get().unwrap();
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }
}

pub fn setup() -> TestEnv {
    setup_with(|_| {})
}

pub fn setup_with(configure: impl FnOnce(&mut Config)) -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.resolve_paths(tmp.path());
    configure(&mut config);

    let pool = db::create_pool(&config.db_path()).expect("Failed to create test database");
    db::run_migrations(&pool).expect("Failed to run migrations");

    let clock = Arc::new(ManualClock::new(START));
    let state = AppState::new(pool, config)
        .expect("Failed to build state")
        .with_clock(clock.clone());
    let system = User::system(&state).expect("system user");

    TestEnv {
        state,
        clock,
        system,
        tmp,
    }
}

pub fn session_id(n: u8) -> String {
    format!("05{}", hex::encode([n; 32]))
}

pub fn sig() -> Vec<u8> {
    vec![7u8; 64]
}
