pub mod file;
pub mod message;
pub mod permissions;
pub mod room;
pub mod user;

pub use file::{Expiry, File};
pub use message::{Message, MessageQuery, PostOptions};
pub use permissions::{Permission, PermissionFilter, PermissionUpdate, Requirements};
pub use room::{get_accessible_rooms, get_rooms, get_rooms_with_permission, FileLifetime, Room};
pub use user::{get_all_global_moderators, ModeratorLists, User};
