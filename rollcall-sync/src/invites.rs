//! Invite code generation

use crate::model::{InviteCode, Role, Section};
use chrono::Duration;
use rand::Rng;

/// Characters that cannot be confused when read aloud or typed
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const CODE_LENGTH: usize = 8;
pub const DEFAULT_TTL_DAYS: i64 = 7;

pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..CODE_ALPHABET.len());
            CODE_ALPHABET.get(idx).copied().map_or('A', char::from)
        })
        .collect()
}

/// Fresh invite valid for [`DEFAULT_TTL_DAYS`]
pub fn new_invite(section: Section, role: Role, created_by: &str) -> InviteCode {
    InviteCode::new(
        generate_code(),
        section,
        role,
        created_by,
        Duration::days(DEFAULT_TTL_DAYS),
    )
}
