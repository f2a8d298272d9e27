/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! CSRF protection tokens: a minute-granularity timestamp plus a
//! BLAKE2b-96 hash of (timestamp, session id), rendered as 32
//! lower-case hex digits.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use blake2::Blake2bVar;
use digest::{Update, VariableOutput};

use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsrfHash {
    pub data: [u8; 12],
}

impl CsrfHash {
    pub fn generate(time: SystemTime, salt: &SessionId) -> CsrfHash {
        let t = Self::import_time(time);

        /* BLAKE2b over the timestamp and the session's salt */
        let mut state = Blake2bVar::new(12).unwrap();
        state.update(&t.to_le_bytes());
        state.update(&salt.as_bytes());

        let mut data = [0u8; 12];
        state.finalize_variable(&mut data).unwrap();
        CsrfHash { data }
    }

    pub fn import_time(t: SystemTime) -> u32 {
        (t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() / 60) as u32
    }

    pub fn export_time(t: u32) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(t as u64 * 60)
    }

    fn parse(s: &str) -> Option<CsrfHash> {
        let mut data = [0u8; 12];
        parse_lower_hex(s, &mut data)?;
        Some(CsrfHash { data })
    }
}

fn parse_lower_hex(s: &str, out: &mut [u8]) -> Option<()> {
    if s.len() != out.len() * 2 {
        return None;
    }
    if s.bytes().any(|ch| ch.is_ascii_uppercase()) {
        return None;
    }
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsrfToken {
    pub time: SystemTime,
    pub hash: CsrfHash,
}

impl CsrfToken {
    pub const STRING_LENGTH: usize = 32;

    pub fn generate(time: SystemTime, salt: &SessionId) -> CsrfToken {
        CsrfToken {
            time,
            hash: CsrfHash::generate(time, salt),
        }
    }

    /// 8 hex digits of the minute timestamp followed by 24 hex
    /// digits of the hash.
    pub fn format(&self) -> String {
        let mut s = String::with_capacity(Self::STRING_LENGTH);
        s.push_str(&format!("{:08x}", CsrfHash::import_time(self.time)));
        for byte in self.hash.data {
            s.push_str(&format!("{:02x}", byte));
        }
        s
    }

    pub fn parse(s: &str) -> Option<CsrfToken> {
        if s.len() != Self::STRING_LENGTH {
            return None;
        }
        if s.bytes().any(|ch| ch.is_ascii_uppercase()) {
            return None;
        }

        let t = u32::from_str_radix(&s[..8], 16).ok()?;
        let hash = CsrfHash::parse(&s[8..])?;
        Some(CsrfToken {
            time: CsrfHash::export_time(t),
            hash,
        })
    }

    /// Verify a token against the expected salt, allowing the
    /// current and the previous minute.
    pub fn verify(&self, salt: &SessionId, now: SystemTime) -> bool {
        let now_minutes = CsrfHash::import_time(now);
        let token_minutes = CsrfHash::import_time(self.time);

        if token_minutes != now_minutes && token_minutes + 1 != now_minutes {
            return false;
        }

        self.hash == CsrfHash::generate(self.time, salt)
    }
}
