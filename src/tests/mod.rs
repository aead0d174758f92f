// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use super::*;

use crate::backend::memory::{MemoryBackend, MemoryCard};
use crate::session::{SlotId, TokenSession};

#[macro_use]
mod util;
use util::*;

mod conf;
mod keys;
mod locate;
mod token;

const USER_PIN: &str = "12345678";
const TOKEN_LABEL: &str = "MyToken";
const TOKEN_SERIAL: &str = "1234";
const TEST_SLOT: SlotId = 1;

/// A memory card inserted in a slot of a loaded environment
struct TestToken {
    backend: MemoryBackend,
    card: MemoryCard,
    env: TokenEnvironment,
    slot: SlotId,
}

impl TestToken {
    fn new() -> TestToken {
        TestToken::with_card(TOKEN_LABEL, TOKEN_SERIAL)
    }

    fn with_card(label: &str, serial: &str) -> TestToken {
        let backend = MemoryBackend::new();
        let card = MemoryCard::new(label, serial, USER_PIN);
        ret_or_panic!(backend.insert(TEST_SLOT, card.clone()));
        let env = TokenEnvironment::with_backend(Box::new(backend.clone()));
        TestToken {
            backend: backend,
            card: card,
            env: env,
            slot: TEST_SLOT,
        }
    }

    fn session(&self, read_write: bool) -> Box<dyn TokenSession> {
        ret_or_panic!(self.env.open_session(self.slot, read_write))
    }

    /// A read-write session logged in as the user
    fn login(&self) -> Box<dyn TokenSession> {
        let mut session = self.session(true);
        assert!(ret_or_panic!(session.login(USER_PIN.as_bytes(), false)));
        session
    }

    fn object_count(&self) -> usize {
        ret_or_panic!(self.card.object_count())
    }
}
