// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use std::collections::VecDeque;

use crate::ecc;
use crate::key::*;
use crate::ui::UserInteraction;

use num_bigint::BigUint;

macro_rules! ret_or_panic {
    ($ret:expr) => {
        match $ret {
            Ok(r) => r,
            Err(e) => panic!("{e}"),
        }
    };
}

macro_rules! err_kind {
    ($ret:expr) => {
        match $ret {
            Ok(_) => panic!("operation unexpectedly succeeded"),
            Err(e) => e.kind(),
        }
    };
}

/// Answers prompts from queues and records everything it was asked
///
/// Confirmations default to false and PIN prompts to the test user PIN
/// once the queues are exhausted.
#[derive(Default)]
pub struct TestUi {
    pub confirms: VecDeque<bool>,
    pub answers: VecDeque<bool>,
    pub pins: VecDeque<Option<&'static str>>,
    pub confirm_prompts: Vec<String>,
    pub notices: Vec<String>,
    pub questions: Vec<String>,
    pub pin_prompts: Vec<String>,
    pub on_confirm: Option<Box<dyn FnMut(usize)>>,
}

impl TestUi {
    pub fn new() -> TestUi {
        TestUi::default()
    }

    pub fn with_pins(pins: &[Option<&'static str>]) -> TestUi {
        TestUi {
            pins: pins.iter().copied().collect(),
            ..Default::default()
        }
    }
}

impl UserInteraction for TestUi {
    fn confirm(&mut self, text: &str) -> bool {
        self.confirm_prompts.push(text.to_string());
        let count = self.confirm_prompts.len();
        if let Some(hook) = self.on_confirm.as_mut() {
            hook(count);
        }
        self.confirms.pop_front().unwrap_or(false)
    }

    fn notify(&mut self, text: &str) {
        self.notices.push(text.to_string());
    }

    fn yes_no(&mut self, text: &str) -> bool {
        self.questions.push(text.to_string());
        self.answers.pop_front().unwrap_or(false)
    }

    fn prompt_pin(&mut self, label: &str) -> Option<Vec<u8>> {
        self.pin_prompts.push(label.to_string());
        match self.pins.pop_front() {
            Some(pin) => pin.map(|p| p.as_bytes().to_vec()),
            None => Some(super::USER_PIN.as_bytes().to_vec()),
        }
    }
}

fn number(seed: u8, len: usize) -> BigUint {
    let mut bytes = vec![seed; len];
    bytes[0] |= 0x80;
    bytes[len - 1] |= 0x01;
    BigUint::from_bytes_be(&bytes)
}

fn secret(seed: u8, len: usize) -> SecretUint {
    secret_uint(&number(seed, len).to_bytes_be())
}

/// A structurally valid RSA 2048 key pair, distinct for each seed
pub fn rsa_material(seed: u8) -> AsymmetricKeyMaterial {
    AsymmetricKeyMaterial::Rsa {
        public: RsaPublicKey {
            modulus: number(seed, 256),
            public_exponent: BigUint::from(65537u32),
        },
        private: Some(RsaPrivateKey {
            private_exponent: secret(seed ^ 0x11, 256),
            prime1: secret(seed ^ 0x22, 128),
            prime2: secret(seed ^ 0x33, 128),
            exponent1: secret(seed ^ 0x44, 128),
            exponent2: secret(seed ^ 0x55, 128),
            coefficient: secret(seed ^ 0x66, 128),
        }),
    }
}

/// A structurally valid DSA 1024 key pair
pub fn dsa_material(seed: u8) -> AsymmetricKeyMaterial {
    AsymmetricKeyMaterial::Dsa {
        public: DsaPublicKey {
            prime: number(seed, 128),
            subprime: number(seed ^ 0x0f, 20),
            base: number(seed ^ 0xf0, 127),
            value: number(seed ^ 0x3c, 127),
        },
        private: Some(DsaPrivateKey {
            value: secret(seed ^ 0xc3, 19),
        }),
    }
}

/// A structurally valid prime256v1 key pair
pub fn ec_material(seed: u8) -> AsymmetricKeyMaterial {
    let mut point = vec![seed; 65];
    point[0] = 0x04;
    AsymmetricKeyMaterial::Ec {
        public: EcPublicKey {
            params: ret_or_panic!(ecc::curve_name_to_ec_params(
                ecc::NAME_SECP256R1
            )),
            point: point,
        },
        private: Some(EcPrivateKey {
            value: secret(seed, 32),
        }),
    }
}

/// DER encoding of a Name holding only the common name "Alice"
pub const ALICE_SUBJECT: [u8; 18] = [
    0x30, 0x10, 0x31, 0x0e, 0x30, 0x0c, 0x06, 0x03, 0x55, 0x04, 0x03, 0x0c,
    0x05, 0x41, 0x6c, 0x69, 0x63, 0x65,
];
