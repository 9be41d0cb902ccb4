//! Fuzz target for inbound packet verification
//!
//! Feeds attacker-controlled bytes, key numbers and call headers to a server
//! connection at every security level.
//!
//! # Invariants
//!
//! - Verification never panics
//! - A rejected packet leaves the caller's region unchanged
//! - An accepted Encrypt packet yields a region inside the input
//! - Every error maps onto an RxGK abort code

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rxgk_core::{
    env::Environment, ConnectionInfo, ConnectionSecurity, KeyLifetime, Role, RxgkHeader,
    SecurityConfig, SecurityLevel,
};
use rxgk_crypto::{supported_enctypes, FragmentedBuffer, Region};

#[derive(Debug, Clone)]
struct FuzzEnv;

impl Environment for FuzzEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(0x5a);
    }

    fn wall_clock_secs(&self) -> u64 {
        1_000
    }
}

#[derive(Debug, Clone, Arbitrary)]
struct PacketScenario {
    enctype: u8,
    level: u8,
    key_number: u16,
    call_number: u32,
    seq: u32,
    payload: Vec<u8>,
}

fuzz_target!(|scenario: PacketScenario| {
    let enctypes: Vec<_> = supported_enctypes().collect();
    let enctype = enctypes[scenario.enctype as usize % enctypes.len()];
    let Ok(level) = SecurityLevel::try_from(scenario.level % 3) else {
        return;
    };

    let conn = ConnectionInfo { epoch: 1, cid: 4, start_time: 0 };
    let server = ConnectionSecurity::new(
        FuzzEnv,
        SecurityConfig { level, ..SecurityConfig::default() },
        enctype.etype,
        &vec![0x11; enctype.key_len],
        conn,
        Role::Server,
        KeyLifetime::unlimited(),
    )
    .expect("registered enctype with a key of its own length");

    let header = RxgkHeader {
        epoch: conn.epoch,
        cid: conn.cid,
        call_number: scenario.call_number,
        seq: scenario.seq,
        sec_index: 6,
        data_len: 0,
    };
    let mut buf = FragmentedBuffer::contiguous(&scenario.payload);
    let original = Region::new(0, scenario.payload.len());
    let mut region = original;

    match server.verify_packet(scenario.key_number, &header, &mut buf, &mut region) {
        Ok(()) => {
            let end = region.end().expect("region end fits");
            assert!(end <= scenario.payload.len(), "accepted region escapes the input");
        },
        Err(err) => {
            assert_eq!(region, original, "rejected packet moved the region");
            let _ = err.abort_code();
        },
    }
});
