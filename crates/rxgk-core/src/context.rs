//! Per-key-number session context.
//!
//! A [`SessionKeyContext`] holds every key derived from one transport key
//! plus the accounting that decides when the connection must rekey. It is
//! shared through `Arc`: packet paths clone the handle for the duration of an
//! operation, so a context replaced by rekeying stays alive until the last
//! in-flight packet using it is done. Dropping the last handle zeroes the key
//! bytes.
//!
//! # Lifecycle
//!
//! ```text
//! ┌───────┐ first use ┌────────┐ budget/expiry ┌────────────┐
//! │ Fresh │──────────>│ Active │──────────────>│ NeedsRekey │
//! └───────┘           └────────┘               └────────────┘
//!     │                    │                          │
//!     │                    │ successor installed      │
//!     └────────────────────┴─────────────────> ┌─────────┐
//!                                              │ Retired │
//!                                              └─────────┘
//! ```
//!
//! `NeedsRekey` is advisory. Every state, `Retired` included, remains usable
//! for crypto so packets already in flight under this key number still
//! decrypt.

use std::{
    sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU32, Ordering},
    time::Duration,
};

use rxgk_crypto::{
    ChecksumKey, CryptoError, EncKeyPair, EncType, FragmentedBuffer, Region, engine, mic,
};

use crate::{env::Environment, error::SecurityError};

const STATE_FRESH: u8 = 0;
const STATE_ACTIVE: u8 = 1;
const STATE_NEEDS_REKEY_BYTES: u8 = 2;
const STATE_NEEDS_REKEY_EXPIRY: u8 = 3;
const STATE_RETIRED: u8 = 4;

/// Which end of the connection a context belongs to.
///
/// Selects which usage numbers are used for transmit and which for receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiated the connection
    Client,
    /// Accepted the connection
    Server,
}

/// Why a context asked to be rekeyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RekeyReason {
    /// Transmit byte budget used up
    BytesExhausted,
    /// Expiry is inside the grace window
    ExpiryApproaching,
}

/// Snapshot of a context's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Derived but not yet used
    Fresh {
        /// Key generation
        key_number: u32,
    },
    /// In use, within budget and lifetime
    Active {
        /// Key generation
        key_number: u32,
        /// Transmit bytes left before a rekey is due
        bytes_remaining: i64,
    },
    /// Still usable, but the connection should install a successor
    NeedsRekey {
        /// Key generation
        key_number: u32,
        /// What triggered the flag
        reason: RekeyReason,
    },
    /// Superseded by a newer key number, kept only for draining
    Retired {
        /// Key generation
        key_number: u32,
    },
}

impl ConnectionState {
    /// Key generation this state belongs to.
    pub fn key_number(&self) -> u32 {
        match *self {
            Self::Fresh { key_number }
            | Self::Active { key_number, .. }
            | Self::NeedsRekey { key_number, .. }
            | Self::Retired { key_number } => key_number,
        }
    }
}

/// Usage limits for one key generation, taken from the validated ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyLifetime {
    /// Transmit bytes allowed before rekeying
    pub byte_budget: i64,
    /// Absolute expiry in seconds since the Unix epoch
    pub expiry: u64,
}

impl KeyLifetime {
    /// Lifetime with an explicit budget and expiry.
    pub const fn new(byte_budget: i64, expiry: u64) -> Self {
        Self { byte_budget, expiry }
    }

    /// Lifetime from a ticket's log2 byte-life.
    ///
    /// A byte-life of 0 means unlimited, as does anything too large for an
    /// `i64` budget.
    pub fn from_bytelife(bytelife_log2: u8, expiry: u64) -> Self {
        let byte_budget = match bytelife_log2 {
            0 | 63.. => i64::MAX,
            n => 1i64 << n,
        };
        Self { byte_budget, expiry }
    }

    /// No byte limit and no expiry.
    pub const fn unlimited() -> Self {
        Self { byte_budget: i64::MAX, expiry: u64::MAX }
    }
}

/// Keys derived for one context.
#[derive(Debug)]
pub(crate) struct SessionKeys {
    pub(crate) tx_enc: EncKeyPair,
    pub(crate) rx_enc: EncKeyPair,
    pub(crate) tx_kc: ChecksumKey,
    pub(crate) rx_kc: ChecksumKey,
    pub(crate) resp_enc: EncKeyPair,
}

/// Keys and accounting for one key number on one connection.
#[derive(Debug)]
pub struct SessionKeyContext {
    key_number: u32,
    enctype: &'static EncType,
    role: Role,
    expiry: u64,
    rekey_grace: Duration,
    bytes_remaining: AtomicI64,
    state: AtomicU8,
    auth_failures: AtomicU32,
    expiry_rekey_inherited: AtomicBool,
    keys: SessionKeys,
}

impl SessionKeyContext {
    pub(crate) fn new(
        key_number: u32,
        enctype: &'static EncType,
        role: Role,
        lifetime: KeyLifetime,
        rekey_grace: Duration,
        keys: SessionKeys,
    ) -> Self {
        Self {
            key_number,
            enctype,
            role,
            expiry: lifetime.expiry,
            rekey_grace,
            bytes_remaining: AtomicI64::new(lifetime.byte_budget),
            state: AtomicU8::new(STATE_FRESH),
            auth_failures: AtomicU32::new(0),
            expiry_rekey_inherited: AtomicBool::new(false),
            keys,
        }
    }

    /// Key generation of this context.
    pub fn key_number(&self) -> u32 {
        self.key_number
    }

    /// Negotiated enctype.
    pub fn enctype(&self) -> &'static EncType {
        self.enctype
    }

    /// Which end of the connection this context serves.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Absolute expiry in seconds since the Unix epoch.
    pub fn expiry(&self) -> u64 {
        self.expiry
    }

    /// Transmit bytes left. Negative once the budget has been overshot.
    pub fn bytes_remaining(&self) -> i64 {
        self.bytes_remaining.load(Ordering::Acquire)
    }

    /// Authentication failures seen on inbound packets under this key.
    pub fn auth_failures(&self) -> u32 {
        self.auth_failures.load(Ordering::Relaxed)
    }

    /// True once the budget or lifetime asked for a successor.
    pub fn needs_rekey(&self) -> bool {
        matches!(
            self.state.load(Ordering::Acquire),
            STATE_NEEDS_REKEY_BYTES | STATE_NEEDS_REKEY_EXPIRY
        )
    }

    /// True once a newer key number has been installed.
    pub fn is_retired(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_RETIRED
    }

    /// True if `now` is at or past the hard expiry.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expiry
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        let key_number = self.key_number;
        match self.state.load(Ordering::Acquire) {
            STATE_FRESH => ConnectionState::Fresh { key_number },
            STATE_ACTIVE => {
                ConnectionState::Active { key_number, bytes_remaining: self.bytes_remaining() }
            },
            STATE_NEEDS_REKEY_BYTES => {
                ConnectionState::NeedsRekey { key_number, reason: RekeyReason::BytesExhausted }
            },
            STATE_NEEDS_REKEY_EXPIRY => {
                ConnectionState::NeedsRekey { key_number, reason: RekeyReason::ExpiryApproaching }
            },
            _ => ConnectionState::Retired { key_number },
        }
    }

    /// Encrypt `data` with the transmit keys and a fresh random confounder.
    ///
    /// Charges `data.len` bytes to the budget after the transform succeeds.
    /// Returns the sealed length of `secure`.
    pub fn encrypt<E: Environment>(
        &self,
        env: &E,
        buf: &mut FragmentedBuffer,
        secure: Region,
        data: Region,
    ) -> Result<usize, SecurityError> {
        let mut confounder = vec![0u8; self.enctype.conf_len];
        env.random_bytes(&mut confounder);
        let len = engine::encrypt(
            self.enctype,
            &self.keys.tx_enc,
            buf,
            secure,
            data,
            Some(&confounder),
        )?;
        self.account(env.wall_clock_secs(), data.len);
        Ok(len)
    }

    /// Encrypt `data` using the confounder the caller already placed at the
    /// front of `secure`.
    pub fn encrypt_preconfounded<E: Environment>(
        &self,
        env: &E,
        buf: &mut FragmentedBuffer,
        secure: Region,
        data: Region,
    ) -> Result<usize, SecurityError> {
        let len = engine::encrypt(self.enctype, &self.keys.tx_enc, buf, secure, data, None)?;
        self.account(env.wall_clock_secs(), data.len);
        Ok(len)
    }

    /// Decrypt a sealed region with the receive keys.
    ///
    /// On success `region` describes the plaintext. On failure it is
    /// unchanged.
    pub fn decrypt(
        &self,
        buf: &mut FragmentedBuffer,
        region: &mut Region,
    ) -> Result<(), SecurityError> {
        let result = engine::decrypt(self.enctype, &self.keys.rx_enc, buf, region);
        self.check_inbound(result)
    }

    /// MIC `metadata | data` with the transmit checksum key.
    ///
    /// Charged to the budget like an encryption.
    pub fn get_mic<E: Environment>(
        &self,
        env: &E,
        metadata: &[u8],
        buf: &mut FragmentedBuffer,
        secure: Region,
        data: Region,
    ) -> Result<usize, SecurityError> {
        let len = mic::get_mic(self.enctype, &self.keys.tx_kc, metadata, buf, secure, data)?;
        self.account(env.wall_clock_secs(), data.len);
        Ok(len)
    }

    /// Verify a MIC with the receive checksum key.
    pub fn verify_mic(
        &self,
        metadata: &[u8],
        buf: &mut FragmentedBuffer,
        region: &mut Region,
    ) -> Result<(), SecurityError> {
        let result = mic::verify_mic(self.enctype, &self.keys.rx_kc, metadata, buf, region);
        self.check_inbound(result)
    }

    /// Seal a challenge response with the response key.
    ///
    /// Responses are not charged to the data budget.
    pub fn encrypt_response<E: Environment>(
        &self,
        env: &E,
        buf: &mut FragmentedBuffer,
        secure: Region,
        data: Region,
    ) -> Result<usize, SecurityError> {
        let mut confounder = vec![0u8; self.enctype.conf_len];
        env.random_bytes(&mut confounder);
        Ok(engine::encrypt(
            self.enctype,
            &self.keys.resp_enc,
            buf,
            secure,
            data,
            Some(&confounder),
        )?)
    }

    /// Open a challenge response sealed with the response key.
    pub fn decrypt_response(
        &self,
        buf: &mut FragmentedBuffer,
        region: &mut Region,
    ) -> Result<(), SecurityError> {
        let result = engine::decrypt(self.enctype, &self.keys.resp_enc, buf, region);
        self.check_inbound(result)
    }

    /// Flag this context for rekeying.
    ///
    /// Returns true if this call set the flag. Retired contexts and contexts
    /// already flagged are left alone.
    pub fn flag_rekey(&self, reason: RekeyReason) -> bool {
        let target = match reason {
            RekeyReason::BytesExhausted => STATE_NEEDS_REKEY_BYTES,
            RekeyReason::ExpiryApproaching => STATE_NEEDS_REKEY_EXPIRY,
        };
        let flagged = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                matches!(state, STATE_FRESH | STATE_ACTIVE).then_some(target)
            })
            .is_ok();

        if flagged {
            tracing::warn!(
                key_number = self.key_number,
                ?reason,
                bytes_remaining = self.bytes_remaining(),
                "session key needs rekey"
            );
        }
        flagged
    }

    /// Mark this context as superseded. Returns false if it already was.
    pub(crate) fn retire(&self) -> bool {
        self.state.swap(STATE_RETIRED, Ordering::AcqRel) != STATE_RETIRED
    }

    /// True if this generation, or one it succeeded, already asked for a
    /// rekey because of the shared expiry.
    pub(crate) fn expiry_rekey_spent(&self) -> bool {
        self.expiry_rekey_inherited.load(Ordering::Acquire)
            || self.state.load(Ordering::Acquire) == STATE_NEEDS_REKEY_EXPIRY
    }

    /// Stop this context from flagging for expiry. Set on the successor of a
    /// context that already did.
    pub(crate) fn inherit_expiry_rekey(&self) {
        self.expiry_rekey_inherited.store(true, Ordering::Release);
    }

    pub(crate) fn record_auth_failure(&self, err: &SecurityError) {
        let failures = self.auth_failures.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        tracing::warn!(
            key_number = self.key_number,
            abort_code = err.abort_code().code(),
            failures,
            %err,
            "packet failed authentication"
        );
    }

    fn check_inbound(&self, result: Result<(), CryptoError>) -> Result<(), SecurityError> {
        match result {
            Ok(()) => {
                self.mark_active();
                Ok(())
            },
            Err(err) => {
                let err = SecurityError::from(err);
                if err.is_authentication_failure() {
                    self.record_auth_failure(&err);
                }
                Err(err)
            },
        }
    }

    fn mark_active(&self) {
        let _ = self.state.compare_exchange(
            STATE_FRESH,
            STATE_ACTIVE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Charge `bytes` to the budget and flag a rekey if it ran out or the
    /// expiry is inside the grace window.
    ///
    /// A successor cannot move the expiry, so the grace check is skipped on
    /// contexts that inherited a spent expiry rekey.
    ///
    /// The decrement is a single atomic update, so exactly one caller sees
    /// the budget cross zero. The operation that crosses it has already been
    /// performed: the budget can overshoot by one operation.
    fn account(&self, now: u64, bytes: usize) {
        let delta = i64::try_from(bytes).unwrap_or(i64::MAX);
        let Ok(previous) =
            self.bytes_remaining.fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                Some(remaining.saturating_sub(delta))
            })
        else {
            unreachable!("budget update always produces a value");
        };
        let remaining = previous.saturating_sub(delta);

        self.mark_active();
        if remaining <= 0 {
            self.flag_rekey(RekeyReason::BytesExhausted);
        } else if !self.expiry_rekey_inherited.load(Ordering::Acquire)
            && now.saturating_add(self.rekey_grace.as_secs()) >= self.expiry
        {
            self.flag_rekey(RekeyReason::ExpiryApproaching);
        }
    }
}

impl Drop for SessionKeyContext {
    fn drop(&mut self) {
        // Key bytes are zeroed by the key types themselves
        tracing::trace!(key_number = self.key_number, "destroying session keys");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytelife_zero_is_unlimited() {
        assert_eq!(KeyLifetime::from_bytelife(0, 10).byte_budget, i64::MAX);
        assert_eq!(KeyLifetime::from_bytelife(63, 10).byte_budget, i64::MAX);
    }

    #[test]
    fn bytelife_is_power_of_two() {
        let lifetime = KeyLifetime::from_bytelife(30, 1_000);
        assert_eq!(lifetime.byte_budget, 1 << 30);
        assert_eq!(lifetime.expiry, 1_000);
    }

    #[test]
    fn state_reports_key_number() {
        let states = [
            ConnectionState::Fresh { key_number: 3 },
            ConnectionState::Active { key_number: 3, bytes_remaining: 1 },
            ConnectionState::NeedsRekey { key_number: 3, reason: RekeyReason::BytesExhausted },
            ConnectionState::Retired { key_number: 3 },
        ];
        for state in states {
            assert_eq!(state.key_number(), 3);
        }
    }
}
