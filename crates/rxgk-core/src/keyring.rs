//! Per-connection window of key generations.
//!
//! Packets carry the low 16 bits of the key number they were secured with.
//! The window accepts the current key, the one before it (packets still in
//! flight across a rekey) and the one after it (the peer rekeyed first).
//!
//! ```text
//!   slot = key_number & 3
//!
//!   current-1     current     current+1
//!   (retired)    (in use)    (crank on demand)
//! ```
//!
//! The mutex guards only the slot table and the current key number. Packet
//! crypto and key derivation run outside it. A crank derives the successor
//! unlocked and installs it only if the current key number has not moved in
//! the meantime.
//!
//! Every generation shares the ticket's expiry, so an expiry-driven rekey
//! happens once: the successor of a context flagged for expiry never flags
//! for expiry itself.

#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::sync::{Arc, Mutex, MutexGuard};

use rxgk_crypto::{EncType, SecretKey, find_enctype};

use crate::{
    context::SessionKeyContext,
    error::SecurityError,
    kdf::{ConnectionInfo, SessionParams, derive_session_keys, derive_transport_key},
};

/// Number of slots in the key window.
pub const KEY_WINDOW_SIZE: usize = 4;

const KEY_WINDOW_MASK: u32 = KEY_WINDOW_SIZE as u32 - 1;

struct KeyWindow {
    current: u32,
    slots: [Option<Arc<SessionKeyContext>>; KEY_WINDOW_SIZE],
}

impl KeyWindow {
    fn slot(&self, key_number: u32) -> Option<&Arc<SessionKeyContext>> {
        self.slots[(key_number & KEY_WINDOW_MASK) as usize]
            .as_ref()
            .filter(|ctx| ctx.key_number() == key_number)
    }

    fn install(&mut self, ctx: Arc<SessionKeyContext>) {
        let index = (ctx.key_number() & KEY_WINDOW_MASK) as usize;
        self.slots[index] = Some(ctx);
    }

    fn release(&mut self, key_number: u32) {
        let slot = &mut self.slots[(key_number & KEY_WINDOW_MASK) as usize];
        if slot.as_ref().is_some_and(|ctx| ctx.key_number() == key_number) {
            *slot = None;
        }
    }
}

/// Session contexts for one connection, indexed by key number.
pub struct ConnectionKeys {
    enctype: &'static EncType,
    token_key: SecretKey,
    conn: ConnectionInfo,
    params: SessionParams,
    window: Mutex<KeyWindow>,
}

impl std::fmt::Debug for ConnectionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionKeys")
            .field("enctype", &self.enctype.name)
            .field("conn", &self.conn)
            .field("current", &self.current_key_number())
            .finish_non_exhaustive()
    }
}

impl ConnectionKeys {
    /// Derive the first key generation for a connection.
    ///
    /// # Errors
    ///
    /// - `UnsupportedEncryptionType` if `enctype_id` is not registered
    /// - `InvalidKeyLength` if `token_key` does not suit the enctype
    pub fn new(
        enctype_id: u32,
        token_key: &[u8],
        conn: ConnectionInfo,
        params: SessionParams,
        initial_key_number: u32,
    ) -> Result<Self, SecurityError> {
        let enctype = find_enctype(enctype_id)?;
        let keys = Self {
            enctype,
            token_key: SecretKey::from_slice(token_key)?,
            conn,
            params,
            window: Mutex::new(KeyWindow {
                current: initial_key_number,
                slots: Default::default(),
            }),
        };

        let first = keys.derive(initial_key_number)?;
        keys.lock().install(first);
        Ok(keys)
    }

    /// Negotiated enctype.
    pub fn enctype(&self) -> &'static EncType {
        self.enctype
    }

    /// Current key number.
    pub fn current_key_number(&self) -> u32 {
        self.lock().current
    }

    /// Current context without rekeying, even if it asked for a successor.
    pub fn peek_current(&self) -> Option<Arc<SessionKeyContext>> {
        let window = self.lock();
        window.slot(window.current).cloned()
    }

    /// Context for transmitting.
    ///
    /// If the current context has flagged that it needs rekeying, the
    /// window cranks to the next key number first.
    ///
    /// # Errors
    ///
    /// - `KeyNumberExhausted` if a crank is due but no key numbers are left
    pub fn current(&self) -> Result<Arc<SessionKeyContext>, SecurityError> {
        let current = {
            let window = self.lock();
            if let Some(ctx) = window.slot(window.current).filter(|ctx| !ctx.needs_rekey()) {
                return Ok(Arc::clone(ctx));
            }
            window.current
        };
        self.crank(current)
    }

    /// Context for a received packet carrying `wire_key_number`.
    ///
    /// # Errors
    ///
    /// - `BadKeyNumber` if the key number is outside the window
    /// - `KeyNumberExhausted` if the peer is ahead but no key numbers are left
    pub fn get(&self, wire_key_number: u16) -> Result<Arc<SessionKeyContext>, SecurityError> {
        let current = self.lock().current;
        let delta = wire_key_number.wrapping_sub(current as u16) as i16;

        match delta {
            0 => self
                .lock()
                .slot(current)
                .cloned()
                .ok_or(SecurityError::BadKeyNumber { received: wire_key_number, current }),
            1 => self.crank(current),
            -1 if current > 0 => self.previous(current),
            _ => Err(SecurityError::BadKeyNumber { received: wire_key_number, current }),
        }
    }

    /// Install the next key number unconditionally.
    ///
    /// # Errors
    ///
    /// - `KeyNumberExhausted` if the current key number is `u32::MAX`
    pub fn rekey(&self) -> Result<Arc<SessionKeyContext>, SecurityError> {
        let current = self.lock().current;
        self.crank(current)
    }

    /// Derive and install `previous + 1`, retire `previous` and release the
    /// generation before it.
    ///
    /// If another caller moved the window while the successor was being
    /// derived, the fresh derivation is dropped and the installed successor
    /// is returned instead.
    fn crank(&self, previous: u32) -> Result<Arc<SessionKeyContext>, SecurityError> {
        let next = previous.checked_add(1).ok_or(SecurityError::KeyNumberExhausted)?;
        let ctx = self.derive(next)?;

        let mut window = self.lock();
        if window.current != previous {
            return window.slot(next).cloned().ok_or(SecurityError::BadKeyNumber {
                received: next as u16,
                current: window.current,
            });
        }

        if let Some(old) = window.slot(previous) {
            if old.expiry_rekey_spent() {
                ctx.inherit_expiry_rekey();
            }
            old.retire();
        }
        if let Some(stale) = previous.checked_sub(1) {
            window.release(stale);
        }
        window.install(Arc::clone(&ctx));
        window.current = next;
        drop(window);

        tracing::info!(
            cid = self.conn.cid,
            from = previous,
            to = next,
            "rekeyed connection"
        );
        Ok(ctx)
    }

    /// Context for `current - 1`, derived again if it was already released.
    fn previous(&self, current: u32) -> Result<Arc<SessionKeyContext>, SecurityError> {
        let previous = current - 1;
        if let Some(ctx) = self.lock().slot(previous) {
            return Ok(Arc::clone(ctx));
        }

        let ctx = self.derive(previous)?;
        ctx.retire();

        let mut window = self.lock();
        if let Some(installed) = window.slot(previous) {
            return Ok(Arc::clone(installed));
        }
        if window.current != current {
            return Err(SecurityError::BadKeyNumber {
                received: previous as u16,
                current: window.current,
            });
        }
        window.install(Arc::clone(&ctx));
        Ok(ctx)
    }

    fn derive(&self, key_number: u32) -> Result<Arc<SessionKeyContext>, SecurityError> {
        let transport_key =
            derive_transport_key(self.enctype, &self.token_key, &self.conn, key_number)?;
        derive_session_keys(&transport_key, self.enctype, key_number, &self.params)
    }

    fn lock(&self) -> MutexGuard<'_, KeyWindow> {
        self.window.lock().expect("key window mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rxgk_crypto::ENCTYPE_AES128_CTS_HMAC_SHA1_96;

    use super::*;
    use crate::context::{KeyLifetime, RekeyReason, Role};

    fn keys_at(initial: u32) -> ConnectionKeys {
        ConnectionKeys::new(
            ENCTYPE_AES128_CTS_HMAC_SHA1_96,
            &[0x6b; 16],
            ConnectionInfo { epoch: 1, cid: 4, start_time: 0 },
            SessionParams {
                role: Role::Client,
                lifetime: KeyLifetime::unlimited(),
                rekey_grace: Duration::ZERO,
            },
            initial,
        )
        .unwrap()
    }

    #[test]
    fn current_key_is_accepted() {
        let keys = keys_at(0);
        assert_eq!(keys.get(0).unwrap().key_number(), 0);
        assert_eq!(keys.current().unwrap().key_number(), 0);
    }

    #[test]
    fn next_key_cranks_window() {
        let keys = keys_at(0);
        let old = keys.current().unwrap();

        let next = keys.get(1).unwrap();
        assert_eq!(next.key_number(), 1);
        assert_eq!(keys.current_key_number(), 1);
        assert!(old.is_retired());

        // The old generation is still reachable for draining
        assert!(Arc::ptr_eq(&keys.get(0).unwrap(), &old));
    }

    #[test]
    fn previous_key_at_zero_is_rejected() {
        let keys = keys_at(0);
        assert_eq!(
            keys.get(u16::MAX).unwrap_err(),
            SecurityError::BadKeyNumber { received: u16::MAX, current: 0 }
        );
    }

    #[test]
    fn far_key_numbers_are_rejected() {
        let keys = keys_at(5);
        for wire in [2u16, 3, 7, 100] {
            assert!(matches!(keys.get(wire), Err(SecurityError::BadKeyNumber { .. })), "{wire}");
        }
        assert_eq!(keys.current_key_number(), 5);
    }

    #[test]
    fn previous_key_is_derived_on_demand() {
        let keys = keys_at(0x1_0000);
        let previous = keys.get(0xFFFF).unwrap();
        assert_eq!(previous.key_number(), 0xFFFF);
        assert!(previous.is_retired());
        assert_eq!(keys.current_key_number(), 0x1_0000);
    }

    #[test]
    fn crank_releases_two_generations_back() {
        let keys = keys_at(0);
        let weak = Arc::downgrade(&keys.current().unwrap());

        keys.rekey().unwrap();
        assert!(weak.upgrade().is_some(), "retired key kept for draining");

        keys.rekey().unwrap();
        assert!(weak.upgrade().is_none(), "key two generations back is released");
    }

    #[test]
    fn exhausted_key_space_is_reported() {
        let keys = keys_at(u32::MAX);
        assert_eq!(keys.rekey().unwrap_err(), SecurityError::KeyNumberExhausted);
        assert_eq!(keys.current_key_number(), u32::MAX);
    }

    #[test]
    fn contexts_land_in_their_own_slots() {
        let keys = keys_at(6);
        keys.rekey().unwrap();
        keys.rekey().unwrap();

        let window = keys.lock();
        assert!(window.slot(6).is_none());
        assert_eq!(window.slot(7).unwrap().key_number(), 7);
        assert_eq!(window.slot(8).unwrap().key_number(), 8);
        assert_eq!(window.current, 8);
    }

    #[test]
    fn concurrent_cranks_install_one_successor() {
        let keys = keys_at(0);

        let cranked: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8).map(|_| s.spawn(|| keys.get(1).unwrap())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(keys.current_key_number(), 1);
        let installed = keys.current().unwrap();
        for ctx in &cranked {
            assert!(Arc::ptr_eq(ctx, &installed));
        }
    }

    #[test]
    fn expiry_rekey_is_inherited_by_successor() {
        let keys = keys_at(0);
        let first = keys.current().unwrap();
        assert!(first.flag_rekey(RekeyReason::ExpiryApproaching));

        let second = keys.current().unwrap();
        assert_eq!(second.key_number(), 1);
        assert!(second.expiry_rekey_spent());

        // Carried across later budget-driven rekeys too
        assert!(second.flag_rekey(RekeyReason::BytesExhausted));
        let third = keys.current().unwrap();
        assert_eq!(third.key_number(), 2);
        assert!(third.expiry_rekey_spent());
    }

    #[test]
    fn budget_rekey_does_not_spend_expiry() {
        let keys = keys_at(0);
        keys.current().unwrap().flag_rekey(RekeyReason::BytesExhausted);
        assert!(!keys.current().unwrap().expiry_rekey_spent());
    }

    #[test]
    fn unknown_enctype_fails_setup() {
        let result = ConnectionKeys::new(
            1,
            &[0u8; 16],
            ConnectionInfo { epoch: 1, cid: 4, start_time: 0 },
            SessionParams {
                role: Role::Server,
                lifetime: KeyLifetime::unlimited(),
                rekey_grace: Duration::ZERO,
            },
            0,
        );
        assert!(matches!(result, Err(SecurityError::Crypto(_))));
    }
}
