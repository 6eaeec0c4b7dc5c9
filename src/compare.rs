//! Compare-and-set and compare-and-delete
//!
//! Both primitives work on decoded values: the current entry is read,
//! decoded and compared with `==` against the expected value, so two
//! encodings of the same value always match.
//!
//! When the store supports CAS tokens (`gets`/`cas`) the write is
//! conditional on the token from the read, and a concurrent writer makes the
//! call fail instead of being overwritten. Compare-and-delete uses a `cas`
//! write with an already-past expiry, which removes the item only if it is
//! unchanged.
//!
//! Without CAS support the primitives fall back to read, compare, write.
//! That leaves a race window: two callers can both see the expected value
//! and both write, and the later write silently wins.

use crate::driver::{CacheDriver, Lookup, Ttl};
use crate::storage::{CasOutcome, Expiry, RawItem, Store};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Store `new` under `key` only if the current value equals `expected`.
///
/// `expected = None` means "the key must be absent" and is carried out with
/// an atomic `add`. An absent key never matches `Some(_)`.
///
/// Returns `false` on mismatch, on a lost CAS race and on store failure.
pub async fn compare_set<S, T>(
    driver: &CacheDriver<S>,
    key: &str,
    expected: Option<&T>,
    new: &T,
    ttl: impl Into<Ttl>,
) -> bool
where
    S: Store + ?Sized,
    T: Serialize + DeserializeOwned + PartialEq,
{
    driver.metrics().cmd_compare_set.inc();
    let ttl = ttl.into();

    let Some(expected) = expected else {
        return driver.add(key, new, ttl).await;
    };

    let Some((nkey, current, token)) = read_current(driver, key, "compare_set").await else {
        return false;
    };
    if !decodes_to(driver, key, &current, expected) {
        return mismatch(driver, key, "compare_set");
    }
    let Some(item) = driver.encode(key, new) else {
        return false;
    };
    let expiry = driver.expiry(ttl);

    match token {
        Some(token) => {
            write_versioned(driver, key, &nkey, item, expiry, token, "compare_set").await
        }
        None => match driver.store().set(&nkey, item, expiry).await {
            Ok(stored) => stored,
            Err(e) => {
                driver.store_failed("compare_set", key, &e);
                false
            }
        },
    }
}

/// Delete `key` only if its current value equals `expected`.
///
/// Returns `false` when the key is absent, holds a different value, changed
/// between read and delete, or the store failed.
pub async fn compare_delete<S, T>(driver: &CacheDriver<S>, key: &str, expected: &T) -> bool
where
    S: Store + ?Sized,
    T: Serialize + DeserializeOwned + PartialEq,
{
    driver.metrics().cmd_compare_delete.inc();

    let Some((nkey, current, token)) = read_current(driver, key, "compare_delete").await else {
        return false;
    };
    if !decodes_to(driver, key, &current, expected) {
        return mismatch(driver, key, "compare_delete");
    }

    match token {
        Some(token) => {
            write_versioned(
                driver,
                key,
                &nkey,
                current,
                Expiry::Immediately,
                token,
                "compare_delete",
            )
            .await
        }
        // Gone in the meantime is as good as deleted
        None => match driver.store().delete(&nkey).await {
            Ok(_) => true,
            Err(e) => {
                driver.store_failed("compare_delete", key, &e);
                false
            }
        },
    }
}

/// Namespaced key, current item and its CAS token when the store has them
async fn read_current<S: Store + ?Sized>(
    driver: &CacheDriver<S>,
    key: &str,
    op: &'static str,
) -> Option<(Vec<u8>, RawItem, Option<u64>)> {
    let nkey = match driver.resolve_key(key).await {
        Ok(nkey) => nkey,
        Err(e) => {
            driver.store_failed(op, key, &e);
            return None;
        }
    };

    let store = driver.store();
    let current = if store.supports_cas() {
        store
            .gets(&nkey)
            .await
            .map(|found| found.map(|(item, token)| (item, Some(token))))
    } else {
        store.get(&nkey).await.map(|found| found.map(|item| (item, None)))
    };

    match current {
        Ok(Some((item, token))) => Some((nkey, item, token)),
        Ok(None) => {
            mismatch(driver, key, op);
            None
        }
        Err(e) => {
            driver.store_failed(op, key, &e);
            None
        }
    }
}

async fn write_versioned<S: Store + ?Sized>(
    driver: &CacheDriver<S>,
    key: &str,
    nkey: &[u8],
    item: RawItem,
    expiry: Expiry,
    token: u64,
    op: &'static str,
) -> bool {
    match driver.store().cas(nkey, item, expiry, token).await {
        Ok(CasOutcome::Stored) => true,
        Ok(outcome) => {
            driver.metrics().cas_conflicts.inc();
            debug!(key = %key, op = op, outcome = ?outcome, "Entry changed since it was read");
            false
        }
        Err(e) => {
            driver.store_failed(op, key, &e);
            false
        }
    }
}

fn decodes_to<S, T>(driver: &CacheDriver<S>, key: &str, item: &RawItem, expected: &T) -> bool
where
    S: Store + ?Sized,
    T: DeserializeOwned + PartialEq,
{
    matches!(driver.decode_item::<T>(key, item), Lookup::Found(current) if current == *expected)
}

fn mismatch<S: Store + ?Sized>(driver: &CacheDriver<S>, key: &str, op: &'static str) -> bool {
    driver.metrics().compare_mismatches.inc();
    debug!(key = %key, op = op, "Current value does not match");
    false
}
