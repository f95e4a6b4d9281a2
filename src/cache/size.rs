//! Entry size measurement

use tracing::{trace, warn};

use super::store::{EntryInfo, Store};

/// Byte size of an entry: the exact payload length when it could be
/// measured, otherwise the declared `Content-Length`, otherwise 0.
pub fn measure(info: &EntryInfo) -> u64 {
    match (info.exact_len, info.declared_len) {
        (Some(exact), _) => exact,
        (None, Some(declared)) => {
            trace!(key = %info.key, declared, "using declared length");
            declared
        }
        (None, None) => 0,
    }
}

/// Size and age of one stored entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizedEntry {
    pub key: String,
    pub size: u64,
    /// Freshness stamp, 0 when missing
    pub stamp: i64,
}

/// Measures every entry in `store`
///
/// Entries that vanish or cannot be inspected mid-scan are skipped; a
/// measurement problem never fails the scan.
pub async fn scan(store: &Store) -> crate::error::CacheResult<Vec<SizedEntry>> {
    let mut entries = Vec::new();
    for key in store.keys().await? {
        match store.inspect(&key).await {
            Ok(Some(info)) => entries.push(SizedEntry {
                size: measure(&info),
                stamp: info.stamp.unwrap_or(0),
                key,
            }),
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "could not measure entry"),
        }
    }
    Ok(entries)
}

/// Summed size and count of all entries in `store`
pub async fn total(store: &Store) -> crate::error::CacheResult<(u64, usize)> {
    let entries = scan(store).await?;
    Ok((entries.iter().map(|e| e.size).sum(), entries.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(exact: Option<u64>, declared: Option<u64>) -> EntryInfo {
        EntryInfo {
            key: "https://cdn/a/1.ts".to_string(),
            stamp: None,
            exact_len: exact,
            declared_len: declared,
        }
    }

    #[test]
    fn test_measure_prefers_exact_length() {
        assert_eq!(measure(&info(Some(10), Some(99))), 10);
    }

    #[test]
    fn test_measure_falls_back_to_declared_length() {
        assert_eq!(measure(&info(None, Some(99))), 99);
    }

    #[test]
    fn test_measure_without_information_is_zero() {
        assert_eq!(measure(&info(None, None)), 0);
    }
}
