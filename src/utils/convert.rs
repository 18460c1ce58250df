use crate::Index;
use crate::Result;
use crate::StorageError;

/// Ledger index as an order-preserving sled key.
///
/// Only non-negative indices are stored, so the big-endian bytes of the `u64`
/// sort exactly like the indices.
pub const fn index_to_key(index: Index) -> [u8; 8] {
    (index as u64).to_be_bytes()
}

pub fn key_to_index<K: AsRef<[u8]>>(bytes: K) -> Result<Index> {
    let bytes = bytes.as_ref();
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::CorruptedKey(bytes.to_vec()))?;
    Ok(u64::from_be_bytes(array) as Index)
}
