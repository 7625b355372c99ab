//! Buffer growth
//!
//! Capacity doubles from its current value until the required size fits.
//! A doubling that would pass the configured maximum is clamped to it; if
//! the maximum is still too small the growth is refused. Growth is
//! all-or-nothing: on any failure the old buffer is left exactly as it was.

use crate::error::{Result, StoreError};

/// Capacity to grow to so that `required` bytes fit
///
/// Returns `current` unchanged when it already suffices.
///
/// # Errors
/// `CapacityExceeded` if `required` is larger than `max`.
pub fn next_capacity(current: usize, required: usize, max: usize) -> Result<usize> {
    let mut capacity = current.max(1);
    while capacity < required {
        if capacity >= max {
            return Err(StoreError::CapacityExceeded { required, max });
        }
        capacity = capacity.saturating_mul(2).min(max);
    }
    Ok(capacity.max(current))
}

/// Replace `data` with a zero-filled buffer of `new_capacity` bytes that
/// starts with the first `length` bytes of the old one
///
/// The old buffer is released only after the new one is fully built.
///
/// # Errors
/// `OutOfMemory` if the new buffer cannot be allocated; `data` is untouched.
pub fn grow(data: &mut Vec<u8>, length: usize, new_capacity: usize) -> Result<()> {
    debug_assert!(length <= data.len());
    debug_assert!(new_capacity >= length);

    let mut grown = Vec::new();
    grown
        .try_reserve_exact(new_capacity)
        .map_err(|_| StoreError::OutOfMemory {
            requested: new_capacity,
        })?;
    grown.extend_from_slice(&data[..length]);
    grown.resize(new_capacity, 0);

    log::debug!(
        "growth: {} -> {} bytes (length {})",
        data.len(),
        new_capacity,
        length
    );
    *data = grown;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_growth_when_it_fits() {
        assert_eq!(next_capacity(1024, 1000, 4096), Ok(1024));
        assert_eq!(next_capacity(1024, 1024, 4096), Ok(1024));
    }

    #[test]
    fn test_doubles_until_fit() {
        assert_eq!(next_capacity(1024, 1500, 1 << 20), Ok(2048));
        assert_eq!(next_capacity(2048, 2100, 1 << 20), Ok(4096));
        assert_eq!(next_capacity(1024, 5000, 1 << 20), Ok(8192));
    }

    #[test]
    fn test_clamps_to_max() {
        assert_eq!(next_capacity(1024, 3000, 3000), Ok(3000));
        assert_eq!(next_capacity(1024, 2500, 3000), Ok(3000));
    }

    #[test]
    fn test_beyond_max_rejected() {
        assert_eq!(
            next_capacity(1024, 3001, 3000),
            Err(StoreError::CapacityExceeded {
                required: 3001,
                max: 3000
            })
        );
        assert_eq!(
            next_capacity(4096, 4097, 4096),
            Err(StoreError::CapacityExceeded {
                required: 4097,
                max: 4096
            })
        );
    }

    #[test]
    fn test_capacity_above_lowered_max_is_kept() {
        // The maximum was lowered after this buffer grew
        assert_eq!(next_capacity(8192, 100, 4096), Ok(8192));
        assert!(next_capacity(8192, 9000, 4096).is_err());
    }

    #[test]
    fn test_grow_preserves_prefix_and_zero_fills() {
        let mut data = vec![0u8; 8];
        data[..3].copy_from_slice(b"abc");
        grow(&mut data, 3, 16).unwrap();
        assert_eq!(data.len(), 16);
        assert_eq!(&data[..3], b"abc");
        assert!(data[3..].iter().all(|&b| b == 0));
    }
}
