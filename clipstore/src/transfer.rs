//! Byte transfer between caller-supplied regions and store buffers
//!
//! The store never touches caller memory directly. Everything that crosses
//! the caller boundary goes through a [`ByteSource`] (for writes) or a
//! [`ByteSink`] (for reads). A transfer either copies the whole delimited
//! range or fails with [`TransferFault`]; the store only updates lengths and
//! offsets after a transfer succeeded.
//!
//! Implementations are provided for plain slices, arrays, vectors,
//! `Option` (where `None` is an absent region) and the vectored
//! [`Vectored`] / [`VectoredMut`] wrappers.

use thiserror::Error;

/// Copy to or from a caller region failed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("bad address while transferring {len} bytes")]
pub struct TransferFault {
    pub len: usize,
}

/// Caller region that bytes are copied out of
pub trait ByteSource {
    /// Number of bytes the region holds
    fn len(&self) -> usize;

    /// Copy the first `dst.len()` bytes of the region into `dst`
    ///
    /// # Errors
    /// Returns `TransferFault` if the region cannot be read.
    fn copy_out(&self, dst: &mut [u8]) -> Result<(), TransferFault>;

    /// `false` for an absent (null) region
    fn is_present(&self) -> bool {
        true
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Caller region that bytes are copied into
pub trait ByteSink {
    /// Number of bytes the region can take
    fn len(&self) -> usize;

    /// Copy `src` into the start of the region
    ///
    /// # Errors
    /// Returns `TransferFault` if the region cannot be written.
    fn copy_in(&mut self, src: &[u8]) -> Result<(), TransferFault>;

    /// `false` for an absent (null) region
    fn is_present(&self) -> bool {
        true
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn checked_prefix(available: usize, wanted: usize) -> Result<(), TransferFault> {
    if wanted > available {
        return Err(TransferFault { len: wanted });
    }
    Ok(())
}

impl ByteSource for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn copy_out(&self, dst: &mut [u8]) -> Result<(), TransferFault> {
        checked_prefix(<[u8]>::len(self), dst.len())?;
        dst.copy_from_slice(&self[..dst.len()]);
        Ok(())
    }
}

impl<const N: usize> ByteSource for [u8; N] {
    fn len(&self) -> usize {
        N
    }

    fn copy_out(&self, dst: &mut [u8]) -> Result<(), TransferFault> {
        self.as_slice().copy_out(dst)
    }
}

impl ByteSource for Vec<u8> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn copy_out(&self, dst: &mut [u8]) -> Result<(), TransferFault> {
        self.as_slice().copy_out(dst)
    }
}

impl<T: ByteSource + ?Sized> ByteSource for &T {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn copy_out(&self, dst: &mut [u8]) -> Result<(), TransferFault> {
        (**self).copy_out(dst)
    }

    fn is_present(&self) -> bool {
        (**self).is_present()
    }
}

impl<T: ByteSource> ByteSource for Option<T> {
    fn len(&self) -> usize {
        self.as_ref().map_or(0, ByteSource::len)
    }

    fn copy_out(&self, dst: &mut [u8]) -> Result<(), TransferFault> {
        match self {
            Some(src) => src.copy_out(dst),
            None => Err(TransferFault { len: dst.len() }),
        }
    }

    fn is_present(&self) -> bool {
        self.as_ref().is_some_and(ByteSource::is_present)
    }
}

impl ByteSink for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn copy_in(&mut self, src: &[u8]) -> Result<(), TransferFault> {
        checked_prefix(<[u8]>::len(self), src.len())?;
        self[..src.len()].copy_from_slice(src);
        Ok(())
    }
}

impl<const N: usize> ByteSink for [u8; N] {
    fn len(&self) -> usize {
        N
    }

    fn copy_in(&mut self, src: &[u8]) -> Result<(), TransferFault> {
        self.as_mut_slice().copy_in(src)
    }
}

impl ByteSink for Vec<u8> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn copy_in(&mut self, src: &[u8]) -> Result<(), TransferFault> {
        self.as_mut_slice().copy_in(src)
    }
}

impl<T: ByteSink + ?Sized> ByteSink for &mut T {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn copy_in(&mut self, src: &[u8]) -> Result<(), TransferFault> {
        (**self).copy_in(src)
    }

    fn is_present(&self) -> bool {
        (**self).is_present()
    }
}

impl<T: ByteSink> ByteSink for Option<T> {
    fn len(&self) -> usize {
        self.as_ref().map_or(0, ByteSink::len)
    }

    fn copy_in(&mut self, src: &[u8]) -> Result<(), TransferFault> {
        match self {
            Some(dst) => dst.copy_in(src),
            None => Err(TransferFault { len: src.len() }),
        }
    }

    fn is_present(&self) -> bool {
        self.as_ref().is_some_and(ByteSink::is_present)
    }
}

/// Gather source: several caller regions written as one contiguous run
#[derive(Debug, Clone, Copy)]
pub struct Vectored<'a>(pub &'a [&'a [u8]]);

impl ByteSource for Vectored<'_> {
    fn len(&self) -> usize {
        self.0.iter().map(|part| part.len()).sum()
    }

    fn copy_out(&self, dst: &mut [u8]) -> Result<(), TransferFault> {
        checked_prefix(ByteSource::len(self), dst.len())?;
        let mut done = 0;
        for part in self.0 {
            if done == dst.len() {
                break;
            }
            let n = part.len().min(dst.len() - done);
            dst[done..done + n].copy_from_slice(&part[..n]);
            done += n;
        }
        Ok(())
    }
}

/// Scatter sink: a read fills several caller regions in order
#[derive(Debug)]
pub struct VectoredMut<'a, 'b>(pub &'a mut [&'b mut [u8]]);

impl ByteSink for VectoredMut<'_, '_> {
    fn len(&self) -> usize {
        self.0.iter().map(|part| part.len()).sum()
    }

    fn copy_in(&mut self, src: &[u8]) -> Result<(), TransferFault> {
        checked_prefix(ByteSink::len(self), src.len())?;
        let mut done = 0;
        for part in self.0.iter_mut() {
            if done == src.len() {
                break;
            }
            let n = part.len().min(src.len() - done);
            part[..n].copy_from_slice(&src[done..done + n]);
            done += n;
        }
        Ok(())
    }
}
