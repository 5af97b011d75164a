//! In-memory stripe backend with fault injection.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::ports::{StripeBackend, StripeResult};
use crate::error::StripeError;

/// Failure mode applied to every operation until cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripeFault {
    /// Every operation fails with `Unreachable`
    Unreachable,
    /// Reads fail with `ChecksumMismatch`; writes still land
    Corrupt,
    /// Writes and truncates fail with `PermissionDenied`
    ReadOnly,
}

/// Stripe stored in a `Vec<u8>`
#[derive(Debug)]
pub struct MemoryStripe {
    name: String,
    data: Mutex<Vec<u8>>,
    fault: Mutex<Option<StripeFault>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryStripe {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Mutex::new(Vec::new()),
            fault: Mutex::new(None),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Inject a fault
    pub fn set_fault(&self, fault: StripeFault) {
        *self.fault.lock() = Some(fault);
    }

    pub fn clear_fault(&self) {
        *self.fault.lock() = None;
    }

    /// Drop all content, as if the stripe was lost and replaced
    pub fn wipe(&self) {
        self.data.lock().clear();
    }

    /// Copy of the stored bytes
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Flip one stored byte without reporting it
    pub fn corrupt_byte(&self, offset: usize) {
        if let Some(b) = self.data.lock().get_mut(offset) {
            *b ^= 0xFF;
        }
    }

    /// Successful or failed read calls issued so far
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn fault(&self) -> Option<StripeFault> {
        *self.fault.lock()
    }

    fn check_reachable(&self) -> StripeResult<()> {
        match self.fault() {
            Some(StripeFault::Unreachable) => Err(StripeError::Unreachable(self.name.clone())),
            _ => Ok(()),
        }
    }

    fn check_writable(&self) -> StripeResult<()> {
        self.check_reachable()?;
        match self.fault() {
            Some(StripeFault::ReadOnly) => Err(StripeError::PermissionDenied(self.name.clone())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl StripeBackend for MemoryStripe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, offset: u64, len: usize) -> StripeResult<Bytes> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.check_reachable()?;
        if self.fault() == Some(StripeFault::Corrupt) {
            return Err(StripeError::ChecksumMismatch { offset });
        }

        let data = self.data.lock();
        let start = offset as usize;
        let available = data.len().saturating_sub(start);
        if available < len {
            return Err(StripeError::ShortRead {
                expected: len,
                actual: available,
            });
        }
        Ok(Bytes::copy_from_slice(&data[start..start + len]))
    }

    async fn write(&self, offset: u64, buf: &[u8]) -> StripeResult<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.check_writable()?;

        let mut data = self.data.lock();
        let start = offset as usize;
        let end = start + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }

    async fn truncate(&self, len: u64) -> StripeResult<()> {
        self.check_writable()?;
        self.data.lock().resize(len as usize, 0);
        Ok(())
    }

    async fn stat(&self) -> StripeResult<u64> {
        self.check_reachable()?;
        Ok(self.data.lock().len() as u64)
    }
}
