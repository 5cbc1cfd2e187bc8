use std::io;
use std::ptr;

use rvjit_core::CacheInvariantViolation;

/// Default code buffer size: 64 MiB.
pub const DEFAULT_CODE_BUF_SIZE: usize = 64 * 1024 * 1024;

/// Protection state of the whole buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Readable and writable, never entered.
    Write,
    /// Readable and executable, never written.
    Execute,
}

/// JIT code buffer backed by mmap'd memory.
///
/// Follows W^X discipline: the mapping is either writable or
/// executable, never both. Writing requires a [`WriteView`], which
/// mutably borrows the buffer, and entering code requires an
/// [`ExecView`], which borrows it shared, so the two cannot coexist.
pub struct CodeBuffer {
    ptr: *mut u8,
    size: usize,
    offset: usize,
    mode: CacheMode,
    /// End of the current emission reservation.
    limit: usize,
}

// SAFETY: CodeBuffer owns its mmap'd memory exclusively.
unsafe impl Send for CodeBuffer {}

impl CodeBuffer {
    /// Allocate a new code buffer of the given size (rounded up to
    /// page size). The buffer starts in execute mode.
    pub fn new(size: usize) -> io::Result<Self> {
        let page_size = page_size();
        let size = (size.max(1) + page_size - 1) & !(page_size - 1);

        // SAFETY: mmap with MAP_ANONYMOUS | MAP_PRIVATE, no file backing.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            offset: 0,
            mode: CacheMode::Execute,
            limit: size,
        })
    }

    /// Current write offset.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Open a write window: the mapping becomes RW and non-executable.
    pub fn begin_write(&mut self) -> io::Result<WriteView<'_>> {
        if self.mode != CacheMode::Execute {
            CacheInvariantViolation::raise("begin_write while a write window is open");
        }
        self.protect(libc::PROT_READ | libc::PROT_WRITE)?;
        self.mode = CacheMode::Write;
        self.limit = self.size;
        Ok(WriteView { buf: self })
    }

    /// Shared view for entering and inspecting generated code.
    pub fn exec_view(&self) -> ExecView<'_> {
        if self.mode != CacheMode::Execute {
            CacheInvariantViolation::raise("exec view requested while writable");
        }
        ExecView { buf: self }
    }

    fn protect(&self, prot: libc::c_int) -> io::Result<()> {
        // SAFETY: ptr..ptr+size is our own mapping.
        let ret = unsafe { libc::mprotect(self.ptr as *mut libc::c_void, self.size, prot) };
        if ret != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    #[inline]
    fn read_u32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.size);
        unsafe { (self.ptr.add(offset) as *const u32).read_unaligned() }
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.size);
            }
        }
    }
}

/// Exclusive, writable, non-executable view of a [`CodeBuffer`].
///
/// Dropping an unfinished view switches the buffer back to execute
/// mode.
pub struct WriteView<'a> {
    buf: &'a mut CodeBuffer,
}

impl<'a> WriteView<'a> {
    /// Close the write window and make the buffer executable.
    pub fn end_write_begin_execute(self) -> io::Result<ExecView<'a>> {
        let this = std::mem::ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the borrow is moved out
        // exactly once.
        let buf: &'a mut CodeBuffer = unsafe { ptr::read(&this.buf) };
        buf.protect(libc::PROT_READ | libc::PROT_EXEC)?;
        buf.mode = CacheMode::Execute;
        buf.limit = buf.size;
        Ok(ExecView { buf })
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.buf.offset
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.size
    }

    /// Move the write position, e.g. to the start of a new allocation.
    pub fn set_offset(&mut self, offset: usize) {
        assert!(offset <= self.buf.size);
        self.buf.offset = offset;
    }

    /// Restrict emission to `[offset, offset + len)`. Emitting past the
    /// reservation is an invariant violation.
    pub fn reserve(&mut self, len: usize) {
        let end = self.buf.offset + len;
        if end > self.buf.size {
            CacheInvariantViolation::raise("reservation exceeds code buffer capacity");
        }
        self.buf.limit = end;
    }

    /// Lift the current reservation.
    pub fn release(&mut self) {
        self.buf.limit = self.buf.size;
    }

    #[inline]
    fn check(&self, n: usize) {
        if self.buf.offset + n > self.buf.limit {
            CacheInvariantViolation::raise("code buffer overflow");
        }
    }

    // -- Emit methods --

    #[inline]
    pub fn emit_u8(&mut self, val: u8) {
        self.check(1);
        unsafe { self.buf.ptr.add(self.buf.offset).write(val) };
        self.buf.offset += 1;
    }

    #[inline]
    pub fn emit_u16(&mut self, val: u16) {
        self.check(2);
        unsafe { (self.buf.ptr.add(self.buf.offset) as *mut u16).write_unaligned(val) };
        self.buf.offset += 2;
    }

    #[inline]
    pub fn emit_u32(&mut self, val: u32) {
        self.check(4);
        unsafe { (self.buf.ptr.add(self.buf.offset) as *mut u32).write_unaligned(val) };
        self.buf.offset += 4;
    }

    #[inline]
    pub fn emit_u64(&mut self, val: u64) {
        self.check(8);
        unsafe { (self.buf.ptr.add(self.buf.offset) as *mut u64).write_unaligned(val) };
        self.buf.offset += 8;
    }

    #[inline]
    pub fn emit_bytes(&mut self, data: &[u8]) {
        self.check(data.len());
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.buf.ptr.add(self.buf.offset), data.len());
        }
        self.buf.offset += data.len();
    }

    /// Patch a u32 at the given offset (for back-patching jumps).
    #[inline]
    pub fn patch_u32(&mut self, offset: usize, val: u32) {
        assert!(offset + 4 <= self.buf.size);
        unsafe { (self.buf.ptr.add(offset) as *mut u32).write_unaligned(val) };
    }

    #[inline]
    pub fn read_u8(&self, offset: usize) -> u8 {
        assert!(offset < self.buf.size);
        unsafe { self.buf.ptr.add(offset).read() }
    }

    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        self.buf.read_u32(offset)
    }

    /// Bytes in `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> &[u8] {
        assert!(start <= end && end <= self.buf.size);
        // SAFETY: range lies inside the mapping, which is readable.
        unsafe { std::slice::from_raw_parts(self.buf.ptr.add(start), end - start) }
    }
}

impl Drop for WriteView<'_> {
    fn drop(&mut self) {
        // A failed mprotect leaves the buffer in write mode, and the
        // next exec_view() call aborts.
        if self.buf.protect(libc::PROT_READ | libc::PROT_EXEC).is_ok() {
            self.buf.mode = CacheMode::Execute;
        }
        self.buf.limit = self.buf.size;
    }
}

/// Shared, executable, non-writable view of a [`CodeBuffer`].
#[derive(Clone, Copy)]
pub struct ExecView<'a> {
    buf: &'a CodeBuffer,
}

impl<'a> ExecView<'a> {
    /// Raw pointer to the start of the buffer.
    #[inline]
    pub fn base_ptr(&self) -> *const u8 {
        self.buf.ptr as *const u8
    }

    /// Pointer at a given offset.
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> *const u8 {
        assert!(offset <= self.buf.size);
        unsafe { self.buf.ptr.add(offset) as *const u8 }
    }

    #[inline]
    pub fn read_u8(&self, offset: usize) -> u8 {
        assert!(offset < self.buf.size);
        unsafe { self.buf.ptr.add(offset).read() }
    }

    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        self.buf.read_u32(offset)
    }

    /// Bytes in `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> &'a [u8] {
        assert!(start <= end && end <= self.buf.size);
        // SAFETY: range lies inside the mapping, which is readable.
        unsafe { std::slice::from_raw_parts(self.buf.ptr.add(start), end - start) }
    }

    /// Call into generated code through the prologue at offset 0.
    ///
    /// # Safety
    /// `entry` must be the start of a block emitted for the same
    /// prologue, and `env` must point to the state block that code
    /// was generated for.
    pub unsafe fn enter(&self, env: *mut u8, entry: usize) -> usize {
        let prologue: unsafe extern "C" fn(*mut u8, *const u8) -> usize =
            std::mem::transmute(self.base_ptr());
        prologue(env, self.ptr_at(entry))
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf is always safe to call.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
