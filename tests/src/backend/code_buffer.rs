use rvjit_backend::code_buffer::{CacheMode, CodeBuffer};

#[test]
fn test_emit_and_read() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let mut w = buf.begin_write().unwrap();
    w.emit_u8(0x90); // NOP
    w.emit_u32(0xDEADBEEF);
    assert_eq!(w.offset(), 5);
    assert_eq!(w.read_u8(0), 0x90);
    assert_eq!(w.read_u32(1), 0xDEADBEEF);
    let x = w.end_write_begin_execute().unwrap();
    assert_eq!(x.slice(0, 5), &[0x90, 0xEF, 0xBE, 0xAD, 0xDE]);
}

#[test]
fn test_patch() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let mut w = buf.begin_write().unwrap();
    w.emit_u32(0);
    w.patch_u32(0, 0x12345678);
    assert_eq!(w.read_u32(0), 0x12345678);
}

#[test]
fn test_size_rounds_to_pages() {
    let buf = CodeBuffer::new(100).unwrap();
    assert!(buf.capacity() >= 4096);
    assert_eq!(buf.capacity() % 4096, 0);
}

#[test]
fn test_write_window_modes() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    assert_eq!(buf.mode(), CacheMode::Execute);
    {
        let mut w = buf.begin_write().unwrap();
        w.emit_u8(0xC3);
        // Dropped without finishing: back to execute mode.
    }
    assert_eq!(buf.mode(), CacheMode::Execute);
    assert_eq!(buf.offset(), 1);

    let w = buf.begin_write().unwrap();
    w.end_write_begin_execute().unwrap();
    assert_eq!(buf.mode(), CacheMode::Execute);
}

#[test]
#[should_panic(expected = "code buffer overflow")]
fn test_reservation_overflow() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let mut w = buf.begin_write().unwrap();
    w.set_offset(64);
    w.reserve(4);
    w.emit_u32(0);
    w.emit_u8(0);
}

#[test]
fn test_release_lifts_reservation() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let mut w = buf.begin_write().unwrap();
    w.reserve(2);
    w.emit_u16(0);
    w.release();
    w.emit_u64(0);
    assert_eq!(w.offset(), 10);
}

#[test]
fn test_execute_written_code() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let mut w = buf.begin_write().unwrap();
    // mov rax, rdi; ret
    w.emit_bytes(&[0x48, 0x89, 0xF8, 0xC3]);
    let x = w.end_write_begin_execute().unwrap();
    let ret = unsafe { x.enter(0x1234 as *mut u8, 0) };
    assert_eq!(ret, 0x1234);
}
