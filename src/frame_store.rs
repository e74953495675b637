//! Lock-free storage for log frames.
//!
//! Frames live in fixed-capacity buffers linked into a chain. A log call
//! claims its byte range with one `fetch_add` on the current buffer's cursor;
//! when a claim would run past the end, a fresh buffer is installed with a
//! compare-and-swap and linked behind the full one. Buffers are only freed
//! when the store itself is dropped, so the global store keeps every frame
//! for the life of the process.
//!
//! # Memory layout
//!
//! ```text
//! frame:  [timestamp u64][payload len u32][schema u32][payload, multiple of 8]
//! buffer: [address frame, 32 bytes][frame][frame]...[zeroed tail]
//! ```
//!
//! The schema word is written last, with release ordering. A zero schema word
//! marks a frame that is still being written, and readers stop there.

use std::alloc::{self, Layout};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicUsize, Ordering};

use lazy_static::lazy_static;

use crate::efficient_clock::now_micros;
use crate::error::ReserveError;
use crate::fatal::fatal;
use crate::log_format_registry::{PLATFORM_ID, SEGMENT_ID};
use crate::loggable::{padded_len, ArgKind, PADDING_TAG};

/// Default capacity of one buffer.
pub const BUFFER_CAPACITY: usize = 16 * 1024 * 1024;
/// Size of a frame header.
pub const FRAME_HEADER_SIZE: usize = 16;
/// Payloads must be strictly smaller than this.
pub const MAX_FRAME_PAYLOAD: usize = 65536;
/// First word of every log image.
pub const HEADER_SIGNATURE: u64 = 724_313_520_984_115_534;
/// The only frame layout this crate writes and replays.
pub const FORMAT_VERSION: u64 = 3;
/// Size of the image header produced by [`header_bytes`].
pub const HEADER_SIZE: usize = 40;
/// Size of the address frame heading every buffer.
pub const ADDRESS_FRAME_SIZE: usize = 32;
/// Capacity of the crashdump scratch region, frame header included.
pub const CRASHDUMP_CAPACITY: usize = 64 * 1024;
/// Offset of the caller's bytes inside the crashdump region: frame header,
/// blob tag and blob length.
const CRASHDUMP_DATA_OFFSET: usize = FRAME_HEADER_SIZE + 1 + 4;

const BUFFER_ALIGN: usize = 8;

/// In-process address of a frame header, returned by every log call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogCookie(pub u64);

impl LogCookie {
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LogCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The 40-byte image header.
///
/// Signature, format version, then an embedded frame header (timestamp 0,
/// length 8, schema 0) whose 8-byte payload is the identity of this
/// platform's self-identification schema.
pub fn header_bytes() -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..8].copy_from_slice(&HEADER_SIGNATURE.to_le_bytes());
    header[8..16].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    header[16..24].copy_from_slice(&0u64.to_le_bytes());
    header[24..28].copy_from_slice(&8u32.to_le_bytes());
    header[28..32].copy_from_slice(&0u32.to_le_bytes());
    header[32..40].copy_from_slice(&u64::from(PLATFORM_ID).to_le_bytes());
    header
}

/// Writes a frame header except for the schema word.
///
/// # Safety
///
/// `frame` must be valid for writes of `FRAME_HEADER_SIZE` bytes and aligned
/// to 8.
unsafe fn write_frame_prefix(frame: *mut u8, timestamp: u64, payload_len: usize) {
    ptr::write(frame.cast::<[u8; 8]>(), timestamp.to_le_bytes());
    ptr::write(frame.add(8).cast::<[u8; 4]>(), (payload_len as u32).to_le_bytes());
}

/// The schema word of the frame at `frame`.
///
/// # Safety
///
/// `frame` must point at a frame header inside live buffer memory.
unsafe fn schema_word<'a>(frame: *mut u8) -> &'a AtomicU32 {
    AtomicU32::from_ptr(frame.add(12).cast::<u32>())
}

/// Allocates `size` zeroed bytes, or `None` when the allocator refuses.
fn allocate_zeroed(size: usize) -> Option<NonNull<u8>> {
    let layout = Layout::from_size_align(size, BUFFER_ALIGN).ok()?;
    // SAFETY: size is non-zero, checked by every caller.
    NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
}

/// # Safety
///
/// `data` must come from [`allocate_zeroed`] with the same `size`.
unsafe fn deallocate(data: NonNull<u8>, size: usize) {
    if let Ok(layout) = Layout::from_size_align(size, BUFFER_ALIGN) {
        alloc::dealloc(data.as_ptr(), layout);
    }
}

/// One arena of frames.
struct Buffer {
    data: NonNull<u8>,
    capacity: usize,
    /// Bytes handed out; may overshoot `capacity` once the buffer is full.
    cursor: AtomicUsize,
    /// Bytes of published frames.
    committed: AtomicUsize,
    next: AtomicPtr<Buffer>,
}

// SAFETY: Buffer is shared between threads because:
// - the byte range of every frame is handed to exactly one writer by the
//   cursor's fetch_add
// - readers only touch frames whose schema word was published with release
//   ordering, and published frames are never written again
// - the memory is freed only by FrameStore::drop, which has exclusive access
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    /// Allocates a buffer whose first frame records its own address.
    fn allocate(capacity: usize) -> Option<Box<Buffer>> {
        let data = allocate_zeroed(capacity)?;
        let frame = data.as_ptr();
        // SAFETY: the buffer is at least ADDRESS_FRAME_SIZE bytes, freshly
        // allocated and not yet shared.
        unsafe {
            write_frame_prefix(frame, 0, ADDRESS_FRAME_SIZE - FRAME_HEADER_SIZE);
            let payload = frame.add(FRAME_HEADER_SIZE);
            *payload = ArgKind::U64.tag();
            ptr::write(
                payload.add(1).cast::<[u8; 8]>(),
                (frame as u64).to_le_bytes(),
            );
            schema_word(frame).store(SEGMENT_ID.to_le(), Ordering::Release);
        }

        Some(Box::new(Buffer {
            data,
            capacity,
            cursor: AtomicUsize::new(ADDRESS_FRAME_SIZE),
            committed: AtomicUsize::new(ADDRESS_FRAME_SIZE),
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }

    fn address(&self) -> u64 {
        self.data.as_ptr() as u64
    }

    /// End of the contiguous run of published frames.
    fn published_end(&self) -> usize {
        let limit = self.cursor.load(Ordering::Acquire).min(self.capacity);
        let mut offset = 0;
        while offset + FRAME_HEADER_SIZE <= limit {
            // SAFETY: offset is a frame boundary below capacity; the length
            // is only read after the schema word was observed published.
            unsafe {
                let frame = self.data.as_ptr().add(offset);
                if schema_word(frame).load(Ordering::Acquire) == 0 {
                    break;
                }
                let len = u32::from_le_bytes(ptr::read(frame.add(8).cast::<[u8; 4]>()));
                offset += FRAME_HEADER_SIZE + len as usize;
            }
        }
        offset.min(limit)
    }

    /// Published frames as a byte span.
    fn published(&self) -> &[u8] {
        let end = self.published_end();
        // SAFETY: every byte below `end` belongs to a published, immutable
        // frame.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), end) }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // SAFETY: allocated by Buffer::allocate with this capacity.
        unsafe { deallocate(self.data, self.capacity) }
    }
}

/// Scratch region reserved up front for crash reporting.
struct CrashdumpRegion {
    data: NonNull<u8>,
    used: AtomicUsize,
    claimed: AtomicBool,
}

// SAFETY: the claim flag hands the writable part to one owner at a time and
// readers only read below `used`, which is published with release ordering.
unsafe impl Send for CrashdumpRegion {}
unsafe impl Sync for CrashdumpRegion {}

impl CrashdumpRegion {
    fn allocate() -> Self {
        let data = match allocate_zeroed(CRASHDUMP_CAPACITY) {
            Some(data) => data,
            None => match Layout::from_size_align(CRASHDUMP_CAPACITY, BUFFER_ALIGN) {
                Ok(layout) => alloc::handle_alloc_error(layout),
                Err(_) => fatal("invalid crashdump layout"),
            },
        };
        Self {
            data,
            used: AtomicUsize::new(0),
            claimed: AtomicBool::new(false),
        }
    }

    fn published(&self) -> &[u8] {
        let used = self.used.load(Ordering::Acquire);
        // SAFETY: bytes below `used` were written before it was published.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), used) }
    }
}

impl Drop for CrashdumpRegion {
    fn drop(&mut self) {
        // SAFETY: allocated by CrashdumpRegion::allocate.
        unsafe { deallocate(self.data, CRASHDUMP_CAPACITY) }
    }
}

/// Claimed access to the crashdump region.
///
/// Intended for crash handlers: nothing here allocates. Write the report into
/// [`as_mut_slice`](Self::as_mut_slice), then call
/// [`set_crashdump_data`](Self::set_crashdump_data) to publish it as one
/// platform frame at the end of every exported image.
pub struct CrashdumpScratch<'a> {
    region: &'a CrashdumpRegion,
}

impl CrashdumpScratch<'_> {
    /// The writable part of the region.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the claim gives this scratch exclusive access to the bytes
        // after the frame and blob headers.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.region.data.as_ptr().add(CRASHDUMP_DATA_OFFSET),
                self.capacity(),
            )
        }
    }

    pub fn capacity(&self) -> usize {
        // Leave room for padding up to the next multiple of 8.
        (CRASHDUMP_CAPACITY - CRASHDUMP_DATA_OFFSET) & !7
    }

    /// Publishes the first `len` bytes of the slice as a platform frame.
    pub fn set_crashdump_data(&mut self, len: usize) {
        let len = len.min(self.capacity());
        let payload_len = padded_len(1 + 4 + len);
        let region = self.region;
        region.used.store(0, Ordering::Release);

        let frame = region.data.as_ptr();
        // SAFETY: the region is CRASHDUMP_CAPACITY bytes and the padded
        // payload fits by construction of `capacity`.
        unsafe {
            schema_word(frame).store(0, Ordering::Relaxed);
            write_frame_prefix(frame, now_micros(), payload_len);
            let payload = frame.add(FRAME_HEADER_SIZE);
            *payload = ArgKind::Blob.tag();
            ptr::write(payload.add(1).cast::<[u8; 4]>(), (len as u32).to_le_bytes());
            ptr::write_bytes(payload.add(5 + len), PADDING_TAG, payload_len - 5 - len);
            schema_word(frame).store(PLATFORM_ID.to_le(), Ordering::Release);
        }
        region
            .used
            .store(FRAME_HEADER_SIZE + payload_len, Ordering::Release);
    }
}

impl Drop for CrashdumpScratch<'_> {
    fn drop(&mut self) {
        self.region.claimed.store(false, Ordering::Release);
    }
}

/// Counters describing a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStoreStats {
    pub buffers: usize,
    pub buffer_capacity: usize,
    pub committed_bytes: usize,
}

/// A chain of frame buffers.
///
/// # Thread Safety
///
/// All methods take `&self` and may be called from any number of threads.
/// Reserving a frame is one atomic add in the common case; installing a new
/// buffer is a compare-and-swap, and the losers of that race free their
/// buffer and retry.
///
/// # Examples
///
/// ```
/// # use frame_logger::frame_store::FrameStore;
/// let store = FrameStore::with_capacity(4096);
/// let mut frame = store.reserve(8, 0x1234, 1_000);
/// frame.payload_mut()[0] = 6;
/// let cookie = frame.commit();
/// assert_ne!(cookie.0, 0);
///
/// let image = store.capture_image();
/// assert!(image.len() > 40);
/// ```
pub struct FrameStore {
    current: AtomicPtr<Buffer>,
    first: AtomicPtr<Buffer>,
    capacity: usize,
    buffer_count: AtomicUsize,
    crashdump: CrashdumpRegion,
}

impl FrameStore {
    /// A store with the default 16 MiB buffers.
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_CAPACITY)
    }

    /// A store with `capacity` byte buffers, rounded up to a multiple of 8
    /// and to room for at least one small frame.
    pub fn with_capacity(capacity: usize) -> Self {
        let minimum = ADDRESS_FRAME_SIZE + FRAME_HEADER_SIZE + 8;
        let capacity = padded_len(capacity.max(minimum));
        Self {
            current: AtomicPtr::new(ptr::null_mut()),
            first: AtomicPtr::new(ptr::null_mut()),
            capacity,
            buffer_count: AtomicUsize::new(0),
            crashdump: CrashdumpRegion::allocate(),
        }
    }

    pub fn buffer_capacity(&self) -> usize {
        self.capacity
    }

    /// Reserves a frame with a `payload_len` byte payload.
    ///
    /// # Arguments
    ///
    /// * `payload_len` - Payload size; a multiple of 8 below
    ///   [`MAX_FRAME_PAYLOAD`] that fits in one buffer
    /// * `schema` - Schema identity, never 0
    /// * `timestamp` - Microseconds since the Unix epoch
    ///
    /// # Returns
    ///
    /// A [`Reservation`] that publishes the frame when committed or dropped.
    pub fn try_reserve(
        &self,
        payload_len: usize,
        schema: u32,
        timestamp: u64,
    ) -> Result<Reservation<'_>, ReserveError> {
        if schema == 0 {
            return Err(ReserveError::ReservedSchema);
        }
        if payload_len >= MAX_FRAME_PAYLOAD
            || FRAME_HEADER_SIZE + payload_len > self.capacity - ADDRESS_FRAME_SIZE
        {
            return Err(ReserveError::FrameTooLarge { len: payload_len });
        }
        if payload_len % 8 != 0 {
            return Err(ReserveError::Unaligned { len: payload_len });
        }

        let total = FRAME_HEADER_SIZE + payload_len;
        loop {
            let current = self.current.load(Ordering::Acquire);
            // SAFETY: buffers reachable from `current` live until the store
            // is dropped, which cannot happen while `self` is borrowed.
            if let Some(buffer) = unsafe { current.as_ref() } {
                let start = buffer.cursor.fetch_add(total, Ordering::Relaxed);
                if start + total <= buffer.capacity {
                    return Ok(Reservation {
                        buffer,
                        offset: start,
                        payload_len,
                        schema,
                        timestamp,
                        published: false,
                        _not_send: PhantomData,
                    });
                }
            }
            self.install_buffer(current)?;
        }
    }

    /// [`try_reserve`](Self::try_reserve), treating failure as fatal.
    #[inline]
    #[track_caller]
    pub fn reserve(&self, payload_len: usize, schema: u32, timestamp: u64) -> Reservation<'_> {
        match self.try_reserve(payload_len, schema, timestamp) {
            Ok(reservation) => reservation,
            Err(err) => fatal(&err.to_string()),
        }
    }

    /// Replaces `observed` as the current buffer. Losing the race is fine:
    /// someone else installed a buffer and the caller just retries.
    #[cold]
    fn install_buffer(&self, observed: *mut Buffer) -> Result<(), ReserveError> {
        if self.current.load(Ordering::Acquire) != observed {
            return Ok(());
        }
        let fresh = Buffer::allocate(self.capacity).ok_or(ReserveError::Exhausted {
            capacity: self.capacity,
        })?;
        let fresh = Box::into_raw(fresh);

        match self
            .current
            .compare_exchange(observed, fresh, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                // SAFETY: `observed` is still owned by the chain.
                match unsafe { observed.as_ref() } {
                    Some(previous) => previous.next.store(fresh, Ordering::Release),
                    None => self.first.store(fresh, Ordering::Release),
                }
                let count = self.buffer_count.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(buffers = count, capacity = self.capacity, "installed log buffer");
            }
            Err(_) => {
                // SAFETY: `fresh` was never shared.
                drop(unsafe { Box::from_raw(fresh) });
            }
        }
        Ok(())
    }

    /// Calls `visit` with the image header, the published frames of every
    /// buffer in chain order, then the crashdump frame if there is one.
    ///
    /// Safe to call while other threads are logging; frames still being
    /// written are left out.
    pub fn iterate_frames<F: FnMut(&[u8])>(&self, mut visit: F) {
        visit(&header_bytes());

        let mut next = self.first.load(Ordering::Acquire);
        // SAFETY: chained buffers live until the store is dropped.
        while let Some(buffer) = unsafe { next.as_ref() } {
            let span = buffer.published();
            if !span.is_empty() {
                visit(span);
            }
            next = buffer.next.load(Ordering::Acquire);
        }

        let crashdump = self.crashdump.published();
        if !crashdump.is_empty() {
            visit(crashdump);
        }
    }

    /// Concatenation of the spans from [`iterate_frames`](Self::iterate_frames).
    pub fn capture_image(&self) -> Vec<u8> {
        let mut image = Vec::new();
        self.iterate_frames(|span| image.extend_from_slice(span));
        image
    }

    /// Claims the crashdump scratch region; `None` while someone else holds
    /// it.
    pub fn crashdump_data(&self) -> Option<CrashdumpScratch<'_>> {
        if self.crashdump.claimed.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(CrashdumpScratch {
            region: &self.crashdump,
        })
    }

    pub fn buffer_count(&self) -> usize {
        self.buffer_count.load(Ordering::Relaxed)
    }

    /// Addresses of the chained buffers, in chain order.
    pub fn segment_addresses(&self) -> Vec<u64> {
        let mut addresses = Vec::new();
        let mut next = self.first.load(Ordering::Acquire);
        // SAFETY: chained buffers live until the store is dropped.
        while let Some(buffer) = unsafe { next.as_ref() } {
            addresses.push(buffer.address());
            next = buffer.next.load(Ordering::Acquire);
        }
        addresses
    }

    pub fn stats(&self) -> FrameStoreStats {
        let mut committed_bytes = 0;
        let mut next = self.first.load(Ordering::Acquire);
        // SAFETY: chained buffers live until the store is dropped.
        while let Some(buffer) = unsafe { next.as_ref() } {
            committed_bytes += buffer.committed.load(Ordering::Relaxed);
            next = buffer.next.load(Ordering::Acquire);
        }
        FrameStoreStats {
            buffers: self.buffer_count(),
            buffer_capacity: self.capacity,
            committed_bytes,
        }
    }
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FrameStore {
    fn drop(&mut self) {
        let mut next = *self.first.get_mut();
        while !next.is_null() {
            // SAFETY: every chained buffer came from Box::into_raw in
            // install_buffer and is freed exactly once here.
            let buffer = unsafe { Box::from_raw(next) };
            next = buffer.next.load(Ordering::Relaxed);
        }
    }
}

/// A claimed, not yet published frame.
///
/// Publishing writes the header and then the schema word with release
/// ordering, so a reader that sees the schema also sees the payload.
/// Dropping an uncommitted reservation publishes it as well; the payload is
/// zero-filled until written.
pub struct Reservation<'a> {
    buffer: &'a Buffer,
    offset: usize,
    payload_len: usize,
    schema: u32,
    timestamp: u64,
    published: bool,
    // The payload slice must be filled on the reserving thread.
    _not_send: PhantomData<*mut u8>,
}

impl Reservation<'_> {
    fn frame_ptr(&self) -> *mut u8 {
        // SAFETY: offset + FRAME_HEADER_SIZE + payload_len <= capacity.
        unsafe { self.buffer.data.as_ptr().add(self.offset) }
    }

    /// The payload bytes, exclusively owned by this reservation.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        // SAFETY: the cursor handed this range to this reservation only, and
        // it is not visible to readers before publication.
        unsafe {
            std::slice::from_raw_parts_mut(self.frame_ptr().add(FRAME_HEADER_SIZE), self.payload_len)
        }
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// The cookie this frame will be known by.
    pub fn cookie(&self) -> LogCookie {
        LogCookie(self.frame_ptr() as u64)
    }

    /// Publishes the frame.
    pub fn commit(mut self) -> LogCookie {
        self.publish();
        self.cookie()
    }

    fn publish(&mut self) {
        if self.published {
            return;
        }
        self.published = true;
        let frame = self.frame_ptr();
        // SAFETY: the header belongs to this reservation until the schema
        // word is stored.
        unsafe {
            write_frame_prefix(frame, self.timestamp, self.payload_len);
            schema_word(frame).store(self.schema.to_le(), Ordering::Release);
        }
        self.buffer
            .committed
            .fetch_add(FRAME_HEADER_SIZE + self.payload_len, Ordering::Release);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.publish();
    }
}

lazy_static! {
    static ref FRAME_STORE: FrameStore = FrameStore::new();
}

/// The process-wide store every log call writes to.
pub fn global() -> &'static FrameStore {
    &FRAME_STORE
}

/// [`FrameStore::iterate_frames`] on the global store.
pub fn iterate_frames<F: FnMut(&[u8])>(visit: F) {
    global().iterate_frames(visit)
}

/// [`FrameStore::capture_image`] on the global store.
pub fn capture_image() -> Vec<u8> {
    global().capture_image()
}

/// [`FrameStore::crashdump_data`] on the global store.
pub fn crashdump_data() -> Option<CrashdumpScratch<'static>> {
    global().crashdump_data()
}
