use std::borrow::Cow;
use std::fmt::{self, Write as _};

use crate::frame_store::LogCookie;

/// Wire kind of a single logged argument.
///
/// Every argument is preceded by its kind tag on the wire. Tag 0 is reserved
/// for padding and terminates the argument list of a frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    Bool = 1,
    U8 = 2,
    I8 = 3,
    U16 = 4,
    I16 = 5,
    U32 = 6,
    I32 = 7,
    U64 = 8,
    I64 = 9,
    Text = 10,
    Blob = 11,
    CachedString = 12,
    SourceLocation = 13,
    Handle = 14,
    Fallback = 15,
}

/// Tag byte marking padding at the end of a frame payload.
pub const PADDING_TAG: u8 = 0;

impl ArgKind {
    pub const ALL: [ArgKind; 15] = [
        ArgKind::Bool,
        ArgKind::U8,
        ArgKind::I8,
        ArgKind::U16,
        ArgKind::I16,
        ArgKind::U32,
        ArgKind::I32,
        ArgKind::U64,
        ArgKind::I64,
        ArgKind::Text,
        ArgKind::Blob,
        ArgKind::CachedString,
        ArgKind::SourceLocation,
        ArgKind::Handle,
        ArgKind::Fallback,
    ];

    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        if tag == PADDING_TAG || tag as usize > Self::ALL.len() {
            None
        } else {
            Some(Self::ALL[tag as usize - 1])
        }
    }

    /// Name used in schema registration frames.
    pub const fn name(self) -> &'static str {
        match self {
            ArgKind::Bool => "boolean",
            ArgKind::U8 => "uint8",
            ArgKind::I8 => "int8",
            ArgKind::U16 => "uint16",
            ArgKind::I16 => "int16",
            ArgKind::U32 => "uint32",
            ArgKind::I32 => "int32",
            ArgKind::U64 => "uint64",
            ArgKind::I64 => "int64",
            ArgKind::Text => "string",
            ArgKind::Blob => "binary",
            ArgKind::CachedString => "cached_string",
            ArgKind::SourceLocation => "source_location",
            ArgKind::Handle => "handle",
            ArgKind::Fallback => "fallback",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    /// Payload width for fixed-size kinds, `None` for length-prefixed ones.
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            ArgKind::Bool | ArgKind::U8 | ArgKind::I8 => Some(1),
            ArgKind::U16 | ArgKind::I16 => Some(2),
            ArgKind::U32 | ArgKind::I32 | ArgKind::SourceLocation => Some(4),
            ArgKind::U64 | ArgKind::I64 | ArgKind::CachedString | ArgKind::Handle => Some(8),
            ArgKind::Text | ArgKind::Blob | ArgKind::Fallback => None,
        }
    }
}

/// Destination of encoded argument bytes.
///
/// Every frame is encoded twice: once into a [`LengthSink`] to learn its
/// size, then into a [`SliceSink`] over the reserved frame payload.
pub trait ByteSink {
    fn put(&mut self, bytes: &[u8]);

    #[inline]
    fn put_u8(&mut self, value: u8) {
        self.put(&[value]);
    }

    #[inline]
    fn put_u16(&mut self, value: u16) {
        self.put(&value.to_le_bytes());
    }

    #[inline]
    fn put_u32(&mut self, value: u32) {
        self.put(&value.to_le_bytes());
    }

    #[inline]
    fn put_u64(&mut self, value: u64) {
        self.put(&value.to_le_bytes());
    }

    /// Writes a u32 length followed by the bytes themselves.
    #[inline]
    fn put_len_prefixed(&mut self, bytes: &[u8]) {
        self.put_u32(u32::try_from(bytes.len()).unwrap_or(u32::MAX));
        self.put(bytes);
    }
}

/// Counting sink: records how many bytes would have been written.
#[derive(Debug, Default, Clone, Copy)]
pub struct LengthSink {
    len: usize,
}

impl LengthSink {
    pub const fn new() -> Self {
        Self { len: 0 }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl ByteSink for LengthSink {
    #[inline]
    fn put(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
    }
}

/// Copying sink over a fixed slice, usually a reserved frame payload.
#[derive(Debug)]
pub struct SliceSink<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SliceSink<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Zero-fills everything after the written bytes.
    pub fn pad(&mut self) {
        self.buf[self.pos..].fill(PADDING_TAG);
        self.pos = self.buf.len();
    }
}

impl ByteSink for SliceSink<'_> {
    #[inline]
    fn put(&mut self, bytes: &[u8]) {
        let end = self.pos + bytes.len();
        assert!(
            end <= self.buf.len(),
            "frame payload overrun: {} bytes reserved, {} written",
            self.buf.len(),
            end
        );
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
    }
}

/// A value that can be written into a frame.
///
/// `write` must produce exactly the same number of bytes every time it is
/// called for the same value; the counting pass relies on it.
pub trait Loggable {
    const KIND: ArgKind;

    /// Appends the wire encoding, without the kind tag.
    fn write<S: ByteSink>(&self, sink: &mut S);

    /// Appends the human-readable rendering.
    fn render(&self, out: &mut String);
}

impl<T: Loggable + ?Sized> Loggable for &T {
    const KIND: ArgKind = T::KIND;

    #[inline]
    fn write<S: ByteSink>(&self, sink: &mut S) {
        (**self).write(sink)
    }

    fn render(&self, out: &mut String) {
        (**self).render(out)
    }
}

impl Loggable for bool {
    const KIND: ArgKind = ArgKind::Bool;

    #[inline]
    fn write<S: ByteSink>(&self, sink: &mut S) {
        sink.put_u8(u8::from(*self));
    }

    fn render(&self, out: &mut String) {
        out.push_str(if *self { "true" } else { "false" });
    }
}

macro_rules! impl_integer {
    ($($ty:ty => $kind:ident as $wire:ty),* $(,)?) => {
        $(
            impl Loggable for $ty {
                const KIND: ArgKind = ArgKind::$kind;

                #[inline]
                fn write<S: ByteSink>(&self, sink: &mut S) {
                    sink.put(&(*self as $wire).to_le_bytes());
                }

                fn render(&self, out: &mut String) {
                    let _ = write!(out, "{}", self);
                }
            }
        )*
    };
}

impl_integer!(
    u8 => U8 as u8,
    i8 => I8 as i8,
    u16 => U16 as u16,
    i16 => I16 as i16,
    u32 => U32 as u32,
    i32 => I32 as i32,
    u64 => U64 as u64,
    i64 => I64 as i64,
    usize => U64 as u64,
    isize => I64 as i64,
);

impl Loggable for str {
    const KIND: ArgKind = ArgKind::Text;

    #[inline]
    fn write<S: ByteSink>(&self, sink: &mut S) {
        sink.put_len_prefixed(self.as_bytes());
    }

    fn render(&self, out: &mut String) {
        out.push('\'');
        out.push_str(self);
        out.push('\'');
    }
}

impl Loggable for String {
    const KIND: ArgKind = ArgKind::Text;

    #[inline]
    fn write<S: ByteSink>(&self, sink: &mut S) {
        self.as_str().write(sink)
    }

    fn render(&self, out: &mut String) {
        self.as_str().render(out)
    }
}

impl Loggable for Cow<'_, str> {
    const KIND: ArgKind = ArgKind::Text;

    #[inline]
    fn write<S: ByteSink>(&self, sink: &mut S) {
        self.as_ref().write(sink)
    }

    fn render(&self, out: &mut String) {
        self.as_ref().render(out)
    }
}

impl Loggable for [u8] {
    const KIND: ArgKind = ArgKind::Blob;

    #[inline]
    fn write<S: ByteSink>(&self, sink: &mut S) {
        sink.put_len_prefixed(self);
    }

    fn render(&self, out: &mut String) {
        let _ = write!(out, "blob({})", self.len());
    }
}

impl Loggable for Vec<u8> {
    const KIND: ArgKind = ArgKind::Blob;

    #[inline]
    fn write<S: ByteSink>(&self, sink: &mut S) {
        self.as_slice().write(sink)
    }

    fn render(&self, out: &mut String) {
        self.as_slice().render(out)
    }
}

/// An opaque 64-bit value such as a foreign handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u64);

impl Loggable for Handle {
    const KIND: ArgKind = ArgKind::Handle;

    #[inline]
    fn write<S: ByteSink>(&self, sink: &mut S) {
        sink.put_u64(self.0);
    }

    fn render(&self, out: &mut String) {
        let _ = write!(out, "{:#x}", self.0);
    }
}

impl<T: ?Sized> Loggable for *const T {
    const KIND: ArgKind = ArgKind::Handle;

    #[inline]
    fn write<S: ByteSink>(&self, sink: &mut S) {
        sink.put_u64(self.cast::<u8>() as usize as u64);
    }

    fn render(&self, out: &mut String) {
        let _ = write!(out, "{:#x}", self.cast::<u8>() as usize);
    }
}

impl<T: ?Sized> Loggable for *mut T {
    const KIND: ArgKind = ArgKind::Handle;

    #[inline]
    fn write<S: ByteSink>(&self, sink: &mut S) {
        self.cast_const().write(sink)
    }

    fn render(&self, out: &mut String) {
        self.cast_const().render(out)
    }
}

impl Loggable for LogCookie {
    const KIND: ArgKind = ArgKind::Handle;

    #[inline]
    fn write<S: ByteSink>(&self, sink: &mut S) {
        sink.put_u64(self.0);
    }

    fn render(&self, out: &mut String) {
        let _ = write!(out, "{:#x}", self.0);
    }
}

/// Logs any `Display` value as its rendered text.
#[derive(Debug, Clone, Copy)]
pub struct Fallback<T>(pub T);

impl<T: fmt::Display> Loggable for Fallback<T> {
    const KIND: ArgKind = ArgKind::Fallback;

    fn write<S: ByteSink>(&self, sink: &mut S) {
        sink.put_len_prefixed(self.0.to_string().as_bytes());
    }

    fn render(&self, out: &mut String) {
        let _ = write!(out, "{}", self.0);
    }
}

macro_rules! impl_display_fallback {
    ($($ty:ty),*) => {
        $(
            impl Loggable for $ty {
                const KIND: ArgKind = ArgKind::Fallback;

                fn write<S: ByteSink>(&self, sink: &mut S) {
                    Fallback(self).write(sink)
                }

                fn render(&self, out: &mut String) {
                    Fallback(self).render(out)
                }
            }
        )*
    };
}

impl_display_fallback!(f32, f64, char);

/// The ordered argument list of one log call, as a tuple of references.
///
/// `KINDS` is a per-type constant, which makes the kind half of a call-site
/// schema identity a compile-time value.
pub trait ArgList {
    const KINDS: &'static [ArgKind];
    const KINDS_HASH: u32 = crate::log_format_registry::kinds_hash(Self::KINDS);

    /// Writes every argument prefixed by its kind tag.
    fn write_all<S: ByteSink>(&self, sink: &mut S);

    /// Renders `name = value` pairs separated by `, `.
    fn render_all(&self, names: &[&str], out: &mut String);
}

impl ArgList for () {
    const KINDS: &'static [ArgKind] = &[];

    #[inline]
    fn write_all<S: ByteSink>(&self, _sink: &mut S) {}

    fn render_all(&self, _names: &[&str], _out: &mut String) {}
}

fn render_pair<T: Loggable + ?Sized>(index: usize, names: &[&str], value: &T, out: &mut String) {
    if index > 0 {
        out.push_str(", ");
    }
    out.push_str(names.get(index).copied().unwrap_or("?"));
    out.push_str(" = ");
    value.render(out);
}

macro_rules! impl_arg_list {
    ($($ty:ident : $idx:tt),+) => {
        impl<'a, $($ty: Loggable + ?Sized),+> ArgList for ($(&'a $ty,)+) {
            const KINDS: &'static [ArgKind] = &[$(<$ty as Loggable>::KIND),+];

            #[inline]
            fn write_all<S: ByteSink>(&self, sink: &mut S) {
                $(
                    sink.put_u8(<$ty as Loggable>::KIND.tag());
                    self.$idx.write(sink);
                )+
            }

            fn render_all(&self, names: &[&str], out: &mut String) {
                $(render_pair($idx, names, self.$idx, out);)+
            }
        }
    };
}

impl_arg_list!(A: 0);
impl_arg_list!(A: 0, B: 1);
impl_arg_list!(A: 0, B: 1, C: 2);
impl_arg_list!(A: 0, B: 1, C: 2, D: 3);
impl_arg_list!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_arg_list!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_arg_list!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_arg_list!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);
impl_arg_list!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8);
impl_arg_list!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8, J: 9);
impl_arg_list!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8, J: 9, K: 10);
impl_arg_list!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8, J: 9, K: 10, L: 11);

/// Encoded size of an argument list, tags included and without padding.
pub fn encoded_len<L: ArgList>(args: &L) -> usize {
    let mut sink = LengthSink::new();
    args.write_all(&mut sink);
    sink.len()
}

/// Rounds a payload length up to the 8-byte frame granularity.
#[inline]
pub const fn padded_len(len: usize) -> usize {
    (len + 7) & !7
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn materialize<L: ArgList>(args: &L) -> Vec<u8> {
        let mut buf = vec![0xAAu8; padded_len(encoded_len(args))];
        let mut sink = SliceSink::new(&mut buf);
        args.write_all(&mut sink);
        assert_eq!(sink.position(), encoded_len(args));
        sink.pad();
        buf
    }

    #[test]
    fn test_integer_serialization() {
        let value = 8080u16;
        let buf = materialize(&(&value,));
        assert_eq!(buf.len(), 8);
        assert_eq!(buf[0], ArgKind::U16.tag());
        assert_eq!(&buf[1..3], &8080u16.to_le_bytes());
        assert!(buf[3..].iter().all(|b| *b == 0));

        let value = -5i64;
        let buf = materialize(&(&value,));
        assert_eq!(buf.len(), 16);
        assert_eq!(buf[0], ArgKind::I64.tag());
        assert_eq!(&buf[1..9], &(-5i64).to_le_bytes());
    }

    #[test]
    fn test_string_serialization() {
        let buf = materialize(&(&"Hello",));
        assert_eq!(buf[0], ArgKind::Text.tag());
        assert_eq!(&buf[1..5], &5u32.to_le_bytes());
        assert_eq!(&buf[5..10], b"Hello");
        assert_eq!(buf.len(), 16);
    }

    #[test]
    fn test_bool_serialization() {
        let buf = materialize(&(&true, &false));
        assert_eq!(&buf[..4], &[ArgKind::Bool.tag(), 1, ArgKind::Bool.tag(), 0]);
    }

    #[test]
    fn test_blob_and_fallback() {
        let blob = vec![1u8, 2, 3];
        let pi = 3.5f64;
        let buf = materialize(&(&blob, &pi));
        assert_eq!(buf[0], ArgKind::Blob.tag());
        assert_eq!(&buf[1..5], &3u32.to_le_bytes());
        assert_eq!(&buf[5..8], &[1, 2, 3]);
        assert_eq!(buf[8], ArgKind::Fallback.tag());
        assert_eq!(&buf[9..13], &3u32.to_le_bytes());
        assert_eq!(&buf[13..16], b"3.5");
    }

    #[test]
    fn test_rendering() {
        let mut out = String::new();
        let port = 8080u16;
        let host = "db";
        let handle = Handle(0xff);
        (&port, &host, &handle).render_all(&["port", "host", "handle"], &mut out);
        assert_eq!(out, "port = 8080, host = 'db', handle = 0xff");

        let mut out = String::new();
        let blob = [0u8; 4];
        (&blob[..],).render_all(&["payload"], &mut out);
        assert_eq!(out, "payload = blob(4)");
    }

    #[test]
    fn test_kind_tags_round_trip_names() {
        for kind in ArgKind::ALL {
            assert_eq!(ArgKind::from_tag(kind.tag()), Some(kind));
            assert_eq!(ArgKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ArgKind::from_tag(PADDING_TAG), None);
        assert_eq!(ArgKind::from_tag(16), None);
    }

    #[test]
    fn test_kinds_constant() {
        type Args<'a> = (&'a u32, &'a str, &'a Vec<u8>);
        assert_eq!(
            <Args as ArgList>::KINDS,
            &[ArgKind::U32, ArgKind::Text, ArgKind::Blob]
        );
        assert_ne!(
            <Args as ArgList>::KINDS_HASH,
            <(&u32, &str) as ArgList>::KINDS_HASH
        );
    }

    #[test]
    #[should_panic(expected = "frame payload overrun")]
    fn test_slice_sink_overrun() {
        let mut buf = [0u8; 4];
        let mut sink = SliceSink::new(&mut buf);
        sink.put_u64(1);
    }

    proptest! {
        #[test]
        fn length_pass_matches_materialized_pass(
            flag in any::<bool>(),
            small in any::<i8>(),
            wide in any::<u64>(),
            text in ".{0,64}",
            blob in proptest::collection::vec(any::<u8>(), 0..128),
            ratio in any::<f64>(),
        ) {
            let args = (&flag, &small, &wide, &text, &blob, &ratio);
            let expected = encoded_len(&args);
            let mut buf = vec![0u8; padded_len(expected)];
            let mut sink = SliceSink::new(&mut buf);
            args.write_all(&mut sink);
            prop_assert_eq!(sink.position(), expected);
            prop_assert_eq!(padded_len(expected) % 8, 0);
        }
    }
}
