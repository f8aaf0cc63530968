//! # tagwire
//!
//! Self-describing, tag-prefixed binary marshaling: the wire core of an RPC
//! middleware. A [`Writer`] serializes Rust values into a compact tag
//! grammar; a [`Reader`] decodes the byte stream back, into a destination
//! whose shape may differ from the source's original shape (cross-type
//! coercion with well-defined truncation, widening, and zero-fill rules).
//!
//! - Integers 0–9 use a one-byte digit shortcut; larger magnitudes are
//!   unbounded decimal runs, preserved at full precision until coercion
//! - Non-empty strings and all containers are deduplicated through a
//!   per-instance reference table, which also makes cyclic [`Value`] graphs
//!   representable and reconstructible
//! - Any primitive tag can be read back as a boolean, an integer of any
//!   width, a float, a complex pair, or a string, each with a defined rule
//! - `#[derive(Record)]` encodes named-field structs as class/field-tagged
//!   objects with once-per-stream class definitions
//!
//! ## Example
//! ```rust
//! use tagwire::{Reader, Writer};
//!
//! let mut w = Writer::new(false);
//! w.serialize(&vec![1i64, 2, 3]).unwrap();
//! w.serialize(&"hello").unwrap();
//!
//! let mut r = Reader::new(w.bytes(), false);
//! let nums: Vec<i64> = r.unserialize().unwrap();
//! assert_eq!(nums, vec![1, 2, 3]);
//! assert_eq!(r.read_string().unwrap(), "hello");
//! ```
//!
//! ## Feature flags
//! - `chrono` — encode/decode `chrono::DateTime<Utc>` and `NaiveDateTime`
//!   through the timestamp tag.

pub mod tags;

mod features;
mod reader;
mod registry;
mod value;
mod writer;

use bytes::Bytes;

pub use reader::Reader;
pub use registry::Registry;
pub use tagwire_derive::Record;
pub use value::{Complex128, Complex64, ObjectValue, Timestamp, Value};
pub use writer::Writer;

/// Errors produced while encoding or decoding the wire format.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Malformed or truncated tag, bad length prefix, or unterminated
    /// numeric literal.
    #[error("format error: {0}")]
    Format(String),
    /// The buffer did not contain enough data to complete the operation.
    #[error("buffer does not contain enough data")]
    InsufficientData,
    /// A decoded tag has no valid coercion to the requested destination,
    /// including arity mismatches and bad back-reference resolutions.
    #[error("value of type {from} cannot be converted to type {to}")]
    TypeConversion { from: String, to: &'static str },
    /// A string payload failed to parse as the numeric type requested.
    #[error("cannot parse {text:?} as {target}")]
    Parse { text: String, target: &'static str },
    /// A back-reference pointed at a slot that was never populated.
    #[error("reference index {0} is not populated")]
    InvalidRef(usize),
    /// An object referenced a class index with no preceding definition.
    #[error("unknown class index {0}")]
    UnknownClass(usize),
    /// A wire class name matched neither the record's name nor its
    /// registered alias.
    #[error("wire class {wire:?} does not match record {expected:?}")]
    ClassMismatch { wire: String, expected: &'static str },
}

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, WireError>;

/// Trait for values that can be serialized into the tag grammar.
///
/// Implemented for primitives, strings, sequences, maps, time types,
/// [`Value`] graphs, and (via `#[derive(Record)]`) named-field structs.
pub trait Encodable {
    /// Append this value's encoding to the writer's buffer, consulting and
    /// updating the writer's reference table.
    fn encode(&self, w: &mut Writer) -> Result<()>;
}

/// Trait for destinations the stream can be decoded into.
///
/// Each implementation is one row of the coercion matrix: it peeks the next
/// tag and dispatches to the conversion rule defined for its shape.
pub trait Decodable: Sized {
    /// Decode one value from the reader's current position.
    fn decode(r: &mut Reader) -> Result<Self>;
}

/// Class/field-tagged record, the wire's object shape.
///
/// Use `#[derive(Record)]` rather than implementing this by hand; the derive
/// also supplies the matching [`Encodable`] and [`Decodable`] impls.
pub trait Record: Default {
    /// Default wire class name (the Rust type name unless renamed).
    fn class_name() -> &'static str;
    /// Wire field names, in declaration order.
    fn field_names() -> &'static [&'static str];
    /// Encode the field at `index` of [`Record::field_names`].
    fn encode_field(&self, index: usize, w: &mut Writer) -> Result<()>;
    /// Decode into the field at `index` of [`Record::field_names`].
    fn decode_field(&mut self, index: usize, r: &mut Reader) -> Result<()>;
}

/// Serializes a single value with a fresh [`Writer`] and returns the bytes.
///
/// Reference-table sharing is enabled; use a [`Writer`] directly for packing
/// multiple values or for simple mode.
pub fn marshal<T: Encodable + ?Sized>(value: &T) -> Result<Bytes> {
    let mut w = Writer::new(false);
    w.serialize(value)?;
    Ok(w.bytes())
}

/// Decodes a single value of type `T` from the front of `data`.
pub fn unmarshal<T: Decodable>(data: Bytes) -> Result<T> {
    Reader::new(data, false).unserialize()
}
