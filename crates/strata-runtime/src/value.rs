//! Value: NaN-boxed 64-bit runtime word
//!
//! Every runtime value is a single `u64`. Numbers are stored as raw IEEE-754
//! doubles; everything else lives in the negative quiet-NaN space.
//!
//! # Encoding
//!
//! ```text
//! f64:        any pattern whose top 13 bits are not all set
//! Tagged:     0xFFF8 + 3-bit tag + 48-bit payload
//!   - heap:      0xFFF8_0000_0000_0000 | slot index   [tag=000]
//!   - function:  0xFFF9_0000_0000_0000 | code address [tag=001]
//!   - bool:      0xFFFA_0000_0000_0000 | b            [tag=010]
//!   - undefined: 0xFFFB_0000_0000_0000                [tag=011]
//!   - null:      0xFFFE_0000_0000_0000                [tag=110]
//! ```
//!
//! Doubles that land in the tagged space (negative quiet NaNs, which x86
//! produces for `0.0 / 0.0`) are canonicalized to `CANONICAL_NAN` on boxing.

use std::fmt;

use crate::heap::HeapRef;

pub const NAN_BOX_BASE: u64 = 0xFFF8_0000_0000_0000;
pub const TAG_SHIFT: u64 = 48;
pub const TAG_MASK: u64 = 0x7 << TAG_SHIFT;
pub const PAYLOAD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

pub const TAG_HEAP: u64 = 0x0 << TAG_SHIFT;
pub const TAG_FUNCTION: u64 = 0x1 << TAG_SHIFT;
pub const TAG_BOOL: u64 = 0x2 << TAG_SHIFT;
pub const TAG_UNDEFINED: u64 = 0x3 << TAG_SHIFT;
pub const TAG_NULL: u64 = 0x6 << TAG_SHIFT;

pub const FUNCTION_TAG_BASE: u64 = NAN_BOX_BASE | TAG_FUNCTION;
pub const BOOL_TAG_BASE: u64 = NAN_BOX_BASE | TAG_BOOL;
pub const TRUE_BITS: u64 = NAN_BOX_BASE | TAG_BOOL | 1;
pub const FALSE_BITS: u64 = NAN_BOX_BASE | TAG_BOOL;
pub const UNDEFINED_BITS: u64 = NAN_BOX_BASE | TAG_UNDEFINED;
pub const NULL_BITS: u64 = NAN_BOX_BASE | TAG_NULL;

/// Positive quiet NaN used for every NaN that crosses the boxing boundary
pub const CANONICAL_NAN: u64 = 0x7FF8_0000_0000_0000;

/// What a value holds, decoded from its tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Number,
    Boolean,
    Undefined,
    Null,
    Heap,
    Function,
}

/// NaN-boxed runtime value
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    #[inline(always)]
    pub const fn from_bits(bits: u64) -> Self {
        Value(bits)
    }

    #[inline(always)]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Box a double, canonicalizing NaNs that would alias the tagged space
    #[inline]
    pub fn number(n: f64) -> Self {
        let bits = n.to_bits();
        if bits & NAN_BOX_BASE == NAN_BOX_BASE {
            Value(CANONICAL_NAN)
        } else {
            Value(bits)
        }
    }

    #[inline]
    pub const fn boolean(b: bool) -> Self {
        Value(if b { TRUE_BITS } else { FALSE_BITS })
    }

    #[inline]
    pub const fn undefined() -> Self {
        Value(UNDEFINED_BITS)
    }

    #[inline]
    pub const fn null() -> Self {
        Value(NULL_BITS)
    }

    #[inline]
    pub const fn heap(slot: HeapRef) -> Self {
        Value(NAN_BOX_BASE | TAG_HEAP | slot.0 as u64)
    }

    /// Wrap a native code address. User-space addresses fit in 48 bits.
    #[inline]
    pub const fn function(address: u64) -> Self {
        Value(FUNCTION_TAG_BASE | (address & PAYLOAD_MASK))
    }

    #[inline]
    const fn is_boxed(self) -> bool {
        self.0 & NAN_BOX_BASE == NAN_BOX_BASE
    }

    #[inline]
    const fn tag(self) -> u64 {
        self.0 & TAG_MASK
    }

    pub fn kind(self) -> ValueKind {
        if !self.is_boxed() {
            return ValueKind::Number;
        }
        match self.tag() {
            TAG_HEAP => ValueKind::Heap,
            TAG_FUNCTION => ValueKind::Function,
            TAG_BOOL => ValueKind::Boolean,
            TAG_NULL => ValueKind::Null,
            _ => ValueKind::Undefined,
        }
    }

    #[inline]
    pub const fn is_number(self) -> bool {
        !self.is_boxed()
    }

    #[inline]
    pub fn as_number(self) -> Option<f64> {
        self.is_number().then(|| f64::from_bits(self.0))
    }

    #[inline]
    pub const fn is_bool(self) -> bool {
        self.is_boxed() && self.tag() == TAG_BOOL
    }

    #[inline]
    pub fn as_bool(self) -> Option<bool> {
        self.is_bool().then_some(self.0 & 1 != 0)
    }

    #[inline]
    pub const fn is_undefined(self) -> bool {
        self.0 == UNDEFINED_BITS
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == NULL_BITS
    }

    #[inline]
    pub fn as_heap(self) -> Option<HeapRef> {
        (self.is_boxed() && self.tag() == TAG_HEAP).then(|| HeapRef((self.0 & PAYLOAD_MASK) as u32))
    }

    #[inline]
    pub fn as_function(self) -> Option<u64> {
        (self.is_boxed() && self.tag() == TAG_FUNCTION).then_some(self.0 & PAYLOAD_MASK)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::undefined()
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::boolean(b)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ValueKind::Number => write!(f, "Number({})", f64::from_bits(self.0)),
            ValueKind::Boolean => write!(f, "Boolean({})", self.0 & 1 != 0),
            ValueKind::Undefined => write!(f, "Undefined"),
            ValueKind::Null => write!(f, "Null"),
            ValueKind::Heap => write!(f, "Heap(#{})", self.0 & PAYLOAD_MASK),
            ValueKind::Function => write!(f, "Function(0x{:x})", self.0 & PAYLOAD_MASK),
        }
    }
}
