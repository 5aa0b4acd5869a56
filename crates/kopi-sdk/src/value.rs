//! VmValue — the VM's tagged call-argument union
//!
//! Every argument passed into the VM and every raw return value coming back
//! out is one of these. Primitives keep their exact VM width; objects are
//! nullable handles.
//!
//! ```text
//! kind      descriptor  payload
//! void      V           -
//! boolean   Z           u8 (VM_TRUE / VM_FALSE sentinel)
//! byte      B           i8
//! char      C           u16 (UTF-16 code unit)
//! short     S           i16
//! int       I           i32
//! long      J           i64
//! float     F           f32
//! double    D           f64
//! object    L / [       Option<RawHandle>
//! ```

use crate::handle::RawHandle;

/// The VM's boolean `true` sentinel
pub const VM_TRUE: u8 = 1;

/// The VM's boolean `false` sentinel
pub const VM_FALSE: u8 = 0;

/// Shape of a raw VM value, used to select the VM call variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// No value
    Void,
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `S`
    Short,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
    /// Any reference type (class or array)
    Object,
}

impl ValueKind {
    /// True for the eight primitive kinds
    pub const fn is_primitive(self) -> bool {
        !matches!(self, ValueKind::Void | ValueKind::Object)
    }

    /// Descriptor character for this kind (`L` for objects)
    pub const fn descriptor(self) -> char {
        match self {
            ValueKind::Void => 'V',
            ValueKind::Boolean => 'Z',
            ValueKind::Byte => 'B',
            ValueKind::Char => 'C',
            ValueKind::Short => 'S',
            ValueKind::Int => 'I',
            ValueKind::Long => 'J',
            ValueKind::Float => 'F',
            ValueKind::Double => 'D',
            ValueKind::Object => 'L',
        }
    }

    /// Kind for a descriptor's leading character
    pub const fn from_descriptor(c: char) -> Option<Self> {
        Some(match c {
            'V' => ValueKind::Void,
            'Z' => ValueKind::Boolean,
            'B' => ValueKind::Byte,
            'C' => ValueKind::Char,
            'S' => ValueKind::Short,
            'I' => ValueKind::Int,
            'J' => ValueKind::Long,
            'F' => ValueKind::Float,
            'D' => ValueKind::Double,
            'L' | '[' => ValueKind::Object,
            _ => return None,
        })
    }
}

/// Tagged VM value (argument or raw return)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VmValue {
    /// Result of a void call
    Void,
    /// Raw VM boolean; compare against [`VM_TRUE`], never against "non-zero"
    Boolean(u8),
    /// 8-bit signed
    Byte(i8),
    /// UTF-16 code unit
    Char(u16),
    /// 16-bit signed
    Short(i16),
    /// 32-bit signed
    Int(i32),
    /// 64-bit signed
    Long(i64),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// Nullable object reference
    Object(Option<RawHandle>),
}

impl VmValue {
    /// Null object reference
    pub const NULL: VmValue = VmValue::Object(None);

    /// Boolean value encoded with the VM's sentinels
    #[inline]
    pub const fn from_bool(b: bool) -> Self {
        VmValue::Boolean(if b { VM_TRUE } else { VM_FALSE })
    }

    /// The zero value of a kind (what the VM returns when a call raised)
    pub const fn zero(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Void => VmValue::Void,
            ValueKind::Boolean => VmValue::Boolean(VM_FALSE),
            ValueKind::Byte => VmValue::Byte(0),
            ValueKind::Char => VmValue::Char(0),
            ValueKind::Short => VmValue::Short(0),
            ValueKind::Int => VmValue::Int(0),
            ValueKind::Long => VmValue::Long(0),
            ValueKind::Float => VmValue::Float(0.0),
            ValueKind::Double => VmValue::Double(0.0),
            ValueKind::Object => VmValue::Object(None),
        }
    }

    /// Kind tag of this value
    pub const fn kind(&self) -> ValueKind {
        match self {
            VmValue::Void => ValueKind::Void,
            VmValue::Boolean(_) => ValueKind::Boolean,
            VmValue::Byte(_) => ValueKind::Byte,
            VmValue::Char(_) => ValueKind::Char,
            VmValue::Short(_) => ValueKind::Short,
            VmValue::Int(_) => ValueKind::Int,
            VmValue::Long(_) => ValueKind::Long,
            VmValue::Float(_) => ValueKind::Float,
            VmValue::Double(_) => ValueKind::Double,
            VmValue::Object(_) => ValueKind::Object,
        }
    }

    /// Object payload, if this is an object value
    #[inline]
    pub const fn as_object(&self) -> Option<Option<RawHandle>> {
        match self {
            VmValue::Object(h) => Some(*h),
            _ => None,
        }
    }

    /// Int payload, if this is an int value
    #[inline]
    pub const fn as_int(&self) -> Option<i32> {
        match self {
            VmValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Long payload, if this is a long value
    #[inline]
    pub const fn as_long(&self) -> Option<i64> {
        match self {
            VmValue::Long(l) => Some(*l),
            _ => None,
        }
    }

    /// Boolean payload decoded against [`VM_TRUE`]
    #[inline]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            VmValue::Boolean(b) => Some(*b == VM_TRUE),
            _ => None,
        }
    }
}

impl Default for VmValue {
    fn default() -> Self {
        VmValue::Void
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_matches_kind() {
        for kind in [
            ValueKind::Void,
            ValueKind::Boolean,
            ValueKind::Byte,
            ValueKind::Char,
            ValueKind::Short,
            ValueKind::Int,
            ValueKind::Long,
            ValueKind::Float,
            ValueKind::Double,
            ValueKind::Object,
        ] {
            assert_eq!(VmValue::zero(kind).kind(), kind);
        }
    }

    #[test]
    fn test_bool_sentinels() {
        assert_eq!(VmValue::from_bool(true), VmValue::Boolean(VM_TRUE));
        assert_eq!(VmValue::from_bool(false), VmValue::Boolean(VM_FALSE));
        assert_eq!(VmValue::Boolean(VM_TRUE).as_bool(), Some(true));
        // Only the true sentinel is true
        assert_eq!(VmValue::Boolean(2).as_bool(), Some(false));
    }

    #[test]
    fn test_descriptor_roundtrip() {
        for c in ['V', 'Z', 'B', 'C', 'S', 'I', 'J', 'F', 'D', 'L'] {
            let kind = ValueKind::from_descriptor(c).unwrap();
            assert_eq!(kind.descriptor(), c);
        }
        assert_eq!(ValueKind::from_descriptor('['), Some(ValueKind::Object));
        assert_eq!(ValueKind::from_descriptor('X'), None);
    }

    #[test]
    fn test_primitive_classification() {
        assert!(ValueKind::Int.is_primitive());
        assert!(!ValueKind::Void.is_primitive());
        assert!(!ValueKind::Object.is_primitive());
    }
}
