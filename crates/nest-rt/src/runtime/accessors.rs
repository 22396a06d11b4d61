//! Default accessor bodies.
//!
//! [`install_defaults`] registers process-wide getters and setters that
//! store property values in the receiver's primitive value store, keyed by
//! property name:
//!
//! - object properties (`@`) under copy, retain, weak and assign
//! - scalar properties (`c i s l q C I S L Q f d B *`) under assign
//!
//! each in an atomic and a nonatomic flavour. Atomic accessors hold the
//! receiver's accessor lock for the duration of the read or write.

use crate::error::{Error, Result};
use crate::runtime::implementation::AccessorKind;
use crate::runtime::property::AccessorAttributes;
use crate::runtime::synthesizer::Synthesizer;
use crate::runtime::{Imp, Message, Value};

/// How a setter stores object values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ownership {
    Copy,
    Retain,
    Weak,
    Assign,
}

impl Ownership {
    const ALL: [Ownership; 4] = [
        Ownership::Copy,
        Ownership::Retain,
        Ownership::Weak,
        Ownership::Assign,
    ];

    const fn attributes(self) -> AccessorAttributes {
        match self {
            Ownership::Copy => AccessorAttributes::COPY,
            Ownership::Retain => AccessorAttributes::RETAIN,
            Ownership::Weak => AccessorAttributes::WEAK,
            Ownership::Assign => AccessorAttributes::NONE,
        }
    }
}

/// Value family a scalar encoding accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    Char,
    Signed,
    Unsigned,
    Float,
    Bool,
    CString,
}

impl Scalar {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Scalar::Char => matches!(value, Value::Int(_) | Value::Bool(_)),
            Scalar::Signed => matches!(value, Value::Int(_)),
            Scalar::Unsigned => matches!(value, Value::UInt(_)),
            Scalar::Float => matches!(value, Value::Double(_)),
            Scalar::Bool => matches!(value, Value::Bool(_)),
            Scalar::CString => matches!(value, Value::Str(_) | Value::Nil),
        }
    }

    /// Value an unset property reads as.
    const fn zero(self) -> Value {
        match self {
            Scalar::Char | Scalar::Signed => Value::Int(0),
            Scalar::Unsigned => Value::UInt(0),
            Scalar::Float => Value::Double(0.0),
            Scalar::Bool => Value::Bool(false),
            Scalar::CString => Value::Nil,
        }
    }
}

const SCALARS: [(&str, Scalar); 14] = [
    ("c", Scalar::Char),
    ("i", Scalar::Signed),
    ("s", Scalar::Signed),
    ("l", Scalar::Signed),
    ("q", Scalar::Signed),
    ("C", Scalar::Unsigned),
    ("I", Scalar::Unsigned),
    ("S", Scalar::Unsigned),
    ("L", Scalar::Unsigned),
    ("Q", Scalar::Unsigned),
    ("f", Scalar::Float),
    ("d", Scalar::Float),
    ("B", Scalar::Bool),
    ("*", Scalar::CString),
];

/// Registers the default bodies with `synthesizer`.
///
/// Bodies already registered for a key are left alone, so a host may
/// register its own bodies first.
pub fn install_defaults(synthesizer: &Synthesizer) {
    let mut added = 0usize;

    for nonatomic in [false, true] {
        let atomicity = if nonatomic {
            AccessorAttributes::NONATOMIC
        } else {
            AccessorAttributes::NONE
        };

        for ownership in Ownership::ALL {
            let attributes = ownership.attributes() | atomicity;
            added += usize::from(synthesizer.add_implementation(
                object_getter(!nonatomic),
                AccessorKind::Getter,
                "@",
                attributes,
            ));
            added += usize::from(synthesizer.add_implementation(
                object_setter(ownership, !nonatomic),
                AccessorKind::Setter,
                "@",
                attributes,
            ));
        }

        for (encoding, scalar) in SCALARS {
            added += usize::from(synthesizer.add_implementation(
                scalar_getter(scalar, !nonatomic),
                AccessorKind::Getter,
                encoding,
                atomicity,
            ));
            added += usize::from(synthesizer.add_implementation(
                scalar_setter(encoding, scalar, !nonatomic),
                AccessorKind::Setter,
                encoding,
                atomicity,
            ));
        }
    }

    nest_log::debug!("registered {added} default accessor implementations");
}

fn single_argument<'v>(args: &'v [Value]) -> Result<&'v Value> {
    match args {
        [value] => Ok(value),
        _ => Err(Error::ArgumentCountMismatch {
            expected: 1,
            got: args.len(),
        }),
    }
}

fn type_mismatch(expected: &str, value: &Value) -> Error {
    Error::ArgumentTypeMismatch {
        expected: expected.to_string(),
        got: value.kind().to_string(),
        index: 0,
    }
}

fn object_getter(atomic: bool) -> Imp {
    Imp::new(move |msg: &Message<'_>, _args: &[Value]| {
        let key = msg.property_key()?;
        let object = msg.object()?;
        let _guard = atomic.then(|| object.accessor_lock());
        Ok(object.primitive_value(&key))
    })
}

fn object_setter(ownership: Ownership, atomic: bool) -> Imp {
    Imp::new(move |msg: &Message<'_>, args: &[Value]| {
        let value = single_argument(args)?;
        if !matches!(
            value,
            Value::Nil
                | Value::Object(_)
                | Value::Str(_)
                | Value::Class(_)
                | Value::Opaque(_)
        ) {
            return Err(type_mismatch("@", value));
        }

        let key = msg.property_key()?;
        let object = msg.object()?;
        let _guard = atomic.then(|| object.accessor_lock());

        match (ownership, value) {
            (Ownership::Copy, Value::Object(target)) => {
                object.set_primitive_value(&key, Value::Object(target.copy()));
            }
            (Ownership::Weak | Ownership::Assign, Value::Object(target)) => {
                object.set_weak_primitive_value(&key, target);
            }
            _ => object.set_primitive_value(&key, value.clone()),
        }
        Ok(Value::Nil)
    })
}

fn scalar_getter(scalar: Scalar, atomic: bool) -> Imp {
    Imp::new(move |msg: &Message<'_>, _args: &[Value]| {
        let key = msg.property_key()?;
        let object = msg.object()?;
        let _guard = atomic.then(|| object.accessor_lock());
        let value = object.primitive_value(&key);
        Ok(if value.is_nil() { scalar.zero() } else { value })
    })
}

fn scalar_setter(encoding: &'static str, scalar: Scalar, atomic: bool) -> Imp {
    Imp::new(move |msg: &Message<'_>, args: &[Value]| {
        let value = single_argument(args)?;
        if !scalar.accepts(value) {
            return Err(type_mismatch(encoding, value));
        }

        let key = msg.property_key()?;
        let object = msg.object()?;
        let _guard = atomic.then(|| object.accessor_lock());
        object.set_primitive_value(&key, value.clone());
        Ok(Value::Nil)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::implementation::ImplementationKey;

    #[test]
    fn test_defaults_cover_every_combination() {
        let synth = Synthesizer::new();
        install_defaults(&synth);

        // 2 atomicities x (4 object ownerships + 14 scalars) x 2 kinds
        assert_eq!(synth.implementations().len(), 2 * (4 + 14) * 2);

        let key = ImplementationKey::new(
            AccessorKind::Setter,
            "@\"NSString\"",
            AccessorAttributes::COPY | AccessorAttributes::NONATOMIC,
        );
        assert!(synth.implementations().get(&key).is_some());
    }

    #[test]
    fn test_defaults_do_not_replace_host_bodies() {
        let synth = Synthesizer::new();
        let custom = Imp::new(|_, _| Ok(Value::Int(42)));
        synth.add_implementation(
            custom.clone(),
            AccessorKind::Getter,
            "q",
            AccessorAttributes::NONATOMIC,
        );
        install_defaults(&synth);

        let key = ImplementationKey::new(
            AccessorKind::Getter,
            "q",
            AccessorAttributes::NONATOMIC,
        );
        assert_eq!(synth.implementations().get(&key), Some(custom));
    }

    #[test]
    fn test_scalar_acceptance() {
        assert!(Scalar::Signed.accepts(&Value::Int(1)));
        assert!(!Scalar::Signed.accepts(&Value::UInt(1)));
        assert!(Scalar::Char.accepts(&Value::Bool(true)));
        assert!(Scalar::CString.accepts(&Value::Nil));
        assert!(!Scalar::Float.accepts(&Value::Nil));
        assert_eq!(Scalar::Unsigned.zero(), Value::UInt(0));
    }

    #[test]
    fn test_single_argument() {
        assert!(single_argument(&[Value::Nil]).is_ok());
        assert_eq!(
            single_argument(&[]),
            Err(Error::ArgumentCountMismatch {
                expected: 1,
                got: 0
            })
        );
    }
}
