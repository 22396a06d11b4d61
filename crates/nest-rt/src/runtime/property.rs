//! Property metadata parsing.
//!
//! A declared property arrives as a name and a list of attribute entries,
//! each a code plus an optional value, in the shape of the Objective-C
//! property attribute list:
//!
//! | Code | Meaning                     | Value                   |
//! |------|-----------------------------|-------------------------|
//! | `T`  | type encoding               | e.g. `@"NSString"`, `q` |
//! | `R`  | read-only                   |                         |
//! | `C`  | copy                        |                         |
//! | `&`  | retain (strong)             |                         |
//! | `N`  | nonatomic                   |                         |
//! | `G`  | custom getter               | selector name           |
//! | `S`  | custom setter               | selector name           |
//! | `D`  | dynamic                     |                         |
//! | `W`  | weak                        |                         |
//! | `P`  | garbage-collection eligible |                         |
//! | `V`  | backing slot                | slot name               |
//! | `t`  | legacy type encoding        | encoding                |
//!
//! Unknown codes are ignored so newer metadata never breaks parsing.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// One raw attribute entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyAttribute {
    pub code: String,
    pub value: String,
}

impl PropertyAttribute {
    #[must_use]
    pub fn new(code: &str, value: &str) -> Self {
        PropertyAttribute {
            code: code.to_string(),
            value: value.to_string(),
        }
    }

    /// An attribute that carries no value, such as `C` or `N`.
    #[must_use]
    pub fn flag(code: &str) -> Self {
        Self::new(code, "")
    }
}

/// Splits a comma-separated attribute string such as
/// `T@"NSString",C,N,V_name` into entries.
///
/// Commas inside quotes or inside `{}`, `[]` and `()` groups of a type
/// encoding do not split.
///
/// # Example
///
/// ```rust
/// use nest_rt::runtime::property::{parse_attribute_string, PropertyAttribute};
///
/// let attrs = parse_attribute_string("T{Pair=qq},N,V_pair");
/// assert_eq!(attrs[0], PropertyAttribute::new("T", "{Pair=qq}"));
/// assert_eq!(attrs[1], PropertyAttribute::flag("N"));
/// assert_eq!(attrs[2], PropertyAttribute::new("V", "_pair"));
/// ```
#[must_use]
pub fn parse_attribute_string(raw: &str) -> Vec<PropertyAttribute> {
    let mut entries = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut start = 0usize;

    for (i, ch) in raw.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '{' | '[' | '(' if !in_quotes => depth += 1,
            '}' | ']' | ')' if !in_quotes => depth = depth.saturating_sub(1),
            ',' if !in_quotes && depth == 0 => {
                push_entry(&mut entries, &raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    push_entry(&mut entries, &raw[start..]);

    entries
}

fn push_entry(entries: &mut Vec<PropertyAttribute>, entry: &str) {
    let mut chars = entry.chars();
    if let Some(code) = chars.next() {
        entries.push(PropertyAttribute {
            code: code.to_string(),
            value: chars.as_str().to_string(),
        });
    }
}

/// Parsed metadata of one declared property.
///
/// Immutable once parsed; owned by the class descriptor of the declaring
/// class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyAttributes {
    pub type_encoding: String,
    pub name: String,
    pub is_read_only: bool,
    pub is_copy: bool,
    pub is_retain: bool,
    pub is_nonatomic: bool,
    pub is_weak: bool,
    pub is_dynamic: bool,
    pub is_garbage_collection_eligible: bool,
    pub getter_name: String,
    pub setter_name: String,
    pub backing_slot: Option<String>,
    pub legacy_type_encoding: Option<String>,
}

impl PropertyAttributes {
    /// Parses a property declaration.
    ///
    /// Custom getter and setter names always win over the defaults (the
    /// property name, and `set` + capitalized name + `:`). Copy takes
    /// precedence over retain, and weak clears retain, so at most one
    /// ownership flag is set.
    ///
    /// # Example
    ///
    /// ```rust
    /// use nest_rt::runtime::property::{PropertyAttribute, PropertyAttributes};
    ///
    /// let attrs = PropertyAttributes::parse(
    ///     "name",
    ///     &[
    ///         PropertyAttribute::new("T", "@\"NSString\""),
    ///         PropertyAttribute::flag("C"),
    ///         PropertyAttribute::flag("N"),
    ///     ],
    /// );
    ///
    /// assert!(attrs.is_copy && attrs.is_nonatomic);
    /// assert_eq!(attrs.getter_name, "name");
    /// assert_eq!(attrs.setter_name, "setName:");
    /// ```
    #[must_use]
    pub fn parse(raw_name: &str, attributes: &[PropertyAttribute]) -> Self {
        let mut parsed = PropertyAttributes {
            type_encoding: String::new(),
            name: raw_name.to_string(),
            is_read_only: false,
            is_copy: false,
            is_retain: false,
            is_nonatomic: false,
            is_weak: false,
            is_dynamic: false,
            is_garbage_collection_eligible: false,
            getter_name: raw_name.to_string(),
            setter_name: default_setter_name(raw_name),
            backing_slot: None,
            legacy_type_encoding: None,
        };

        for attribute in attributes {
            match attribute.code.as_str() {
                "T" => parsed.type_encoding.clone_from(&attribute.value),
                "R" => parsed.is_read_only = true,
                "C" => parsed.is_copy = true,
                "&" => parsed.is_retain = true,
                "N" => parsed.is_nonatomic = true,
                "G" if !attribute.value.is_empty() => {
                    parsed.getter_name.clone_from(&attribute.value);
                }
                "S" if !attribute.value.is_empty() => {
                    parsed.setter_name.clone_from(&attribute.value);
                }
                "D" => parsed.is_dynamic = true,
                "W" => parsed.is_weak = true,
                "P" => parsed.is_garbage_collection_eligible = true,
                "V" if !attribute.value.is_empty() => {
                    parsed.backing_slot = Some(attribute.value.clone());
                }
                "t" => {
                    parsed.legacy_type_encoding = Some(attribute.value.clone());
                }
                _ => {}
            }
        }

        if parsed.is_copy || parsed.is_weak {
            parsed.is_retain = false;
        }
        if parsed.is_weak {
            parsed.is_copy = false;
        }

        parsed
    }

    /// Parses a declaration given as a comma-separated attribute string.
    #[must_use]
    pub fn from_attribute_string(raw_name: &str, raw: &str) -> Self {
        Self::parse(raw_name, &parse_attribute_string(raw))
    }

    /// Checks whether the property holds an object (`@...`).
    #[must_use]
    pub fn is_object_type(&self) -> bool {
        self.type_encoding.starts_with('@')
    }

    /// Returns the class name of an `@"Name"` encoding.
    ///
    /// Protocol-qualified encodings such as `@"<Delegate>"` and the bare `@`
    /// yield `None`.
    #[must_use]
    pub fn object_type_name(&self) -> Option<&str> {
        let name = self
            .type_encoding
            .strip_prefix("@\"")?
            .strip_suffix('"')?;
        let name = name.split('<').next().unwrap_or_default();
        (!name.is_empty()).then_some(name)
    }

    /// Returns the ownership and atomicity flags as [`AccessorAttributes`].
    #[must_use]
    pub fn accessor_attributes(&self) -> AccessorAttributes {
        let mut flags = AccessorAttributes::NONE;
        if self.is_copy {
            flags |= AccessorAttributes::COPY;
        }
        if self.is_retain {
            flags |= AccessorAttributes::RETAIN;
        }
        if self.is_nonatomic {
            flags |= AccessorAttributes::NONATOMIC;
        }
        if self.is_weak {
            flags |= AccessorAttributes::WEAK;
        }
        flags
    }
}

/// Returns `set` + the name with its first character upper-cased + `:`.
///
/// ```rust
/// use nest_rt::runtime::property::default_setter_name;
///
/// assert_eq!(default_setter_name("title"), "setTitle:");
/// assert_eq!(default_setter_name("URL"), "setURL:");
/// ```
#[must_use]
pub fn default_setter_name(property_name: &str) -> String {
    let mut chars = property_name.chars();
    let mut setter = String::with_capacity(property_name.len() + 4);
    setter.push_str("set");
    if let Some(first) = chars.next() {
        setter.extend(first.to_uppercase());
        setter.push_str(chars.as_str());
    }
    setter.push(':');
    setter
}

/// Ownership and atomicity flags an accessor implementation is registered
/// under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessorAttributes(u8);

impl AccessorAttributes {
    pub const NONE: Self = AccessorAttributes(0);
    pub const COPY: Self = AccessorAttributes(1 << 0);
    pub const RETAIN: Self = AccessorAttributes(1 << 1);
    pub const NONATOMIC: Self = AccessorAttributes(1 << 2);
    pub const WEAK: Self = AccessorAttributes(1 << 3);

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns the attribute codes of the set flags in a fixed order
    /// (`C`, `&`, `W`, `N`), used to build implementation keys.
    #[must_use]
    pub fn codes(self) -> String {
        let mut codes = String::new();
        for (flag, code) in [
            (Self::COPY, 'C'),
            (Self::RETAIN, '&'),
            (Self::WEAK, 'W'),
            (Self::NONATOMIC, 'N'),
        ] {
            if self.contains(flag) {
                codes.push(code);
            }
        }
        codes
    }
}

impl BitOr for AccessorAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        AccessorAttributes(self.0 | rhs.0)
    }
}

impl BitOrAssign for AccessorAttributes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for AccessorAttributes {
    /// Formats as a declaration would read, e.g. `copy, nonatomic`, or
    /// `none` for the empty set.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::COPY, "copy"),
            (Self::RETAIN, "retain"),
            (Self::WEAK, "weak"),
            (Self::NONATOMIC, "nonatomic"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect();

        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join(", "))
        }
    }
}
