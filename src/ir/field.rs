use crate::error::Error;
use indexmap::IndexMap;
use std::sync::Arc;

/// Preferred display radix for integer fields.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DisplayBase {
    Binary,
    Octal,
    Decimal,
    Hexadecimal,
}

impl DisplayBase {
    pub fn radix(self) -> u32 {
        match self {
            DisplayBase::Binary => 2,
            DisplayBase::Octal => 8,
            DisplayBase::Decimal => 10,
            DisplayBase::Hexadecimal => 16,
        }
    }
}

/// Which field tree a field path starts from.
///
/// The declaration order is also the order in which the trees precede each
/// other within one event record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FieldPathScope {
    PacketContext,
    EventCommonContext,
    EventSpecificContext,
    EventPayload,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FieldPathItem {
    /// Structure member or variant option index.
    Index(u64),
    /// The element of the array currently being visited.
    CurrentArrayElement,
}

/// Locates a field within an event record, for dynamic-array lengths and
/// variant selectors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPath {
    pub scope: FieldPathScope,
    pub items: Vec<FieldPathItem>,
}

impl FieldPath {
    pub fn new(scope: FieldPathScope, items: Vec<FieldPathItem>) -> Self {
        FieldPath { scope, items }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructureMember {
    pub name: String,
    pub class: Arc<FieldClass>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VariantOption {
    pub name: String,
    pub class: Arc<FieldClass>,
}

/// The type of a field. Field classes are immutable once constructed and
/// are frozen together with the stream class they end up attached to.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldClass {
    UnsignedInteger {
        field_value_range: u32,
        preferred_display_base: DisplayBase,
    },
    SignedInteger {
        field_value_range: u32,
        preferred_display_base: DisplayBase,
    },
    UnsignedEnumeration {
        field_value_range: u32,
        preferred_display_base: DisplayBase,
        /// Label to inclusive value ranges.
        mappings: IndexMap<String, Vec<(u64, u64)>>,
    },
    SignedEnumeration {
        field_value_range: u32,
        preferred_display_base: DisplayBase,
        mappings: IndexMap<String, Vec<(i64, i64)>>,
    },
    Real {
        single_precision: bool,
    },
    String,
    Structure {
        members: Vec<StructureMember>,
    },
    StaticArray {
        length: u64,
        element: Arc<FieldClass>,
    },
    DynamicArray {
        element: Arc<FieldClass>,
        length_field_path: Option<FieldPath>,
    },
    Variant {
        options: Vec<VariantOption>,
        selector_field_path: Option<FieldPath>,
    },
}

fn check_range(field_value_range: u32) -> Result<(), Error> {
    if field_value_range == 0 || field_value_range > 64 {
        Err(Error::invalid_params(
            "integer field value range must be within [1, 64] bits",
        ))
    } else {
        Ok(())
    }
}

fn check_unique_names(names: impl Iterator<Item = impl AsRef<str>>) -> Result<(), Error> {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if !seen.insert(name.as_ref().to_owned()) {
            return Err(Error::invalid_params(format!(
                "duplicate member name `{}`",
                name.as_ref()
            )));
        }
    }
    Ok(())
}

impl FieldClass {
    pub fn unsigned_integer(
        field_value_range: u32,
        preferred_display_base: DisplayBase,
    ) -> Result<Self, Error> {
        check_range(field_value_range)?;
        Ok(FieldClass::UnsignedInteger {
            field_value_range,
            preferred_display_base,
        })
    }

    pub fn signed_integer(
        field_value_range: u32,
        preferred_display_base: DisplayBase,
    ) -> Result<Self, Error> {
        check_range(field_value_range)?;
        Ok(FieldClass::SignedInteger {
            field_value_range,
            preferred_display_base,
        })
    }

    pub fn unsigned_enumeration(
        field_value_range: u32,
        preferred_display_base: DisplayBase,
        mappings: IndexMap<String, Vec<(u64, u64)>>,
    ) -> Result<Self, Error> {
        check_range(field_value_range)?;
        for (label, ranges) in &mappings {
            for (lower, upper) in ranges {
                if lower > upper {
                    return Err(Error::invalid_params(format!(
                        "mapping `{label}` has an inverted range"
                    )));
                }
            }
        }
        Ok(FieldClass::UnsignedEnumeration {
            field_value_range,
            preferred_display_base,
            mappings,
        })
    }

    pub fn signed_enumeration(
        field_value_range: u32,
        preferred_display_base: DisplayBase,
        mappings: IndexMap<String, Vec<(i64, i64)>>,
    ) -> Result<Self, Error> {
        check_range(field_value_range)?;
        for (label, ranges) in &mappings {
            for (lower, upper) in ranges {
                if lower > upper {
                    return Err(Error::invalid_params(format!(
                        "mapping `{label}` has an inverted range"
                    )));
                }
            }
        }
        Ok(FieldClass::SignedEnumeration {
            field_value_range,
            preferred_display_base,
            mappings,
        })
    }

    pub fn single_precision_real() -> Self {
        FieldClass::Real {
            single_precision: true,
        }
    }

    pub fn double_precision_real() -> Self {
        FieldClass::Real {
            single_precision: false,
        }
    }

    pub fn string() -> Self {
        FieldClass::String
    }

    pub fn structure(members: Vec<(String, FieldClass)>) -> Result<Self, Error> {
        check_unique_names(members.iter().map(|(name, _)| name))?;
        Ok(FieldClass::Structure {
            members: members
                .into_iter()
                .map(|(name, class)| StructureMember {
                    name,
                    class: Arc::new(class),
                })
                .collect(),
        })
    }

    pub fn static_array(length: u64, element: FieldClass) -> Self {
        FieldClass::StaticArray {
            length,
            element: Arc::new(element),
        }
    }

    pub fn dynamic_array(element: FieldClass, length_field_path: Option<FieldPath>) -> Self {
        FieldClass::DynamicArray {
            element: Arc::new(element),
            length_field_path,
        }
    }

    pub fn variant(
        options: Vec<(String, FieldClass)>,
        selector_field_path: Option<FieldPath>,
    ) -> Result<Self, Error> {
        check_unique_names(options.iter().map(|(name, _)| name))?;
        Ok(FieldClass::Variant {
            options: options
                .into_iter()
                .map(|(name, class)| VariantOption {
                    name,
                    class: Arc::new(class),
                })
                .collect(),
            selector_field_path,
        })
    }

    fn is_unsigned_integer(&self) -> bool {
        matches!(
            self,
            FieldClass::UnsignedInteger { .. } | FieldClass::UnsignedEnumeration { .. }
        )
    }

    fn enumeration_labels(&self) -> Option<Vec<&str>> {
        match self {
            FieldClass::UnsignedEnumeration { mappings, .. } => {
                Some(mappings.keys().map(|k| k.as_str()).collect())
            }
            FieldClass::SignedEnumeration { mappings, .. } => {
                Some(mappings.keys().map(|k| k.as_str()).collect())
            }
            _ => None,
        }
    }
}

/// The field trees a field path may start from, as attached to one stream
/// class plus one of its event classes.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct ScopeRoots<'a> {
    pub packet_context: Option<&'a FieldClass>,
    pub event_common_context: Option<&'a FieldClass>,
    pub event_specific_context: Option<&'a FieldClass>,
    pub event_payload: Option<&'a FieldClass>,
}

impl<'a> ScopeRoots<'a> {
    fn root(&self, scope: FieldPathScope) -> Option<&'a FieldClass> {
        match scope {
            FieldPathScope::PacketContext => self.packet_context,
            FieldPathScope::EventCommonContext => self.event_common_context,
            FieldPathScope::EventSpecificContext => self.event_specific_context,
            FieldPathScope::EventPayload => self.event_payload,
        }
    }

    fn resolve(&self, path: &FieldPath) -> Result<&'a FieldClass, Error> {
        let mut current = self
            .root(path.scope)
            .ok_or_else(|| Error::invalid_params("field path scope has no field tree"))?;
        for item in &path.items {
            current = match (current, item) {
                (FieldClass::Structure { members }, FieldPathItem::Index(i)) => members
                    .get(*i as usize)
                    .map(|m| m.class.as_ref())
                    .ok_or_else(|| Error::invalid_params("field path index out of bounds"))?,
                (FieldClass::Variant { options, .. }, FieldPathItem::Index(i)) => options
                    .get(*i as usize)
                    .map(|o| o.class.as_ref())
                    .ok_or_else(|| Error::invalid_params("field path index out of bounds"))?,
                (
                    FieldClass::StaticArray { element, .. },
                    FieldPathItem::CurrentArrayElement,
                ) => element.as_ref(),
                (
                    FieldClass::DynamicArray { element, .. },
                    FieldPathItem::CurrentArrayElement,
                ) => element.as_ref(),
                _ => {
                    return Err(Error::invalid_params(
                        "field path item does not match the field tree",
                    ))
                }
            };
        }
        Ok(current)
    }
}

/// True when `target` locates a field strictly before the field at
/// `referrer` within one event record.
fn path_strictly_precedes(target: &FieldPath, referrer: &FieldPath) -> bool {
    if target.scope != referrer.scope {
        return target.scope < referrer.scope;
    }
    for (t, r) in target.items.iter().zip(referrer.items.iter()) {
        match (t, r) {
            (FieldPathItem::Index(a), FieldPathItem::Index(b)) if a != b => return a < b,
            (FieldPathItem::Index(_), FieldPathItem::Index(_)) => continue,
            (FieldPathItem::CurrentArrayElement, FieldPathItem::CurrentArrayElement) => continue,
            _ => return false,
        }
    }
    // Equal, an ancestor, or a descendant: none of these strictly precede.
    false
}

/// Validates every dynamic-array length path and variant selector path
/// reachable from the given scope roots.
pub(crate) fn validate_field_paths(roots: &ScopeRoots<'_>) -> Result<(), Error> {
    let scopes = [
        (FieldPathScope::PacketContext, roots.packet_context),
        (FieldPathScope::EventCommonContext, roots.event_common_context),
        (
            FieldPathScope::EventSpecificContext,
            roots.event_specific_context,
        ),
        (FieldPathScope::EventPayload, roots.event_payload),
    ];
    for (scope, root) in scopes {
        if let Some(root) = root {
            let mut current = FieldPath::new(scope, Vec::new());
            walk(roots, root, &mut current)?;
        }
    }
    Ok(())
}

fn walk(roots: &ScopeRoots<'_>, class: &FieldClass, current: &mut FieldPath) -> Result<(), Error> {
    match class {
        FieldClass::Structure { members } => {
            for (i, member) in members.iter().enumerate() {
                current.items.push(FieldPathItem::Index(i as u64));
                walk(roots, &member.class, current)?;
                current.items.pop();
            }
        }
        FieldClass::StaticArray { element, .. } => {
            current.items.push(FieldPathItem::CurrentArrayElement);
            walk(roots, element, current)?;
            current.items.pop();
        }
        FieldClass::DynamicArray {
            element,
            length_field_path,
        } => {
            if let Some(path) = length_field_path {
                let target = roots.resolve(path)?;
                if !target.is_unsigned_integer() {
                    return Err(Error::invalid_params(
                        "dynamic array length field path must locate an unsigned integer field",
                    ));
                }
                if !path_strictly_precedes(path, current) {
                    return Err(Error::invalid_params(
                        "dynamic array length field must strictly precede the array",
                    ));
                }
            }
            current.items.push(FieldPathItem::CurrentArrayElement);
            walk(roots, element, current)?;
            current.items.pop();
        }
        FieldClass::Variant {
            options,
            selector_field_path,
        } => {
            if let Some(path) = selector_field_path {
                let target = roots.resolve(path)?;
                let labels = target.enumeration_labels().ok_or_else(|| {
                    Error::invalid_params(
                        "variant selector field path must locate an enumeration field",
                    )
                })?;
                for option in options {
                    if !labels.contains(&option.name.as_str()) {
                        return Err(Error::invalid_params(format!(
                            "variant option `{}` has no matching selector mapping",
                            option.name
                        )));
                    }
                }
                if !path_strictly_precedes(path, current) {
                    return Err(Error::invalid_params(
                        "variant selector field must strictly precede the variant",
                    ));
                }
            }
            for (i, option) in options.iter().enumerate() {
                current.items.push(FieldPathItem::Index(i as u64));
                walk(roots, &option.class, current)?;
                current.items.pop();
            }
        }
        _ => {}
    }
    Ok(())
}

/// A concrete field value carried by an event message.
#[derive(Clone, Debug, PartialEq)]
pub enum Field {
    UnsignedInteger(u64),
    SignedInteger(i64),
    Real(f64),
    String(String),
    UnsignedEnumeration(u64),
    SignedEnumeration(i64),
    Structure(Vec<(String, Field)>),
    Array(Vec<Field>),
    Variant { option: String, value: Box<Field> },
}

impl Field {
    /// Structure member lookup by name.
    pub fn member(&self, name: &str) -> Option<&Field> {
        match self {
            Field::Structure(members) => members
                .iter()
                .find(|(member, _)| member == name)
                .map(|(_, field)| field),
            _ => None,
        }
    }

    pub fn as_unsigned_integer(&self) -> Option<u64> {
        match self {
            Field::UnsignedInteger(v) | Field::UnsignedEnumeration(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_signed_integer(&self) -> Option<i64> {
        match self {
            Field::SignedInteger(v) | Field::SignedEnumeration(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Field::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn payload_with_length_then_array() -> FieldClass {
        FieldClass::structure(vec![
            (
                "count".to_owned(),
                FieldClass::unsigned_integer(32, DisplayBase::Decimal).unwrap(),
            ),
            (
                "samples".to_owned(),
                FieldClass::dynamic_array(
                    FieldClass::unsigned_integer(8, DisplayBase::Hexadecimal).unwrap(),
                    Some(FieldPath::new(
                        FieldPathScope::EventPayload,
                        vec![FieldPathItem::Index(0)],
                    )),
                ),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn length_before_array_is_accepted() {
        let payload = payload_with_length_then_array();
        let roots = ScopeRoots {
            event_payload: Some(&payload),
            ..Default::default()
        };
        assert!(validate_field_paths(&roots).is_ok());
    }

    #[test]
    fn length_after_array_is_rejected() {
        let payload = FieldClass::structure(vec![
            (
                "samples".to_owned(),
                FieldClass::dynamic_array(
                    FieldClass::unsigned_integer(8, DisplayBase::Decimal).unwrap(),
                    Some(FieldPath::new(
                        FieldPathScope::EventPayload,
                        vec![FieldPathItem::Index(1)],
                    )),
                ),
            ),
            (
                "count".to_owned(),
                FieldClass::unsigned_integer(32, DisplayBase::Decimal).unwrap(),
            ),
        ])
        .unwrap();
        let roots = ScopeRoots {
            event_payload: Some(&payload),
            ..Default::default()
        };
        assert!(validate_field_paths(&roots).is_err());
    }

    #[test]
    fn length_in_earlier_scope_is_accepted() {
        let common = FieldClass::structure(vec![(
            "len".to_owned(),
            FieldClass::unsigned_integer(16, DisplayBase::Decimal).unwrap(),
        )])
        .unwrap();
        let payload = FieldClass::structure(vec![(
            "samples".to_owned(),
            FieldClass::dynamic_array(
                FieldClass::string(),
                Some(FieldPath::new(
                    FieldPathScope::EventCommonContext,
                    vec![FieldPathItem::Index(0)],
                )),
            ),
        )])
        .unwrap();
        let roots = ScopeRoots {
            event_common_context: Some(&common),
            event_payload: Some(&payload),
            ..Default::default()
        };
        assert!(validate_field_paths(&roots).is_ok());
    }

    #[test]
    fn length_must_be_unsigned() {
        let payload = FieldClass::structure(vec![
            (
                "count".to_owned(),
                FieldClass::signed_integer(32, DisplayBase::Decimal).unwrap(),
            ),
            (
                "samples".to_owned(),
                FieldClass::dynamic_array(
                    FieldClass::string(),
                    Some(FieldPath::new(
                        FieldPathScope::EventPayload,
                        vec![FieldPathItem::Index(0)],
                    )),
                ),
            ),
        ])
        .unwrap();
        let roots = ScopeRoots {
            event_payload: Some(&payload),
            ..Default::default()
        };
        assert!(validate_field_paths(&roots).is_err());
    }

    #[test]
    fn variant_selector_labels_must_cover_options() {
        let mut mappings = IndexMap::new();
        mappings.insert("a".to_owned(), vec![(0_u64, 0_u64)]);
        mappings.insert("b".to_owned(), vec![(1, 1)]);
        let selector =
            FieldClass::unsigned_enumeration(8, DisplayBase::Decimal, mappings).unwrap();

        let covered = FieldClass::structure(vec![
            ("sel".to_owned(), selector.clone()),
            (
                "var".to_owned(),
                FieldClass::variant(
                    vec![
                        ("a".to_owned(), FieldClass::string()),
                        (
                            "b".to_owned(),
                            FieldClass::unsigned_integer(8, DisplayBase::Decimal).unwrap(),
                        ),
                    ],
                    Some(FieldPath::new(
                        FieldPathScope::EventPayload,
                        vec![FieldPathItem::Index(0)],
                    )),
                )
                .unwrap(),
            ),
        ])
        .unwrap();
        let roots = ScopeRoots {
            event_payload: Some(&covered),
            ..Default::default()
        };
        assert!(validate_field_paths(&roots).is_ok());

        let uncovered = FieldClass::structure(vec![
            ("sel".to_owned(), selector),
            (
                "var".to_owned(),
                FieldClass::variant(
                    vec![("c".to_owned(), FieldClass::string())],
                    Some(FieldPath::new(
                        FieldPathScope::EventPayload,
                        vec![FieldPathItem::Index(0)],
                    )),
                )
                .unwrap(),
            ),
        ])
        .unwrap();
        let roots = ScopeRoots {
            event_payload: Some(&uncovered),
            ..Default::default()
        };
        assert!(validate_field_paths(&roots).is_err());
    }

    #[test]
    fn structure_member_names_are_unique() {
        assert!(FieldClass::structure(vec![
            ("x".to_owned(), FieldClass::string()),
            ("x".to_owned(), FieldClass::string()),
        ])
        .is_err());
    }

    #[test]
    fn field_value_accessors() {
        let field = Field::Structure(vec![
            ("count".to_owned(), Field::UnsignedInteger(3)),
            ("label".to_owned(), Field::String("boot".to_owned())),
        ]);
        assert_eq!(
            field.member("count").and_then(Field::as_unsigned_integer),
            Some(3)
        );
        assert_eq!(field.member("label").and_then(Field::as_string), Some("boot"));
        assert_eq!(field.member("missing"), None);
    }
}
