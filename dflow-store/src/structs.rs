//! Struct subscript traversal: dotted field-index paths consumed one index
//! at a time, bottoming out into a plain field read/write or, if the field
//! itself is a container, an arbitrary binary key lookup (spec §3,
//! "Struct"; grounded on `xlb_struct_lookup` in the original sources'
//! `data_structs.h`).

use dflow_types::{Code, ContainerSlot, DatumType, StructTypeRegistry, StructValue, Subscript, Value};

/// Read the value addressed by `sub` within `root`. Returns `Ok(None)` for
/// an uninitialized leaf field (distinct from `SUBSCRIPT_NOT_FOUND`, which
/// this never returns for struct fields since field indices are declared
/// statically — an out-of-range index is `INVALID` instead).
pub fn get_at_path<'a>(
    root: &'a StructValue,
    registry: &StructTypeRegistry,
    sub: &Subscript,
) -> Result<Option<&'a Value>, Code> {
    let (idx, rest) = sub.split_leading_index().ok_or(Code::Invalid)?;
    let info = registry.get(root.type_index)?;
    if idx >= info.field_count() {
        return Err(Code::Invalid);
    }
    match root.get_field(idx)? {
        None => {
            if rest.is_empty() {
                Ok(None)
            } else {
                Err(Code::Unset)
            }
        }
        Some(v) if rest.is_empty() => Ok(Some(v)),
        Some(Value::Struct(nested)) => get_at_path(nested, registry, &rest),
        Some(Value::Container(c)) => match c.get(rest.as_bytes()) {
            ContainerSlot::Filled(v) => Ok(Some(v)),
            ContainerSlot::Reserved => Err(Code::Unset),
            ContainerSlot::Absent => Err(Code::SubscriptNotFound),
        },
        Some(_) => Err(Code::Type),
    }
}

/// Write `value` at the path addressed by `sub` within `root`, creating
/// intermediate nested struct fields lazily as the path descends through
/// them. The leaf write follows the same double-write rule as any other
/// field/container store.
pub fn set_at_path(
    root: &mut StructValue,
    registry: &StructTypeRegistry,
    sub: &Subscript,
    value: Value,
) -> Result<(), Code> {
    let (idx, rest) = sub.split_leading_index().ok_or(Code::Invalid)?;
    let info = registry.get(root.type_index)?;
    if idx >= info.field_count() {
        return Err(Code::Invalid);
    }
    let field_type = info.fields[idx].field_type.clone();

    if rest.is_empty() {
        return root.set_field(idx, value);
    }

    // Descending further: the field must already be (or become) a nested
    // struct or container to carry the remainder of the path.
    if root.get_field(idx)?.is_none() {
        let seed = match &field_type {
            DatumType::Struct { type_index } => Value::Struct(registry.new_struct(*type_index)?),
            DatumType::Container { key_type, val_type } => {
                Value::Container(dflow_types::Container::new((**key_type).clone(), (**val_type).clone()))
            }
            _ => return Err(Code::Type),
        };
        root.set_field(idx, seed)?;
    }

    match root.get_field_mut(idx)?.as_mut().expect("just initialized") {
        Value::Struct(nested) => set_at_path(nested, registry, &rest, value),
        Value::Container(c) => c.store(rest.as_bytes().to_vec(), value),
        _ => Err(Code::Type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dflow_types::{StructFieldInfo, StructTypeInfo};

    fn registry() -> StructTypeRegistry {
        let mut reg = StructTypeRegistry::new();
        reg.declare(
            1,
            StructTypeInfo {
                name: "inner".into(),
                fields: vec![StructFieldInfo { name: "v".into(), field_type: DatumType::Int }],
            },
        )
        .unwrap();
        reg.declare(
            0,
            StructTypeInfo {
                name: "outer".into(),
                fields: vec![
                    StructFieldInfo { name: "a".into(), field_type: DatumType::Int },
                    StructFieldInfo { name: "nested".into(), field_type: DatumType::Struct { type_index: 1 } },
                ],
            },
        )
        .unwrap();
        reg
    }

    #[test]
    fn writes_and_reads_through_nested_struct_path() {
        let reg = registry();
        let mut outer = reg.new_struct(0).unwrap();
        let path = Subscript::struct_path(&[1, 0]);
        set_at_path(&mut outer, &reg, &path, Value::Int(42)).unwrap();
        assert_eq!(get_at_path(&outer, &reg, &path).unwrap(), Some(&Value::Int(42)));
    }

    #[test]
    fn out_of_range_index_is_invalid() {
        let reg = registry();
        let outer = reg.new_struct(0).unwrap();
        let path = Subscript::struct_path(&[9]);
        assert_eq!(get_at_path(&outer, &reg, &path), Err(Code::Invalid));
    }

    #[test]
    fn unset_leaf_field_is_none_not_an_error() {
        let reg = registry();
        let outer = reg.new_struct(0).unwrap();
        let path = Subscript::struct_path(&[0]);
        assert_eq!(get_at_path(&outer, &reg, &path), Ok(None));
    }
}
