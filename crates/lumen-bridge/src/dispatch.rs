//! Method invocation dispatch
//!
//! The one place where method resolution happens: native code supplies an
//! opaque method identifier, an optional target identifier, and an ordered
//! sequence of tagged-value slots. Resolution failures are fatal for the
//! call and fail loudly; nothing here ever leaves a cache half-mutated or
//! writes a partial result into the output slot.

use std::sync::Arc;

use log::error;

use crate::engine::TypeTable;
use crate::error::{BridgeError, BridgeResult};
use crate::guid::BridgeGuid;
use crate::method_cache::MethodCache;
use crate::object_cache::{ManagedObject, ObjectCache};
use crate::value::{TaggedValue, Value};

/// Resolve and invoke a method by identifier.
///
/// Instance methods require `target` to resolve through the object cache;
/// static methods ignore it. Parameters are checked against the method's
/// declared kinds position by position. On success the return value (if the
/// method declares one) is marshaled into `out`; on any failure `out` is
/// left untouched, still in its invalid state.
pub fn invoke(
    methods: &MethodCache,
    objects: &ObjectCache,
    table: &TypeTable,
    method: BridgeGuid,
    target: Option<BridgeGuid>,
    params: &[TaggedValue],
    out: &mut TaggedValue,
) -> BridgeResult<()> {
    let entry = match methods.get_method(method) {
        Some(entry) => entry,
        None => {
            error!("Invoke failed: unknown method {}", method);
            return Err(BridgeError::UnknownMethod(method));
        }
    };

    let this: Option<Arc<ManagedObject>> = if entry.def.is_static {
        None
    } else {
        let target_guid = target.filter(|guid| !guid.is_nil()).ok_or_else(|| {
            error!(
                "Invoke failed: instance method {}::{} called without a target",
                entry.class_name, entry.def.name
            );
            BridgeError::UnknownObject(BridgeGuid::NIL)
        })?;

        let object = objects.get_object(target_guid).ok_or_else(|| {
            error!("Invoke failed: unknown target object {}", target_guid);
            BridgeError::UnknownObject(target_guid)
        })?;

        Some(object)
    };

    if params.len() != entry.def.params.len() {
        return Err(BridgeError::ParamCount {
            expected: entry.def.params.len(),
            got: params.len(),
        });
    }

    let mut args = Vec::with_capacity(params.len());
    for (index, (slot, expected)) in params.iter().zip(&entry.def.params).enumerate() {
        let value = slot.get().map_err(|_| BridgeError::ParamType {
            index,
            expected: *expected,
            got: "empty slot".to_string(),
        })?;

        if value.kind() != *expected {
            return Err(BridgeError::ParamType {
                index,
                expected: *expected,
                got: format!("{:?}", value.kind()),
            });
        }

        args.push(value);
    }

    let result = (entry.def.body)(this, &args).map_err(BridgeError::Invocation)?;

    match (entry.def.returns, result) {
        (Some(expected), Some(value)) => {
            if value.kind() != expected {
                return Err(BridgeError::Invocation(format!(
                    "{}::{} returned {:?}, declared {:?}",
                    entry.class_name,
                    entry.def.name,
                    value.kind(),
                    expected
                )));
            }
            out.set(value, table)?;
        }
        (None, None) => {}
        (Some(expected), None) => {
            return Err(BridgeError::Invocation(format!(
                "{}::{} returned nothing, declared {:?}",
                entry.class_name, entry.def.name, expected
            )));
        }
        (None, Some(_)) => {
            return Err(BridgeError::Invocation(format!(
                "{}::{} returned a value but declares none",
                entry.class_name, entry.def.name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::MethodDef;
    use crate::value::ValueKind;

    fn setup() -> (MethodCache, ObjectCache, TypeTable) {
        (MethodCache::new(), ObjectCache::new(), TypeTable::empty())
    }

    fn out_slot() -> TaggedValue {
        TaggedValue::construct()
    }

    #[test]
    fn test_unknown_method_is_fatal() {
        let (methods, objects, table) = setup();
        let mut out = out_slot();

        let err = invoke(
            &methods,
            &objects,
            &table,
            BridgeGuid::new(),
            None,
            &[],
            &mut out,
        )
        .unwrap_err();

        assert!(matches!(err, BridgeError::UnknownMethod(_)));
        assert!(!out.is_valid());
    }

    #[test]
    fn test_static_method_invocation() {
        let (methods, objects, table) = setup();
        let unit = BridgeGuid::new();

        let guid = methods.add_method(
            unit,
            "Math",
            MethodDef::staticm(
                "Add",
                vec![ValueKind::I32, ValueKind::I32],
                Some(ValueKind::I32),
                Arc::new(|_, args| {
                    let (Value::I32(a), Value::I32(b)) = (args[0], args[1]) else {
                        return Err("bad args".to_string());
                    };
                    Ok(Some(Value::I32(a + b)))
                }),
            ),
        );

        let mut a = TaggedValue::construct();
        a.set(Value::I32(2), &table).unwrap();
        let mut b = TaggedValue::construct();
        b.set(Value::I32(40), &table).unwrap();

        let mut out = out_slot();
        invoke(&methods, &objects, &table, guid, None, &[a, b], &mut out).unwrap();
        assert_eq!(out.get_i32(), Some(42));
    }

    #[test]
    fn test_instance_method_resolves_target() {
        let (methods, objects, table) = setup();
        let unit = BridgeGuid::new();

        let object = Arc::new(ManagedObject::new(Arc::new(10i32)));
        let entry = objects.add_object(unit, &object, true);

        let guid = methods.add_method(
            unit,
            "Counter",
            MethodDef::instance(
                "Base",
                vec![ValueKind::I32],
                Some(ValueKind::I32),
                Arc::new(|this, args| {
                    let this = this.ok_or("no target")?;
                    let base = this.downcast_ref::<i32>().ok_or("wrong target type")?;
                    let Value::I32(add) = args[0] else {
                        return Err("bad arg".to_string());
                    };
                    Ok(Some(Value::I32(base + add)))
                }),
            ),
        );

        let mut arg = TaggedValue::construct();
        arg.set(Value::I32(5), &table).unwrap();

        let mut out = out_slot();
        invoke(
            &methods,
            &objects,
            &table,
            guid,
            Some(entry.guid),
            &[arg],
            &mut out,
        )
        .unwrap();
        assert_eq!(out.get_i32(), Some(15));
    }

    #[test]
    fn test_instance_method_requires_target() {
        let (methods, objects, table) = setup();
        let unit = BridgeGuid::new();

        let guid = methods.add_method(
            unit,
            "Foo",
            MethodDef::instance("Run", vec![], None, Arc::new(|_, _| Ok(None))),
        );

        let mut out = out_slot();
        let err = invoke(&methods, &objects, &table, guid, None, &[], &mut out).unwrap_err();
        assert!(matches!(err, BridgeError::UnknownObject(_)));

        let err = invoke(
            &methods,
            &objects,
            &table,
            guid,
            Some(BridgeGuid::new()),
            &[],
            &mut out,
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::UnknownObject(_)));
    }

    #[test]
    fn test_param_count_mismatch() {
        let (methods, objects, table) = setup();
        let unit = BridgeGuid::new();

        let guid = methods.add_method(
            unit,
            "Foo",
            MethodDef::staticm("One", vec![ValueKind::I32], None, Arc::new(|_, _| Ok(None))),
        );

        let mut out = out_slot();
        let err = invoke(&methods, &objects, &table, guid, None, &[], &mut out).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::ParamCount {
                expected: 1,
                got: 0
            }
        ));
    }

    #[test]
    fn test_param_type_mismatch() {
        let (methods, objects, table) = setup();
        let unit = BridgeGuid::new();

        let guid = methods.add_method(
            unit,
            "Foo",
            MethodDef::staticm("One", vec![ValueKind::I32], None, Arc::new(|_, _| Ok(None))),
        );

        let mut wrong = TaggedValue::construct();
        wrong.set(Value::Bool(true), &table).unwrap();

        let mut out = out_slot();
        let err = invoke(&methods, &objects, &table, guid, None, &[wrong], &mut out).unwrap_err();
        assert!(matches!(err, BridgeError::ParamType { index: 0, .. }));
    }

    #[test]
    fn test_empty_param_slot_is_marshal_error() {
        let (methods, objects, table) = setup();
        let unit = BridgeGuid::new();

        let guid = methods.add_method(
            unit,
            "Foo",
            MethodDef::staticm("One", vec![ValueKind::I32], None, Arc::new(|_, _| Ok(None))),
        );

        let empty = TaggedValue::construct();
        let mut out = out_slot();
        let err = invoke(&methods, &objects, &table, guid, None, &[empty], &mut out).unwrap_err();
        assert!(matches!(err, BridgeError::ParamType { .. }));
    }

    #[test]
    fn test_failed_invocation_leaves_out_invalid() {
        let (methods, objects, table) = setup();
        let unit = BridgeGuid::new();

        let guid = methods.add_method(
            unit,
            "Foo",
            MethodDef::staticm(
                "Explode",
                vec![],
                Some(ValueKind::I32),
                Arc::new(|_, _| Err("boom".to_string())),
            ),
        );

        let mut out = out_slot();
        let err = invoke(&methods, &objects, &table, guid, None, &[], &mut out).unwrap_err();
        match err {
            BridgeError::Invocation(message) => assert!(message.contains("boom")),
            other => panic!("Expected Invocation error, got {:?}", other),
        }
        assert!(!out.is_valid());
    }

    #[test]
    fn test_return_arity_violation() {
        let (methods, objects, table) = setup();
        let unit = BridgeGuid::new();

        let guid = methods.add_method(
            unit,
            "Foo",
            MethodDef::staticm(
                "Silent",
                vec![],
                Some(ValueKind::I32),
                Arc::new(|_, _| Ok(None)),
            ),
        );

        let mut out = out_slot();
        let err = invoke(&methods, &objects, &table, guid, None, &[], &mut out).unwrap_err();
        assert!(matches!(err, BridgeError::Invocation(_)));
        assert!(!out.is_valid());
    }
}
