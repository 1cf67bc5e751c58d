//! VM call targets compiled code invokes for language level operations.
//!
//! Every entry in [`INTRINSICS`] shares one calling convention (receiver,
//! selector, arguments, optional block, closure) so generated call sites need
//! no per-intrinsic glue. The typed functions below are what the entries
//! forward to.
use log::trace;

use crate::{
    Arity, Bridge, BridgeConfig, ErrorClass, HostRuntime, InsnWord, Symbol, Value, VmResult,
    check_arity, raise_arity, raise_extra_keywords, raise_new,
};

/// Block entry point: first yielded argument, closure, arguments, block argument.
pub type BlockFn = fn(Value, Value, &[Value], Value) -> Value;

/// Rescue/ensure/else handler: program counter, encoded instructions, closure.
pub type ExceptionFn = fn(&mut usize, &[InsnWord], Value) -> Value;

/// Enumerator size callback: receiver, arguments, enumerator.
pub type EnumeratorSizeFn = fn(&dyn HostRuntime, Value, Value, Value) -> Value;

pub struct IntrinsicContext<'h, 'arg> {
    pub host: &'h mut dyn HostRuntime,
    pub bridge: &'h Bridge,
    pub receiver: Value,
    pub selector: Symbol,
    pub arguments: &'arg mut [Value],
    pub block: Option<BlockFn>,
    pub closure: Value,
}

impl<'h, 'arg> IntrinsicContext<'h, 'arg> {
    pub fn new(
        host: &'h mut dyn HostRuntime,
        bridge: &'h Bridge,
        receiver: Value,
        selector: Symbol,
        arguments: &'arg mut [Value],
    ) -> Self {
        Self {
            host,
            bridge,
            receiver,
            selector,
            arguments,
            block: None,
            closure: Value::NIL,
        }
    }
}

pub type IntrinsicFunction = fn(&mut IntrinsicContext) -> VmResult<Value>;

#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IntrinsicIndex(usize);

#[derive(Debug, Copy, Clone)]
pub struct Intrinsic {
    pub name: &'static str,
    /// Arguments, the receiver does not count.
    pub arity: Arity,
    pub ptr: IntrinsicFunction,
}

impl Intrinsic {
    pub const fn new(name: &'static str, arity: Arity, ptr: IntrinsicFunction) -> Self {
        Self { name, arity, ptr }
    }
}

pub const INTRINSICS: &[Intrinsic] = &[
    Intrinsic::new("expand_splat", Arity::exact(2), expand_splat_intrinsic),
    Intrinsic::new("string_interpolate", Arity::at_least(0), string_interpolate_intrinsic),
    Intrinsic::new("enumerator_size", Arity::at_least(0), enumerator_size_intrinsic),
    Intrinsic::new("block_return_undef", Arity::at_least(0), block_return_undef_intrinsic),
    Intrinsic::new("t_absurd", Arity::exact(1), t_absurd_intrinsic),
    Intrinsic::new("raise_arity", Arity::exact(3), raise_arity_intrinsic),
    Intrinsic::new("raise_extra_keywords", Arity::exact(1), raise_extra_keywords_intrinsic),
];

pub fn intrinsic_index(name: &str) -> Option<IntrinsicIndex> {
    INTRINSICS
        .iter()
        .position(|intrinsic| intrinsic.name == name)
        .map(IntrinsicIndex)
}

pub fn get_intrinsic(index: IntrinsicIndex) -> Intrinsic {
    debug_assert!(index.0 < INTRINSICS.len());
    INTRINSICS[index.0]
}

/// Validates the argument count, then runs the intrinsic.
pub fn call_intrinsic(index: IntrinsicIndex, ctx: &mut IntrinsicContext) -> VmResult<Value> {
    let intrinsic = get_intrinsic(index);
    trace!(
        "intrinsic {} on {:?} with {} arguments",
        intrinsic.name,
        ctx.receiver,
        ctx.arguments.len()
    );
    check_arity(ctx.host, ctx.arguments.len(), intrinsic.arity)?;
    (intrinsic.ptr)(ctx)
}

fn count_argument(host: &mut dyn HostRuntime, value: Value) -> VmResult<usize> {
    match value.as_fixnum() {
        Some(n) => Ok(n.max(0) as usize),
        None => {
            let class = host.class_name(value);
            let message = format!("no implicit conversion of {class} into Integer");
            Err(raise_new(host, ErrorClass::TypeError, &message))
        }
    }
}

/// Destructuring support: returns an array with at least `before + after`
/// elements, padded with nil.
///
/// An array that is already long enough comes back as is. Values that do not
/// convert to an array are treated as a one element array.
pub fn expand_splat(
    host: &mut dyn HostRuntime,
    thing: Value,
    before: usize,
    after: usize,
) -> VmResult<Value> {
    let have_array = host.array_len(thing).is_some();
    let elements = if have_array {
        host.array_to_vec(thing).unwrap_or_default()
    } else {
        match host.check_array_type(thing)? {
            Some(converted) => host.array_to_vec(converted).unwrap_or_default(),
            None => vec![thing],
        }
    };

    let needed = before + after;
    if elements.len() >= needed {
        if have_array {
            return Ok(thing);
        }
        return Ok(host.new_array(&elements));
    }

    let missing = needed - elements.len();
    let array = host.new_array(&elements);
    for _ in 0..missing {
        host.array_push(array, Value::NIL)?;
    }
    Ok(array)
}

fn expand_splat_intrinsic(ctx: &mut IntrinsicContext) -> VmResult<Value> {
    let [before, after] = [ctx.arguments[0], ctx.arguments[1]];
    let before = count_argument(ctx.host, before)?;
    let after = count_argument(ctx.host, after)?;
    expand_splat(ctx.host, ctx.receiver, before, after)
}

/// Converts every non-string argument with its `to_s`, left to right, storing
/// the result back into `args`, then concatenates everything.
pub fn string_interpolate(host: &mut dyn HostRuntime, args: &mut [Value]) -> VmResult<Value> {
    let to_s = host.intern_symbol("to_s");
    for arg in args.iter_mut() {
        if host.is_string(*arg) {
            continue;
        }
        let result = host.call_method(*arg, to_s, &[])?;
        *arg = host.obj_as_string_result(result, *arg);
    }
    host.concat_strings(args)
}

fn string_interpolate_intrinsic(ctx: &mut IntrinsicContext) -> VmResult<Value> {
    string_interpolate(ctx.host, ctx.arguments)
}

/// Size of an array backed enumerator, without building the enumerator.
pub fn enumerator_size_array_length(
    host: &dyn HostRuntime,
    array: Value,
    _args: Value,
    _enumerator: Value,
) -> Value {
    Value::from_usize(host.array_len(array).unwrap_or(0))
}

pub const ARRAY_ENUMERATOR_SIZE: EnumeratorSizeFn = enumerator_size_array_length;

fn enumerator_size_intrinsic(ctx: &mut IntrinsicContext) -> VmResult<Value> {
    Ok(enumerator_size_array_length(
        &*ctx.host,
        ctx.receiver,
        Value::NIL,
        Value::NIL,
    ))
}

/// Stands in for any exception handler the compiler proved unreachable.
pub fn block_return_undef(_pc: &mut usize, _iseq_encoded: &[InsnWord], _closure: Value) -> Value {
    Value::UNDEF
}

pub const UNREACHABLE_HANDLER: ExceptionFn = block_return_undef;

fn block_return_undef_intrinsic(ctx: &mut IntrinsicContext) -> VmResult<Value> {
    let mut pc = 0;
    Ok(block_return_undef(&mut pc, &[], ctx.closure))
}

/// Reports a value reaching code the compiler considered unreachable.
///
/// The handler is looked up on every call, user code may redefine it.
pub fn t_absurd(
    host: &mut dyn HostRuntime,
    config: &BridgeConfig,
    value: Value,
) -> VmResult<Value> {
    let object = host.object_class();
    let namespace = host.intern_symbol(&config.absurd_namespace);
    let namespace = host.const_get(object, namespace)?;
    let method = host.intern_symbol(&config.absurd_method);
    host.call_method(namespace, method, &[value])
}

fn t_absurd_intrinsic(ctx: &mut IntrinsicContext) -> VmResult<Value> {
    let value = ctx.arguments[0];
    t_absurd(ctx.host, &ctx.bridge.config, value)
}

// ( argc min max -- ) with max = -1 for unbounded
fn raise_arity_intrinsic(ctx: &mut IntrinsicContext) -> VmResult<Value> {
    let [argc, min, max] = [ctx.arguments[0], ctx.arguments[1], ctx.arguments[2]];
    let argc = count_argument(ctx.host, argc)?;
    let min = int_argument(ctx.host, min)?;
    let max = int_argument(ctx.host, max)?;
    raise_arity(ctx.host, argc, Arity::from_raw(min, max))?;
    Ok(Value::UNDEF)
}

fn int_argument(host: &mut dyn HostRuntime, value: Value) -> VmResult<i32> {
    let Some(n) = value.as_fixnum() else {
        let class = host.class_name(value);
        let message = format!("no implicit conversion of {class} into Integer");
        return Err(raise_new(host, ErrorClass::TypeError, &message));
    };
    i32::try_from(n).map_err(|_| {
        let bound = if n < 0 { "small" } else { "big" };
        let message = format!("integer {n} too {bound} to convert to 'int'");
        raise_new(host, ErrorClass::RangeError, &message)
    })
}

fn raise_extra_keywords_intrinsic(ctx: &mut IntrinsicContext) -> VmResult<Value> {
    let keywords = ctx.arguments[0];
    raise_extra_keywords(ctx.host, keywords)?;
    Ok(Value::UNDEF)
}
