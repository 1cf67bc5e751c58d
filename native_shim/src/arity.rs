//! Argument validation for compiled call sites.
//!
//! Messages match the ones the VM produces for interpreted methods, user code
//! may match on them.
use crate::{ErrorClass, HostRuntime, Value, VmResult, raise_new};

/// Raw encoding of an unbounded maximum used by generated code.
pub const UNLIMITED_ARGUMENTS: i32 = -1;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Arity {
    pub min: u32,
    /// `None` means any number of trailing arguments.
    pub max: Option<u32>,
}

impl Arity {
    pub const fn exact(n: u32) -> Self {
        Self {
            min: n,
            max: Some(n),
        }
    }

    pub const fn range(min: u32, max: u32) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    pub const fn at_least(min: u32) -> Self {
        Self { min, max: None }
    }

    /// Decodes the `(min, max)` pair emitted by the compiler.
    pub fn from_raw(min: i32, max: i32) -> Self {
        let min = min.max(0) as u32;
        if max == UNLIMITED_ARGUMENTS {
            return Self::at_least(min);
        }
        Self::range(min, max.max(0) as u32)
    }

    pub fn accepts(self, argc: usize) -> bool {
        if argc < self.min as usize {
            return false;
        }
        match self.max {
            Some(max) => argc <= max as usize,
            None => true,
        }
    }

    pub fn error_message(self, argc: usize) -> String {
        match self.max {
            Some(max) if max == self.min => format!(
                "wrong number of arguments (given {argc}, expected {})",
                self.min
            ),
            None => format!(
                "wrong number of arguments (given {argc}, expected {}+)",
                self.min
            ),
            Some(max) => format!(
                "wrong number of arguments (given {argc}, expected {}..{max})",
                self.min
            ),
        }
    }
}

/// Builds the ArgumentError for a failed arity check without raising it.
pub fn arity_error_new(host: &mut dyn HostRuntime, argc: usize, arity: Arity) -> Value {
    host.new_exception(ErrorClass::ArgumentError, &arity.error_message(argc))
}

pub fn raise_arity(host: &mut dyn HostRuntime, argc: usize, arity: Arity) -> VmResult<()> {
    let error = arity_error_new(host, argc, arity);
    Err(host.raise(error))
}

pub fn check_arity(host: &mut dyn HostRuntime, argc: usize, arity: Arity) -> VmResult<()> {
    if arity.accepts(argc) {
        return Ok(());
    }
    raise_arity(host, argc, arity)
}

/// For call sites whose callee declares no keyword parameters.
pub fn check_no_extra_keywords(
    host: &mut dyn HostRuntime,
    keywords: Option<Value>,
) -> VmResult<()> {
    let Some(keywords) = keywords else {
        return Ok(());
    };
    let keys = host.hash_keys(keywords)?;
    if host.array_len(keys).unwrap_or(0) == 0 {
        return Ok(());
    }
    raise_extra_keywords_with_keys(host, keys)
}

/// Raises ArgumentError naming every key of `keywords`.
pub fn raise_extra_keywords(host: &mut dyn HostRuntime, keywords: Value) -> VmResult<()> {
    let keys = host.hash_keys(keywords)?;
    raise_extra_keywords_with_keys(host, keys)
}

fn raise_extra_keywords_with_keys(host: &mut dyn HostRuntime, keys: Value) -> VmResult<()> {
    let listed = host.inspect(keys)?;
    let message = format!("unknown keywords: {listed}");
    Err(raise_new(host, ErrorClass::ArgumentError, &message))
}

/// Raises TypeError for a failed runtime type assertion.
pub fn raise_cast_failure(
    host: &mut dyn HostRuntime,
    value: Value,
    cast_method: &str,
    type_name: &str,
) -> VmResult<()> {
    let class = host.class_name(value);
    let shown = host.inspect(value)?;
    let message = format!(
        "{cast_method}: Expected type {type_name}, got type {class} with value {shown}"
    );
    Err(raise_new(host, ErrorClass::TypeError, &message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelVm;

    fn message_of(vm: &ModelVm, result: VmResult<()>) -> String {
        let raised = result.unwrap_err();
        assert_eq!(vm.exception_class_name(raised.exception), "ArgumentError");
        vm.exception_message(raised.exception).unwrap()
    }

    #[test]
    fn exact_arity() {
        let mut vm = ModelVm::default();
        for argc in 0..6 {
            let result = check_arity(&mut vm, argc, Arity::exact(2));
            if argc == 2 {
                assert!(result.is_ok());
            } else {
                let msg = message_of(&vm, result);
                assert!(msg.contains(&format!("given {argc}, expected 2")), "{msg}");
                assert!(!msg.contains("2+"));
            }
        }
    }

    #[test]
    fn unbounded_arity() {
        let mut vm = ModelVm::default();
        for argc in 0..6 {
            let result = check_arity(&mut vm, argc, Arity::at_least(3));
            if argc >= 3 {
                assert!(result.is_ok());
            } else {
                let msg = message_of(&vm, result);
                assert!(msg.contains(&format!("given {argc}, expected 3+")), "{msg}");
            }
        }
    }

    #[test]
    fn ranged_arity() {
        let mut vm = ModelVm::default();
        for argc in 0..7 {
            let result = check_arity(&mut vm, argc, Arity::range(1, 4));
            if (1..=4).contains(&argc) {
                assert!(result.is_ok());
            } else {
                let msg = message_of(&vm, result);
                assert_eq!(
                    msg,
                    format!("wrong number of arguments (given {argc}, expected 1..4)")
                );
            }
        }
    }

    #[test]
    fn raw_bounds_decode() {
        assert_eq!(Arity::from_raw(2, UNLIMITED_ARGUMENTS), Arity::at_least(2));
        assert_eq!(Arity::from_raw(1, 1), Arity::exact(1));
        assert_eq!(Arity::from_raw(0, 3), Arity::range(0, 3));
    }

    #[test]
    fn arity_error_new_does_not_raise() {
        let mut vm = ModelVm::default();
        let error = arity_error_new(&mut vm, 0, Arity::exact(1));
        assert_eq!(vm.raised_count(), 0);
        assert_eq!(
            vm.exception_message(error).as_deref(),
            Some("wrong number of arguments (given 0, expected 1)")
        );
    }

    #[test]
    fn empty_keywords_pass() {
        let mut vm = ModelVm::default();
        let empty = vm.new_hash(&[]);
        assert!(check_no_extra_keywords(&mut vm, Some(empty)).is_ok());
        assert!(check_no_extra_keywords(&mut vm, None).is_ok());
    }

    #[test]
    fn extra_keywords_listed_in_order() {
        let mut vm = ModelVm::default();
        let b = vm.new_symbol("b");
        let a = vm.new_symbol("a");
        let kw = vm.new_hash(&[(b, Value::from_fixnum(1)), (a, Value::NIL)]);

        let result = check_no_extra_keywords(&mut vm, Some(kw));
        assert_eq!(message_of(&vm, result), "unknown keywords: [:b, :a]");
    }

    #[test]
    fn cast_failure_names_the_type() {
        let mut vm = ModelVm::default();
        let raised = raise_cast_failure(&mut vm, Value::from_fixnum(5), "T.cast", "String")
            .unwrap_err();
        assert_eq!(vm.exception_class_name(raised.exception), "TypeError");
        assert_eq!(
            vm.exception_message(raised.exception).as_deref(),
            Some("T.cast: Expected type String, got type Integer with value 5")
        );
    }
}
