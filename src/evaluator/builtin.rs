use std::{collections::HashMap, rc::Rc};

use crate::object::{Builtin, BuiltinFunction, Object, RObject};

use super::EvalError;

pub fn get_builtins() -> HashMap<&'static str, RObject> {
    HashMap::from([("len", wrapped_builtin("len", len))])
}

fn wrapped_builtin(name: &'static str, func: BuiltinFunction) -> RObject {
    Rc::new(Object::Builtin(Builtin { name, func }))
}

fn len(args: &[RObject]) -> Result<RObject, EvalError> {
    validate_argument_count(args.len(), 1)?;
    match &*args[0] {
        Object::String(s) => Ok(Rc::new(Object::Integer(s.len() as i64))),
        other => Err(EvalError::UnsupportedArgument {
            function: "len",
            got: other.type_name(),
        }),
    }
}

fn validate_argument_count(got: usize, want: usize) -> Result<(), EvalError> {
    if got != want {
        return Err(EvalError::WrongArgumentCount { want, got });
    }
    Ok(())
}
