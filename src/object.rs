use std::{
    cell::RefCell,
    collections::HashMap,
    fmt::{self, Debug, Display},
    rc::Rc,
};

use crate::{
    ast::{BlockStatement, Identifier},
    evaluator::EvalError,
};

pub type RObject = Rc<Object>;
pub type MutableEnvironment = Rc<RefCell<Environment>>;

thread_local! {
    static NULL: RObject = Rc::new(Object::Null);
    static TRUE: RObject = Rc::new(Object::Boolean(true));
    static FALSE: RObject = Rc::new(Object::Boolean(false));
}

pub enum Object {
    Integer(i64),
    String(String),
    Boolean(bool),
    Null,
    Return(RObject),
    Error(String),
    Function(Function),
    Builtin(Builtin),
}

impl Object {
    /// The shared `null`. Every call hands back the same allocation.
    pub fn null() -> RObject {
        NULL.with(Rc::clone)
    }

    /// The shared `true`/`false`, so booleans compare by identity.
    pub fn boolean(value: bool) -> RObject {
        if value {
            TRUE.with(Rc::clone)
        } else {
            FALSE.with(Rc::clone)
        }
    }

    pub fn inspect(&self) -> String {
        match &self {
            Object::Integer(x) => x.to_string(),
            Object::Boolean(x) => x.to_string(),
            Object::String(x) => x.to_string(),
            Object::Null => "null".to_string(),
            Object::Return(x) => x.inspect(),
            Object::Error(message) => message.clone(),
            Object::Function(f) => f.inspect(),
            Object::Builtin(b) => format!("builtin function {}", b.name),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &self {
            Object::Integer(_) => "INTEGER",
            Object::String(_) => "STRING",
            Object::Boolean(_) => "BOOLEAN",
            Object::Null => "NULL",
            Object::Return(_) => "RETURN_VALUE",
            Object::Error(_) => "ERROR",
            Object::Function(_) => "FUNCTION",
            Object::Builtin(_) => "BUILTIN",
        }
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Object::Return(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Object::Error(_))
    }

    pub fn as_string(&self) -> Option<&String> {
        if let Self::String(v) = self {
            Some(v)
        } else {
            None
        }
    }
}

impl Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inspect())
    }
}

impl Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name(), self.inspect())
    }
}

/// A closure: the function literal's parts plus the scope it was defined in.
pub struct Function {
    pub environment: MutableEnvironment,
    pub parameters: Rc<Vec<Identifier>>,
    pub body: Rc<BlockStatement>,
}

impl Function {
    fn inspect(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|i| i.name.clone())
            .collect::<Vec<String>>()
            .join(", ");
        format!("fn({}) {{\n{}\n}}", params, self.body)
    }
}

pub type BuiltinFunction = fn(&[RObject]) -> Result<RObject, EvalError>;

pub struct Builtin {
    pub(crate) name: &'static str,
    pub(crate) func: BuiltinFunction,
}

pub struct Environment {
    parent: Option<MutableEnvironment>,
    store: HashMap<String, RObject>,
}

impl Environment {
    pub fn new() -> MutableEnvironment {
        Rc::new(RefCell::new(Environment {
            parent: None,
            store: HashMap::new(),
        }))
    }

    /// A fresh scope whose lookups fall through to `parent`.
    pub fn new_enclosed(parent: &MutableEnvironment) -> MutableEnvironment {
        Rc::new(RefCell::new(Environment {
            parent: Some(Rc::clone(parent)),
            store: HashMap::new(),
        }))
    }

    pub fn get(&self, name: &str) -> Option<RObject> {
        match self.store.get(name) {
            Some(o) => Some(Rc::clone(o)),
            None => self
                .parent
                .as_ref()
                .and_then(|parent| parent.borrow().get(name)),
        }
    }

    /// Binds `name` in this scope only; parents are never written.
    pub fn set(&mut self, name: &str, value: &RObject) {
        self.store.insert(name.to_owned(), Rc::clone(value));
    }
}
