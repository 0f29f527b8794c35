use crate::{
    ast::{
        BlockStatement, CallExpression, Expression, FunctionLiteral, Identifier, IfExpression,
        Node, PrefixExpression, Program, Statement,
    },
    object::{Environment, Function, MutableEnvironment, Object, RObject},
    token::{Token, TokenKind},
};
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use self::builtin::get_builtins;
pub use error::EvalError;

mod builtin;
mod error;

pub type EvalResult = Result<RObject, EvalError>;

/// Evaluates an operand, handing a return signal straight back to the caller
/// so it is never used as an ordinary value.
macro_rules! operand {
    ($value:expr) => {{
        let value = $value?;
        if value.is_return() {
            return Ok(value);
        }
        value
    }};
}

/// Evaluates `node` against `env`, turning a runtime failure into an
/// [`Object::Error`] value.
///
/// Evaluation recurses on the host stack, so sufficiently deep Monkey
/// recursion overflows it and aborts the process.
pub fn evaluate(node: Node, env: &MutableEnvironment) -> RObject {
    match Evaluator::new().eval(node, env) {
        Ok(value) => value,
        Err(e) => Rc::new(Object::Error(e.to_string())),
    }
}

pub struct Evaluator {
    builtins: HashMap<&'static str, RObject>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Evaluator {
        Evaluator {
            builtins: get_builtins(),
        }
    }

    pub fn eval(&self, node: Node, env: &MutableEnvironment) -> EvalResult {
        match node {
            Node::Expression(e) => self.eval_expression(e, env),
            Node::Statement(s) => self.eval_statement(s, env),
            Node::Program(p) => self.eval_program(p, env),
            Node::BlockStatement(b) => self.eval_block_statement(b, env),
        }
    }

    pub fn eval_program(&self, program: &Program, env: &MutableEnvironment) -> EvalResult {
        let mut result = Object::null();
        for statement in program.statements.iter() {
            result = self.eval_statement(statement, env)?;
            if let Object::Return(value) = &*result {
                return Ok(Rc::clone(value));
            }
        }
        Ok(result)
    }

    /// Runs a block in the scope it is given. A return signal is handed back
    /// still wrapped so enclosing blocks stop too.
    fn eval_block_statement(
        &self,
        block: &BlockStatement,
        env: &MutableEnvironment,
    ) -> EvalResult {
        let mut result = Object::null();
        for statement in block.statements.iter() {
            result = self.eval_statement(statement, env)?;
            if result.is_return() {
                return Ok(result);
            }
        }
        Ok(result)
    }

    fn eval_statement(&self, statement: &Statement, env: &MutableEnvironment) -> EvalResult {
        match statement {
            Statement::LetStatement(l) => {
                let value = operand!(self.eval_expression(&l.value, env));
                env.borrow_mut().set(&l.name.name, &value);
                Ok(value)
            }
            Statement::ExpressionStatement(e) => self.eval_expression(&e.expression, env),
            Statement::ReturnStatement(s) => {
                let value = operand!(self.eval_expression(&s.return_value, env));
                Ok(Rc::new(Object::Return(value)))
            }
        }
    }

    fn eval_expression(&self, expression: &Expression, env: &MutableEnvironment) -> EvalResult {
        match expression {
            Expression::IntegerLiteral(x) => Ok(Rc::new(Object::Integer(x.value))),
            Expression::StringLiteral(x) => Ok(Rc::new(Object::String(x.value.clone()))),
            Expression::Boolean(b) => Ok(Object::boolean(b.value)),
            Expression::Identifier(i) => self.eval_identifier(i, env),
            Expression::PrefixExpression(e) => self.eval_prefix_expression(e, env),
            Expression::InfixExpression(e) => {
                let left = operand!(self.eval_expression(&e.left, env));
                let right = operand!(self.eval_expression(&e.right, env));
                self.eval_infix_expression(&e.token, &left, &right)
            }
            Expression::IfExpression(e) => self.eval_if_expression(e, env),
            Expression::FunctionLiteral(f) => Ok(self.eval_function_literal(f, env)),
            Expression::CallExpression(e) => self.eval_call_expression(e, env),
        }
    }

    fn eval_identifier(&self, identifier: &Identifier, env: &MutableEnvironment) -> EvalResult {
        let bound = env.borrow().get(&identifier.name);
        bound
            .or_else(|| self.builtins.get(identifier.name.as_str()).map(Rc::clone))
            .ok_or_else(|| EvalError::IdentifierNotFound(identifier.name.clone()))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(function = %exp.function))]
    fn eval_call_expression(&self, exp: &CallExpression, env: &MutableEnvironment) -> EvalResult {
        let function = operand!(self.eval_expression(&exp.function, env));
        if !matches!(*function, Object::Function(_) | Object::Builtin(_)) {
            return Err(EvalError::NotAFunction(function.type_name()));
        }
        let arguments = match self.eval_expressions(&exp.arguments, env)? {
            Ok(arguments) => arguments,
            Err(signal) => return Ok(signal),
        };
        debug!(arguments = arguments.len(), "applying function");
        self.apply_function(&function, &arguments)
    }

    fn apply_function(&self, function: &RObject, arguments: &[RObject]) -> EvalResult {
        let function = match function.as_ref() {
            Object::Function(f) => f,
            Object::Builtin(b) => return (b.func)(arguments),
            other => return Err(EvalError::NotAFunction(other.type_name())),
        };
        if arguments.len() != function.parameters.len() {
            return Err(EvalError::WrongArgumentCount {
                want: function.parameters.len(),
                got: arguments.len(),
            });
        }
        // The call scope hangs off the defining scope, not the caller's.
        let extended_env = Environment::new_enclosed(&function.environment);
        for (ident, value) in function.parameters.iter().zip(arguments) {
            extended_env.borrow_mut().set(&ident.name, value);
        }
        let result = self.eval_block_statement(&function.body, &extended_env)?;
        Ok(unwrap_return_value(result))
    }

    /// Evaluates left to right. The inner `Err` carries a return signal that
    /// cut the list short.
    fn eval_expressions(
        &self,
        expressions: &[Expression],
        env: &MutableEnvironment,
    ) -> Result<Result<Vec<RObject>, RObject>, EvalError> {
        let mut result = Vec::with_capacity(expressions.len());
        for e in expressions {
            let value = self.eval_expression(e, env)?;
            if value.is_return() {
                return Ok(Err(value));
            }
            result.push(value);
        }
        Ok(Ok(result))
    }

    fn eval_function_literal(&self, fl: &FunctionLiteral, env: &MutableEnvironment) -> RObject {
        Rc::new(Object::Function(Function {
            environment: Rc::clone(env),
            parameters: Rc::clone(&fl.parameters),
            body: Rc::clone(&fl.body),
        }))
    }

    fn eval_if_expression(
        &self,
        expression: &IfExpression,
        env: &MutableEnvironment,
    ) -> EvalResult {
        let condition = operand!(self.eval_expression(&expression.condition, env));
        if is_truthy(&condition) {
            return self.eval_block_statement(&expression.consequence, env);
        }
        match &expression.alternate {
            Some(block) => self.eval_block_statement(block, env),
            None => Ok(Object::null()),
        }
    }

    fn eval_prefix_expression(
        &self,
        e: &PrefixExpression,
        env: &MutableEnvironment,
    ) -> EvalResult {
        let right = operand!(self.eval_expression(&e.right, env));
        match (e.token.kind, right.as_ref()) {
            (TokenKind::Bang, _) => Ok(Object::boolean(!is_truthy(&right))),
            (TokenKind::Minus, Object::Integer(i)) => {
                Ok(Rc::new(Object::Integer(i.wrapping_neg())))
            }
            _ => Err(EvalError::UnknownPrefixOperator {
                operator: e.operator.clone(),
                right: right.type_name(),
            }),
        }
    }

    fn eval_infix_expression(
        &self,
        operator: &Token,
        left: &RObject,
        right: &RObject,
    ) -> EvalResult {
        match (left.as_ref(), right.as_ref()) {
            (&Object::Integer(l), &Object::Integer(r)) => {
                eval_integer_infix_expression(operator, l, r)
            }
            (Object::String(l), Object::String(r)) if operator.is(TokenKind::Plus) => {
                Ok(Rc::new(Object::String(format!("{}{}", l, r))))
            }
            // Only the shared singletons (and the same allocation) compare equal here.
            _ if operator.is(TokenKind::Eq) => Ok(Object::boolean(Rc::ptr_eq(left, right))),
            _ if operator.is(TokenKind::NotEq) => Ok(Object::boolean(!Rc::ptr_eq(left, right))),
            _ if left.type_name() != right.type_name() => Err(EvalError::TypeMismatch {
                left: left.type_name(),
                operator: operator.literal.clone(),
                right: right.type_name(),
            }),
            _ => Err(unknown_infix_operator(operator, left, right)),
        }
    }
}

fn eval_integer_infix_expression(operator: &Token, l: i64, r: i64) -> EvalResult {
    let res = match operator.kind {
        TokenKind::Plus => Object::Integer(l.wrapping_add(r)),
        TokenKind::Minus => Object::Integer(l.wrapping_sub(r)),
        TokenKind::Asterisk => Object::Integer(l.wrapping_mul(r)),
        TokenKind::Slash => {
            if r == 0 {
                return Err(EvalError::DivisionByZero);
            }
            Object::Integer(l.wrapping_div(r))
        }
        TokenKind::Lt => return Ok(Object::boolean(l < r)),
        TokenKind::Gt => return Ok(Object::boolean(l > r)),
        TokenKind::Eq => return Ok(Object::boolean(l == r)),
        TokenKind::NotEq => return Ok(Object::boolean(l != r)),
        _ => {
            return Err(EvalError::UnknownInfixOperator {
                left: "INTEGER",
                operator: operator.literal.clone(),
                right: "INTEGER",
            })
        }
    };
    Ok(Rc::new(res))
}

fn unknown_infix_operator(operator: &Token, left: &Object, right: &Object) -> EvalError {
    EvalError::UnknownInfixOperator {
        left: left.type_name(),
        operator: operator.literal.clone(),
        right: right.type_name(),
    }
}

fn is_truthy(object: &Object) -> bool {
    match object {
        Object::Boolean(b) => *b,
        Object::Null => false,
        _ => true,
    }
}

fn unwrap_return_value(object: RObject) -> RObject {
    match object.as_ref() {
        Object::Return(value) => Rc::clone(value),
        _ => object,
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use crate::{
        ast::Node,
        lexer::Lexer,
        object::{Environment, Object, RObject},
        parser::Parser,
    };

    use super::{evaluate, EvalResult, Evaluator};

    impl Object {
        fn get_integer(&self) -> Option<i64> {
            match self {
                Object::Integer(x) => Some(*x),
                _ => None,
            }
        }

        fn get_boolean(&self) -> Option<bool> {
            match self {
                Object::Boolean(x) => Some(*x),
                _ => None,
            }
        }

        fn is_null(&self) -> bool {
            matches!(self, Object::Null)
        }
    }

    fn test_eval(input: &str) -> EvalResult {
        let l = Lexer::new(input);
        let mut p = Parser::new(l);
        let program = p.parse_program().unwrap();
        Evaluator::new().eval(Node::Program(&program), &Environment::new())
    }

    fn eval_integer(input: &str) -> i64 {
        let res = test_eval(input).unwrap();
        res.get_integer()
            .unwrap_or_else(|| panic!("{} evaluated to {:?}, not an integer", input, res))
    }

    fn eval_boolean(input: &str) -> bool {
        let res = test_eval(input).unwrap();
        res.get_boolean()
            .unwrap_or_else(|| panic!("{} evaluated to {:?}, not a boolean", input, res))
    }

    #[test]
    fn test_evaluate_int_expression() {
        let tests = [
            ("5", 5),
            ("10", 10),
            ("-5", -5),
            ("-10", -10),
            ("5 + 5 + 5 + 5 - 10", 10),
            ("2 * 2 * 2 * 2 * 2", 32),
            ("-50 + 100 + -50", 0),
            ("5 * 2 + 10", 20),
            ("5 + 2 * 10", 25),
            ("20 + 2 * -10", 0),
            ("50 / 2 * 2 + 10", 60),
            ("2 * (5 + 10)", 30),
            ("3 * 3 * 3 + 10", 37),
            ("3 * (3 * 3) + 10", 37),
            ("(5 + 10 * 2 + 15 / 3) * 2 + -10", 50),
            ("7 / 2", 3),
            ("-7 / 2", -3),
        ];

        for tc in tests.iter() {
            assert_eq!(tc.1, eval_integer(tc.0), "input {}", tc.0);
        }
    }

    #[test]
    fn test_integer_arithmetic_wraps() {
        assert_eq!(eval_integer("9223372036854775807 + 1"), i64::MIN);
        assert_eq!(eval_integer("-9223372036854775807 - 2"), i64::MAX);
        assert_eq!(eval_integer("(-9223372036854775807 - 1) / -1"), i64::MIN);
        assert_eq!(eval_integer("-(-9223372036854775807 - 1)"), i64::MIN);
        assert_eq!(eval_integer("9223372036854775807 * 2"), -2);
    }

    #[test]
    fn test_builtin_functions() {
        let tests = [
            (r#"len("")"#, Ok(0)),
            (r#"len("four")"#, Ok(4)),
            (r#"len("hello world")"#, Ok(11)),
            ("len(1)", Err("argument to `len` not supported, got INTEGER")),
            (
                r#"len("one", "two")"#,
                Err("wrong number of arguments: want=1, got=2"),
            ),
        ];

        for tc in tests.iter() {
            let res = test_eval(tc.0);
            match &tc.1 {
                Ok(x) => assert_eq!(*x, res.unwrap().get_integer().unwrap()),
                Err(e) => assert_eq!(*e, res.err().unwrap().to_string()),
            }
        }
    }

    #[test]
    fn test_evaluate_string_expression() {
        let tests = [
            ("\"Hello World!\"", "Hello World!"),
            ("\"Hello\" + \" \" + \"World!\"", "Hello World!"),
            ("\"foo\" + \"bar\" + \"baz\"", "foobarbaz"),
        ];

        for tc in tests.iter() {
            let res = test_eval(tc.0).unwrap();
            assert_eq!(tc.1, res.as_string().unwrap());
        }
    }

    #[test]
    fn test_evaluate_bool_expressions() {
        let tests = [
            ("true", true),
            ("false", false),
            ("1 < 2", true),
            ("1 > 2", false),
            ("1 < 1", false),
            ("1 > 1", false),
            ("1 == 1", true),
            ("1 != 1", false),
            ("1 == 2", false),
            ("1 != 2", true),
            ("true == true", true),
            ("false == false", true),
            ("true == false", false),
            ("true != false", true),
            ("false != true", true),
            ("(1 < 2) == true", true),
            ("(1 < 2) == false", false),
            ("(1 > 2) == true", false),
            ("(1 > 2) == false", true),
            ("1 == true", false),
            ("1 != true", true),
        ];

        for tc in tests.iter() {
            assert_eq!(tc.1, eval_boolean(tc.0), "input {}", tc.0);
        }
    }

    #[test]
    fn test_string_equality_is_identity() {
        let tests = [
            (r#""a" == "a""#, false),
            (r#""a" != "a""#, true),
            (r#"let s = "a"; s == s"#, true),
            ("let f = fn() { 1 }; f == f", true),
            ("fn() { 1 } == fn() { 1 }", false),
        ];

        for tc in tests.iter() {
            assert_eq!(tc.1, eval_boolean(tc.0), "input {}", tc.0);
        }
    }

    #[test]
    fn test_bang_operator() {
        let tests = [
            ("!true", false),
            ("!false", true),
            ("!5", false),
            ("!0", false),
            ("!\"\"", false),
            ("!!true", true),
            ("!!false", false),
            ("!!5", true),
            ("!if (false) { 1 }", true),
        ];

        for tc in tests.iter() {
            assert_eq!(tc.1, eval_boolean(tc.0), "input {}", tc.0);
        }
    }

    #[test]
    fn test_booleans_are_singletons() {
        let a = test_eval("1 < 2").unwrap();
        let b = test_eval("true").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        let n = test_eval("if (false) { 1 }").unwrap();
        assert!(Rc::ptr_eq(&n, &Object::null()));
    }

    #[test]
    fn test_if_else_expression() {
        let tests = [
            ("if (true) { 10 }", Some(10)),
            ("if (false) { 10 }", None),
            ("if (1) { 10 }", Some(10)),
            ("if (0) { 10 }", Some(10)),
            ("if (1 < 2) { 10 }", Some(10)),
            ("if (1 > 2) { 10 }", None),
            ("if (1 > 2) { 10 } else { 20 }", Some(20)),
            ("if (1 < 2) { 10 } else { 20 }", Some(10)),
        ];

        for tc in tests.iter() {
            let o = test_eval(tc.0).unwrap();
            match tc.1 {
                Some(x) => assert_eq!(x, o.get_integer().unwrap()),
                None => assert!(o.is_null(), "{} should be null, got {:?}", tc.0, o),
            }
        }
    }

    #[test]
    fn test_return_statement() {
        let tests = [
            ("return 10;", 10),
            ("return 10; 9;", 10),
            ("return 2 * 5; 9;", 10),
            ("9; return 2 * 5; 9;", 10),
            ("if (10 > 1) { if (10 > 1) { return 10; } return 1; }", 10),
            (
                "let f = fn(x) { if (x > 1) { return x; } 0 }; f(5) + f(0)",
                5,
            ),
            ("let x = if (true) { return 5; }; 99", 5),
            ("let f = fn(a) { a + 1 }; f(if (true) { return 2; }); 99", 2),
            (
                "let g = fn() { let y = if (true) { return 7; }; 0 }; g()",
                7,
            ),
            (
                "let k = fn() { 100 + if (true) { return 3; } }; k()",
                3,
            ),
            ("-if (true) { return 4; }", 4),
            ("if (if (true) { return 6; }) { 1 } else { 2 }", 6),
            ("return if (true) { return 8; };", 8),
        ];
        for tc in tests.iter() {
            assert_eq!(eval_integer(tc.0), tc.1, "input {}", tc.0);
        }
    }

    #[test]
    fn test_error_handling() {
        let tests = [
            ("5 + true;", "type mismatch: INTEGER + BOOLEAN"),
            ("5 + true; 5;", "type mismatch: INTEGER + BOOLEAN"),
            ("-true", "unknown operator: -BOOLEAN"),
            ("-\"a\"", "unknown operator: -STRING"),
            ("true + false;", "unknown operator: BOOLEAN + BOOLEAN"),
            ("5; true + false; 5", "unknown operator: BOOLEAN + BOOLEAN"),
            (
                "if (10 > 1){ true + false; }",
                "unknown operator: BOOLEAN + BOOLEAN",
            ),
            (
                "
132
if (10 > 1){
if (10 > 1){
return true + false;
}
return 1;
}
",
                "unknown operator: BOOLEAN + BOOLEAN",
            ),
            ("foobar", "identifier not found: foobar"),
            ("\"Hello\" - \"World\"", "unknown operator: STRING - STRING"),
            ("\"a\" + 1", "type mismatch: STRING + INTEGER"),
            ("1 < true", "type mismatch: INTEGER < BOOLEAN"),
            ("5 / 0", "division by zero"),
            ("5(1)", "not a function: INTEGER"),
            ("true()", "not a function: BOOLEAN"),
            (
                "let f = fn(x) { x }; f()",
                "wrong number of arguments: want=1, got=0",
            ),
            (
                "let f = fn(x) { x }; f(1, 2)",
                "wrong number of arguments: want=1, got=2",
            ),
            ("let x = y; 5", "identifier not found: y"),
            ("return -true; 5", "unknown operator: -BOOLEAN"),
            ("fn(a, b) { a }(1, missing)", "identifier not found: missing"),
        ];

        for tc in tests.iter() {
            let res = test_eval(tc.0);
            let message = res.err().map(|e| e.to_string());
            assert_eq!(message, Some(tc.1.to_owned()), "input {}", tc.0);
        }
    }

    #[test]
    fn test_callee_checked_before_arguments() {
        let res = test_eval("5(missing)");
        assert_eq!(res.err().unwrap().to_string(), "not a function: INTEGER");
    }

    #[test]
    fn test_let_statements() {
        let tests = [
            ("let a = 5; a;", 5),
            ("let a = 5 * 5; a;", 25),
            ("let a = 5; let b = a; b;", 5),
            ("let a = 5; let b = a; let c = a + b + 5; c;", 15),
            ("let a = 1; let a = a + 1; a", 2),
            ("let a = 7;", 7),
        ];

        for tc in tests.iter() {
            assert_eq!(eval_integer(tc.0), tc.1, "input {}", tc.0);
        }
    }

    #[test]
    fn test_function_object() {
        let input = "fn(x) { x + 2; };";

        let res = test_eval(input).unwrap();
        let function = match res.as_ref() {
            Object::Function(f) => f,
            _ => panic!("Got {} instead of a function!", res.inspect()),
        };
        assert_eq!(1, function.parameters.len());
        assert_eq!("x", function.parameters[0].name);
        assert_eq!("(x + 2)", function.body.to_string());
        assert_eq!("fn(x) {\n(x + 2)\n}", res.inspect());
    }

    #[test]
    fn test_function_application() {
        let tests = [
            ("let identity = fn(x) { x; }; identity(5);", 5),
            ("let identity = fn(x) { return x; }; identity(5);", 5),
            ("let double = fn(x) { x * 2; }; double(5);", 10),
            ("let add = fn(x, y) { x + y; }; add(5, 5);", 10),
            ("let add = fn(x, y) { x + y; }; add(5 + 5, add(5, 5));", 20),
            ("fn(x) { x; }(5)", 5),
            ("let noop = fn() { }; if (noop()) { 1 } else { 2 }", 2),
        ];

        for tc in tests.iter() {
            assert_eq!(tc.1, eval_integer(tc.0), "input {}", tc.0);
        }
    }

    #[test]
    fn test_closures() {
        let input = "let newAdder = fn(x) {
fn(y) { x + y };
};
let addTwo = newAdder(2);
addTwo(2);";
        assert_eq!(4, eval_integer(input));
    }

    #[test]
    fn test_closures_are_lexical() {
        // `x` inside `f` resolves where `f` was defined, not where it is called.
        let input = "let x = 1;
let f = fn() { x };
let g = fn(x) { f() };
g(100)";
        assert_eq!(1, eval_integer(input));
    }

    #[test]
    fn test_call_scope_does_not_leak() {
        let res = test_eval("let f = fn(a) { let inner = a; inner }; f(1); inner");
        assert_eq!(
            res.err().unwrap().to_string(),
            "identifier not found: inner"
        );
    }

    #[test]
    fn test_blocks_share_enclosing_scope() {
        assert_eq!(3, eval_integer("if (true) { let b = 3; } b"));
    }

    #[test]
    fn test_recursion() {
        let input = "let fib = fn(n) {
if (n < 2) { return n; }
fib(n - 1) + fib(n - 2)
};
fib(15)";
        assert_eq!(610, eval_integer(input));
    }

    #[test]
    fn test_empty_program_is_null() {
        assert!(test_eval("").unwrap().is_null());
    }

    #[test]
    fn test_evaluate_turns_errors_into_values() {
        let env = Environment::new();
        let program = Parser::new(Lexer::new("-true")).parse_program().unwrap();
        let result: RObject = evaluate(Node::Program(&program), &env);
        assert!(result.is_error());
        assert_eq!(result.inspect(), "unknown operator: -BOOLEAN");
    }

    #[test]
    fn test_evaluate_single_nodes() {
        let env = Environment::new();
        let program = Parser::new(Lexer::new("let a = 2; return a * 3;"))
            .parse_program()
            .unwrap();
        let bound = evaluate(Node::Statement(&program.statements[0]), &env);
        assert_eq!(bound.get_integer(), Some(2));
        // A bare return statement stays wrapped; only programs and calls unwrap it.
        let returned = evaluate(Node::Statement(&program.statements[1]), &env);
        assert!(returned.is_return());
        assert_eq!(returned.inspect(), "6");
    }

    #[test]
    fn test_environment_persists_between_programs() {
        let env = Environment::new();
        let first = Parser::new(Lexer::new("let add = fn(a, b) { a + b };"))
            .parse_program()
            .unwrap();
        evaluate(Node::Program(&first), &env);
        let second = Parser::new(Lexer::new("add(2, 3)")).parse_program().unwrap();
        assert_eq!(evaluate(Node::Program(&second), &env).get_integer(), Some(5));
    }
}
