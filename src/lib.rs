pub mod ast;
pub mod evaluator;
pub mod lexer;
pub mod object;
pub mod parser;
pub mod token;

use std::sync::Once;

use ast::Node;
use parser::ParseError;

pub use evaluator::{evaluate, EvalError};
pub use lexer::tokenize;
pub use object::{Environment, MutableEnvironment, Object, RObject};
pub use parser::parse;

const MONKEY_FACE: &str = r#"
            __,__
   .--.  .-"     "-.  .--.
  / .. \/  .-. .-.  \/ .. \
 | |  '|  /   Y   \  |'  | |
 | \   \  \ 0 | 0 /  /   / |
  \ '- ,\.-"""""""-./, -' /
   ''-' /_   ^ ^   _\ '-''
       |  \._   _./  |
       \   \ '~' /   /
        '._ '-=-' _.'
           '-----'
"#;

static TRACING_INIT: Once = Once::new();

/// Installs a `tracing` subscriber filtered by `RUST_LOG`.
///
/// Does nothing when `RUST_LOG` is unset, and only the first call has any effect.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}

/// A REPL session: one global environment that outlives every line fed to it.
pub struct Interpreter {
    environment: MutableEnvironment,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Interpreter {
        Interpreter {
            environment: Environment::new(),
        }
    }

    /// Runs one chunk of source and renders what the REPL should print.
    ///
    /// Input with syntax errors is never evaluated.
    pub fn interpret(&mut self, input: &str) -> String {
        let (program, errors) = parse(tokenize(input));
        if !errors.is_empty() {
            return format_parser_errors(&errors);
        }
        evaluate(Node::Program(&program), &self.environment).inspect()
    }
}

fn format_parser_errors(errors: &[ParseError]) -> String {
    let mut out = format!(
        "{}Whoops! We ran into some monkey business here!\n parser errors:\n",
        MONKEY_FACE
    );
    for err in errors {
        out.push('\t');
        out.push_str(&err.to_string());
        out.push('\n');
    }
    out
}
