use monkeyinterpreter::{init_tracing, Interpreter};
use rustyline::{error::ReadlineError, DefaultEditor};

const GREETING_MESSAGE: &str =
    "Hello! This is the Monkey programming language!\nFeel free to type in commands";
const PROMPT: &str = ">> ";

fn main() -> rustyline::Result<()> {
    init_tracing();

    let mut rl = DefaultEditor::new()?;
    let mut interpreter = Interpreter::new();
    println!("{}", GREETING_MESSAGE);

    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                rl.add_history_entry(line.as_str())?;
                println!("{}", interpreter.interpret(&line));
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }
    Ok(())
}
