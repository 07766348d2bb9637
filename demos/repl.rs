use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use stackscheme::syntax::Binding;
use stackscheme::{Config, Machine};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();
    println!("stackscheme: a Scheme compiler and stack machine");
    println!("Enter programs like: (define (sq x) (* x x)) (sq 12)");
    println!("Each line is a complete program. Type :help for commands, or Ctrl+D to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("Could not initialize REPL: {err}");
            std::process::exit(1);
        }
    };
    let mut disassemble = false;

    loop {
        match rl.readline("stackscheme> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":env" => {
                        print_environment(config);
                        continue;
                    }
                    ":disasm" => {
                        disassemble = !disassemble;
                        println!(
                            "Disassembly {}",
                            if disassemble { "enabled" } else { "disabled" }
                        );
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                evaluate(config, line, disassemble);
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

/// Compile and run one line on a fresh machine
fn evaluate(config: Config, source: &str, disassemble: bool) {
    let mut machine = match Machine::new(config) {
        Ok(machine) => machine,
        Err(e) => {
            println!("Error: {e}");
            return;
        }
    };
    let compiled = machine
        .read(source)
        .and_then(|program| machine.compile(program));
    let entry = match compiled {
        Ok(entry) => entry,
        Err(e) => {
            println!("Error: {e}");
            return;
        }
    };
    if disassemble {
        match machine.disassemble(entry) {
            Ok(lines) => lines.iter().for_each(|line| println!("  {line}")),
            Err(e) => println!("Error: {e}"),
        }
    }

    let result = machine.execute(entry);
    let output = machine.take_output();
    if !output.is_empty() {
        print!("{output}");
        if !output.ends_with('\n') {
            println!();
        }
    }
    match result {
        Ok(value) => println!("{}", machine.write(value)),
        Err(e) => println!("Error: {e}"),
    }
    if disassemble {
        println!("  (stack high water: {})", machine.stack_high_water());
    }
}

fn print_help() {
    println!("Commands:");
    println!("  :help   - Show this help message");
    println!("  :env    - List the library's special forms, macros and procedures");
    println!("  :disasm - Toggle printing the compiled instruction graph");
    println!("  :quit   - Exit the interpreter");
    println!("  Ctrl+D  - Exit the interpreter");
    println!();
    println!("Environment:");
    println!("  RUST_LOG=stackscheme=debug     - Trace compilation and execution");
    println!(
        "  {}={}  - Object store size",
        stackscheme::HEAP_CAPACITY_VAR,
        stackscheme::DEFAULT_HEAP_CAPACITY
    );
    println!(
        "  {}={}  - Value stack size",
        stackscheme::STACK_CAPACITY_VAR,
        stackscheme::DEFAULT_STACK_CAPACITY
    );
    println!();
    println!("Examples:");
    println!("  (+ 1 (call/cc (lambda (k) (k 41))))");
    println!("  (let loop ((i 0)) (if (< i 3) (begin (display i) (loop (+ i 1))) 'done))");
    println!("  ((lambda (x . rest) (list x rest)) 1 2 3)");
    println!();
}

fn print_environment(config: Config) {
    let machine = match Machine::new(config) {
        Ok(machine) => machine,
        Err(e) => {
            println!("Error: {e}");
            return;
        }
    };
    let bindings = machine.bindings();

    let mut forms = Vec::new();
    let mut macros = Vec::new();
    let mut procedures = Vec::new();
    for &name in bindings.names() {
        let text = machine.write(name);
        match bindings.lookup(name) {
            Some(Binding::Syntax { .. }) => forms.push(text),
            Some(Binding::Macro { .. }) => macros.push(text),
            Some(Binding::Procedure { .. }) => procedures.push(text),
            None => {}
        }
    }

    println!("Library bindings ({} total):", bindings.len());
    for (title, names) in [
        ("Special forms", forms),
        ("Derived forms", macros),
        ("Procedures", procedures),
    ] {
        println!("{title} ({}):", names.len());
        for (col, name) in names.iter().enumerate() {
            print!("  {name:<15}");
            if col % 4 == 3 {
                println!();
            }
        }
        if names.len() % 4 != 0 {
            println!();
        }
        println!();
    }
}
