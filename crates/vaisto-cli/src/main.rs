use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use smol_str::SmolStr;
use vaisto_iface::ModuleInterface;

#[derive(Parser)]
#[command(name = "vaisto", about = "The Vaisto language compiler")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Elaborate an expression as a synthesized main and print its type
    #[arg(long = "eval", value_name = "EXPR")]
    eval: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Elaborate a .va file and emit bytecode
    Compile {
        /// Path to the .va source file
        file: PathBuf,
        /// Output path (defaults to the source stem with .vab)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Resolve a directory of modules, elaborate in dependency order,
    /// and emit interface + bytecode files per module
    Build {
        /// Directory containing .va sources
        dir: PathBuf,
        /// Output directory (defaults to <dir>/out)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Scaffold a new package directory
    Init {
        /// Package name
        name: String,
    },
    /// Start the language server on stdin/stdout
    Lsp,
}

fn main() {
    let cli = Cli::parse();
    // Internal failures must never leak a stack trace; they surface as a
    // single E900 line with exit code 2.
    std::panic::set_hook(Box::new(|_| {}));
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run(cli))) {
        Ok(code) => std::process::exit(code),
        Err(_) => {
            eprintln!("error[E900]: internal error; please report this as a bug");
            std::process::exit(2);
        }
    }
}

fn run(cli: Cli) -> i32 {
    if let Some(expr) = cli.eval {
        return run_eval(&expr);
    }
    match cli.command {
        Some(Command::Compile { file, output }) => run_compile(&file, output),
        Some(Command::Build { dir, output }) => run_build(&dir, output),
        Some(Command::Init { name }) => run_init(&name),
        Some(Command::Lsp) => {
            let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
            runtime.block_on(vaisto_lsp::run_lsp());
            0
        }
        None => {
            eprintln!("error: no command given (try `vaisto compile <file>` or `--eval <expr>`)");
            1
        }
    }
}

fn read_file(file: &Path) -> Result<String, i32> {
    std::fs::read_to_string(file).map_err(|e| {
        eprintln!("error: could not read {}: {}", file.display(), e);
        1
    })
}

/// Parse + elaborate one source, rendering every diagnostic. `Err(1)`
/// when any error-severity diagnostic was produced.
fn check_source(
    display: &str,
    source: &str,
    imports: &[ModuleInterface],
) -> Result<vaisto_elab::ElabResult, i32> {
    let (module, parse_errors) = vaisto_parser::parse(source);
    let result = vaisto_elab::elaborate_with_imports(&module, imports);

    let mut all: Vec<vaisto_diag::Diagnostic> = parse_errors;
    all.extend(result.diagnostics.iter().cloned());
    all.sort_by_key(|d| (d.loc.start, d.loc.end));
    if !all.is_empty() {
        eprint!("{}", vaisto_diag::render_all(&all, display, source));
    }
    if all.iter().any(|d| d.is_error()) {
        return Err(1);
    }
    Ok(result)
}

fn run_compile(file: &Path, output: Option<PathBuf>) -> i32 {
    let source = match read_file(file) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let display = file.display().to_string();
    let result = match check_source(&display, &source, &[]) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let bytes = vaisto_emit::emit(&result.typed);
    let out_path = output.unwrap_or_else(|| file.with_extension("vab"));
    if let Err(e) = std::fs::write(&out_path, bytes) {
        eprintln!("error: could not write {}: {}", out_path.display(), e);
        return 1;
    }
    0
}

fn run_eval(expr: &str) -> i32 {
    if expr.trim().is_empty() {
        eprintln!("error[E200]: empty expression");
        return 1;
    }
    let result = match check_source("<eval>", expr, &[]) {
        Ok(r) => r,
        Err(code) => return code,
    };
    match result.typed.main.last() {
        Some(&id) => {
            println!("{}", result.typed.exprs[id].ty);
            0
        }
        None => {
            eprintln!("error[E200]: expected an expression");
            1
        }
    }
}

fn run_build(dir: &Path, output: Option<PathBuf>) -> i32 {
    let graph = match vaisto_pkg::resolve_dir(dir) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("error: {}", e);
            return 1;
        }
    };
    let out_dir = output.unwrap_or_else(|| dir.join("out"));
    if let Err(e) = std::fs::create_dir_all(&out_dir) {
        eprintln!("error: could not create {}: {}", out_dir.display(), e);
        return 1;
    }

    // Modules arrive leaves-first, so every import's interface is already
    // in the map when its importer is elaborated.
    let mut interfaces: HashMap<SmolStr, ModuleInterface> = HashMap::new();
    for m in &graph.modules {
        let source = match read_file(&m.path) {
            Ok(s) => s,
            Err(code) => return code,
        };
        let imports: Vec<ModuleInterface> = m
            .imports
            .iter()
            .filter_map(|i| interfaces.get(i).cloned())
            .collect();
        let display = m.path.display().to_string();
        let result = match check_source(&display, &source, &imports) {
            Ok(r) => r,
            Err(code) => return code,
        };

        let iface_path = out_dir.join(format!("{}.vai", m.name));
        if let Err(e) = result.interface.save(&iface_path) {
            eprintln!("error: {}", e);
            return 1;
        }
        let code_path = out_dir.join(format!("{}.vab", m.name));
        if let Err(e) = std::fs::write(&code_path, vaisto_emit::emit(&result.typed)) {
            eprintln!("error: could not write {}: {}", code_path.display(), e);
            return 1;
        }
        interfaces.insert(m.name.clone(), result.interface);
    }
    0
}

fn run_init(name: &str) -> i32 {
    let dir = Path::new(name);
    if dir.exists() {
        eprintln!("error: `{}` already exists", name);
        return 1;
    }
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("error: could not create {}: {}", dir.display(), e);
        return 1;
    }
    let main = format!(
        "(ns {name})\n\n(defn main []\n  (println \"Hello from {name}!\"))\n"
    );
    if let Err(e) = std::fs::write(dir.join("main.va"), main) {
        eprintln!("error: could not write main.va: {}", e);
        return 1;
    }
    println!("created {}/main.va", name);
    0
}
