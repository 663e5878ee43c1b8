use std::process;

fn main() {
    if let Err(e) = caby::cli::run_cli() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
