#![forbid(unsafe_code)]

fn main() {
    if let Err(error) = sponge_cli::run_from_env() {
        eprintln!("sponge: {error}");
        std::process::exit(error.exit_code());
    }
}
