use clap::Parser;

fn main() {
    let cli = tvshimctl::Cli::parse();
    if let Err(err) = tvshimctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
