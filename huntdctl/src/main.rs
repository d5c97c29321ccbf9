use clap::Parser;

fn main() {
    let cli = huntdctl::Cli::parse();
    if let Err(err) = huntdctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
