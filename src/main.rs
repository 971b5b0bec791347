use stagewise::cli::Cli;

fn main() {
    // Errors are already logged by the time they reach here.
    if let Err(err) = Cli::handle_command_line() {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
