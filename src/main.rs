fn main() {
    std::process::exit(eac::cli::run_cli());
}
