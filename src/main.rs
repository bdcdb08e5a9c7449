fn main() {
    if let Err(err) = record_import::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
