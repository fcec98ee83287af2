fn main() {
    if let Err(e) = wai::run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
