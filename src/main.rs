fn main() {
    if let Err(e) = rehabcare_lib::run() {
        eprintln!("rehabcare: {e}");
        std::process::exit(1);
    }
}
