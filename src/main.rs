fn main() {
    std::process::exit(serialtap_lib::run())
}
