fn main() {
    let code = tvshimctl::shim::main_with_args(std::env::args_os().skip(1));
    std::process::exit(code);
}
