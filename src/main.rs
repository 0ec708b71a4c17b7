fn main() {
    let exit_code = match knit::run::run() {
        Ok(code) => code,
        Err(err) => {
            println!("knit: error: {}", err);
            1
        }
    };
    std::process::exit(exit_code);
}
