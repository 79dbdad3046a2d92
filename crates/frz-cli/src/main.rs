fn main() {
    let working_dir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("*** ERROR: cannot determine working directory: {e}");
            std::process::exit(1);
        }
    };
    std::process::exit(frz_cli::command(
        &working_dir,
        std::env::args_os().skip(1),
    ));
}
