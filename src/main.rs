fn setup_environment() {
    std::env::remove_var("PYTHONHOME");
    std::env::remove_var("PYTHONPATH");
}

fn main() {
    setup_environment();
    if let Err(err) = reelqueue_lib::run() {
        eprintln!("reelqueue error: {:#}", err);
        std::process::exit(1);
    }
}
