fn main() {
  match configver_lib::run() {
    Ok(code) => std::process::exit(code),
    Err(e) => {
      eprintln!("error: {:#}", e);
      std::process::exit(1);
    }
  }
}
