// src/banner.rs

/// Prints the application startup banner to the console.
pub fn print_banner() {
    // Using a raw string literal for the multi-line banner
    let banner = r#"
              _                                _
   __ _ _   _(_)____      __ _  __ _  ___ _ __ | |_
  / _` | | | | |_  /____ / _` |/ _` |/ _ \ '_ \| __|
 | (_| | |_| | |/ /_____| (_| | (_| |  __/ | | | |_
  \__, |\__,_|_/___|     \__,_|\__, |\___|_| |_|\__|
     |_|                       |___/

    Quiz Chain Solver
"#;
    println!("{}", banner);
}
