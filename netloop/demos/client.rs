//! Example: forward stdin lines to a server
//!
//! Usage: `cargo run --example client -- [ip] [port]`
//!
//! Each line is sent without its trailing newline. Stops at EOF or when
//! the connection breaks.

use std::io::{self, BufRead, Write};
use std::net::TcpStream;
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let ip = args.next().unwrap_or_else(|| "127.0.0.1".to_owned());
    let port = args.next().unwrap_or_else(|| "5000".to_owned());

    let mut stream = match TcpStream::connect(format!("{ip}:{port}")) {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("failed to connect to {ip}:{port}: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("connected to {ip}:{port}");

    for line in io::stdin().lock().lines() {
        let Ok(line) = line else {
            break;
        };

        if let Err(e) = stream.write_all(line.as_bytes()) {
            eprintln!("connection lost: {e}");
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
