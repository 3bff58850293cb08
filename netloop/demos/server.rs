//! Example: print everything clients send
//!
//! Usage: `cargo run --example server -- [ip] [port]`
//!
//! Listens on 127.0.0.1:5000 by default. Close stdin (Ctrl-D) to stop.

use netloop::ServerBuilder;

use std::io::{self, BufRead};
use std::process::ExitCode;
use std::thread;

use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let ip = args.next().unwrap_or_else(|| "127.0.0.1".to_owned());
    let port = match args.next().map(|p| p.parse::<u16>()) {
        None => 5000,
        Some(Ok(port)) => port,
        Some(Err(e)) => {
            eprintln!("invalid port: {e}");
            return ExitCode::FAILURE;
        }
    };

    let server = ServerBuilder::new()
        .on_data(|id, bytes| println!("[{id}] {}", String::from_utf8_lossy(bytes)))
        .on_close(|id| println!("[{id}] closed"))
        .bind(&ip, port);

    let mut server = match server {
        Ok(server) => server,
        Err(e) => {
            eprintln!("failed to start server: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("listening on {}, close stdin to stop", server.local_addr());

    // Stop once stdin reaches EOF
    let handle = server.handle();
    thread::spawn(move || {
        for _ in io::stdin().lock().lines() {}
        handle.shutdown();
    });

    match server.start() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("server failed: {e}");
            ExitCode::FAILURE
        }
    }
}
