//! Interactive client for the Hex line server.
//!
//! Reads commands from stdin, one per line, and prints every line the
//! server sends back. Exits on stdin EOF or when the server hangs up.

use std::env;
use std::error::Error;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Where to connect: env override or default.
    let addr = env::var("HEX_CLIENT_ADDR").unwrap_or_else(|_| "127.0.0.1:8099".to_string());

    println!("Connecting to {}...", addr);
    let stream = TcpStream::connect(&addr).await?;
    println!("Connected.\n");

    let (read_half, mut write_half) = stream.into_split();
    let mut server_lines = BufReader::new(read_half).lines();
    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = server_lines.next_line() => match line? {
                Some(line) => println!("<< {}", line),
                None => {
                    println!("Server closed the connection.");
                    break;
                }
            },
            line = stdin_lines.next_line() => match line? {
                Some(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    write_half.write_all(format!("{}\n", trimmed).as_bytes()).await?;
                }
                None => {
                    println!("EOF on stdin, exiting client.");
                    break;
                }
            },
        }
    }

    Ok(())
}
