use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::server::DEFAULT_QUEUE_CAPACITY;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server.
    Server(ServerArgs),
    /// Connect to a server, printing received lines and sending typed ones.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// TCP address to listen on. A bare `:port` listens on all interfaces.
    #[arg(long, default_value = ":8080")]
    pub listen: String,

    /// Credential database file, created on first start.
    #[arg(long, default_value = "chat.redb")]
    pub db: PathBuf,

    /// Lines buffered per connection before broadcasts to it are dropped.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
}

impl ServerArgs {
    pub fn listen_addr(&self) -> String {
        normalize_listen_addr(&self.listen)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the server to connect to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub server: String,
}

/// `:8080` is accepted as shorthand for `0.0.0.0:8080`.
pub fn normalize_listen_addr(listen: &str) -> String {
    match listen.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => listen.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_listens_everywhere() {
        assert_eq!(normalize_listen_addr(":8080"), "0.0.0.0:8080");
        assert_eq!(normalize_listen_addr("127.0.0.1:0"), "127.0.0.1:0");
        assert_eq!(normalize_listen_addr("localhost:9000"), "localhost:9000");
    }

    #[test]
    fn server_defaults() {
        let cli = Cli::parse_from(["line-chat", "server"]);
        let Command::Server(args) = cli.command else {
            panic!("expected server subcommand");
        };
        assert_eq!(args.listen_addr(), "0.0.0.0:8080");
        assert_eq!(args.db, PathBuf::from("chat.redb"));
        assert_eq!(args.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }
}
