//! Line-oriented chat server with a persisted credential store.
//!
//! Clients speak a tiny text protocol over TCP, one command per line:
//! `REGISTER`, `LOGIN`, `LOGOUT`, `LISTALL`, `LISTONLINE`, `QUIT`, and plain
//! chat lines that are broadcast to every connected client once the sender
//! has logged in. Each module owns one responsibility:
//!
//! - [`cli`] parses the command-line interface for server and client modes.
//! - [`line`] reads and writes CRLF-terminated text lines.
//! - [`store`] keeps username/password records in a `redb` file.
//! - [`registry`] tracks live connections for broadcast and listing.
//! - [`connection`] owns one client socket and its writer task.
//! - [`command`] parses a line into a [`command::Command`].
//! - [`dispatch`] executes commands against the store and registry.
//! - [`server`] accepts TCP connections and runs one handler per client.
//! - [`client`] connects to a server and pumps lines between it and the
//!   terminal.

pub mod cli;
pub mod client;
pub mod command;
pub mod connection;
pub mod dispatch;
pub mod line;
pub mod registry;
pub mod server;
pub mod store;
