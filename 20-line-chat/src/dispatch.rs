//! Executes parsed commands for one session.
//!
//! Replies are returned to the caller as an [`Outcome`] rather than written
//! here, so the connection handler stays the only place that touches a
//! socket. Chat lines are the exception: they are queued for every registry
//! member directly.

use tracing::{debug, info, warn};

use crate::command::{Command, Credentials};
use crate::registry::{ConnectionId, Registry};
use crate::store::{CredentialStore, Registration, StoreError};

/// Login allowed to run `LISTALL` and `LISTONLINE`.
pub const ADMIN_LOGIN: &str = "admin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Send this line back to the originator.
    Reply(String),
    /// The line was broadcast; nothing goes back directly.
    Broadcast { recipients: usize },
    /// Send this line back, then close the connection.
    Disconnect(String),
}

/// Per-connection authentication state.
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    login: Option<String>,
}

impl Session {
    pub fn new(id: ConnectionId) -> Self {
        Self { id, login: None }
    }

    pub fn login(&self) -> Option<&str> {
        self.login.as_deref()
    }

    fn is_admin(&self) -> bool {
        self.login() == Some(ADMIN_LOGIN)
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    store: CredentialStore,
    registry: Registry,
}

impl Dispatcher {
    pub fn new(store: CredentialStore, registry: Registry) -> Self {
        Self { store, registry }
    }

    /// Parses and executes one raw line.
    pub async fn dispatch_line(&self, session: &mut Session, line: &str) -> Outcome {
        match Command::parse(line) {
            Ok(command) => self.dispatch(session, command).await,
            Err(err) => Outcome::Reply(err.to_string()),
        }
    }

    pub async fn dispatch(&self, session: &mut Session, command: Command) -> Outcome {
        debug!(connection = session.id, command = command.name(), "dispatching");

        match command {
            Command::Quit => Outcome::Disconnect("Bye".to_string()),
            Command::Logout => {
                self.set_login(session, None);
                reply("Logged out")
            }
            Command::ListAll => {
                if !session.is_admin() {
                    return reply("You are not admin");
                }
                match self.store.usernames_async().await {
                    Ok(usernames) => list_reply(&usernames),
                    Err(err) => storage_failure(session, err),
                }
            }
            Command::ListOnline => {
                if !session.is_admin() {
                    return reply("You are not admin");
                }
                list_reply(&self.registry.snapshot_logins())
            }
            Command::Login(credentials) => self.login(session, credentials).await,
            Command::Register(credentials) => self.register(session, credentials).await,
            Command::Chat(text) => self.chat(session, &text),
        }
    }

    async fn login(&self, session: &mut Session, credentials: Credentials) -> Outcome {
        let Credentials { username, password } = credentials;
        match self.store.lookup_async(&username).await {
            Ok(None) => reply("No such account"),
            Ok(Some(stored)) if stored != password => {
                info!(connection = session.id, %username, "rejected login");
                reply("Wrong password")
            }
            Ok(Some(_)) => {
                info!(connection = session.id, %username, "logged in");
                self.set_login(session, Some(username));
                reply("Logged in")
            }
            Err(err) => storage_failure(session, err),
        }
    }

    async fn register(&self, session: &mut Session, credentials: Credentials) -> Outcome {
        let Credentials { username, password } = credentials;
        match self.store.create_async(&username, &password).await {
            Ok(Registration::AlreadyExists) => reply("User already exists"),
            Ok(Registration::Created) => {
                info!(connection = session.id, %username, "registered");
                self.set_login(session, Some(username));
                reply("Registered")
            }
            Err(err) => storage_failure(session, err),
        }
    }

    fn chat(&self, session: &Session, text: &str) -> Outcome {
        let Some(login) = session.login() else {
            return reply("Need to login");
        };
        let recipients = self.registry.broadcast(&format!("{login}: {text}"));
        Outcome::Broadcast { recipients }
    }

    fn set_login(&self, session: &mut Session, login: Option<String>) {
        self.registry.set_login(session.id, login.as_deref());
        session.login = login;
    }
}

fn reply(text: &str) -> Outcome {
    Outcome::Reply(text.to_string())
}

fn list_reply(names: &[String]) -> Outcome {
    Outcome::Reply(format!("All users: {}", names.join(" ")))
}

fn storage_failure(session: &Session, err: StoreError) -> Outcome {
    warn!(connection = session.id, error = %err, "credential store operation failed");
    reply("Storage failure")
}
