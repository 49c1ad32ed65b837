use std::fmt;

use thiserror::Error;

/// One parsed client line.
///
/// The keyword is everything before the first whitespace character and must
/// match exactly;
/// any line whose keyword is not recognised is a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Logout,
    ListAll,
    ListOnline,
    Login(Credentials),
    Register(Credentials),
    Chat(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Login and password is required")]
    MissingCredentials,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let (keyword, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        match keyword {
            "QUIT" => Ok(Self::Quit),
            "LOGOUT" => Ok(Self::Logout),
            "LISTALL" => Ok(Self::ListAll),
            "LISTONLINE" => Ok(Self::ListOnline),
            "LOGIN" => Credentials::parse(rest).map(Self::Login),
            "REGISTER" => Credentials::parse(rest).map(Self::Register),
            _ => Ok(Self::Chat(line.to_string())),
        }
    }

    /// Keyword used in logs; never includes arguments.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Quit => "QUIT",
            Self::Logout => "LOGOUT",
            Self::ListAll => "LISTALL",
            Self::ListOnline => "LISTONLINE",
            Self::Login(_) => "LOGIN",
            Self::Register(_) => "REGISTER",
            Self::Chat(_) => "chat",
        }
    }
}

impl Credentials {
    /// `<user> <pass>`, where the password is the remainder of the line and
    /// may itself contain spaces. Either token may be followed by any
    /// whitespace character.
    fn parse(args: &str) -> Result<Self, CommandError> {
        let (username, password) = args
            .split_once(char::is_whitespace)
            .ok_or(CommandError::MissingCredentials)?;
        if username.is_empty() || password.is_empty() {
            return Err(CommandError::MissingCredentials);
        }
        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}
