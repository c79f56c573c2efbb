//! Control-channel command parsing.
//!
//! One line in, one [`Command`] out. Verbs are matched case
//! insensitively; arguments keep their original form. Anything outside
//! the supported surface parses to [`Command::Unknown`] so the session
//! can answer with a clean 500 instead of dropping the connection.

/// A parsed control-channel command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // Pre-TLS and authentication
    Auth(String),
    User(String),
    Pass(String),
    Pbsz(String),
    Prot(String),

    // Session plumbing
    Syst,
    Feat,
    Type(String),
    Noop,
    Quit,

    // Directory navigation
    Pwd,
    Cwd(String),
    Cdup,
    Mkd(String),

    // File management
    Dele(String),
    Rnfr(String),
    Rnto(String),
    Size(String),

    // Data channel
    Pasv,
    Epsv,
    List(Option<String>),
    Nlst(Option<String>),
    Stor(String),
    Retr(String),

    /// Verb outside the supported surface.
    Unknown(String),
}

/// Parse one control line (without its CRLF terminator).
pub fn parse(line: &str) -> Command {
    let line = line.trim();
    let (verb, arg) = match line.split_once(' ') {
        Some((v, a)) => (v, a.trim()),
        None => (line, ""),
    };

    let required = |make: fn(String) -> Command| {
        if arg.is_empty() {
            Command::Unknown(verb.to_string())
        } else {
            make(arg.to_string())
        }
    };
    let optional = || {
        if arg.is_empty() {
            None
        } else {
            Some(arg.to_string())
        }
    };

    match verb.to_ascii_uppercase().as_str() {
        "AUTH" => required(Command::Auth),
        "USER" => required(Command::User),
        "PASS" => required(Command::Pass),
        "PBSZ" => required(Command::Pbsz),
        "PROT" => required(Command::Prot),
        "SYST" => Command::Syst,
        "FEAT" => Command::Feat,
        "TYPE" => required(Command::Type),
        "NOOP" => Command::Noop,
        "QUIT" => Command::Quit,
        "PWD" | "XPWD" => Command::Pwd,
        "CWD" => required(Command::Cwd),
        "CDUP" => Command::Cdup,
        "MKD" | "XMKD" => required(Command::Mkd),
        "DELE" => required(Command::Dele),
        "RNFR" => required(Command::Rnfr),
        "RNTO" => required(Command::Rnto),
        "SIZE" => required(Command::Size),
        "PASV" => Command::Pasv,
        "EPSV" => Command::Epsv,
        "LIST" => Command::List(optional()),
        "NLST" => Command::Nlst(optional()),
        "STOR" => required(Command::Stor),
        "RETR" => required(Command::Retr),
        other => Command::Unknown(other.to_string()),
    }
}
