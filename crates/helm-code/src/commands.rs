//! Turns input lines into command intents.
//!
//! Lines starting with `/` are commands; everything else is a request for
//! the model. A line starting with `//` submits the rest with one slash
//! stripped, so a request can begin with a slash.

use helm_rs::agent::{Command, Mode};

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Command(Command),
    Help,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (type /help for commands)", self.0)
    }
}

impl std::error::Error for ParseError {}

pub const HELP: &str = "\
Commands:
  /new               start a new session (the current one is saved)
  /resume <id>       resume a saved session
  /sessions          list saved sessions
  /reindex           reconnect tool servers and reload project memory
  /memory            edit the project memory file in $EDITOR
  /mode <mode>       switch to ask, plan, code or auto
  /ask /plan /code /auto
                     shortcuts for /mode
  /cycle             switch to the next mode
  /cancel            interrupt the running turn (Ctrl-C also works)
  /exit              save the session and quit
  /quit              quit without saving
  /help              show this list
Anything else is sent to the model.";

pub fn parse_line(line: &str) -> Result<Input, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    if let Some(rest) = line.strip_prefix("//") {
        return Ok(Input::Command(Command::Submit(format!("/{rest}"))));
    }
    let Some(body) = line.strip_prefix('/') else {
        return Ok(Input::Command(Command::Submit(line.to_string())));
    };

    let (name, arg) = match body.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, Some(arg.trim()).filter(|a| !a.is_empty())),
        None => (body, None),
    };

    let command = match (name.to_ascii_lowercase().as_str(), arg) {
        ("help" | "h" | "?", _) => return Ok(Input::Help),
        ("new", None) => Command::NewSession,
        ("resume", Some(id)) => Command::Resume(id.to_string()),
        ("resume", None) => return Err(ParseError("/resume needs a session id".into())),
        ("sessions", None) => Command::ListSessions,
        ("reindex", None) => Command::Reindex,
        ("memory", None) => Command::EditMemory,
        ("mode", Some(mode)) => Command::SetMode(
            mode.parse::<Mode>()
                .map_err(|_| ParseError(format!("unknown mode '{mode}'")))?,
        ),
        ("mode", None) => return Err(ParseError("/mode needs ask, plan, code or auto".into())),
        ("ask", None) => Command::SetMode(Mode::Ask),
        ("plan", None) => Command::SetMode(Mode::Plan),
        ("code", None) => Command::SetMode(Mode::Code),
        ("auto", None) => Command::SetMode(Mode::Auto),
        ("cycle", None) => Command::CycleMode,
        ("cancel", None) => Command::Cancel,
        ("exit", None) => Command::ExitAndSave,
        ("quit", None) => Command::ExitWithoutSaving,
        (other, Some(_)) if is_known(other) => {
            return Err(ParseError(format!("/{other} takes no argument")));
        }
        (other, _) => return Err(ParseError(format!("unknown command /{other}"))),
    };
    Ok(Input::Command(command))
}

fn is_known(name: &str) -> bool {
    matches!(
        name,
        "new" | "sessions" | "reindex" | "memory" | "ask" | "plan" | "code" | "auto" | "cycle"
            | "cancel" | "exit" | "quit"
    )
}

/// Answer to a confirmation prompt: `y`/`yes`, or `n`/`no` with an
/// optional reason. `None` means the line was neither.
pub fn parse_confirmation(line: &str) -> Option<Result<(), Option<String>>> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    match word.to_ascii_lowercase().as_str() {
        "y" | "yes" if rest.is_empty() => Some(Ok(())),
        "n" | "no" => Some(Err((!rest.is_empty()).then(|| rest.to_string()))),
        _ => None,
    }
}
