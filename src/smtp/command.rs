use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};

use super::channel::LineChannel;
use super::state::SessionState;

pub const READY: &str = "220 Simple Mail Transfer service ready";
pub const OK: &str = "250 OK";
pub const BYE: &str = "221 Bye";
pub const EMPTY_COMMAND: &str = "550 Command must not be empty";
pub const NOT_RECOGNIZED: &str = "550 Command not recognized";
pub const ALREADY_STARTED: &str = "550 Session has started";
pub const NOT_STARTED: &str = "550 Session has not started yet.";
pub const HELO_SYNTAX: &str = "550 Invalid syntax (EHLO|HELO) domain";
pub const MAIL_SYNTAX: &str = "550 Invalid syntax MAIL FROM: <foo@example.net>";
pub const RCPT_SYNTAX: &str = "550 Invalid syntax RCPT TO: <foo@example.net>";
pub const VRFY_UNSUPPORTED: &str = "550 VRFY not supported";

/// Supported command verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Helo,
    Ehlo,
    Mail,
    Rcpt,
    Rset,
    Vrfy,
    Noop,
    Data,
    Quit,
}

/// Keyword to verb mapping. Matching is case sensitive.
const VERBS: &[(&str, Verb)] = &[
    ("HELO", Verb::Helo),
    ("EHLO", Verb::Ehlo),
    ("MAIL", Verb::Mail),
    ("RCPT", Verb::Rcpt),
    ("RSET", Verb::Rset),
    ("VRFY", Verb::Vrfy),
    ("NOOP", Verb::Noop),
    ("DATA", Verb::Data),
    ("QUIT", Verb::Quit),
];

/// What the session loop does after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

impl Verb {
    pub fn lookup(keyword: &str) -> Option<Self> {
        VERBS
            .iter()
            .find(|(name, _)| *name == keyword)
            .map(|(_, verb)| *verb)
    }

    pub fn keyword(self) -> &'static str {
        VERBS
            .iter()
            .find(|(_, verb)| *verb == self)
            .map(|(name, _)| *name)
            .unwrap_or_default()
    }

    /// Run the handler for this verb against the full command line.
    pub async fn execute<S>(
        self,
        channel: &mut LineChannel<S>,
        state: &mut SessionState,
        line: &str,
    ) -> Result<Flow>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let reply = match self {
            Verb::Helo | Verb::Ehlo => return hello(channel, state, line).await,
            Verb::Mail => mail(state, line),
            Verb::Rcpt => rcpt(state, line),
            Verb::Rset => {
                state.reset();
                tracing::debug!("Envelope reset");
                OK
            }
            Verb::Vrfy => VRFY_UNSUPPORTED,
            Verb::Noop => OK,
            Verb::Data => return data(channel, state).await,
            Verb::Quit => return quit(channel).await,
        };

        channel
            .send([reply])
            .await
            .with_context(|| format!("failed to answer {}", self.keyword()))?;
        Ok(Flow::Continue)
    }
}

async fn hello<S>(
    channel: &mut LineChannel<S>,
    state: &mut SessionState,
    line: &str,
) -> Result<Flow>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if state.has_started() {
        channel.send([ALREADY_STARTED]).await?;
        return Ok(Flow::Continue);
    }

    let Some((verb, client)) = line.trim().split_once(' ') else {
        channel.send([HELO_SYNTAX]).await?;
        return Ok(Flow::Continue);
    };

    state.greeting = verb.to_string();
    state.client_name = client.to_string();
    tracing::debug!("{} from {}", state.greeting, state.client_name);

    channel
        .send([
            format!("250-{}", state.server_name),
            "250-AUTH PLAIN".to_string(),
            "250 HELP".to_string(),
        ])
        .await
        .context("failed to send greeting reply")?;
    Ok(Flow::Continue)
}

fn mail(state: &mut SessionState, line: &str) -> &'static str {
    if !state.has_started() {
        return NOT_STARTED;
    }

    match parse_path(line, "MAIL FROM:") {
        Some(path) => {
            tracing::debug!("FROM: {}", path);
            state.return_path = path.to_string();
            OK
        }
        None => MAIL_SYNTAX,
    }
}

fn rcpt(state: &mut SessionState, line: &str) -> &'static str {
    if !state.has_started() {
        return NOT_STARTED;
    }

    match parse_path(line, "RCPT TO:") {
        Some(path) => {
            tracing::debug!("TO: {}", path);
            state.recipients.push(path.to_string());
            OK
        }
        None => RCPT_SYNTAX,
    }
}

/// No start or envelope check: DATA is accepted in any state.
async fn data<S>(channel: &mut LineChannel<S>, state: &mut SessionState) -> Result<Flow>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    channel.send([OK]).await?;
    let lines = channel
        .read_dot_lines()
        .await
        .context("failed to read DATA block")?;

    state.set_data(&lines);
    tracing::debug!(
        "Received {} header lines and {} body bytes",
        state.headers.len(),
        state.body.len()
    );
    Ok(Flow::Continue)
}

/// The connection is closed before the reply goes out, so the reply only
/// ever fails with `NotConnected`.
async fn quit<S>(channel: &mut LineChannel<S>) -> Result<Flow>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    channel.close().await.context("failed to close connection")?;

    // The failed write is the end of the session, not an error: the client
    // asked to leave and the envelope still goes to the consumer.
    if let Err(e) = channel.send([BYE]).await {
        tracing::debug!("Closing reply not delivered: {}", e);
    }
    Ok(Flow::Close)
}

/// Extract the address from `<prefix> *<address> *`.
///
/// The address must be non-empty and may not contain `>`.
pub fn parse_path<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(prefix)?.trim_start_matches(' ');
    let rest = rest.strip_prefix('<')?;
    let (path, tail) = rest.split_once('>')?;

    if path.is_empty() || !tail.chars().all(|c| c == ' ') {
        return None;
    }
    Some(path)
}
