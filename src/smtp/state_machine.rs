use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};

use super::channel::LineChannel;
use super::command::{Flow, Verb, EMPTY_COMMAND, NOT_RECOGNIZED, READY};
use super::state::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    AwaitingGreeting,
    Established,
    Closed,
}

/// Drives one SMTP session over a connection.
///
/// # Usage
///
/// Call `run` once. It returns `Ok` after `QUIT` and an error when the
/// connection fails; either way `state` holds whatever was captured.
pub struct StateMachine<S> {
    channel: LineChannel<S>,
    state: SessionState,
}

impl<S> StateMachine<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(server_name: impl Into<String>, stream: S) -> Self {
        Self {
            channel: LineChannel::new(stream),
            state: SessionState::new(server_name),
        }
    }

    pub fn phase(&self) -> State {
        if self.channel.is_closed() {
            State::Closed
        } else if self.state.has_started() {
            State::Established
        } else {
            State::AwaitingGreeting
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn into_state(self) -> SessionState {
        self.state
    }

    /// Greet the client and handle commands until `QUIT` or an I/O error.
    ///
    /// The machine is `Closed` when this returns, whatever the outcome.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.serve().await;
        if result.is_err() {
            self.channel.abort();
        }
        result
    }

    async fn serve(&mut self) -> Result<()> {
        self.channel
            .send([READY])
            .await
            .context("failed to send greeting")?;

        loop {
            let line = self.channel.read_line().await?;
            if self.handle_line(&line).await? == Flow::Close {
                return Ok(());
            }
        }
    }

    /// Handle a single command line.
    pub async fn handle_line(&mut self, line: &str) -> Result<Flow> {
        tracing::trace!("Received {:?} in state {:?}", line, self.phase());

        let keyword = match line.trim().split_once(' ') {
            Some((keyword, _)) => keyword,
            None => line.trim(),
        };

        if keyword.is_empty() {
            self.channel.send([EMPTY_COMMAND]).await?;
            return Ok(Flow::Continue);
        }

        match Verb::lookup(keyword) {
            Some(verb) => verb.execute(&mut self.channel, &mut self.state, line).await,
            None => {
                tracing::debug!("Unknown command {}", keyword);
                self.channel.send([NOT_RECOGNIZED]).await?;
                Ok(Flow::Continue)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;

    /// Feed `input` to a fresh session, run it to completion and return the
    /// machine, its result and everything it wrote.
    async fn session(
        input: &str,
    ) -> (StateMachine<DuplexStream>, Result<()>, String) {
        let (server, mut client) = duplex(64 * 1024);
        let mut sm = StateMachine::new("sink.local", server);

        client.write_all(input.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();

        let result = sm.run().await;

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        (sm, result, out)
    }

    fn io_kind(err: &anyhow::Error) -> Option<io::ErrorKind> {
        err.chain()
            .find_map(|e| e.downcast_ref::<io::Error>())
            .map(|e| e.kind())
    }

    #[tokio::test]
    async fn test_regular_flow() {
        let (sm, result, out) = session(
            "EHLO client.local\r\n\
             MAIL FROM: <local@example.com>\r\n\
             RCPT TO:<a@localhost.com>\r\n\
             RCPT TO:<b@localhost.com>\r\n\
             DATA\r\n\
             Subject: hi\r\n\
             \r\n\
             line1\r\n\
             \r\n\
             line2\r\n\
             .\r\n\
             QUIT\r\n",
        )
        .await;

        result.unwrap();
        assert_eq!(sm.phase(), State::Closed);
        assert_eq!(
            out,
            "220 Simple Mail Transfer service ready\r\n\
             250-sink.local\r\n\
             250-AUTH PLAIN\r\n\
             250 HELP\r\n\
             250 OK\r\n\
             250 OK\r\n\
             250 OK\r\n\
             250 OK\r\n"
        );

        let st = sm.into_state();
        assert_eq!(st.greeting, "EHLO");
        assert_eq!(st.client_name, "client.local");
        assert_eq!(st.return_path, "local@example.com");
        assert_eq!(st.recipients, vec!["a@localhost.com", "b@localhost.com"]);
        assert_eq!(st.headers, vec!["Subject: hi"]);
        assert_eq!(st.body, b"line1\r\n\r\nline2\r\n");
    }

    #[tokio::test]
    async fn test_no_greeting() {
        let (sm, result, out) = session(
            "RCPT TO:<u1@x>\r\n\
             MAIL FROM:<local@example.com>\r\n",
        )
        .await;

        assert_eq!(io_kind(&result.unwrap_err()), Some(io::ErrorKind::UnexpectedEof));
        assert_eq!(sm.phase(), State::Closed);
        assert_eq!(
            out,
            "220 Simple Mail Transfer service ready\r\n\
             550 Session has not started yet.\r\n\
             550 Session has not started yet.\r\n"
        );
        assert_eq!(sm.state(), &SessionState::new("sink.local"));
    }

    #[tokio::test]
    async fn test_greeting_errors() {
        let (sm, _, out) = session(
            "HELO\r\n\
             HELO client.local\r\n\
             EHLO other.local\r\n",
        )
        .await;

        assert_eq!(sm.phase(), State::Closed);
        assert_eq!(sm.state().greeting, "HELO");
        assert_eq!(sm.state().client_name, "client.local");
        assert!(out.contains("550 Invalid syntax (EHLO|HELO) domain\r\n"));
        assert!(out.ends_with("250 HELP\r\n550 Session has started\r\n"));
    }

    #[tokio::test]
    async fn test_phase_progression() {
        let (server, _client) = duplex(64 * 1024);
        let mut sm = StateMachine::new("sink.local", server);
        assert_eq!(sm.phase(), State::AwaitingGreeting);

        sm.handle_line("MAIL FROM:<a@b.c>").await.unwrap();
        assert_eq!(sm.phase(), State::AwaitingGreeting);

        sm.handle_line("HELO client.local").await.unwrap();
        assert_eq!(sm.phase(), State::Established);

        sm.handle_line("RSET").await.unwrap();
        assert_eq!(sm.phase(), State::Established);

        assert_eq!(sm.handle_line("QUIT").await.unwrap(), Flow::Close);
        assert_eq!(sm.phase(), State::Closed);
    }

    #[tokio::test]
    async fn test_eof_closes_session() {
        let (sm, result, out) = session("HELO c\r\n").await;

        assert_eq!(io_kind(&result.unwrap_err()), Some(io::ErrorKind::UnexpectedEof));
        assert_eq!(sm.phase(), State::Closed);
        assert!(out.ends_with("250 HELP\r\n"));
        assert_eq!(sm.state().greeting, "HELO");
    }

    #[tokio::test]
    async fn test_write_failure_closes_session() {
        let (server, client) = duplex(64 * 1024);
        let mut sm = StateMachine::new("sink.local", server);
        drop(client);

        let err = sm.run().await.unwrap_err();
        assert_eq!(io_kind(&err), Some(io::ErrorKind::BrokenPipe));
        assert_eq!(sm.phase(), State::Closed);
    }

    #[tokio::test]
    async fn test_syntax_errors_keep_state() {
        let (sm, _, out) = session(
            "HELO client.local\r\n\
             MAIL FROM:<first@example.net>\r\n\
             MAIL FROM:second@example.net\r\n\
             RCPT TO: nobody\r\n\
             \r\n\
             \x20\x20\r\n\
             FOO bar\r\n\
             helo lower\r\n\
             VRFY someone\r\n\
             NOOP\r\n",
        )
        .await;

        let lines: Vec<&str> = out.lines().skip(4).collect();
        assert_eq!(
            lines,
            vec![
                "250 OK",
                "550 Invalid syntax MAIL FROM: <foo@example.net>",
                "550 Invalid syntax RCPT TO: <foo@example.net>",
                "550 Command must not be empty",
                "550 Command must not be empty",
                "550 Command not recognized",
                "550 Command not recognized",
                "550 VRFY not supported",
                "250 OK",
            ]
        );

        let st = sm.state();
        assert_eq!(st.return_path, "first@example.net");
        assert!(st.recipients.is_empty());
    }

    #[tokio::test]
    async fn test_rset() {
        let (sm, result, _) = session(
            "HELO client.local\r\n\
             MAIL FROM:<a@b.c>\r\n\
             RCPT TO:<u1@x>\r\n\
             DATA\r\n\
             Subject: gone\r\n\
             \r\n\
             body\r\n\
             .\r\n\
             RSET\r\n\
             RSET\r\n\
             QUIT\r\n",
        )
        .await;

        result.unwrap();
        let st = sm.into_state();
        assert_eq!(st.greeting, "HELO");
        assert_eq!(st.client_name, "client.local");
        assert_eq!(st.return_path, "");
        assert!(st.recipients.is_empty());
        assert!(st.headers.is_empty());
        assert!(st.body.is_empty());
    }

    #[tokio::test]
    async fn test_data_without_envelope() {
        let (sm, result, out) = session(
            "DATA\r\n\
             X-Test: 1\r\n\
             .\r\n\
             QUIT\r\n",
        )
        .await;

        result.unwrap();
        assert!(out.ends_with("ready\r\n250 OK\r\n"));
        assert_eq!(sm.state().headers, vec!["X-Test: 1"]);
        assert!(sm.state().body.is_empty());
    }

    #[tokio::test]
    async fn test_data_interrupted() {
        let (sm, result, _) = session(
            "HELO client.local\r\n\
             DATA\r\n\
             Subject: never\r\n\
             \r\n\
             partial\r\n",
        )
        .await;

        assert_eq!(io_kind(&result.unwrap_err()), Some(io::ErrorKind::UnexpectedEof));
        assert!(sm.state().headers.is_empty());
        assert!(sm.state().body.is_empty());
    }

    #[tokio::test]
    async fn test_quit_closes_once() {
        let (mut sm, result, out) = session("QUIT\r\nNOOP\r\n").await;

        result.unwrap();
        assert_eq!(sm.phase(), State::Closed);
        assert_eq!(out, "220 Simple Mail Transfer service ready\r\n");

        let err = sm.handle_line("NOOP").await.unwrap_err();
        assert_eq!(io_kind(&err), Some(io::ErrorKind::NotConnected));
        let err = sm.channel.read_line().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
